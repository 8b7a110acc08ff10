use std::rc::Rc;

use tracing::trace;

use crate::Error;
use crate::ast::{Callable, CallableBody, Pair, Value};
use crate::builtinops::{Arity, BuiltinOp, OpKind};
use crate::environment::Environment;

/// Bootstrap source evaluated into every global environment
const PRELUDE: &str = include_str!("prelude.lisp");

/// Evaluate an expression in `env`
pub fn eval(expr: &Value, env: &Environment) -> Result<Value, Error> {
    match expr {
        // Self-evaluating forms
        Value::Empty | Value::Integer(_) | Value::String(_) => Ok(expr.clone()),

        Value::Symbol(symbol) => env.lookup(symbol),

        Value::Quoted(quoted) => Ok(Value::clone(quoted)),

        Value::Quasiquoted(template) => eval_quasiquoted(template, env),

        Value::Pair(pair) => eval_pair(pair, env),

        // Only reachable through data built at runtime, never from read syntax
        Value::Bool(_)
        | Value::Unquoted(_)
        | Value::SplicingUnquoted(_)
        | Value::Function(_)
        | Value::Macro(_)
        | Value::SpecialForm(_)
        | Value::Type(_) => Err(Error::EvalError(format!("Failed to eval {expr}"))),
    }
}

/// Evaluate a call: the head decides how the operands are treated
fn eval_pair(pair: &Pair, env: &Environment) -> Result<Value, Error> {
    let head = eval(&pair.first, env)?;
    let operands = &pair.rest;

    match head {
        Value::SpecialForm(&BuiltinOp {
            id,
            op_kind: OpKind::SpecialForm(form),
            arity,
        }) => {
            arity.validate(id, operands.len())?;
            form(env, operands)
        }
        Value::Function(function) => {
            let args = eval_each(operands, env)?;
            function.apply(&args)
        }
        Value::Macro(macro_) => {
            let expansion = macro_.apply(operands)?;
            trace!(name = macro_.name(), %expansion, "macro expanded");
            eval(&expansion, env)
        }
        other => Err(Error::NotCallable(format!("{other} is not callable"))),
    }
}

/// Evaluate every element of `operands` left to right into a new list
fn eval_each(operands: &Value, env: &Environment) -> Result<Value, Error> {
    let values = operands
        .iter()
        .map(|operand| eval(operand, env))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Value::list(values))
}

/// Evaluate body forms in order, returning the last result (`()` for an empty body)
fn begin(body: &Value, env: &Environment) -> Result<Value, Error> {
    let mut result = Value::Empty;
    for form in body.iter() {
        result = eval(form, env)?;
    }
    Ok(result)
}

/// Expand a quasiquote template one level deep.
///
/// Splicing only looks one position ahead: in a pair whose second element is
/// `,@e`, the value of `e` becomes the rest of the result, so anything after the
/// splice is dropped.
fn eval_quasiquoted(template: &Value, env: &Environment) -> Result<Value, Error> {
    match template {
        Value::Unquoted(expr) => eval(expr, env),
        Value::Pair(_) => {
            // Walk the spine in a loop; only element nesting recurses
            let mut heads = Vec::new();
            let mut current = template;
            let tail = loop {
                let Value::Pair(pair) = current else {
                    break eval_quasiquoted(current, env)?;
                };
                heads.push(eval_quasiquoted(&pair.first, env)?);
                if let Some(Value::SplicingUnquoted(spliced)) = pair.rest.first() {
                    break match eval(spliced, env)? {
                        tail @ (Value::Pair(_) | Value::Empty) => tail,
                        other => {
                            return Err(Error::TypeError(format!(
                                ",@ requires a list, but got {other}"
                            )));
                        }
                    };
                }
                current = &pair.rest;
            };
            Ok(heads
                .into_iter()
                .rev()
                .fold(tail, |rest, first| Value::cons(first, rest)))
        }
        other => Ok(other.clone()),
    }
}

impl Callable {
    /// Call with an argument list: evaluated arguments for functions, raw operands
    /// for macros.
    pub fn apply(&self, args: &Value) -> Result<Value, Error> {
        match &self.body {
            CallableBody::Builtin(op) => match op.op_kind {
                OpKind::Function(func) => {
                    op.arity.validate(op.id, args.len())?;
                    func(args)
                }
                OpKind::SpecialForm(_) => Err(Error::NotCallable(format!(
                    "special form {} cannot be applied to values",
                    op.id
                ))),
            },
            CallableBody::Lambda(lambda) => {
                let frame = lambda.env.derive();
                bind_lambda_list(&frame, &lambda.params, args, &self.name)?;
                begin(&lambda.body, &frame)
            }
        }
    }
}

/// Number of plain formals before any `.` marker
fn required_arity(params: &Value) -> usize {
    params
        .iter()
        .take_while(|formal| !matches!(formal, Value::Symbol(s) if s.is_rest_marker()))
        .filter(|formal| matches!(formal, Value::Symbol(_)))
        .count()
}

/// Bind formals to actual arguments in a fresh frame.
///
/// - `sym` takes the next argument
/// - `(sym default)` takes the next argument, or the default expression
///   (unevaluated) once the arguments run out
/// - `. sym` takes the remaining argument list and ends the walk
///
/// Arguments left over after the last formal are ignored.
fn bind_lambda_list(
    frame: &Environment,
    params: &Value,
    args: &Value,
    name: &str,
) -> Result<(), Error> {
    let mut formals = params.iter();
    let mut actuals = args;

    while let Some(formal) = formals.next() {
        match formal {
            Value::Symbol(marker) if marker.is_rest_marker() => {
                return match formals.next() {
                    Some(Value::Symbol(rest)) => frame.intern(rest.clone(), actuals.clone()),
                    _ => Err(Error::TypeError(format!(
                        "'.' must be followed by a symbol in lambda list {params}"
                    ))),
                };
            }
            Value::Symbol(symbol) => {
                let Value::Pair(pair) = actuals else {
                    return Err(Error::arity_error(
                        name,
                        Arity::AtLeast(required_arity(params)),
                        args.len(),
                    ));
                };
                frame.intern(symbol.clone(), pair.first.clone())?;
                actuals = &pair.rest;
            }
            Value::Pair(optional) => {
                let (Value::Symbol(symbol), Some(default)) = (&optional.first, optional.rest.first())
                else {
                    return Err(Error::TypeError(format!(
                        "optional parameter must be (name default), got {formal}"
                    )));
                };
                match actuals {
                    Value::Pair(pair) => {
                        frame.intern(symbol.clone(), pair.first.clone())?;
                        actuals = &pair.rest;
                    }
                    _ => frame.intern(symbol.clone(), default.clone())?,
                }
            }
            other => {
                return Err(Error::TypeError(format!(
                    "invalid lambda list element: {other}"
                )));
            }
        }
    }
    Ok(())
}

fn check_lambda_list(params: &Value) -> Result<(), Error> {
    match params {
        Value::Empty | Value::Pair(_) => Ok(()),
        other => Err(Error::TypeError(format!(
            "lambda list must be a list, got {other}"
        ))),
    }
}

/// Split `(lambda-list body...)` operands into a closure over `env`
fn make_closure(name: &str, env: &Environment, operands: &Value) -> Result<Callable, Error> {
    let params = operands.first().unwrap_or(&Value::Empty);
    let body = operands.rest().unwrap_or(&Value::Empty);
    check_lambda_list(params)?;
    Ok(Callable::lambda(
        name,
        params.clone(),
        body.clone(),
        env.clone(),
    ))
}

/// `(lambda lambda-list body...)` and `(fn lambda-list body...)`
pub(crate) fn eval_lambda(env: &Environment, operands: &Value) -> Result<Value, Error> {
    Ok(Value::Function(Rc::new(make_closure(
        "#lambda", env, operands,
    )?)))
}

/// `(macro lambda-list body...)`
pub(crate) fn eval_macro(env: &Environment, operands: &Value) -> Result<Value, Error> {
    Ok(Value::Macro(Rc::new(make_closure("#macro", env, operands)?)))
}

/// Shared by `defn` and `defmacro`: `((name . lambda-list) body...)`
fn define_named(
    form: &str,
    env: &Environment,
    operands: &Value,
    wrap: fn(Rc<Callable>) -> Value,
) -> Result<Value, Error> {
    let Some(Value::Pair(signature)) = operands.first() else {
        return Err(Error::TypeError(format!(
            "{form} requires (name . lambda-list), got {operands}"
        )));
    };
    let Value::Symbol(name) = &signature.first else {
        return Err(Error::TypeError(format!(
            "{form} requires a symbol as name, got {}",
            signature.first
        )));
    };
    check_lambda_list(&signature.rest)?;

    let body = operands.rest().unwrap_or(&Value::Empty);
    let callable = Callable::lambda(
        name.name(),
        signature.rest.clone(),
        body.clone(),
        env.clone(),
    );
    env.intern(name.clone(), wrap(Rc::new(callable)))?;
    Ok(Value::Symbol(name.clone()))
}

/// `(defn (name . lambda-list) body...)`
pub(crate) fn eval_defn(env: &Environment, operands: &Value) -> Result<Value, Error> {
    define_named("defn", env, operands, Value::Function)
}

/// `(defmacro (name . lambda-list) body...)`
pub(crate) fn eval_defmacro(env: &Environment, operands: &Value) -> Result<Value, Error> {
    define_named("defmacro", env, operands, Value::Macro)
}

/// `(def name expr)` binds a value; `(def (name . lambda-list) body...)` is `defn`
pub(crate) fn eval_def(env: &Environment, operands: &Value) -> Result<Value, Error> {
    match operands.first() {
        Some(Value::Symbol(name)) => {
            let args = operands.to_vec()?;
            let [_, expr] = args.as_slice() else {
                return Err(Error::arity_error("def", Arity::Exact(2), args.len()));
            };
            let value = eval(expr, env)?.named(name.name());
            env.intern(name.clone(), value)?;
            Ok(Value::Symbol(name.clone()))
        }
        Some(Value::Pair(_)) => eval_defn(env, operands),
        Some(other) => Err(Error::TypeError(format!(
            "def requires a symbol, got {other}"
        ))),
        None => Err(Error::arity_error("def", Arity::AtLeast(1), 0)),
    }
}

/// `(if test then [else])`; only `#f` selects the else branch
pub(crate) fn eval_if(env: &Environment, operands: &Value) -> Result<Value, Error> {
    let mut parts = operands.iter();
    let (Some(test), Some(then)) = (parts.next(), parts.next()) else {
        return Err(Error::arity_error("if", Arity::Range(2, 3), operands.len()));
    };

    if eval(test, env)?.is_truthy() {
        eval(then, env)
    } else {
        match parts.next() {
            Some(otherwise) => eval(otherwise, env),
            None => Ok(Value::Empty),
        }
    }
}

/// `(inc! symbol)`
pub(crate) fn eval_inc(env: &Environment, operands: &Value) -> Result<Value, Error> {
    match operands.first() {
        Some(Value::Symbol(symbol)) => env.increment(symbol),
        other => Err(Error::TypeError(format!(
            "inc! requires a symbol, got {}",
            other.unwrap_or(&Value::Empty)
        ))),
    }
}

/// `(load "path" ...)`: evaluate each file's forms in order
pub(crate) fn eval_load(env: &Environment, operands: &Value) -> Result<Value, Error> {
    for operand in operands.iter() {
        let Value::String(path) = operand else {
            return Err(Error::LoadError {
                path: operand.to_string(),
                message: "load requires string paths".into(),
            });
        };
        env.load_file(&**path)?;
    }
    Ok(Value::Bool(true))
}

/// Create a global environment with every builtin and the bundled prelude
pub fn create_global_env() -> Result<Environment, Error> {
    Environment::with_prelude(PRELUDE)
}
