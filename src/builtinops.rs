//! Built-in operations registry.
//!
//! This module holds the fixed catalogue of names bound in every fresh global
//! environment. The catalogue is a single static table of [`BuiltinOp`] descriptors,
//! never mutated after start-up; each new global environment binds every entry by
//! reference.
//!
//! ## Functions vs Special Forms
//!
//! - **Functions**: Receive their arguments already evaluated, as a proper list
//!   (e.g., `+`, `car`, `cons`)
//! - **Special Forms**: Receive the unevaluated operand list plus the calling
//!   environment (e.g., `if`, `def`, `lambda`). Their implementations live in the
//!   evaluator because they drive evaluation themselves.
//!
//! ## Error Handling
//!
//! - **Type Safety**: Operations reject incorrect types (e.g., `(+ 1 "a")` errors)
//! - **Overflow Detection**: Arithmetic operations detect and report overflow
//! - **Arity Checking**: Argument counts are validated against the table before
//!   the implementation runs
//! - **Proper lists only**: `cons` requires its second argument to be a list, so
//!   improper lists cannot be built from user code
//!
//! ## Adding New Operations
//!
//! 1. **Implement the function** with the signature `fn(args: &Value) -> Result<Value, Error>`
//! 2. **Add it to BUILTIN_OPS** with its identifier and arity
//! 3. **Add tests** covering edge cases and error conditions

use std::fmt;

use crate::Error;
use crate::ast::{Integer, Value};
use crate::environment::Environment;
use crate::evaluator::{
    eval_def, eval_defmacro, eval_defn, eval_if, eval_inc, eval_lambda, eval_load, eval_macro,
};

/// Builtin function: receives the evaluated argument list
pub type BuiltinFn = fn(&Value) -> Result<Value, Error>;

/// Special form: receives the calling environment and the unevaluated operand list
pub type SpecialFormFn = fn(&Environment, &Value) -> Result<Value, Error>;

/// Expected number of arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly n arguments
    Exact(usize),
    /// At least n arguments
    AtLeast(usize),
    /// Between min and max arguments (inclusive)
    Range(usize, usize),
    /// Any number of arguments
    Any,
}

impl Arity {
    pub(crate) fn validate(self, name: &str, got: usize) -> Result<(), Error> {
        let ok = match self {
            Arity::Exact(n) => got == n,
            Arity::AtLeast(n) => got >= n,
            Arity::Range(min, max) => (min..=max).contains(&got),
            Arity::Any => true,
        };
        if ok {
            Ok(())
        } else {
            Err(Error::arity_error(name, self, got))
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{n}"),
            Arity::AtLeast(n) => write!(f, "at least {n}"),
            Arity::Range(min, max) => write!(f, "{min} to {max}"),
            Arity::Any => write!(f, "any number"),
        }
    }
}

/// Represents the implementation of a built-in (function or special form)
#[derive(Clone, Copy)]
pub enum OpKind {
    Function(BuiltinFn),
    SpecialForm(SpecialFormFn),
}

impl fmt::Debug for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpKind::Function(_) => write!(f, "Function(<fn>)"),
            OpKind::SpecialForm(_) => write!(f, "SpecialForm(<fn>)"),
        }
    }
}

/// Definition of a built-in operation
#[derive(Debug)]
pub struct BuiltinOp {
    /// The name bound in the global environment
    pub id: &'static str,
    pub op_kind: OpKind,
    /// Expected number of arguments (operands, for special forms)
    pub arity: Arity,
}

impl BuiltinOp {
    pub(crate) fn is_special_form(&self) -> bool {
        matches!(self.op_kind, OpKind::SpecialForm(_))
    }
}

//
// Builtin Function Implementations
//

/// Iterate over the arguments of an arithmetic builtin, requiring integers
fn integer_args<'a>(
    op: &'static str,
    args: &'a Value,
) -> impl Iterator<Item = Result<Integer, Error>> + 'a {
    args.iter().map(move |arg| match arg {
        Value::Integer(n) => Ok(*n),
        other => Err(Error::TypeError(format!(
            "'{op}' requires integers, got {}: {other}",
            other.type_name()
        ))),
    })
}

fn overflow(op: &str) -> Error {
    Error::EvalError(format!("Integer overflow in {op}"))
}

fn builtin_add(args: &Value) -> Result<Value, Error> {
    let mut sum: Integer = 0;
    for n in integer_args("+", args) {
        sum = sum.checked_add(n?).ok_or_else(|| overflow("addition"))?;
    }
    Ok(Value::Integer(sum))
}

fn builtin_mul(args: &Value) -> Result<Value, Error> {
    let mut product: Integer = 1;
    for n in integer_args("*", args) {
        product = product
            .checked_mul(n?)
            .ok_or_else(|| overflow("multiplication"))?;
    }
    Ok(Value::Integer(product))
}

fn builtin_sub(args: &Value) -> Result<Value, Error> {
    let mut numbers = integer_args("-", args);
    let Some(first) = numbers.next() else {
        return Err(Error::arity_error("-", Arity::AtLeast(1), 0));
    };
    let first = first?;
    let mut numbers = numbers.peekable();

    if numbers.peek().is_none() {
        return first
            .checked_neg()
            .map(Value::Integer)
            .ok_or_else(|| overflow("negation"));
    }

    let mut result = first;
    for n in numbers {
        result = result
            .checked_sub(n?)
            .ok_or_else(|| overflow("subtraction"))?;
    }
    Ok(Value::Integer(result))
}

fn builtin_div(args: &Value) -> Result<Value, Error> {
    let mut numbers = integer_args("/", args);
    let Some(first) = numbers.next() else {
        return Err(Error::arity_error("/", Arity::AtLeast(1), 0));
    };
    let first = first?;
    let mut numbers = numbers.peekable();

    // Unary form is the reciprocal
    let (mut result, divisors): (Integer, Vec<Result<Integer, Error>>) =
        if numbers.peek().is_none() {
            (1, vec![Ok(first)])
        } else {
            (first, numbers.collect())
        };

    for divisor in divisors {
        let divisor = divisor?;
        if divisor == 0 {
            return Err(Error::EvalError("Division by zero".into()));
        }
        result = result
            .checked_div(divisor)
            .ok_or_else(|| overflow("division"))?;
    }
    Ok(Value::Integer(result))
}

/// The sole argument of a one-argument builtin (arity is checked by the caller)
fn sole_arg(args: &Value) -> &Value {
    args.first().unwrap_or(&Value::Empty)
}

fn builtin_car(args: &Value) -> Result<Value, Error> {
    match sole_arg(args) {
        Value::Pair(pair) => Ok(pair.first.clone()),
        other => Err(Error::TypeError(format!(
            "pair required, but got {other}"
        ))),
    }
}

fn builtin_cdr(args: &Value) -> Result<Value, Error> {
    match sole_arg(args) {
        Value::Pair(pair) => Ok(pair.rest.clone()),
        other => Err(Error::TypeError(format!(
            "pair required, but got {other}"
        ))),
    }
}

fn builtin_cons(args: &Value) -> Result<Value, Error> {
    let mut elements = args.iter();
    let (Some(first), Some(rest)) = (elements.next(), elements.next()) else {
        return Err(Error::arity_error("cons", Arity::Exact(2), args.len()));
    };
    match rest {
        Value::Pair(_) | Value::Empty => Ok(Value::cons(first.clone(), rest.clone())),
        other => Err(Error::TypeError(format!(
            "cons requires a list as second argument, got {other}"
        ))),
    }
}

fn builtin_list(args: &Value) -> Result<Value, Error> {
    // Argument lists are always proper lists, so they can be returned as-is
    Ok(args.clone())
}

fn builtin_type_of(args: &Value) -> Result<Value, Error> {
    Ok(Value::Type(sole_arg(args).type_of()))
}

fn builtin_is_empty(args: &Value) -> Result<Value, Error> {
    Ok(Value::Bool(sole_arg(args).is_empty_list()))
}

fn builtin_println(args: &Value) -> Result<Value, Error> {
    for arg in args.iter() {
        match arg {
            Value::String(s) => println!("{s}"),
            other => println!("{other}"),
        }
    }
    Ok(Value::Bool(true))
}

/// Global registry of all built-in operations.
///
/// Special forms come first, then functions; the global environment binds them
/// in that order.
static BUILTIN_OPS: &[BuiltinOp] = &[
    // Definitions
    BuiltinOp {
        id: "def",
        op_kind: OpKind::SpecialForm(eval_def),
        arity: Arity::AtLeast(1),
    },
    BuiltinOp {
        id: "defn",
        op_kind: OpKind::SpecialForm(eval_defn),
        arity: Arity::AtLeast(1),
    },
    BuiltinOp {
        id: "defmacro",
        op_kind: OpKind::SpecialForm(eval_defmacro),
        arity: Arity::AtLeast(1),
    },
    // Closures
    BuiltinOp {
        id: "lambda",
        op_kind: OpKind::SpecialForm(eval_lambda),
        arity: Arity::AtLeast(1),
    },
    BuiltinOp {
        id: "fn",
        op_kind: OpKind::SpecialForm(eval_lambda),
        arity: Arity::AtLeast(1),
    },
    BuiltinOp {
        id: "macro",
        op_kind: OpKind::SpecialForm(eval_macro),
        arity: Arity::AtLeast(1),
    },
    // Control flow and mutation
    BuiltinOp {
        id: "if",
        op_kind: OpKind::SpecialForm(eval_if),
        arity: Arity::Range(2, 3),
    },
    BuiltinOp {
        id: "inc!",
        op_kind: OpKind::SpecialForm(eval_inc),
        arity: Arity::Exact(1),
    },
    BuiltinOp {
        id: "load",
        op_kind: OpKind::SpecialForm(eval_load),
        arity: Arity::Any,
    },
    // Arithmetic operations
    BuiltinOp {
        id: "+",
        op_kind: OpKind::Function(builtin_add),
        arity: Arity::Any,
    },
    BuiltinOp {
        id: "-",
        op_kind: OpKind::Function(builtin_sub),
        arity: Arity::AtLeast(1),
    },
    BuiltinOp {
        id: "*",
        op_kind: OpKind::Function(builtin_mul),
        arity: Arity::Any,
    },
    BuiltinOp {
        id: "/",
        op_kind: OpKind::Function(builtin_div),
        arity: Arity::AtLeast(1),
    },
    // List operations
    BuiltinOp {
        id: "car",
        op_kind: OpKind::Function(builtin_car),
        arity: Arity::Exact(1),
    },
    BuiltinOp {
        id: "cdr",
        op_kind: OpKind::Function(builtin_cdr),
        arity: Arity::Exact(1),
    },
    BuiltinOp {
        id: "cons",
        op_kind: OpKind::Function(builtin_cons),
        arity: Arity::Exact(2),
    },
    BuiltinOp {
        id: "list",
        op_kind: OpKind::Function(builtin_list),
        arity: Arity::Any,
    },
    BuiltinOp {
        id: "empty?",
        op_kind: OpKind::Function(builtin_is_empty),
        arity: Arity::Exact(1),
    },
    // Introspection and output
    BuiltinOp {
        id: "type-of",
        op_kind: OpKind::Function(builtin_type_of),
        arity: Arity::Exact(1),
    },
    BuiltinOp {
        id: "println",
        op_kind: OpKind::Function(builtin_println),
        arity: Arity::Any,
    },
];

/// Get all builtin operations (for internal use by the evaluator)
pub(crate) fn get_builtin_ops() -> &'static [BuiltinOp] {
    BUILTIN_OPS
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{nil, sym, val};
    use crate::ast::ValueType;

    fn find_op(id: &str) -> &'static BuiltinOp {
        get_builtin_ops().iter().find(|op| op.id == id).unwrap()
    }

    /// Call a builtin function directly, validating arity the way the evaluator does
    fn call(id: &str, args: Value) -> Result<Value, Error> {
        let op = find_op(id);
        op.arity.validate(op.id, args.len())?;
        match op.op_kind {
            OpKind::Function(f) => f(&args),
            OpKind::SpecialForm(_) => panic!("{id} is a special form"),
        }
    }

    #[derive(Debug)]
    enum Expected {
        Ok(Value),
        Err(&'static str),
    }
    use Expected::*;

    #[test]
    fn test_builtin_functions_data_driven() {
        let test_cases = vec![
            // === ARITHMETIC ===
            ("+", nil(), Ok(val(0))),
            ("+", val([1, 2]), Ok(val(3))),
            ("+", val([1, 2, 3, 4]), Ok(val(10))),
            ("*", nil(), Ok(val(1))),
            ("*", val([2, 3, 4]), Ok(val(24))),
            ("-", val([5]), Ok(val(-5))),
            ("-", val([10, 3, 2]), Ok(val(5))),
            ("-", nil(), Err("Wrong number of arguments to '-'")),
            ("/", val([20, 2, 5]), Ok(val(2))),
            ("/", val([7, 2]), Ok(val(3))),
            ("/", val([1]), Ok(val(1))),
            ("/", val([5]), Ok(val(0))),
            ("/", val([1, 0]), Err("Division by zero")),
            ("+", val(vec![val(1), val("a")]), Err("'+' requires integers")),
            ("-", val(vec![sym("x")]), Err("'-' requires integers")),
            // Overflow is reported, never wrapped
            ("+", val(vec![val(i64::MAX), val(1)]), Err("overflow")),
            ("*", val(vec![val(i64::MAX), val(2)]), Err("overflow")),
            ("-", val(vec![val(i64::MIN)]), Err("overflow")),
            ("/", val(vec![val(i64::MIN), val(-1)]), Err("overflow")),
            // === LISTS ===
            ("car", val(vec![val([1, 2])]), Ok(val(1))),
            ("cdr", val(vec![val([1, 2])]), Ok(val([2]))),
            ("cdr", val(vec![val([1])]), Ok(nil())),
            ("car", val(vec![nil()]), Err("pair required")),
            ("cdr", val(vec![val(3)]), Err("pair required")),
            ("car", val([1, 2]), Err("Wrong number of arguments to 'car'")),
            ("cons", val(vec![val(1), val([2])]), Ok(val([1, 2]))),
            ("cons", val(vec![val(1), nil()]), Ok(val([1]))),
            ("cons", val([1, 2]), Err("cons requires a list")),
            ("list", nil(), Ok(nil())),
            ("list", val([1, 2, 3]), Ok(val([1, 2, 3]))),
            ("empty?", val(vec![nil()]), Ok(val(true))),
            ("empty?", val(vec![val([1])]), Ok(val(false))),
            ("empty?", val(vec![val(0)]), Ok(val(false))),
            // === INTROSPECTION ===
            ("type-of", val([1]), Ok(Value::Type(ValueType::Integer))),
            ("type-of", val(vec![nil()]), Ok(Value::Type(ValueType::Cell))),
            ("type-of", val(vec![val("s")]), Ok(Value::Type(ValueType::String))),
            ("type-of", val([1, 2]), Err("Wrong number of arguments to 'type-of'")),
            ("println", nil(), Ok(val(true))),
        ];

        for (i, (id, args, expected)) in test_cases.into_iter().enumerate() {
            let test_id = format!("Builtin test #{} ({id} {args})", i + 1);
            match (call(id, args), expected) {
                (Result::Ok(actual), Ok(expected)) => {
                    assert_eq!(actual, expected, "{test_id}: value mismatch");
                }
                (Result::Err(err), Err(expected_text)) => {
                    let msg = format!("{err}");
                    assert!(
                        msg.contains(expected_text),
                        "{test_id}: error should contain '{expected_text}', got: {msg}"
                    );
                }
                (actual, expected) => {
                    panic!("{test_id}: expected {expected:?}, got {actual:?}");
                }
            }
        }
    }

    #[test]
    fn test_registry_layout() {
        let ops = get_builtin_ops();

        // Every name is registered exactly once
        for op in ops {
            assert_eq!(
                ops.iter().filter(|other| other.id == op.id).count(),
                1,
                "duplicate registry entry for {}",
                op.id
            );
        }

        // Special forms precede functions
        let first_function = ops.iter().position(|op| !op.is_special_form()).unwrap();
        assert!(ops[first_function..].iter().all(|op| !op.is_special_form()));

        for id in ["def", "lambda", "fn", "macro", "defn", "defmacro", "if", "inc!", "load"] {
            assert!(find_op(id).is_special_form(), "{id} should be a special form");
        }
    }

    #[test]
    fn test_arity_validation() {
        assert!(Arity::Exact(1).validate("f", 1).is_ok());
        assert!(Arity::Exact(1).validate("f", 2).is_err());
        assert!(Arity::AtLeast(1).validate("f", 0).is_err());
        assert!(Arity::Range(2, 3).validate("f", 3).is_ok());
        assert!(Arity::Range(2, 3).validate("f", 4).is_err());
        assert!(Arity::Any.validate("f", 100).is_ok());

        let err = Arity::Exact(2).validate("cons", 3).unwrap_err();
        assert_eq!(
            format!("{err}"),
            "Wrong number of arguments to 'cons': expected 2, got 3"
        );
    }
}
