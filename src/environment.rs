use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::rc::Rc;

use tracing::debug;

use crate::Error;
use crate::ast::{Callable, Symbol, Value};
use crate::builtinops::{OpKind, get_builtin_ops};
use crate::evaluator::eval;
use crate::reader::{Reader, ReaderConfig, read_from_string};

/// A chain of binding frames.
///
/// Cloning an `Environment` is cheap and yields a handle to the same frame, so
/// closures capture their defining environment by sharing it. Each function or
/// macro application gets a fresh child frame from [`Environment::derive`].
#[derive(Clone)]
pub struct Environment {
    frame: Rc<Frame>,
}

struct Frame {
    bindings: RefCell<HashMap<Symbol, Value>>,
    parent: Option<Environment>,
}

impl Environment {
    pub(crate) fn new() -> Self {
        Environment {
            frame: Rc::new(Frame {
                bindings: RefCell::new(HashMap::new()),
                parent: None,
            }),
        }
    }

    /// Build a global environment: `#t`/`#f`, then every special form, then every
    /// builtin function, then the given bootstrap source.
    ///
    /// An error in the bootstrap source fails the whole construction.
    pub fn with_prelude(prelude: &str) -> Result<Self, Error> {
        let env = Environment::new();

        env.intern(Symbol::new("#t"), Value::Bool(true))?;
        env.intern(Symbol::new("#f"), Value::Bool(false))?;

        let ops = get_builtin_ops();
        for op in ops.iter().filter(|op| op.is_special_form()) {
            env.intern(Symbol::new(op.id), Value::SpecialForm(op))?;
        }
        for op in ops {
            if let OpKind::Function(_) = op.op_kind {
                env.intern(
                    Symbol::new(op.id),
                    Value::Function(Rc::new(Callable::builtin(op))),
                )?;
            }
        }
        debug!(builtins = ops.len(), "registered builtin operations");

        let (_, forms) = env
            .eval_forms(prelude, ReaderConfig::source_file())
            .inspect_err(|err| debug!(%err, "bootstrap failed"))?;
        debug!(forms, "bootstrap source evaluated");

        Ok(env)
    }

    /// A child frame whose parent is this environment
    pub fn derive(&self) -> Self {
        Environment {
            frame: Rc::new(Frame {
                bindings: RefCell::new(HashMap::new()),
                parent: Some(self.clone()),
            }),
        }
    }

    /// Bind `symbol` in this frame. A name can only be bound once per frame.
    pub fn intern(&self, symbol: Symbol, value: Value) -> Result<(), Error> {
        let mut bindings = self.frame.bindings.borrow_mut();
        if bindings.contains_key(&symbol) {
            return Err(Error::AlreadyBound(symbol.name().to_owned()));
        }
        bindings.insert(symbol, value);
        Ok(())
    }

    /// Remove a binding from this frame only, returning its value
    pub fn unintern(&self, symbol: &Symbol) -> Option<Value> {
        self.frame.bindings.borrow_mut().remove(symbol)
    }

    /// Look `symbol` up in this frame, then in each enclosing frame
    pub fn lookup(&self, symbol: &Symbol) -> Result<Value, Error> {
        let mut env = self;
        loop {
            if let Some(value) = env.frame.bindings.borrow().get(symbol) {
                return Ok(value.clone());
            }
            match &env.frame.parent {
                Some(parent) => env = parent,
                None => return Err(Error::UnboundVariable(symbol.name().to_owned())),
            }
        }
    }

    /// Add one to the integer bound to `symbol`, in the frame that owns the binding.
    pub(crate) fn increment(&self, symbol: &Symbol) -> Result<Value, Error> {
        let mut env = self;
        loop {
            if let Some(slot) = env.frame.bindings.borrow_mut().get_mut(symbol) {
                return match slot {
                    Value::Integer(n) => {
                        *n = n
                            .checked_add(1)
                            .ok_or_else(|| Error::EvalError("Integer overflow in inc!".into()))?;
                        Ok(Value::Integer(*n))
                    }
                    other => Err(Error::TypeError(format!(
                        "inc! requires an integer, but {symbol} is {}",
                        other.type_name()
                    ))),
                };
            }
            match &env.frame.parent {
                Some(parent) => env = parent,
                None => return Err(Error::UnboundVariable(symbol.name().to_owned())),
            }
        }
    }

    /// All visible bindings, inner frames shadowing outer ones, sorted by name
    pub fn bindings(&self) -> Vec<(String, Value)> {
        let mut visible = HashMap::new();
        let mut env = Some(self);
        while let Some(current) = env {
            for (symbol, value) in current.frame.bindings.borrow().iter() {
                visible
                    .entry(symbol.name().to_owned())
                    .or_insert_with(|| value.clone());
            }
            env = current.frame.parent.as_ref();
        }

        let mut result: Vec<_> = visible.into_iter().collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }

    /// Read exactly one expression from `input` and evaluate it
    pub fn eval_string(&self, input: &str) -> Result<Value, Error> {
        let (expr, _) = read_from_string(input)?;
        eval(&expr, self)
    }

    /// Evaluate every top-level form in `source`, returning the last result
    /// (`()` when there are none).
    pub fn eval_source(&self, source: &str, config: ReaderConfig) -> Result<Value, Error> {
        self.eval_forms(source, config).map(|(last, _)| last)
    }

    fn eval_forms(&self, source: &str, config: ReaderConfig) -> Result<(Value, usize), Error> {
        let mut last = Value::Empty;
        let mut count = 0;
        for expr in Reader::with_config(source, config) {
            last = eval(&expr?, self)?;
            count += 1;
        }
        Ok((last, count))
    }

    /// Evaluate every top-level form read from `input`, stopping at the first error
    pub fn load<R: Read>(&self, input: R) -> Result<Value, Error> {
        self.load_named(input, "<input>")
    }

    /// Open `path` and evaluate its top-level forms
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Value, Error> {
        let path = path.as_ref();
        let name = path.display().to_string();
        let file = File::open(path).map_err(|e| Error::LoadError {
            path: name.clone(),
            message: e.to_string(),
        })?;
        self.load_named(file, &name)
    }

    fn load_named<R: Read>(&self, mut input: R, name: &str) -> Result<Value, Error> {
        let mut source = String::new();
        input
            .read_to_string(&mut source)
            .map_err(|e| Error::LoadError {
                path: name.to_owned(),
                message: e.to_string(),
            })?;

        // Syntax errors belong to the loaded source, not to the caller's input
        let (last, forms) = self
            .eval_forms(&source, ReaderConfig::source_file())
            .map_err(|err| match err {
                Error::ParseError(_) => Error::LoadError {
                    path: name.to_owned(),
                    message: err.to_string(),
                },
                other => other,
            })?;
        debug!(path = name, forms, "loaded");
        Ok(last)
    }
}

impl fmt::Debug for Environment {
    // Closures point back at their frames, so only a summary is printed
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut depth = 0;
        let mut parent = self.frame.parent.as_ref();
        while let Some(env) = parent {
            depth += 1;
            parent = env.frame.parent.as_ref();
        }
        f.debug_struct("Environment")
            .field("bindings", &self.frame.bindings.borrow().len())
            .field("depth", &depth)
            .finish()
    }
}
