//! Cellisp - a small Lisp built on cons cells
//!
//! This crate reads textual S-expressions into a tree of cons cells and evaluates
//! them against lexically scoped environments. The language is deliberately small:
//! integers, strings, symbols, booleans and pairs, plus closures, macros and
//! quasiquotation.
//!
//! ```lisp
//! (def x 10)                        ; bind a global
//! (defn (square n) (* n n))         ; named function
//! (def xs '(1 2 3))
//! `(a ,x ,@xs)                      ; => (a 10 1 2 3)
//! (defmacro (twice e) `(begin ,e ,e))
//! ```
//!
//! ## Evaluation model
//!
//! - Integers, strings and the empty list evaluate to themselves.
//! - Symbols are looked up in the environment chain (innermost frame first).
//! - A list evaluates its head and dispatches on the runtime kind of the result:
//!   special forms receive the unevaluated operands, functions receive evaluated
//!   arguments, and macros receive unevaluated operands and have their expansion
//!   evaluated again in the caller's environment.
//! - Every value except `#f` is truthy.
//!
//! ## Binding discipline
//!
//! A name can be bound only once per frame. Re-`def`-ing a global fails with
//! [`Error::AlreadyBound`] instead of silently replacing the old value; inner frames
//! created for each function call may shadow outer names freely.
//!
//! ## Modules
//!
//! - `ast`: the value model and its canonical printed form
//! - `reader`: tokenizer and recursive-descent parser
//! - `environment`: chained binding frames
//! - `evaluator`: `eval`, quasiquote expansion, special forms and lambda lists
//! - `builtinops`: the static registry of special forms and builtin functions

use std::fmt;

use crate::builtinops::Arity;

/// Maximum nesting of lists and quote prefixes accepted by the reader
pub const MAX_PARSE_DEPTH: usize = 256;

/// Categorizes the different kinds of syntax errors.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum ParseErrorKind {
    /// Invalid or unexpected syntax, such as a stray closing parenthesis
    InvalidSyntax,
    /// Input ended before the expression was complete (EOF, unterminated string, unclosed parens)
    Incomplete,
    /// Expression nesting exceeded [`MAX_PARSE_DEPTH`]
    TooDeeplyNested,
}

/// A structured error providing detailed information about a syntax failure.
#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// Context snippet from the input showing where the error occurred
    pub context: Option<String>,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, message: impl Into<String>) -> Self {
        ParseError {
            kind,
            message: message.into(),
            context: None,
        }
    }

    /// Create a ParseError with context extracted from input at a given byte offset
    pub fn with_context(
        kind: ParseErrorKind,
        message: impl Into<String>,
        input: &str,
        error_offset: usize,
    ) -> Self {
        const MAX_CONTEXT: usize = 60;

        let context_start = error_offset.saturating_sub(20);
        let context_str: String = input
            .char_indices()
            .skip_while(|(i, _)| *i < context_start)
            .map(|(_, c)| c)
            .take(MAX_CONTEXT)
            .collect();

        let mut display_context = String::new();
        if context_start > 0 {
            display_context.push_str("[...]");
        }
        display_context.push_str(&context_str);
        if context_start + context_str.len() < input.len() {
            display_context.push_str("[...]");
        }

        // Newlines would break single-line diagnostics
        let display_context = display_context.replace('\n', "\\n").replace('\r', "");

        ParseError {
            kind,
            message: message.into(),
            context: Some(display_context),
        }
    }

    pub fn is_incomplete(&self) -> bool {
        self.kind == ParseErrorKind::Incomplete
    }
}

/// Error types for the interpreter
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    ParseError(ParseError),
    UnboundVariable(String),
    TypeError(String),
    NotCallable(String),
    ArityError {
        expected: Arity,
        got: usize,
        name: String,
    },
    /// A name was bound twice in the same frame
    AlreadyBound(String),
    LoadError {
        path: String,
        message: String,
    },
    EvalError(String),
}

impl Error {
    pub fn arity_error(name: impl Into<String>, expected: Arity, got: usize) -> Self {
        Error::ArityError {
            expected,
            got,
            name: name.into(),
        }
    }

    /// True for syntax errors caused by input that simply stopped too early.
    pub fn is_incomplete_input(&self) -> bool {
        matches!(self, Error::ParseError(e) if e.is_incomplete())
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Self {
        Error::ParseError(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::ParseError(e) => {
                write!(f, "Syntax error: {}", e.message)?;
                if let Some(context) = &e.context {
                    write!(f, "\nContext: {context}")?;
                }
                Ok(())
            }
            Error::UnboundVariable(var) => write!(f, "Unbound variable: {var}"),
            Error::TypeError(msg) => write!(f, "Type error: {msg}"),
            Error::NotCallable(msg) => write!(f, "Failed to evaluate: {msg}"),
            Error::ArityError {
                expected,
                got,
                name,
            } => write!(
                f,
                "Wrong number of arguments to '{name}': expected {expected}, got {got}"
            ),
            Error::AlreadyBound(name) => write!(f, "Can't overwrite {name}"),
            Error::LoadError { path, message } => write!(f, "Cannot load {path}: {message}"),
            Error::EvalError(msg) => write!(f, "Evaluation error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

pub mod ast;
pub mod builtinops;
pub mod environment;
pub mod evaluator;
pub mod reader;

pub use ast::Value;
pub use environment::Environment;
pub use evaluator::{create_global_env, eval};
pub use reader::{Reader, ReaderConfig, read_from_string};
