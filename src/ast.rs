//! This module defines the expression model shared by the reader and the evaluator.
//! The main enum, [`Value`], covers every runtime value: cons cells and the empty
//! list, symbols, integers, strings, booleans, the reader's quote wrappers,
//! callables (functions, macros, special forms) and type tags. Lists are built from
//! reference-counted [`Pair`] cells so that environments, closures and quoted data
//! can share structure freely. Ergonomic helpers such as [`val`], [`sym`] and
//! [`nil`] keep AST construction in tests short. The `Display` impl is the
//! canonical rendering used by the REPL, by error messages and for round-trips.

use std::fmt;
use std::rc::Rc;

use crate::Error;
use crate::builtinops::BuiltinOp;
use crate::environment::Environment;

/// Type alias for integer values in the interpreter
pub(crate) type Integer = i64;

/// An immutable symbol name. Symbols compare and hash by name.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Symbol(Rc<str>);

impl Symbol {
    pub fn new(name: &str) -> Self {
        Symbol(Rc::from(name))
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    /// The `.` marker that introduces a rest parameter in a lambda list
    pub(crate) fn is_rest_marker(&self) -> bool {
        &*self.0 == "."
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.0)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A cons cell. Only reachable through [`Value::Pair`]; the empty list is the
/// separate [`Value::Empty`] variant, never a pair with missing halves.
pub struct Pair {
    pub first: Value,
    pub rest: Value,
}

impl Drop for Pair {
    // Unlink the spine one cell at a time so long lists drop in constant stack
    fn drop(&mut self) {
        let mut rest = std::mem::replace(&mut self.rest, Value::Empty);
        while let Value::Pair(cell) = rest {
            match Rc::try_unwrap(cell) {
                Ok(mut owned) => rest = std::mem::replace(&mut owned.rest, Value::Empty),
                // Still shared elsewhere; that owner drops the remainder
                Err(_) => break,
            }
        }
    }
}

/// Dynamic type tags returned by `type-of`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Cell,
    Symbol,
    Integer,
    String,
    Function,
    Macro,
    SpecialForm,
    Bool,
    Type,
    Unknown,
}

impl ValueType {
    pub fn name(self) -> &'static str {
        match self {
            ValueType::Cell => "cell",
            ValueType::Symbol => "symbol",
            ValueType::Integer => "integer",
            ValueType::String => "string",
            ValueType::Function => "function",
            ValueType::Macro => "macro",
            ValueType::SpecialForm => "special-form",
            ValueType::Bool => "bool",
            ValueType::Type => "type",
            ValueType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.name())
    }
}

/// A named callable: either a builtin from the registry or a closure.
///
/// Functions and macros share this representation; what differs is how the
/// evaluator treats the result (see [`Value::Macro`]).
#[derive(Clone)]
pub struct Callable {
    pub(crate) name: Rc<str>,
    pub(crate) body: CallableBody,
}

#[derive(Clone)]
pub(crate) enum CallableBody {
    Builtin(&'static BuiltinOp),
    Lambda(Rc<Lambda>),
}

/// A closure: lambda list, body forms and the environment it was created in
pub(crate) struct Lambda {
    pub(crate) params: Value,
    pub(crate) body: Value,
    pub(crate) env: Environment,
}

impl Callable {
    pub(crate) fn builtin(op: &'static BuiltinOp) -> Self {
        Callable {
            name: Rc::from(op.id),
            body: CallableBody::Builtin(op),
        }
    }

    pub(crate) fn lambda(name: &str, params: Value, body: Value, env: Environment) -> Self {
        Callable {
            name: Rc::from(name),
            body: CallableBody::Lambda(Rc::new(Lambda { params, body, env })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The same callable under a new display name
    pub(crate) fn renamed(&self, name: &str) -> Self {
        Callable {
            name: Rc::from(name),
            body: self.body.clone(),
        }
    }

    fn same_body(&self, other: &Callable) -> bool {
        match (&self.body, &other.body) {
            (CallableBody::Builtin(a), CallableBody::Builtin(b)) => std::ptr::eq(*a, *b),
            (CallableBody::Lambda(a), CallableBody::Lambda(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Core value type of the interpreter
///
/// To build an AST, use the ergonomic helper functions:
/// - `val(42)` for values, `sym("name")` for symbols, `nil()` for the empty list
/// - `val([1, 2, 3])` for homogeneous lists
/// - `val(vec![sym("op"), val(42)])` for mixed lists
#[derive(Clone)]
pub enum Value {
    /// The empty list; also terminates every proper list
    Empty,
    Pair(Rc<Pair>),
    Symbol(Symbol),
    Integer(Integer),
    String(Rc<str>),
    Bool(bool),
    /// `'expr`: evaluates to `expr` unevaluated
    Quoted(Rc<Value>),
    /// `` `expr ``
    Quasiquoted(Rc<Value>),
    /// `,expr` inside a quasiquote
    Unquoted(Rc<Value>),
    /// `,@expr` inside a quasiquote
    SplicingUnquoted(Rc<Value>),
    /// Receives evaluated arguments and returns its result directly
    Function(Rc<Callable>),
    /// Receives unevaluated operands; the result is evaluated again in the caller's environment
    Macro(Rc<Callable>),
    /// Receives unevaluated operands plus the calling environment
    SpecialForm(&'static BuiltinOp),
    Type(ValueType),
}

impl Value {
    pub fn cons(first: Value, rest: Value) -> Value {
        Value::Pair(Rc::new(Pair { first, rest }))
    }

    /// Build a proper list from the given elements
    pub fn list<I>(elements: I) -> Value
    where
        I: IntoIterator<Item = Value>,
        I::IntoIter: DoubleEndedIterator,
    {
        elements
            .into_iter()
            .rev()
            .fold(Value::Empty, |rest, first| Value::cons(first, rest))
    }

    pub fn symbol(name: &str) -> Value {
        Value::Symbol(Symbol::new(name))
    }

    pub fn string(text: &str) -> Value {
        Value::String(Rc::from(text))
    }

    pub fn is_empty_list(&self) -> bool {
        matches!(self, Value::Empty)
    }

    /// True when [`Value::len`] is zero: the empty list, or any non-list value
    pub fn is_empty(&self) -> bool {
        self.as_pair().is_none()
    }

    /// Only `#f` is false; everything else, including `()` and `0`, is truthy
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Bool(false))
    }

    pub fn as_pair(&self) -> Option<&Pair> {
        match self {
            Value::Pair(pair) => Some(pair),
            _ => None,
        }
    }

    /// First element of a non-empty list
    pub fn first(&self) -> Option<&Value> {
        self.as_pair().map(|pair| &pair.first)
    }

    /// Everything after the first element of a non-empty list
    pub fn rest(&self) -> Option<&Value> {
        self.as_pair().map(|pair| &pair.rest)
    }

    /// Iterate over the elements of a list. Iteration stops at the first
    /// non-pair tail, so the elements of a dotted list exclude its final cdr.
    pub fn iter(&self) -> ListIter<'_> {
        ListIter { current: self }
    }

    /// Collect the elements of a proper list, failing on a dotted tail.
    pub fn to_vec(&self) -> Result<Vec<Value>, Error> {
        let mut elements = Vec::new();
        let mut current = self;
        loop {
            match current {
                Value::Empty => return Ok(elements),
                Value::Pair(pair) => {
                    elements.push(pair.first.clone());
                    current = &pair.rest;
                }
                _ => {
                    return Err(Error::TypeError(format!(
                        "expected a proper list, got {self}"
                    )));
                }
            }
        }
    }

    /// Number of elements in the (possibly dotted) list
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn type_of(&self) -> ValueType {
        match self {
            Value::Empty | Value::Pair(_) => ValueType::Cell,
            Value::Symbol(_) => ValueType::Symbol,
            Value::Integer(_) => ValueType::Integer,
            Value::String(_) => ValueType::String,
            Value::Bool(_) => ValueType::Bool,
            Value::Function(_) => ValueType::Function,
            Value::Macro(_) => ValueType::Macro,
            Value::SpecialForm(_) => ValueType::SpecialForm,
            Value::Type(_) => ValueType::Type,
            Value::Quoted(_)
            | Value::Quasiquoted(_)
            | Value::Unquoted(_)
            | Value::SplicingUnquoted(_) => ValueType::Unknown,
        }
    }

    /// Short type description for error messages
    pub fn type_name(&self) -> &'static str {
        self.type_of().name()
    }

    /// Give a function a display name; other values pass through unchanged
    pub(crate) fn named(self, name: &str) -> Value {
        match self {
            Value::Function(function) => Value::Function(Rc::new(function.renamed(name))),
            other => other,
        }
    }

    fn fmt_list_tail(mut pair: &Pair, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        loop {
            write!(f, "{}", pair.first)?;
            match &pair.rest {
                Value::Empty => return Ok(()),
                Value::Pair(next) => {
                    write!(f, " ")?;
                    pair = next;
                }
                atom => return write!(f, " . {atom}"),
            }
        }
    }

    /// Element-wise comparison along the spine of two lists
    fn lists_eq(mut a: &Rc<Pair>, mut b: &Rc<Pair>) -> bool {
        loop {
            if Rc::ptr_eq(a, b) {
                return true;
            }
            if a.first != b.first {
                return false;
            }
            match (&a.rest, &b.rest) {
                (Value::Pair(next_a), Value::Pair(next_b)) => {
                    a = next_a;
                    b = next_b;
                }
                (tail_a, tail_b) => return tail_a == tail_b,
            }
        }
    }
}

/// Iterator over list elements, see [`Value::iter`]
pub struct ListIter<'a> {
    current: &'a Value,
}

impl<'a> Iterator for ListIter<'a> {
    type Item = &'a Value;

    fn next(&mut self) -> Option<Self::Item> {
        match self.current {
            Value::Pair(pair) => {
                self.current = &pair.rest;
                Some(&pair.first)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Empty => write!(f, "()"),
            Value::Pair(pair) => {
                write!(f, "(")?;
                Self::fmt_list_tail(pair, f)?;
                write!(f, ")")
            }
            Value::Symbol(s) => write!(f, "{s}"),
            Value::Integer(n) => write!(f, "{n}"),
            // Escapes were kept verbatim at read time, so nothing is re-escaped here
            Value::String(s) => write!(f, "\"{s}\""),
            Value::Bool(b) => write!(f, "{}", if *b { "#t" } else { "#f" }),
            Value::Quoted(e) => write!(f, "'{e}"),
            Value::Quasiquoted(e) => write!(f, "`{e}"),
            Value::Unquoted(e) => write!(f, ",{e}"),
            Value::SplicingUnquoted(e) => write!(f, ",@{e}"),
            Value::Function(function) => write!(f, "<function {}>", function.name),
            Value::Macro(macro_) => write!(f, "<macro {}>", macro_.name),
            Value::SpecialForm(op) => write!(f, "<special-form {}>", op.id),
            Value::Type(t) => write!(f, "{t}"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Empty => write!(f, "Empty"),
            Value::Pair(_) => {
                write!(f, "List[")?;
                let mut current = self;
                let mut separator = "";
                while let Value::Pair(pair) = current {
                    write!(f, "{separator}{:?}", pair.first)?;
                    separator = ", ";
                    current = &pair.rest;
                }
                if !current.is_empty_list() {
                    write!(f, " . {current:?}")?;
                }
                write!(f, "]")
            }
            Value::Symbol(s) => write!(f, "{s:?}"),
            Value::Integer(n) => write!(f, "Integer({n})"),
            Value::String(s) => write!(f, "String(\"{s}\")"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Quoted(e) => write!(f, "Quoted({e:?})"),
            Value::Quasiquoted(e) => write!(f, "Quasiquoted({e:?})"),
            Value::Unquoted(e) => write!(f, "Unquoted({e:?})"),
            Value::SplicingUnquoted(e) => write!(f, "SplicingUnquoted({e:?})"),
            Value::Function(function) => write!(f, "Function({})", function.name),
            Value::Macro(macro_) => write!(f, "Macro({})", macro_.name),
            Value::SpecialForm(op) => write!(f, "SpecialForm({})", op.id),
            Value::Type(t) => write!(f, "Type({})", t.name()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Empty, Value::Empty) => true,
            (Value::Pair(a), Value::Pair(b)) => Value::lists_eq(a, b),
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Quoted(a), Value::Quoted(b))
            | (Value::Quasiquoted(a), Value::Quasiquoted(b))
            | (Value::Unquoted(a), Value::Unquoted(b))
            | (Value::SplicingUnquoted(a), Value::SplicingUnquoted(b)) => a == b,
            // Callables compare by identity of their implementation, not by name
            (Value::Function(a), Value::Function(b)) | (Value::Macro(a), Value::Macro(b)) => {
                a.same_body(b)
            }
            (Value::SpecialForm(a), Value::SpecialForm(b)) => std::ptr::eq(*a, *b),
            (Value::Type(a), Value::Type(b)) => a == b,
            _ => false,
        }
    }
}

// From trait implementations for Value - enables .into() conversion
impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Symbol> for Value {
    fn from(s: Symbol) -> Self {
        Value::Symbol(s)
    }
}

macro_rules! impl_from_integer {
    ($int_type:ty) => {
        impl From<$int_type> for Value {
            fn from(n: $int_type) -> Self {
                Value::Integer(Integer::from(n))
            }
        }
    };
}

impl_from_integer!(i8);
impl_from_integer!(i16);
impl_from_integer!(i32);
impl_from_integer!(Integer);
impl_from_integer!(u8);
impl_from_integer!(u16);
impl_from_integer!(u32);

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::list(v.into_iter().map(Into::into))
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Value {
    fn from(arr: [T; N]) -> Self {
        Value::list(arr.into_iter().map(Into::into))
    }
}

/// Helper for creating symbols in mixed lists
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn sym<S: AsRef<str>>(name: S) -> Value {
    Value::symbol(name.as_ref())
}

/// Helper for creating values from anything convertible into one
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn val<T: Into<Value>>(value: T) -> Value {
    value.into()
}

/// Helper for the empty list, which doubles as nil
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn nil() -> Value {
    Value::Empty
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_data_driven() {
        let dotted = Value::cons(val(1), val(2));
        let nested_dotted = Value::cons(val(1), Value::cons(val(2), val(3)));

        let test_cases = vec![
            (nil(), "()"),
            (val(42), "42"),
            (val(-7), "-7"),
            (sym("foo"), "foo"),
            (val("hello world"), "\"hello world\""),
            // No unescaping or re-escaping on output
            (val(r"a\nb"), r#""a\nb""#),
            (val(true), "#t"),
            (val(false), "#f"),
            (val([1, 2, 3]), "(1 2 3)"),
            (val(vec![val([1]), sym("b"), val([sym("c"), sym("d")])]), "((1) b (c d))"),
            (val(vec![nil()]), "(())"),
            (dotted, "(1 . 2)"),
            (nested_dotted, "(1 2 . 3)"),
            (Value::Quoted(Rc::new(sym("a"))), "'a"),
            (
                Value::Quoted(Rc::new(Value::Quoted(Rc::new(sym("a"))))),
                "''a",
            ),
            (Value::Quasiquoted(Rc::new(val([1, 2]))), "`(1 2)"),
            (Value::Unquoted(Rc::new(sym("x"))), ",x"),
            (Value::SplicingUnquoted(Rc::new(sym("xs"))), ",@xs"),
            (Value::Type(ValueType::SpecialForm), "<special-form>"),
        ];

        for (i, (value, expected)) in test_cases.iter().enumerate() {
            assert_eq!(
                format!("{value}"),
                *expected,
                "Display test #{} failed",
                i + 1
            );
        }
    }

    #[test]
    fn test_type_of() {
        let test_cases = vec![
            (nil(), ValueType::Cell),
            (val([1]), ValueType::Cell),
            (sym("x"), ValueType::Symbol),
            (val(1), ValueType::Integer),
            (val("s"), ValueType::String),
            (val(true), ValueType::Bool),
            (Value::Type(ValueType::Integer), ValueType::Type),
            (Value::Quoted(Rc::new(val(1))), ValueType::Unknown),
        ];

        for (value, expected) in test_cases {
            assert_eq!(value.type_of(), expected, "type_of({value})");
        }
    }

    #[test]
    fn test_list_helpers() {
        let list = val([1, 2, 3]);
        assert_eq!(list.len(), 3);
        assert_eq!(list.first(), Some(&val(1)));
        assert_eq!(list.rest(), Some(&val([2, 3])));
        assert_eq!(nil().first(), None);
        assert!(nil().is_empty_list());
        assert!(!list.is_empty_list());
        assert!(nil().is_empty());
        assert!(!list.is_empty());
        assert_eq!(val(7).len(), 0);
        assert!(val(7).is_empty());

        let collected: Vec<Value> = list.iter().cloned().collect();
        assert_eq!(collected, vec![val(1), val(2), val(3)]);

        assert!(Value::cons(val(1), val(2)).to_vec().is_err());
        assert_eq!(nil().to_vec(), Ok(vec![]));
    }

    #[test]
    fn test_truthiness() {
        // Only #f is false
        assert!(!val(false).is_truthy());
        assert!(val(true).is_truthy());
        assert!(nil().is_truthy());
        assert!(val(0).is_truthy());
        assert!(val("").is_truthy());
    }

    #[test]
    fn test_structural_equality() {
        assert_eq!(val([1, 2]), Value::cons(val(1), Value::cons(val(2), nil())));
        assert_ne!(val([1, 2]), val([1, 2, 3]));
        assert_ne!(val(1), val("1"));
        assert_ne!(sym("a"), val("a"));
        assert_eq!(Symbol::new("a"), Symbol::new("a"));

        let dotted = Value::cons(val(1), Value::cons(val(2), val(3)));
        assert_eq!(dotted, Value::cons(val(1), Value::cons(val(2), val(3))));
        assert_ne!(dotted, val([1, 2]));
        assert_eq!(
            format!("{dotted:?}"),
            "List[Integer(1), Integer(2) . Integer(3)]"
        );
    }

    #[test]
    fn test_long_lists_walk_without_recursion() {
        const LEN: usize = 200_000;
        let long = Value::list((0..LEN).map(|_| val(1)));
        let copy = Value::list((0..LEN).map(|_| val(1)));

        assert_eq!(long.len(), LEN);
        assert_eq!(long, copy);

        let rendered = format!("{long}");
        assert_eq!(rendered.len(), 2 * LEN + 1);
        assert!(rendered.starts_with("(1 1 ") && rendered.ends_with(" 1)"));

        let differs_at_end = Value::list((0..LEN).map(|i| val(if i + 1 == LEN { 2 } else { 1 })));
        assert_ne!(long, differs_at_end);

        // A shared tail survives dropping one of its owners
        let tail = long.rest().cloned().unwrap_or(Value::Empty);
        drop(long);
        assert_eq!(tail.len(), LEN - 1);
        drop((tail, copy, differs_at_end));
    }
}
