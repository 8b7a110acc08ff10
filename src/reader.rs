//! S-expression reader.
//!
//! Tokens are recognized with `nom` combinators; the token stream is then parsed
//! by a small recursive-descent parser into [`Value`] trees. The reader works on
//! an in-memory `&str` and keeps track of how many bytes each expression consumed,
//! so a caller can read one expression at a time from a larger buffer.
//!
//! Tokens:
//! - `(` `)` open and close a list
//! - `'` `` ` `` `,` `,@` wrap the next expression in a quote node
//! - `"..."` is a string literal, kept verbatim (a backslash escapes the next character)
//! - `[` and `]` are single-character symbols
//! - anything else up to whitespace or a delimiter is a bare token: an integer if it
//!   parses as one, otherwise a symbol
//!
//! There is no special syntax for booleans or dotted pairs: `#t`, `#f` and `.` are
//! ordinary symbols.

use std::rc::Rc;

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{is_not, tag, take_while1},
    character::complete::{anychar, char, one_of},
    combinator::{map, opt, recognize, value},
    multi::many0,
    sequence::{delimited, pair, terminated},
};

use crate::ast::{Integer, Value};
use crate::{Error, MAX_PARSE_DEPTH, ParseError, ParseErrorKind};

/// Reader options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReaderConfig {
    /// Treat `;` at the start of a token as a comment running to end of line
    pub line_comments: bool,
}

impl ReaderConfig {
    /// Settings for reading whole source files (prelude, `load`, batch mode)
    pub fn source_file() -> Self {
        ReaderConfig {
            line_comments: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token<'a> {
    Open,
    Close,
    Quote,
    Quasiquote,
    Unquote,
    UnquoteSplicing,
    Atom(&'a str),
}

fn is_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

/// Characters that end a bare token
fn is_terminator(c: char) -> bool {
    is_whitespace(c) || matches!(c, '(' | ')' | '[' | ']' | '\'' | '`' | ',' | '"')
}

fn line_comment(input: &str) -> IResult<&str, &str> {
    recognize(pair(char(';'), opt(is_not("\n")))).parse(input)
}

/// Skip whitespace, and line comments when enabled
fn skip_atmosphere(input: &str, config: ReaderConfig) -> &str {
    let mut rest = input.trim_start_matches(is_whitespace);
    while config.line_comments
        && let Ok((after, _)) = line_comment(rest)
    {
        rest = after.trim_start_matches(is_whitespace);
    }
    rest
}

/// A string literal including both quote characters
fn string_literal(input: &str) -> IResult<&str, &str> {
    recognize(delimited(
        char('"'),
        many0(alt((recognize(pair(char('\\'), anychar)), is_not("\\\"")))),
        char('"'),
    ))
    .parse(input)
}

/// A bare token; one trailing whitespace character is consumed with it
fn bare_token(input: &str) -> IResult<&str, &str> {
    terminated(
        take_while1(|c: char| !is_terminator(c)),
        opt(one_of(" \t\r\n")),
    )
    .parse(input)
}

fn token(input: &str) -> IResult<&str, Token<'_>> {
    alt((
        value(Token::Open, char('(')),
        value(Token::Close, char(')')),
        value(Token::Quote, char('\'')),
        value(Token::Quasiquote, char('`')),
        value(Token::UnquoteSplicing, tag(",@")),
        value(Token::Unquote, char(',')),
        map(recognize(one_of("[]")), Token::Atom),
        map(string_literal, Token::Atom),
        map(bare_token, Token::Atom),
    ))
    .parse(input)
}

/// Classify a bare or string token: integer first, then string, then symbol
fn parse_atom(text: &str) -> Value {
    if let Ok(n) = text.parse::<Integer>() {
        return Value::Integer(n);
    }
    if let Some(inner) = text
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    {
        return Value::string(inner);
    }
    Value::symbol(text)
}

/// Streaming reader: yields one expression per [`Reader::read`] call
#[derive(Debug)]
pub struct Reader<'a> {
    source: &'a str,
    remaining: &'a str,
    config: ReaderConfig,
    failed: bool,
}

impl<'a> Reader<'a> {
    pub fn new(source: &'a str) -> Self {
        Self::with_config(source, ReaderConfig::default())
    }

    pub fn with_config(source: &'a str, config: ReaderConfig) -> Self {
        Reader {
            source,
            remaining: source,
            config,
            failed: false,
        }
    }

    /// Bytes of input consumed so far
    pub fn consumed(&self) -> usize {
        self.source.len() - self.remaining.len()
    }

    /// Read the next complete expression.
    ///
    /// Returns `Ok(None)` once only whitespace (and comments, if enabled) remain.
    /// After an error the position is unspecified; callers should discard the rest
    /// of the input.
    pub fn read(&mut self) -> Result<Option<Value>, Error> {
        match self.next_token()? {
            Some(token) => self.parse_expr(token, 0).map(Some),
            None => Ok(None),
        }
    }

    fn syntax_error(&self, kind: ParseErrorKind, message: &str) -> Error {
        ParseError::with_context(kind, message, self.source, self.consumed()).into()
    }

    fn next_token(&mut self) -> Result<Option<Token<'a>>, Error> {
        let input = skip_atmosphere(self.remaining, self.config);
        self.remaining = input;
        if input.is_empty() {
            return Ok(None);
        }

        match token(input) {
            Ok((rest, token)) => {
                self.remaining = rest;
                Ok(Some(token))
            }
            Err(_) if input.starts_with('"') => Err(self.syntax_error(
                ParseErrorKind::Incomplete,
                "Unexpected end of input in string",
            )),
            Err(_) => Err(self.syntax_error(ParseErrorKind::InvalidSyntax, "Unrecognized token")),
        }
    }

    /// Parse the expression starting with `token`, nested inside `depth` lists or
    /// quote prefixes
    fn parse_expr(&mut self, token: Token<'a>, depth: usize) -> Result<Value, Error> {
        let opens_level = !matches!(token, Token::Atom(_) | Token::Close);
        if opens_level && depth >= MAX_PARSE_DEPTH {
            return Err(self.syntax_error(
                ParseErrorKind::TooDeeplyNested,
                &format!("Expression too deeply nested (max depth: {MAX_PARSE_DEPTH})"),
            ));
        }

        let inner = depth + 1;
        match token {
            Token::Open => self.parse_list(inner),
            Token::Close => Err(self.syntax_error(ParseErrorKind::InvalidSyntax, "Unexpected ')'")),
            Token::Quote => Ok(Value::Quoted(Rc::new(self.parse_operand(inner)?))),
            Token::Quasiquote => Ok(Value::Quasiquoted(Rc::new(self.parse_operand(inner)?))),
            Token::Unquote => Ok(Value::Unquoted(Rc::new(self.parse_operand(inner)?))),
            Token::UnquoteSplicing => {
                Ok(Value::SplicingUnquoted(Rc::new(self.parse_operand(inner)?)))
            }
            Token::Atom(text) => Ok(parse_atom(text)),
        }
    }

    /// The expression following a quote prefix
    fn parse_operand(&mut self, depth: usize) -> Result<Value, Error> {
        match self.next_token()? {
            Some(token) => self.parse_expr(token, depth),
            None => Err(self.syntax_error(
                ParseErrorKind::Incomplete,
                "Unexpected end of input after quote",
            )),
        }
    }

    /// Elements up to the matching `)`; the opening `(` is already consumed
    fn parse_list(&mut self, depth: usize) -> Result<Value, Error> {
        let mut elements = Vec::new();
        loop {
            match self.next_token()? {
                Some(Token::Close) => return Ok(Value::list(elements)),
                Some(token) => elements.push(self.parse_expr(token, depth)?),
                None => {
                    return Err(self.syntax_error(
                        ParseErrorKind::Incomplete,
                        "Unexpected end of input in list",
                    ));
                }
            }
        }
    }
}

impl Iterator for Reader<'_> {
    type Item = Result<Value, Error>;

    /// Stops after the first error
    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let result = self.read().transpose();
        if matches!(result, Some(Err(_))) {
            self.failed = true;
        }
        result
    }
}

/// Read exactly one expression, returning it with the number of bytes consumed.
///
/// Blank input is an [`ParseErrorKind::Incomplete`] error.
pub fn read_from_string(input: &str) -> Result<(Value, usize), Error> {
    let mut reader = Reader::new(input);
    match reader.read()? {
        Some(expr) => Ok((expr, reader.consumed())),
        None => Err(ParseError::new(ParseErrorKind::Incomplete, "Unexpected end of input").into()),
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{nil, sym, val};

    fn tokens(input: &str) -> Vec<Token<'_>> {
        let mut reader = Reader::new(input);
        let mut result = Vec::new();
        while let Some(token) = reader.next_token().unwrap() {
            result.push(token);
        }
        result
    }

    #[test]
    fn test_tokenizer_data_driven() {
        use Token::*;
        let test_cases = vec![
            ("abc", vec![Atom("abc")]),
            ("(a)", vec![Open, Atom("a"), Close]),
            ("(a  b   \n  c)", vec![Open, Atom("a"), Atom("b"), Atom("c"), Close]),
            ("\"hello  world\"", vec![Atom("\"hello  world\"")]),
            (r#""a\"b""#, vec![Atom(r#""a\"b""#)]),
            (
                "(abc (def ghi))",
                vec![Open, Atom("abc"), Open, Atom("def"), Atom("ghi"), Close, Close],
            ),
            ("(\"abc def\")", vec![Open, Atom("\"abc def\""), Close]),
            (
                "(abc def 'ghi)",
                vec![Open, Atom("abc"), Atom("def"), Quote, Atom("ghi"), Close],
            ),
            (
                "`(a ,b ,@(c))",
                vec![
                    Quasiquote,
                    Open,
                    Atom("a"),
                    Unquote,
                    Atom("b"),
                    UnquoteSplicing,
                    Open,
                    Atom("c"),
                    Close,
                    Close,
                ],
            ),
            // Delimiters end a bare token without being part of it
            ("ab(cd)", vec![Atom("ab"), Open, Atom("cd"), Close]),
            ("ab\"cd\"", vec![Atom("ab"), Atom("\"cd\"")]),
            ("[a]", vec![Atom("["), Atom("a"), Atom("]")]),
            ("a;b", vec![Atom("a;b")]),
        ];

        for (input, expected) in test_cases {
            assert_eq!(tokens(input), expected, "tokens of {input:?}");
        }
    }

    #[test]
    fn test_read_from_string_data_driven() {
        // (input, rendered result, bytes consumed)
        let test_cases = vec![
            ("1", "1", 1),
            ("12", "12", 2),
            ("-99", "-99", 3),
            ("+5", "5", 2),
            ("abc", "abc", 3),
            ("(a)", "(a)", 3),
            ("+", "+", 1),
            ("-", "-", 1),
            ("(a  b)", "(a b)", 6),
            ("((a)  b (c d(e)))", "((a) b (c d (e)))", 17),
            ("\"hello\"", "\"hello\"", 7),
            ("\"\"", "\"\"", 2),
            (":test", ":test", 5),
            ("`(a ,b c)", "`(a ,b c)", 9),
            ("'a", "'a", 2),
            ("''a", "''a", 3),
            (",@xs", ",@xs", 4),
            ("()", "()", 2),
            ("(1 . 2)", "(1 . 2)", 7),
            ("#t", "#t", 2),
            // One trailing whitespace character belongs to a bare token
            ("42 ", "42", 3),
            ("42  43", "42", 3),
            ("  (a) b", "(a)", 5),
            (r#""a\nb""#, r#""a\nb""#, 6),
            // Too large for an integer, so a symbol
            ("99999999999999999999", "99999999999999999999", 20),
        ];

        for (i, (input, rendered, size)) in test_cases.into_iter().enumerate() {
            let (expr, consumed) = read_from_string(input)
                .unwrap_or_else(|e| panic!("Read test #{}: {input:?} failed: {e}", i + 1));
            assert_eq!(format!("{expr}"), rendered, "Read test #{}: {input:?}", i + 1);
            assert_eq!(consumed, size, "Read test #{}: consumed for {input:?}", i + 1);
        }
    }

    #[test]
    fn test_atom_classification() {
        let test_cases = vec![
            ("42", val(42)),
            ("-7", val(-7)),
            ("\"12\"", val("12")),
            ("\"a b\"", val("a b")),
            ("foo", sym("foo")),
            ("-", sym("-")),
            (".", sym(".")),
            ("#f", sym("#f")),
            ("()", nil()),
            ("(1 (2))", val(vec![val(1), val([2])])),
        ];

        for (input, expected) in test_cases {
            let (expr, _) = read_from_string(input).unwrap();
            assert_eq!(expr, expected, "reading {input:?}");
        }
    }

    #[test]
    fn test_syntax_errors() {
        let test_cases = vec![
            (")", ParseErrorKind::InvalidSyntax),
            ("(a b", ParseErrorKind::Incomplete),
            ("((a) (b)", ParseErrorKind::Incomplete),
            ("\"abc", ParseErrorKind::Incomplete),
            ("(\"abc)", ParseErrorKind::Incomplete),
            ("'", ParseErrorKind::Incomplete),
            ("`(a ,", ParseErrorKind::Incomplete),
            ("", ParseErrorKind::Incomplete),
            ("   ", ParseErrorKind::Incomplete),
        ];

        for (input, expected_kind) in test_cases {
            match read_from_string(input) {
                Err(Error::ParseError(e)) => {
                    assert_eq!(e.kind, expected_kind, "error kind for {input:?}: {e:?}");
                }
                other => panic!("expected syntax error for {input:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_nesting_depth_limit() {
        let nested = |n: usize| format!("{}{}", "(".repeat(n), ")".repeat(n));
        let quoted = |n: usize| format!("{}a", "'".repeat(n));

        let (at_limit, _) = read_from_string(&nested(MAX_PARSE_DEPTH)).unwrap();
        assert_eq!(format!("{at_limit}"), nested(MAX_PARSE_DEPTH));
        assert!(read_from_string(&quoted(MAX_PARSE_DEPTH)).is_ok());
        assert!(read_from_string(&format!("(a {})", quoted(MAX_PARSE_DEPTH - 1))).is_ok());

        let too_deep = vec![
            nested(MAX_PARSE_DEPTH + 1),
            quoted(MAX_PARSE_DEPTH + 1),
            format!("(a {})", quoted(MAX_PARSE_DEPTH)),
            // Far beyond the limit, and never closed
            "(".repeat(100_000),
            format!("{}{}", "`(,".repeat(20_000), ")".repeat(20_000)),
        ];
        for input in too_deep {
            match read_from_string(&input) {
                Err(Error::ParseError(e)) => {
                    assert_eq!(e.kind, ParseErrorKind::TooDeeplyNested, "{e:?}");
                }
                other => panic!("expected nesting error, got {other:?}"),
            }
        }

        // Sibling lists do not add up
        let wide = format!("({})", nested(MAX_PARSE_DEPTH - 1).repeat(3));
        assert!(read_from_string(&wide).is_ok());
    }

    #[test]
    fn test_round_trip() {
        let inputs = [
            "42",
            "-5",
            "foo",
            "\"bar baz\"",
            "(1 2 3)",
            "((a) b (c d (e)))",
            "'a",
            "''(1 2)",
            "`(a ,b ,@c)",
            "()",
        ];

        for input in inputs {
            let (first, _) = read_from_string(input).unwrap();
            let rendered = format!("{first}");
            let (second, _) = read_from_string(&rendered).unwrap();
            assert_eq!(format!("{second}"), rendered, "round trip of {input:?}");
        }
    }

    #[test]
    fn test_streaming_reader() {
        let source = "(def x 1) x\n  \"s\"  ";
        let mut reader = Reader::new(source);

        assert_eq!(
            reader.read().unwrap(),
            Some(val(vec![sym("def"), sym("x"), val(1)]))
        );
        assert_eq!(reader.consumed(), 9);
        assert_eq!(reader.read().unwrap(), Some(sym("x")));
        assert_eq!(reader.read().unwrap(), Some(val("s")));
        assert_eq!(reader.read().unwrap(), None);
        assert_eq!(reader.consumed(), source.len());

        let all: Result<Vec<Value>, Error> = Reader::new("1 2 3").collect();
        assert_eq!(all.unwrap(), vec![val(1), val(2), val(3)]);

        // Iteration ends after the first error
        let mut failing = Reader::new("1 ) 2");
        assert_eq!(failing.next().unwrap().unwrap(), val(1));
        assert!(failing.next().unwrap().is_err());
        assert!(failing.next().is_none());
    }

    #[test]
    fn test_line_comments() {
        let source = "; leading comment\n(a ; trailing\n b)\n;; done";

        // Comments are plain symbols under the default grammar
        let (strict, _) = read_from_string(source).unwrap();
        assert_eq!(strict, sym(";"));

        let mut reader = Reader::with_config(source, ReaderConfig::source_file());
        assert_eq!(reader.read().unwrap(), Some(val([sym("a"), sym("b")])));
        assert_eq!(reader.read().unwrap(), None);

        let mut only_comments = Reader::with_config(";; nothing\n", ReaderConfig::source_file());
        assert_eq!(only_comments.read().unwrap(), None);
    }
}
