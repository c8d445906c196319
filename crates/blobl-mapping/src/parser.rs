//! Parsing primitives shared by the statement grammar and the expression
//! language.
//!
//! Every parser consumes a prefix of a `&str` and either yields a value plus
//! the remaining input, or a [`GrammarError`] holding the input slice it
//! failed at. Because the failing slice is always a suffix of the original
//! source, its absolute offset can be recovered without threading positions
//! through the combinators.

use nom::branch::alt;
use nom::bytes::complete::{tag, take_while1};
use nom::character::complete::{char, line_ending, multispace0, not_line_ending, space0, space1};
use nom::combinator::{eof, map, recognize, value};
use nom::error::{ErrorKind, ParseError};
use nom::multi::many0_count;
use nom::sequence::{pair, preceded};
use nom::IResult;
use thiserror::Error;

/// Why a parser failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Cause {
    #[error("expected {0}")]
    Expected(String),

    #[error("expected '{0}'")]
    Char(char),

    #[error("unexpected input ({})", .0.description())]
    Kind(ErrorKind),

    #[error("map name collision: {0}")]
    MapCollision(String),

    #[error("invalid target path '{path}': empty path segment")]
    EmptyPathSegment { path: String },

    #[error("{0}")]
    Message(String),
}

/// A parse failure located by the input slice it occurred at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrammarError<'a> {
    /// Remaining input at the point of failure
    pub input: &'a str,

    /// Failure cause
    pub cause: Cause,
}

/// Result type of every grammar parser.
pub type PResult<'a, O> = IResult<&'a str, O, GrammarError<'a>>;

impl<'a> GrammarError<'a> {
    /// Create an error at an input position
    #[must_use]
    pub fn new(input: &'a str, cause: Cause) -> Self {
        Self { input, cause }
    }

    /// Create an "expected <label>" error
    #[must_use]
    pub fn expected(input: &'a str, label: impl Into<String>) -> Self {
        Self::new(input, Cause::Expected(label.into()))
    }

    /// Create a free-form error
    #[must_use]
    pub fn message(input: &'a str, message: impl Into<String>) -> Self {
        Self::new(input, Cause::Message(message.into()))
    }

    /// Byte offset of the failure within `source`, which must be the text the
    /// failing slice was taken from.
    #[must_use]
    pub fn offset_in(&self, source: &str) -> usize {
        source.len().saturating_sub(self.input.len())
    }
}

impl<'a> ParseError<&'a str> for GrammarError<'a> {
    fn from_error_kind(input: &'a str, kind: ErrorKind) -> Self {
        Self::new(input, Cause::Kind(kind))
    }

    fn append(_input: &'a str, _kind: ErrorKind, other: Self) -> Self {
        other
    }

    fn from_char(input: &'a str, c: char) -> Self {
        Self::new(input, Cause::Char(c))
    }

    // Alternatives report whichever branch got furthest; ties go to the later one.
    fn or(self, other: Self) -> Self {
        if other.input.len() <= self.input.len() {
            other
        } else {
            self
        }
    }
}

/// Replace an error raised before any input was consumed with "expected <label>".
pub fn expect<'a, O, F>(label: &'static str, mut parser: F) -> impl FnMut(&'a str) -> PResult<'a, O>
where
    F: nom::Parser<&'a str, O, GrammarError<'a>>,
{
    move |input: &'a str| match parser.parse(input) {
        Err(nom::Err::Error(e)) if e.input.len() == input.len() => {
            Err(nom::Err::Error(GrammarError::expected(input, label)))
        }
        other => other,
    }
}

/// Match an exact keyword or token.
pub fn keyword<'a>(word: &'static str) -> impl Fn(&'a str) -> PResult<'a, &'a str> {
    tag(word)
}

/// Match a single character.
pub fn symbol<'a>(c: char) -> impl Fn(&'a str) -> PResult<'a, char> {
    char(c)
}

/// One or more spaces or tabs.
pub fn spaces_and_tabs(input: &str) -> PResult<'_, &str> {
    space1(input)
}

/// Zero or more spaces or tabs.
pub fn spaces0(input: &str) -> PResult<'_, &str> {
    space0(input)
}

/// Zero or more whitespace characters of any kind, line breaks included.
pub fn multispaces0(input: &str) -> PResult<'_, &str> {
    multispace0(input)
}

/// A line break, optionally preceded by a `#` comment. A comment may also
/// terminate the input.
pub fn newline_allow_comment(input: &str) -> PResult<'_, &str> {
    alt((
        recognize(pair(
            preceded(char('#'), not_line_ending),
            alt((line_ending, eof)),
        )),
        line_ending,
    ))(input)
}

/// Discard any run of spaces, tabs, comments and line breaks.
pub fn all_whitespace(input: &str) -> PResult<'_, ()> {
    value((), many0_count(alt((spaces_and_tabs, newline_allow_comment))))(input)
}

fn is_path_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '*' | '+' | ',' | '-' | '.' | '_' | '~')
}

/// A bare path literal: letters, digits and `*+,-._~`.
pub fn path_literal(input: &str) -> PResult<'_, &str> {
    take_while1(is_path_char)(input)
}

/// A double quoted string with `\"`, `\\`, `\/`, `\n`, `\r` and `\t` escapes.
///
/// Once the opening quote is matched, failures are fatal.
pub fn quoted_string(input: &str) -> PResult<'_, String> {
    let (mut rest, _) = symbol('"')(input)?;
    let mut out = String::new();
    loop {
        let mut chars = rest.chars();
        match chars.next() {
            None => {
                return Err(nom::Err::Failure(GrammarError::expected(
                    input,
                    "closing quote of string",
                )));
            }
            Some('"') => return Ok((chars.as_str(), out)),
            Some('\\') => {
                let escaped = match chars.next() {
                    Some('"') => '"',
                    Some('\\') => '\\',
                    Some('/') => '/',
                    Some('n') => '\n',
                    Some('r') => '\r',
                    Some('t') => '\t',
                    _ => {
                        return Err(nom::Err::Failure(GrammarError::message(
                            rest,
                            "invalid escape sequence in quoted string",
                        )));
                    }
                };
                out.push(escaped);
            }
            Some(c) => out.push(c),
        }
        rest = chars.as_str();
    }
}

/// A name given either as a quoted string or a bare path literal.
pub fn name_literal(input: &str) -> PResult<'_, String> {
    alt((quoted_string, map(path_literal, |name: &str| name.to_owned())))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_literal() {
        assert_eq!(path_literal("root.a.b = 1"), Ok((" = 1", "root.a.b")));
        assert_eq!(path_literal("a*+,-_~9 x"), Ok((" x", "a*+,-_~9")));
        assert!(path_literal("= 1").is_err());
    }

    #[test]
    fn test_quoted_string() {
        assert_eq!(
            quoted_string(r#""foo bar" = 1"#),
            Ok((" = 1", "foo bar".to_string()))
        );
        assert_eq!(
            quoted_string(r#""a\"b\\c\nd""#),
            Ok(("", "a\"b\\c\nd".to_string()))
        );
        assert_eq!(quoted_string(r#""""#), Ok(("", String::new())));
    }

    #[test]
    fn test_quoted_string_unterminated_is_fatal() {
        let err = quoted_string(r#""abc"#).unwrap_err();
        match err {
            nom::Err::Failure(e) => {
                assert_eq!(e.input, r#""abc"#);
                assert_eq!(e.cause, Cause::Expected("closing quote of string".into()));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_quoted_string_bad_escape() {
        let err = quoted_string(r#""a\qb""#).unwrap_err();
        assert!(matches!(err, nom::Err::Failure(e) if e.input == r#"\qb""#));
    }

    #[test]
    fn test_newline_allow_comment() {
        assert_eq!(newline_allow_comment("\nx"), Ok(("x", "\n")));
        assert_eq!(newline_allow_comment("\r\nx"), Ok(("x", "\r\n")));
        assert_eq!(newline_allow_comment("# note\nx"), Ok(("x", "# note\n")));
        assert_eq!(newline_allow_comment("# trailing"), Ok(("", "# trailing")));
        assert!(newline_allow_comment("x").is_err());
        assert!(newline_allow_comment("").is_err());
    }

    #[test]
    fn test_all_whitespace() {
        assert_eq!(all_whitespace("  \n\t# c\n\n  a"), Ok(("a", ())));
        assert_eq!(all_whitespace("a"), Ok(("a", ())));
        assert_eq!(all_whitespace(""), Ok(("", ())));
    }

    #[test]
    fn test_expect_relabels_unconsumed_failures() {
        let mut parser = expect("variable-name", name_literal);
        let err = parser("= 5").unwrap_err();
        assert_eq!(
            err,
            nom::Err::Error(GrammarError::expected("= 5", "variable-name"))
        );
    }

    #[test]
    fn test_offset_in_source() {
        let source = "a = 1\nb 2";
        let err = GrammarError::expected(&source[8..], "=");
        assert_eq!(err.offset_in(source), 8);
        assert_eq!(GrammarError::expected(source, "x").offset_in(source), 0);
    }

    #[test]
    fn test_or_prefers_furthest_error() {
        let near = GrammarError::expected("abc", "x");
        let far = GrammarError::expected("c", "y");
        assert_eq!(near.clone().or(far.clone()), far);
        assert_eq!(far.clone().or(near), far);
    }

    #[test]
    fn test_cause_display() {
        assert_eq!(Cause::Char('=').to_string(), "expected '='");
        assert_eq!(
            Cause::MapCollision("foo".into()).to_string(),
            "map name collision: foo"
        );
        assert_eq!(
            Cause::Expected("target-path".into()).to_string(),
            "expected target-path"
        );
    }
}
