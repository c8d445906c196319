//! Statement grammar
//!
//! A mapping is parsed one statement at a time. Each statement is one of four
//! forms, tried in this order:
//!
//! 1. `map <name> { ... }` declares a named block of nested statements
//! 2. `let <name> = <expr>` binds a variable
//! 3. `meta [<name>] = <expr>` writes metadata
//! 4. `<path> = <expr>` writes into the output document
//!
//! Once a form has matched its keyword (or, for paths, the target path) it is
//! committed and any later mismatch is reported as a syntax error instead of
//! falling through to the next form.

use crate::error::ParseError;
use crate::executor::{Executor, MapBlock, Maps, Statement};
use crate::parser::{
    all_whitespace, expect, keyword, name_literal, newline_allow_comment, spaces0,
    spaces_and_tabs, symbol, Cause, GrammarError, PResult,
};
use crate::position::LineIndex;
use crate::query::{self, Function, QueryParser};
use crate::Assignment;
use blobl_ir::dot_path_to_segments;
use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::combinator::{cut, map, opt, peek};
use nom::sequence::{pair, tuple};
use std::cell::RefCell;
use std::sync::Arc;
use tracing::debug;

/// Options controlling how a mapping is parsed.
#[derive(Debug, Clone)]
pub struct ParseConfig {
    filename: Option<String>,
    query_parser: QueryParser,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            filename: None,
            query_parser: query::parse,
        }
    }
}

impl ParseConfig {
    /// Create a configuration using the built-in expression language
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Name the file the mapping was read from; shown in parse errors
    #[must_use]
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Replace the expression parser used on the right hand side of statements
    #[must_use]
    pub fn with_query_parser(mut self, query_parser: QueryParser) -> Self {
        self.query_parser = query_parser;
        self
    }

    /// Configured filename, if any
    #[must_use]
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// Configured expression parser
    #[must_use]
    pub fn query_parser(&self) -> QueryParser {
        self.query_parser
    }
}

/// Parse a mapping into an executable plan.
///
/// Parsing stops at the first syntax error, which is reported with its line
/// and character position.
///
/// # Errors
///
/// Returns a [`ParseError`] if the source is not a valid mapping or declares
/// the same map name twice.
pub fn parse_executor(source: &str, config: &ParseConfig) -> Result<Executor, ParseError> {
    let parser = StatementParser::new(source, config.query_parser);
    let statements = match parser.program(source) {
        Ok(statements) => statements,
        Err(err) => return Err(parser.locate(err, config.filename.clone())),
    };
    let maps = parser.maps.into_inner();
    debug!(
        statements = statements.len(),
        maps = maps.len(),
        "parsed mapping"
    );
    Ok(Executor::new(maps, statements))
}

/// Parser state for one source text.
///
/// Map blocks are registered while parsing proceeds so that collisions are
/// caught at the second declaration; the registry is handed to the plan once
/// parsing succeeds. Names of blocks still being parsed are tracked apart,
/// since a block is only registered after its closing brace.
struct StatementParser<'s> {
    source: &'s str,
    lines: LineIndex,
    query: QueryParser,
    maps: RefCell<Maps>,
    open: RefCell<Vec<String>>,
}

impl<'s> StatementParser<'s> {
    fn new(source: &'s str, query: QueryParser) -> Self {
        Self {
            source,
            lines: LineIndex::new(source),
            query,
            maps: RefCell::new(Maps::new()),
            open: RefCell::new(Vec::new()),
        }
    }

    /// Statements separated by line breaks, surrounded by blank lines and comments.
    fn program(&self, input: &'s str) -> Result<Vec<Statement>, nom::Err<GrammarError<'s>>> {
        let (mut rest, ()) = all_whitespace(input)?;
        let mut statements = Vec::new();
        loop {
            let (after, statement) = self.statement(rest)?;
            statements.extend(statement);

            let (after, _) = spaces0(after)?;
            if after.is_empty() {
                break;
            }
            let (after, _) = expect("end of statement", newline_allow_comment)(after)?;
            let (after, ()) = all_whitespace(after)?;
            if after.is_empty() {
                break;
            }
            rest = after;
        }
        Ok(statements)
    }

    /// Any statement form. Map declarations yield no statement of their own.
    fn statement(&self, input: &'s str) -> PResult<'s, Option<Statement>> {
        alt((
            map(|i: &'s str| self.map_definition(i), |()| None),
            map(|i: &'s str| self.let_statement(i), Some),
            map(|i: &'s str| self.meta_statement(i), Some),
            map(|i: &'s str| self.plain_statement(i), Some),
        ))(input)
    }

    fn map_definition(&self, input: &'s str) -> PResult<'s, ()> {
        let (rest, _) = pair(keyword("map"), spaces_and_tabs)(input)?;
        let (rest, name) = cut(expect("map-name", name_literal))(rest)?;
        let collision = |name: String| {
            nom::Err::Failure(GrammarError::new(input, Cause::MapCollision(name)))
        };
        if self.maps.borrow().contains_key(&name) || self.open.borrow().contains(&name) {
            return Err(collision(name));
        }

        let (rest, _) = spaces0(rest)?;
        self.open.borrow_mut().push(name.clone());
        let block = cut(|i: &'s str| self.block(i))(rest);
        self.open.borrow_mut().pop();
        let (rest, statements) = block?;

        let mut maps = self.maps.borrow_mut();
        if maps.contains_key(&name) {
            return Err(collision(name));
        }
        maps.insert(name.clone(), MapBlock::new(name, statements));
        Ok((rest, ()))
    }

    /// `{` statements separated by line breaks `}`
    fn block(&self, input: &'s str) -> PResult<'s, Vec<Statement>> {
        let (rest, _) = symbol('{')(input)?;
        let (rest, ()) = all_whitespace(rest)?;
        let (mut rest, first) = self.statement(rest)?;
        let mut statements: Vec<Statement> = first.into_iter().collect();

        loop {
            let (after, _) = spaces0(rest)?;
            let after = match newline_allow_comment(after) {
                Ok((after, _)) => after,
                Err(nom::Err::Error(_)) => break,
                Err(err) => return Err(err),
            };
            let (after, ()) = all_whitespace(after)?;
            if after.is_empty() || after.starts_with('}') {
                rest = after;
                break;
            }
            let (after, statement) = self.statement(after)?;
            statements.extend(statement);
            rest = after;
        }

        let (rest, ()) = all_whitespace(rest)?;
        let (rest, _) = symbol('}')(rest)?;
        Ok((rest, statements))
    }

    fn let_statement(&self, input: &'s str) -> PResult<'s, Statement> {
        let line = self.line_of(input);
        let (rest, _) = pair(keyword("let"), spaces_and_tabs)(input)?;
        let (rest, name) = cut(expect("variable-name", name_literal))(rest)?;
        let (rest, query) = self.assigned_query(rest)?;
        Ok((
            rest,
            Statement::new(line, Assignment::Variable { name }, query),
        ))
    }

    fn meta_statement(&self, input: &'s str) -> PResult<'s, Statement> {
        let line = self.line_of(input);
        let (rest, _) = pair(keyword("meta"), peek(alt((spaces_and_tabs, tag("=")))))(input)?;
        let (rest, _) = spaces0(rest)?;
        let (rest, key) = opt(name_literal)(rest)?;
        let (rest, query) = self.assigned_query(rest)?;
        Ok((rest, Statement::new(line, Assignment::Metadata { key }, query)))
    }

    fn plain_statement(&self, input: &'s str) -> PResult<'s, Statement> {
        let line = self.line_of(input);
        let (rest, raw) = expect("target-path", name_literal)(input)?;

        if let Some(offset) = empty_segment_offset(&raw) {
            // Positions inside quoted paths don't map back onto the source.
            let at = if input.starts_with('"') {
                input
            } else {
                &input[offset..]
            };
            return Err(nom::Err::Failure(GrammarError::new(
                at,
                Cause::EmptyPathSegment { path: raw },
            )));
        }

        let mut path = dot_path_to_segments(&raw);
        if path.first().is_some_and(|segment| segment == "root") {
            path.remove(0);
        }

        let (rest, query) = self.assigned_query(rest)?;
        Ok((rest, Statement::new(line, Assignment::Path { path }, query)))
    }

    /// `= <expr>`, committed.
    fn assigned_query(&self, input: &'s str) -> PResult<'s, Arc<dyn Function>> {
        let (rest, _) = cut(tuple((spaces0, symbol('='), spaces0)))(input)?;
        cut(self.query)(rest)
    }

    /// Character offset of a byte offset into the source.
    fn char_offset(&self, byte_offset: usize) -> usize {
        self.source
            .get(..byte_offset)
            .map_or(byte_offset, |prefix| prefix.chars().count())
    }

    fn line_of(&self, input: &str) -> usize {
        let byte_offset = self.source.len().saturating_sub(input.len());
        self.lines.locate(self.char_offset(byte_offset)).line
    }

    fn locate(&self, err: nom::Err<GrammarError<'s>>, filename: Option<String>) -> ParseError {
        let err = match err {
            nom::Err::Error(err) | nom::Err::Failure(err) => err,
            nom::Err::Incomplete(_) => GrammarError::message(
                &self.source[self.source.len()..],
                "unexpected end of input",
            ),
        };
        let location = self.lines.locate(self.char_offset(err.offset_in(self.source)));
        ParseError {
            filename,
            line: location.line,
            column: location.column + 1,
            cause: err.cause,
        }
    }
}

/// Byte offset of the first empty segment of a dot path.
fn empty_segment_offset(path: &str) -> Option<usize> {
    let mut offset = 0;
    for segment in path.split('.') {
        if segment.is_empty() {
            return Some(offset);
        }
        offset += segment.len() + 1;
    }
    None
}
