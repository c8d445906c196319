//! Expression evaluation
//!
//! The statement grammar treats expressions as opaque [`Function`]s produced
//! by a [`QueryParser`]. This module defines that seam together with the
//! default expression language:
//!
//! - literals: numbers, quoted strings, `true`, `false`, `null`, arrays and
//!   objects with quoted keys
//! - `this` and `this.a.b`, which read the original input document
//! - `var("name")`, `meta("key")`, `meta()`, `content()`, `apply("map")` and
//!   `throw("message")`

use crate::executor::Maps;
use crate::parser::{
    expect, keyword, multispaces0, quoted_string, symbol, GrammarError, PResult,
};
use blobl_ir::{dot_path_to_segments, get_path, Message};
use nom::branch::alt;
use nom::bytes::complete::take_while1;
use nom::character::complete::digit1;
use nom::combinator::{cut, map, opt, recognize};
use nom::multi::{many0, separated_list0};
use nom::sequence::{delimited, pair, preceded, separated_pair, tuple};
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Variables bound during one execution.
pub type Vars = HashMap<String, Value>;

/// How deeply `apply` calls may nest before evaluation gives up.
pub const MAX_APPLY_DEPTH: usize = 64;

/// Parses an expression from the start of the input.
pub type QueryParser = for<'a> fn(&'a str) -> PResult<'a, Arc<dyn Function>>;

/// Errors raised while evaluating an expression
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("unable to reference 'this': the message part is not a JSON document")]
    NoDocument,

    #[error("variable '{0}' is undefined")]
    UndefinedVariable(String),

    #[error("map '{0}' is not defined")]
    UndefinedMap(String),

    #[error("{0}")]
    Thrown(String),

    #[error(transparent)]
    Message(#[from] blobl_ir::Error),

    #[error("map '{name}' exceeded the maximum apply depth of {limit}", limit = MAX_APPLY_DEPTH)]
    RecursionLimit { name: String },

    #[error("failed to apply map '{name}': {source}")]
    Apply {
        name: String,
        #[source]
        source: Box<crate::Error>,
    },

    /// A failure that still produced a best-effort value
    #[error("{source}")]
    Recoverable {
        recovered: Value,
        #[source]
        source: Box<QueryError>,
    },
}

/// Everything an expression may observe while it runs.
///
/// `value` is the original input document and never reflects writes made by
/// the running mapping. `vars` is the only state shared between statements.
pub struct FunctionContext<'a> {
    /// Named maps of the running plan
    pub maps: &'a Maps,

    /// Original input document, if it could be read
    pub value: Option<&'a Value>,

    /// Variables of the current execution
    pub vars: &'a mut Vars,

    /// Index of the part being mapped
    pub index: usize,

    /// The batch the part belongs to
    pub msg: &'a mut Message,

    /// Number of `apply` calls currently on the stack
    pub depth: usize,
}

impl fmt::Debug for FunctionContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionContext")
            .field("maps", &self.maps.keys().collect::<Vec<_>>())
            .field("value", &self.value)
            .field("vars", &self.vars)
            .field("index", &self.index)
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}

/// An executable expression.
pub trait Function: fmt::Debug + Send + Sync {
    /// Evaluate against a context
    ///
    /// # Errors
    ///
    /// Returns an error when the expression cannot produce a value.
    fn exec(&self, ctx: &mut FunctionContext<'_>) -> Result<Value, QueryError>;
}

/// Expressions of the default language.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    /// Path into the input document; empty for the whole document
    This(Vec<String>),
    Var(String),
    /// One metadata key, or every key as an object
    Meta(Option<String>),
    Content,
    Apply(String),
    Throw(String),
}

impl Function for Expr {
    fn exec(&self, ctx: &mut FunctionContext<'_>) -> Result<Value, QueryError> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Array(items) => items
                .iter()
                .map(|item| item.exec(ctx))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Expr::Object(fields) => {
                let mut map = Map::new();
                for (key, expr) in fields {
                    map.insert(key.clone(), expr.exec(ctx)?);
                }
                Ok(Value::Object(map))
            }
            Expr::This(path) => {
                let document = ctx.value.ok_or(QueryError::NoDocument)?;
                Ok(get_path(document, path).cloned().unwrap_or(Value::Null))
            }
            Expr::Var(name) => ctx
                .vars
                .get(name)
                .cloned()
                .ok_or_else(|| QueryError::UndefinedVariable(name.clone())),
            Expr::Meta(key) => {
                let meta = ctx.msg.get(ctx.index)?.metadata();
                Ok(match key {
                    Some(key) => meta
                        .get(key)
                        .map_or(Value::Null, |v| Value::String(v.to_string())),
                    None => Value::Object(
                        meta.iter()
                            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
                            .collect(),
                    ),
                })
            }
            Expr::Content => {
                let part = ctx.msg.get(ctx.index)?;
                Ok(Value::String(
                    String::from_utf8_lossy(part.content()).into_owned(),
                ))
            }
            Expr::Apply(name) => {
                let maps = ctx.maps;
                let block = maps
                    .get(name)
                    .ok_or_else(|| QueryError::UndefinedMap(name.clone()))?;
                if ctx.depth >= MAX_APPLY_DEPTH {
                    return Err(QueryError::RecursionLimit { name: name.clone() });
                }

                ctx.depth += 1;
                let result = block.exec(ctx);
                ctx.depth -= 1;
                result
                    .map(|output| output.unwrap_or(Value::Null))
                    .map_err(|source| QueryError::Apply {
                        name: name.clone(),
                        source: Box::new(source),
                    })
            }
            Expr::Throw(message) => Err(QueryError::Thrown(message.clone())),
        }
    }
}

/// Parse an expression of the default language.
///
/// # Errors
///
/// Returns a positioned error when the input does not start with an expression.
pub fn parse(input: &str) -> PResult<'_, Arc<dyn Function>> {
    let (rest, expr) = expression(input)?;
    let function: Arc<dyn Function> = Arc::new(expr);
    Ok((rest, function))
}

/// Parse an expression into its syntax tree.
///
/// # Errors
///
/// Returns a positioned error when the input does not start with an expression.
pub fn expression(input: &str) -> PResult<'_, Expr> {
    expect(
        "expression",
        alt((
            map(quoted_string, |s| Expr::Literal(Value::String(s))),
            number,
            array,
            object,
            word,
        )),
    )(input)
}

fn number(input: &str) -> PResult<'_, Expr> {
    let (rest, text) = recognize(tuple((
        opt(symbol('-')),
        digit1,
        opt(pair(symbol('.'), digit1)),
    )))(input)?;
    let parsed = if text.contains('.') {
        text.parse::<f64>().ok().and_then(Number::from_f64)
    } else {
        text.parse::<i64>().ok().map(Number::from)
    };
    match parsed {
        Some(n) => Ok((rest, Expr::Literal(Value::Number(n)))),
        None => Err(nom::Err::Failure(GrammarError::message(
            input,
            format!("number '{text}' is out of range"),
        ))),
    }
}

fn list_separator(input: &str) -> PResult<'_, ()> {
    let (rest, _) = tuple((multispaces0, symbol(','), multispaces0))(input)?;
    Ok((rest, ()))
}

fn array(input: &str) -> PResult<'_, Expr> {
    let (rest, items) = delimited(
        pair(symbol('['), multispaces0),
        separated_list0(list_separator, expression),
        pair(multispaces0, cut(symbol(']'))),
    )(input)?;
    Ok((rest, Expr::Array(items)))
}

fn object(input: &str) -> PResult<'_, Expr> {
    let field = separated_pair(
        quoted_string,
        cut(tuple((multispaces0, symbol(':'), multispaces0))),
        cut(expression),
    );
    let (rest, fields) = delimited(
        pair(symbol('{'), multispaces0),
        separated_list0(list_separator, field),
        pair(multispaces0, cut(symbol('}'))),
    )(input)?;
    Ok((rest, Expr::Object(fields)))
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '~')
}

fn identifier(input: &str) -> PResult<'_, &str> {
    take_while1(is_word_char)(input)
}

fn word(input: &str) -> PResult<'_, Expr> {
    let (rest, ident) = identifier(input)?;
    if rest.starts_with('(') {
        return call(input, ident, rest);
    }
    let value = match ident {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        "this" => return this_path(rest),
        _ => return Err(nom::Err::Error(GrammarError::expected(input, "expression"))),
    };
    Ok((rest, Expr::Literal(value)))
}

fn this_path(input: &str) -> PResult<'_, Expr> {
    let (rest, segments) = many0(preceded(
        symbol('.'),
        cut(expect("path segment", take_while1(is_segment_char))),
    ))(input)?;
    let path = segments
        .into_iter()
        .flat_map(dot_path_to_segments)
        .collect();
    Ok((rest, Expr::This(path)))
}

fn call<'a>(input: &'a str, name: &str, rest: &'a str) -> PResult<'a, Expr> {
    let (rest, args) = delimited(
        pair(keyword("("), multispaces0),
        separated_list0(list_separator, quoted_string),
        pair(multispaces0, cut(symbol(')'))),
    )(rest)?;

    let arity = |expected: usize| {
        if args.len() == expected {
            Ok(())
        } else {
            Err(nom::Err::Failure(GrammarError::message(
                input,
                format!(
                    "function '{name}' expects {expected} argument(s), got {}",
                    args.len()
                ),
            )))
        }
    };
    let first = || args.first().cloned().unwrap_or_default();

    let expr = match name {
        "var" => arity(1).map(|()| Expr::Var(first())),
        "meta" if args.is_empty() => Ok(Expr::Meta(None)),
        "meta" => arity(1).map(|()| Expr::Meta(Some(first()))),
        "content" => arity(0).map(|()| Expr::Content),
        "apply" => arity(1).map(|()| Expr::Apply(first())),
        "throw" => arity(1).map(|()| Expr::Throw(first())),
        _ => Err(nom::Err::Failure(GrammarError::message(
            input,
            format!("unknown function '{name}'"),
        ))),
    }?;
    Ok((rest, expr))
}
