#![deny(warnings)]
#![deny(rust_2018_idioms)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Grammar parsers are documented at the statement level rather than per combinator.
#![allow(clippy::missing_errors_doc)]

//! # blobl-mapping
//!
//! Statement-level engine of the blobl mapping language.
//!
//! A mapping is a sequence of statements, one per line:
//!
//! ```text
//! map <name> { <statement> (newline <statement>)* }
//! let <name> = <expr>
//! meta [<name>] = <expr>
//! <path> = <expr>
//! ```
//!
//! [`Executor::parse`] turns the source into an immutable plan that can be
//! shared between threads and run any number of times. Each run evaluates
//! expressions against the original input document, threads a fresh variable
//! scope through the statements and only replaces the message content when a
//! path assignment fired.
//!
//! ```
//! use blobl_ir::Message;
//! use blobl_mapping::Executor;
//!
//! let exec = Executor::parse("root.b = this.a\nmeta topic = \"orders\"").unwrap();
//! let mut msg = Message::from_contents([r#"{"a":1}"#]);
//! exec.map_part(0, &mut msg).unwrap();
//!
//! assert_eq!(msg.get(0).unwrap().content(), br#"{"b":1}"#);
//! assert_eq!(msg.get(0).unwrap().metadata().get("topic"), Some("orders"));
//! ```

/// Assignment targets: variables, metadata and output paths.
pub mod assignment;
/// Positioned parse errors.
pub mod error;
/// Execution plans and the statement run loop.
pub mod executor;
/// Statement grammar and parse configuration.
pub mod grammar;
/// Parsing primitives built on nom.
pub mod parser;
/// Line/column resolution for error reporting.
pub mod position;
/// The expression seam and the default expression language.
pub mod query;

pub use assignment::{Assignment, AssignmentContext, AssignmentError};
pub use error::ParseError;
pub use executor::{Executor, MapBlock, Maps, Statement};
pub use grammar::{parse_executor, ParseConfig};
pub use position::{LineIndex, Location};
pub use query::{
    Expr, Function, FunctionContext, QueryError, QueryParser, Vars, MAX_APPLY_DEPTH,
};

use blobl_ir::Value;
use thiserror::Error;

/// Errors that can occur when parsing or running a mapping
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to parse mapping: {0}")]
    Parse(#[from] ParseError),

    #[error("failed to execute mapping assignment at line {line}: {source}")]
    Query {
        line: usize,
        #[source]
        source: QueryError,
    },

    #[error("failed to assign mapping result at line {line}: {source}")]
    Assignment {
        line: usize,
        #[source]
        source: AssignmentError,
    },

    #[error("failed to set result of mapping: {0}")]
    Commit(#[source] blobl_ir::Error),

    #[error(transparent)]
    Message(#[from] blobl_ir::Error),
}

impl Error {
    /// Source line of the statement that failed, for run-time errors.
    #[must_use]
    pub fn line(&self) -> Option<usize> {
        match self {
            Error::Query { line, .. } | Error::Assignment { line, .. } => Some(*line),
            Error::Parse(err) => Some(err.line),
            Error::Commit(_) | Error::Message(_) => None,
        }
    }

    /// The best-effort value carried by a recoverable expression failure.
    #[must_use]
    pub fn recovered(&self) -> Option<&Value> {
        match self {
            Error::Query {
                source: QueryError::Recoverable { recovered, .. },
                ..
            } => Some(recovered),
            _ => None,
        }
    }
}

/// Crate-local result type for mapping operations.
pub type Result<T> = std::result::Result<T, Error>;
