//! Positioned parse errors

use crate::parser::Cause;
use std::fmt;

/// A syntax error located in the mapping source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// File the mapping was read from, when known
    pub filename: Option<String>,

    /// Line number (1-indexed)
    pub line: usize,

    /// Character position within the line (1-indexed)
    pub column: usize,

    /// What went wrong
    pub cause: Cause,
}

impl ParseError {
    /// Attach the name of the file the mapping came from
    #[must_use]
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(filename) = &self.filename {
            write!(f, "file {filename}: ")?;
        }
        write!(f, "line {} char {}: {}", self.line, self.column, self.cause)
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}
