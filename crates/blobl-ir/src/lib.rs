#![deny(warnings)]
#![deny(rust_2018_idioms)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

//! # blobl-ir
//!
//! Message and document model for blobl mappings.
//!
//! This crate provides the host side of a mapping run: batches of message
//! parts carrying raw content and a string metadata store, plus dot-path
//! addressing over JSON-like documents.

/// Message batches and their parts.
pub mod message;
/// Per-part string metadata store.
pub mod metadata;
/// Dot-path parsing and nested get/set over documents.
pub mod path;
/// Value serialization helpers.
pub mod value;

/// Message batch and part types.
pub use message::{Message, Part};
/// Metadata key/value store.
pub use metadata::Metadata;
/// Path helpers for nested document access.
pub use path::{dot_path_to_segments, get_path, set_path};
/// JSON-like document value.
pub use serde_json::Value;
/// Value to bytes/text conversions.
pub use value::{to_bytes, to_text, type_name};

use thiserror::Error;

/// Errors that can occur when working with messages and documents
#[derive(Error, Debug)]
pub enum Error {
    #[error("message part index {index} is out of bounds for a batch of {len}")]
    PartNotFound { index: usize, len: usize },

    #[error("failed to parse message part as JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("failed to serialize document: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },
}

impl Error {
    /// Build an invalid-path error with the offending path and reason.
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Crate-local result type for IR operations.
pub type Result<T> = std::result::Result<T, Error>;
