//! Message batches and parts
#![allow(clippy::must_use_candidate)] // Builder/constructor API intentionally omits pervasive #[must_use].
#![allow(clippy::return_self_not_must_use)] // Fluent builder methods return Self for ergonomics.

use crate::metadata::Metadata;
use crate::{Error, Result};
use serde_json::Value;

/// A single message part: raw content plus metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Part {
    /// Raw content bytes
    content: Vec<u8>,

    /// Metadata entries of this part
    metadata: Metadata,
}

/// An ordered batch of message parts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    parts: Vec<Part>,
}

impl Part {
    /// Create a part from raw content
    pub fn new(content: impl Into<Vec<u8>>) -> Self {
        Self {
            content: content.into(),
            metadata: Metadata::new(),
        }
    }

    /// Raw content bytes
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Replace the raw content
    pub fn set_content(&mut self, content: impl Into<Vec<u8>>) {
        self.content = content.into();
    }

    /// Metadata of this part
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Mutable metadata of this part
    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// Parse the content as a JSON document
    ///
    /// # Errors
    ///
    /// Returns an error if the content is not valid JSON.
    pub fn json(&self) -> Result<Value> {
        serde_json::from_slice(&self.content).map_err(Error::InvalidJson)
    }

    /// Replace the content with the serialized form of a document
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be serialized.
    pub fn set_json(&mut self, document: &Value) -> Result<()> {
        let content = serde_json::to_vec(document).map_err(Error::Serialize)?;
        self.set_content(content);
        Ok(())
    }
}

impl Message {
    /// Create an empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a batch from parts
    pub fn from_parts(parts: Vec<Part>) -> Self {
        Self { parts }
    }

    /// Create a batch holding one part per raw payload
    pub fn from_contents<I, C>(contents: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Vec<u8>>,
    {
        Self {
            parts: contents.into_iter().map(Part::new).collect(),
        }
    }

    /// Append a part
    pub fn push(&mut self, part: Part) -> &mut Self {
        self.parts.push(part);
        self
    }

    /// Number of parts
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// Whether the batch is empty
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// All parts in order
    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    /// Consume the batch, returning its parts
    pub fn into_parts(self) -> Vec<Part> {
        self.parts
    }

    /// Get a part by index
    ///
    /// # Errors
    ///
    /// Returns an error if the index is out of bounds.
    pub fn get(&self, index: usize) -> Result<&Part> {
        let len = self.parts.len();
        self.parts
            .get(index)
            .ok_or(Error::PartNotFound { index, len })
    }

    /// Get a mutable part by index
    ///
    /// # Errors
    ///
    /// Returns an error if the index is out of bounds.
    pub fn get_mut(&mut self, index: usize) -> Result<&mut Part> {
        let len = self.parts.len();
        self.parts
            .get_mut(index)
            .ok_or(Error::PartNotFound { index, len })
    }

    /// Read the document at a part index
    ///
    /// # Errors
    ///
    /// Returns an error if the index is out of bounds or the content is not JSON.
    pub fn read(&self, index: usize) -> Result<Value> {
        self.get(index)?.json()
    }

    /// Write a document into a part index
    ///
    /// # Errors
    ///
    /// Returns an error if the index is out of bounds or serialization fails.
    pub fn write(&mut self, index: usize, document: &Value) -> Result<()> {
        self.get_mut(index)?.set_json(document)
    }
}
