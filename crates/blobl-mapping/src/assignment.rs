//! Assignment targets of mapping statements

use crate::query::Vars;
use blobl_ir::{set_path, to_text, type_name, Metadata, Value};
use serde_json::Map;
use thiserror::Error;

/// Errors raised while applying an evaluated value to its target
#[derive(Error, Debug)]
pub enum AssignmentError {
    #[error("metadata assignment without a key requires an object value, found {found}")]
    MetadataNotObject { found: &'static str },

    #[error(transparent)]
    Path(#[from] blobl_ir::Error),
}

/// The mutable targets an assignment may write to.
#[derive(Debug)]
pub struct AssignmentContext<'a> {
    /// Variables of the current execution
    pub vars: &'a mut Vars,

    /// Metadata of the part being mapped
    pub meta: &'a mut Metadata,

    /// Output document under construction; `None` until a path is assigned
    pub value: &'a mut Option<Value>,
}

/// Where the result of a statement goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    /// `let name = ...`
    Variable { name: String },

    /// `meta key = ...`, or `meta = ...` to merge an object
    Metadata { key: Option<String> },

    /// `a.b = ...`; an empty path addresses the whole output document
    Path { path: Vec<String> },
}

impl Assignment {
    /// Apply an evaluated value to this target.
    ///
    /// # Errors
    ///
    /// Returns an error if a key-less metadata assignment receives a non-object
    /// value or the output path cannot be written.
    pub fn apply(&self, value: Value, ctx: &mut AssignmentContext<'_>) -> Result<(), AssignmentError> {
        match self {
            Assignment::Variable { name } => {
                ctx.vars.insert(name.clone(), value);
            }
            Assignment::Metadata { key: Some(key) } => {
                ctx.meta.set(key.clone(), to_text(&value));
            }
            Assignment::Metadata { key: None } => {
                let Value::Object(fields) = value else {
                    return Err(AssignmentError::MetadataNotObject {
                        found: type_name(&value),
                    });
                };
                for (key, field) in &fields {
                    ctx.meta.set(key.clone(), to_text(field));
                }
            }
            Assignment::Path { path } if path.is_empty() => {
                *ctx.value = Some(value);
            }
            Assignment::Path { path } => {
                let target = ctx
                    .value
                    .get_or_insert_with(|| Value::Object(Map::new()));
                set_path(target, path, value)?;
            }
        }
        Ok(())
    }
}
