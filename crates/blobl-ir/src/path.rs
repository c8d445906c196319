//! Dot-path addressing over JSON-like documents
//!
//! Paths are written as dot separated segments (`a.b.c`). Within a segment
//! `~1` stands for a literal `.` and `~0` for a literal `~`.

use crate::{Error, Result};
use serde_json::{Map, Value};

/// Split a dot path into unescaped segments.
///
/// Empty segments are preserved so callers can reject them with a position.
pub fn dot_path_to_segments(path: &str) -> Vec<String> {
    path.split('.')
        .map(|segment| segment.replace("~1", ".").replace("~0", "~"))
        .collect()
}

fn render(path: &[String]) -> String {
    path.join(".")
}

/// Resolve a path within a document.
///
/// Objects are indexed by key and arrays by numeric segment. Returns `None`
/// when any segment does not resolve.
pub fn get_path<'a>(document: &'a Value, path: &[String]) -> Option<&'a Value> {
    let mut current = document;
    for segment in path {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Write a value into a document at a path, creating intermediate objects.
///
/// An empty path replaces the whole document. Scalars found along the way are
/// replaced by objects; arrays are only traversed by an in-bounds index.
///
/// # Errors
///
/// Returns an error if a segment addresses an array with a non-index or
/// out-of-bounds segment.
pub fn set_path(document: &mut Value, path: &[String], value: Value) -> Result<()> {
    let Some((last, parents)) = path.split_last() else {
        *document = value;
        return Ok(());
    };

    let mut current = document;
    for (depth, segment) in parents.iter().enumerate() {
        current = child_mut(current, segment, &path[..=depth])?;
    }

    match current {
        Value::Array(items) => {
            let slot = array_slot(items, last, path)?;
            *slot = value;
        }
        Value::Object(map) => {
            map.insert(last.clone(), value);
        }
        other => {
            let mut map = Map::new();
            map.insert(last.clone(), value);
            *other = Value::Object(map);
        }
    }
    Ok(())
}

fn child_mut<'a>(
    current: &'a mut Value,
    segment: &str,
    walked: &[String],
) -> Result<&'a mut Value> {
    match current {
        Value::Array(items) => array_slot(items, segment, walked),
        Value::Object(map) => Ok(map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()))),
        other => {
            tracing::trace!(path = %render(walked), "replacing scalar with object");
            *other = Value::Object(Map::new());
            child_mut(other, segment, walked)
        }
    }
}

fn array_slot<'a>(
    items: &'a mut [Value],
    segment: &str,
    walked: &[String],
) -> Result<&'a mut Value> {
    let len = items.len();
    let index = segment.parse::<usize>().map_err(|_| {
        Error::invalid_path(
            render(walked),
            format!("segment '{segment}' is not an index into an array"),
        )
    })?;
    items.get_mut(index).ok_or_else(|| {
        Error::invalid_path(
            render(walked),
            format!("index {index} is out of bounds for an array of {len}"),
        )
    })
}
