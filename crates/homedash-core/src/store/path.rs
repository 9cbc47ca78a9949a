// ── Dot-path addressing over a JSON document ──
//
// `"connections.hue.online"` walks objects by key. A numeric segment
// indexes an array when the node at that point is one; writes past the
// end pad the array with `null`. Arrays are never replaced by objects.

use serde_json::{Map, Value};
use thiserror::Error;

/// Separator between path segments.
pub const PATH_SEPARATOR: char = '.';

/// First segment of `path`; the unit of persistence.
pub fn top_level(path: &str) -> &str {
    path.split(PATH_SEPARATOR).next().unwrap_or(path)
}

/// Whether `path` has more than one segment.
pub fn is_nested(path: &str) -> bool {
    path.contains(PATH_SEPARATOR)
}

/// A write that would have to discard an array.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("segment '{segment}' does not index an array")]
pub struct NotAnIndex {
    pub segment: String,
}

pub(crate) fn get<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split(PATH_SEPARATOR)
        .try_fold(doc, |node, segment| child(node, segment))
}

/// Write `value` at `path`, creating intermediate objects and replacing
/// scalar intermediates. Returns the value previously there.
pub(crate) fn set(doc: &mut Value, path: &str, value: Value) -> Result<Option<Value>, NotAnIndex> {
    let (parent, last) = split_last(path);
    let mut node = doc;
    if let Some(parent) = parent {
        for segment in parent.split(PATH_SEPARATOR) {
            node = descend(node, segment)?;
        }
    }

    match node {
        Value::Array(items) => {
            let index = require_index(last)?;
            if index < items.len() {
                return Ok(Some(std::mem::replace(&mut items[index], value)));
            }
            items.resize(index, Value::Null);
            items.push(value);
            Ok(None)
        }
        other => {
            reset_unless_object(other);
            Ok(other
                .as_object_mut()
                .and_then(|map| map.insert(last.to_owned(), value)))
        }
    }
}

/// Delete the last segment of `path` from its parent.
pub(crate) fn remove(doc: &mut Value, path: &str) -> Option<Value> {
    let (parent, last) = split_last(path);
    let node = match parent {
        Some(parent) => parent
            .split(PATH_SEPARATOR)
            .try_fold(doc, |node, segment| child_mut(node, segment))?,
        None => doc,
    };
    match node {
        Value::Object(map) => map.remove(last),
        Value::Array(items) => {
            let index = parse_index(last).filter(|i| *i < items.len())?;
            Some(items.remove(index))
        }
        _ => None,
    }
}

// ── Private helpers ──────────────────────────────────────────────

fn split_last(path: &str) -> (Option<&str>, &str) {
    match path.rsplit_once(PATH_SEPARATOR) {
        Some((parent, last)) => (Some(parent), last),
        None => (None, path),
    }
}

fn parse_index(segment: &str) -> Option<usize> {
    segment.parse().ok()
}

fn child<'a>(node: &'a Value, segment: &str) -> Option<&'a Value> {
    match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => parse_index(segment).and_then(|i| items.get(i)),
        _ => None,
    }
}

fn child_mut<'a>(node: &'a mut Value, segment: &str) -> Option<&'a mut Value> {
    match node {
        Value::Object(map) => map.get_mut(segment),
        Value::Array(items) => parse_index(segment).and_then(|i| items.get_mut(i)),
        _ => None,
    }
}

fn require_index(segment: &str) -> Result<usize, NotAnIndex> {
    parse_index(segment).ok_or_else(|| NotAnIndex {
        segment: segment.to_owned(),
    })
}

fn reset_unless_object(node: &mut Value) {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
}

fn descend<'a>(node: &'a mut Value, segment: &str) -> Result<&'a mut Value, NotAnIndex> {
    match node {
        Value::Array(items) => {
            let index = require_index(segment)?;
            if index >= items.len() {
                items.resize(index + 1, Value::Null);
            }
            Ok(&mut items[index])
        }
        other => {
            reset_unless_object(other);
            // Indexing an object by key inserts `null` when absent.
            Ok(&mut other[segment])
        }
    }
}
