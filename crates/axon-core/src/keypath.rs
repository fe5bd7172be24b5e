#![forbid(unsafe_code)]

//! Key-path resolution over a [`serde_json::Value`] tree.
//!
//! A key path is a `.`-delimited string (`"user.address.city"`) addressing a
//! nested value. Path semantics live entirely here; the store's `get`/`set`
//! surface stays flat strings.
//!
//! # Invariants
//!
//! 1. A numeric segment indexes into an array; any other segment is an
//!    object key.
//! 2. The reserved segment `length`, applied to an array as the final
//!    segment, resolves to the array's element count.
//! 3. [`store`] creates missing intermediate objects and pads arrays with
//!    `Null` when a numeric segment is past the end; it never fails.
//! 4. Key strings containing `.` cannot be addressed individually.
//!
//! # Failure Modes
//!
//! - [`resolve`] on a missing or mistyped path returns `None` (no panic).
//! - [`remove`] on a missing path returns `None` and leaves the tree as-is.

use serde_json::{Map, Value};

/// Path segment delimiter.
pub const SEPARATOR: char = '.';

/// Reserved final segment reading an array's element count.
const LENGTH_SEGMENT: &str = "length";

/// Resolve `path` against `root`, returning a clone of the addressed value.
///
/// Returns `None` when any segment is missing, a non-numeric segment hits an
/// array, or a segment descends into a scalar.
#[must_use]
pub fn resolve(root: &Value, path: &str) -> Option<Value> {
    let mut current = root;
    let mut segments = path.split(SEPARATOR).peekable();
    while let Some(segment) = segments.next() {
        match current {
            Value::Object(map) => current = map.get(segment)?,
            Value::Array(items) => {
                if segment == LENGTH_SEGMENT && segments.peek().is_none() {
                    return Some(Value::from(items.len()));
                }
                let index: usize = segment.parse().ok()?;
                current = items.get(index)?;
            }
            _ => return None,
        }
    }
    Some(current.clone())
}

/// Write `value` at `path`, returning the displaced old value.
///
/// Missing intermediate segments are created as empty objects; a scalar in
/// the way is overwritten. A numeric segment past the end of an array pads
/// the gap with `Null`.
pub fn store(root: &mut Value, path: &str, value: Value) -> Option<Value> {
    let segments: Vec<&str> = path.split(SEPARATOR).collect();
    let (last, parents) = segments.split_last().expect("split yields at least one segment");
    let mut current = root;
    for segment in parents {
        current = step_mut(current, segment);
    }
    place(current, last, value)
}

/// Remove the value at `path`, returning it.
///
/// Removing an array slot splices it out (later elements shift down).
pub fn remove(root: &mut Value, path: &str) -> Option<Value> {
    let segments: Vec<&str> = path.split(SEPARATOR).collect();
    let (last, parents) = segments.split_last().expect("split yields at least one segment");
    let mut current = root;
    for segment in parents {
        match current {
            Value::Object(map) => current = map.get_mut(*segment)?,
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                current = items.get_mut(index)?;
            }
            _ => return None,
        }
    }
    match current {
        Value::Object(map) => map.remove(*last),
        Value::Array(items) => {
            let index: usize = last.parse().ok()?;
            if index < items.len() {
                Some(items.remove(index))
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Get a mutable array at `path`, shaping the slot into an array if needed.
pub(crate) fn array_mut<'a>(root: &'a mut Value, path: &str) -> &'a mut Vec<Value> {
    let mut current = root;
    for segment in path.split(SEPARATOR) {
        current = step_mut(current, segment);
    }
    if !current.is_array() {
        *current = Value::Array(Vec::new());
    }
    current.as_array_mut().expect("just shaped into an array")
}

/// Descend one segment, creating the slot if missing.
fn step_mut<'a>(current: &'a mut Value, segment: &str) -> &'a mut Value {
    let as_index = segment.parse::<usize>().ok().filter(|_| current.is_array());
    if let Some(index) = as_index {
        let items = current.as_array_mut().expect("just checked is_array");
        if index >= items.len() {
            items.resize(index + 1, Value::Null);
        }
        return &mut items[index];
    }
    if !current.is_object() {
        *current = Value::Object(Map::new());
    }
    let map = current.as_object_mut().expect("just shaped into an object");
    map.entry(segment.to_owned()).or_insert(Value::Null)
}

/// Write the final segment, returning the displaced value if the slot was
/// occupied.
fn place(current: &mut Value, segment: &str, value: Value) -> Option<Value> {
    if let Value::Array(items) = current {
        if let Ok(index) = segment.parse::<usize>() {
            if index < items.len() {
                return Some(std::mem::replace(&mut items[index], value));
            }
            items.resize(index, Value::Null);
            items.push(value);
            return None;
        }
    }
    if !current.is_object() {
        *current = Value::Object(Map::new());
    }
    let map = current.as_object_mut().expect("just shaped into an object");
    map.insert(segment.to_owned(), value)
}
