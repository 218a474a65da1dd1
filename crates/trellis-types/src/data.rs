//! # Payload Helpers
//!
//! Flattening and merge operations over nested `serde_json::Value` payloads.
//!
//! Two merge strategies back the rules engine's attach/modify consequences:
//! [`merge_missing`] never overwrites an existing non-null key, while
//! [`overwrite_with`] gives priority to the new data and deletes keys whose
//! replacement is explicitly null or empty.

use std::collections::BTreeMap;

use serde_json::Value;

/// Flatten a nested payload to dotted leaf keys.
///
/// Maps contribute `parent.child` keys; lists contribute `parent.0`,
/// `parent.1`, ... Only non-container leaves appear in the result.
#[must_use]
pub fn flatten(value: &Value) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    flatten_into(value, String::new(), &mut out);
    out
}

fn flatten_into(value: &Value, prefix: String, out: &mut BTreeMap<String, Value>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_into(child, path, out);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                let path = if prefix.is_empty() {
                    index.to_string()
                } else {
                    format!("{prefix}.{index}")
                };
                flatten_into(child, path, out);
            }
        }
        leaf => {
            if !prefix.is_empty() {
                out.insert(prefix, leaf.clone());
            }
        }
    }
}

/// Look up a dotted key in a payload's flattened form.
#[must_use]
pub fn get_flattened(value: &Value, key: &str) -> Option<Value> {
    let mut current = value;
    for segment in key.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current.clone())
}

/// Deep-merge `extra` into `base` without overwriting existing data.
///
/// A key already present in `base` with a non-null value is kept; nested
/// objects merge recursively. Attach semantics.
pub fn merge_missing(base: &mut Value, extra: &Value) {
    let (Value::Object(base_map), Value::Object(extra_map)) = (&mut *base, extra) else {
        return;
    };

    for (key, new_value) in extra_map {
        match base_map.get_mut(key) {
            None => {
                base_map.insert(key.clone(), new_value.clone());
            }
            Some(existing) if existing.is_null() => {
                *existing = new_value.clone();
            }
            Some(existing) if existing.is_object() && new_value.is_object() => {
                merge_missing(existing, new_value);
            }
            Some(_) => {} // existing non-null value wins
        }
    }
}

/// Overwrite `base` with `new`, deleting keys whose replacement is
/// explicitly null or an empty string.
///
/// Nested objects merge recursively with the same priority. Modify
/// semantics.
pub fn overwrite_with(base: &mut Value, new: &Value) {
    let (Value::Object(base_map), Value::Object(new_map)) = (&mut *base, new) else {
        return;
    };

    for (key, new_value) in new_map {
        if is_deletion_marker(new_value) {
            base_map.remove(key);
            continue;
        }
        match base_map.get_mut(key) {
            Some(existing) if existing.is_object() && new_value.is_object() => {
                overwrite_with(existing, new_value);
            }
            _ => {
                base_map.insert(key.clone(), new_value.clone());
            }
        }
    }
}

fn is_deletion_marker(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}
