//! Row values and the post-processing applied to query results.

use serde_json::{Map, Value};

use crate::schema::ModelSchema;

/// A result row: column name to dynamic value.
pub type Row = Map<String, Value>;

/// Coerces the model's boolean fields in `row` to `true`/`false`.
///
/// `1`, `true` and `"1"` become `true`; any other present value becomes `false`.
/// Absent keys are left absent.
pub fn normalize_booleans(model: &ModelSchema, row: &mut Row) {
    for name in model.boolean_fields() {
        if let Some(value) = row.get_mut(name) {
            *value = Value::Bool(is_truthy(value));
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64() == Some(1) || n.as_f64() == Some(1.0),
        Value::String(s) => s == "1",
        _ => false,
    }
}

/// Removes every excluded path from `node`, recursing through arrays.
///
/// A path is dot-separated. The first segment is removed (or descended into) on
/// `node`; arrays apply the same paths to each element. Missing keys are ignored.
pub fn remove_excluded(node: &mut Value, paths: &[String]) {
    for path in paths {
        let segments: Vec<&str> = path.split('.').collect();
        remove_path(node, &segments);
    }
}

fn remove_path(node: &mut Value, segments: &[&str]) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    match node {
        Value::Array(items) => {
            for item in items {
                remove_path(item, segments);
            }
        }
        Value::Object(map) => {
            if rest.is_empty() {
                map.remove(*head);
            } else if let Some(child) = map.get_mut(*head) {
                remove_path(child, rest);
            }
        }
        _ => {}
    }
}

/// Applies `paths` to a flat row (see [`remove_excluded`]).
pub fn remove_excluded_from_row(row: &mut Row, paths: &[String]) {
    for path in paths {
        let segments: Vec<&str> = path.split('.').collect();
        if let Some((head, rest)) = segments.split_first() {
            if rest.is_empty() {
                row.remove(*head);
            } else if let Some(child) = row.get_mut(*head) {
                remove_path(child, rest);
            }
        }
    }
}

/// Returns the grouping key used to match related rows to their parents.
///
/// Numbers and strings compare by their textual form so that `7` and `"7"`
/// land in the same group. Nulls and composite values have no key.
pub fn lookup_key(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(u8::from(*b).to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}
