//! Structured spec values and the comparison rules the engine relies on
//!
//! Desired and actual specs are plain `serde_json::Value` trees. The helpers here are the
//! only place where two specs are compared, so drift scoring and conflict analysis agree on
//! what "different" means:
//! - Numbers compare by numeric value (`3` and `3.0` are the same replica count)
//! - Objects compare key-by-key regardless of insertion order
//! - Top-level keys on an ignore list (e.g. `status`) never count as drift

use std::collections::BTreeSet;

use serde_json::{Map, Number, Value};

/// A desired or actual resource specification
pub type SpecValue = Value;

/// Deep equality with numeric normalisation
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => numbers_equal(x, y),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| values_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(k, v)| y.get(k).is_some_and(|other| values_equal(v, other)))
        }
        _ => a == b,
    }
}

fn numbers_equal(x: &Number, y: &Number) -> bool {
    if let (Some(a), Some(b)) = (x.as_i64(), y.as_i64()) {
        return a == b;
    }
    if let (Some(a), Some(b)) = (x.as_u64(), y.as_u64()) {
        return a == b;
    }
    match (x.as_f64(), y.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Short type name used in structural conflict messages
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Check whether two values share the same JSON type
pub fn same_type(a: &Value, b: &Value) -> bool {
    type_name(a) == type_name(b)
}

/// Sorted union of the keys of two maps, minus ignored keys
pub fn union_keys<'a>(
    desired: &'a Map<String, Value>,
    actual: &'a Map<String, Value>,
    ignored: &BTreeSet<String>,
) -> BTreeSet<&'a str> {
    desired
        .keys()
        .chain(actual.keys())
        .map(String::as_str)
        .filter(|k| !ignored.contains(*k))
        .collect()
}

/// Top-level keys whose values differ (a key missing on one side counts as differing)
pub fn differing_keys(
    desired: &Map<String, Value>,
    actual: &Map<String, Value>,
    ignored: &BTreeSet<String>,
) -> Vec<String> {
    union_keys(desired, actual, ignored)
        .into_iter()
        .filter(|key| match (desired.get(*key), actual.get(*key)) {
            (Some(d), Some(a)) => !values_equal(d, a),
            _ => true,
        })
        .map(String::from)
        .collect()
}

/// Relative size of a change between two values, in `[0.0, 1.0]`
///
/// A field that only exists on one side, or that changed type, is a full change.
pub fn change_magnitude(desired: Option<&Value>, actual: Option<&Value>) -> f64 {
    let (desired, actual) = match (desired, actual) {
        (Some(d), Some(a)) => (d, a),
        (None, None) => return 0.0,
        _ => return 1.0,
    };

    if values_equal(desired, actual) {
        return 0.0;
    }
    if !same_type(desired, actual) {
        return 1.0;
    }

    let magnitude = match (desired, actual) {
        (Value::Number(d), Value::Number(a)) => {
            let (d, a) = (d.as_f64().unwrap_or(0.0), a.as_f64().unwrap_or(0.0));
            let scale = d.abs().max(a.abs());
            if scale == 0.0 {
                0.0
            } else {
                (d - a).abs() / scale
            }
        }
        (Value::Array(d), Value::Array(a)) => {
            let longest = d.len().max(a.len());
            let mismatched = d
                .iter()
                .zip(a)
                .filter(|(l, r)| !values_equal(l, r))
                .count()
                + d.len().abs_diff(a.len());
            mismatched as f64 / longest as f64
        }
        (Value::Object(d), Value::Object(a)) => {
            let ignored = BTreeSet::new();
            let total = union_keys(d, a, &ignored).len();
            differing_keys(d, a, &ignored).len() as f64 / total.max(1) as f64
        }
        (Value::Bool(_), Value::Bool(_)) => 1.0,
        // Renamed strings are a moderate change; the value itself carries no scale
        _ => 0.5,
    };

    magnitude.clamp(0.0, 1.0)
}

/// Look up a dotted path such as `metadata.creationTimestamp`
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| current.get(segment))
}

/// Join a parent path and a child key into a dotted field path
pub fn join_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", parent, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numeric_normalisation() {
        assert!(values_equal(&json!({"replicas": 3}), &json!({"replicas": 3.0})));
        assert!(!values_equal(&json!({"replicas": 3}), &json!({"replicas": 4})));
    }

    #[test]
    fn test_object_order_independent() {
        let a: Value = serde_json::from_str(r#"{"a": 1, "b": {"c": [1, 2]}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"b": {"c": [1, 2]}, "a": 1}"#).unwrap();
        assert!(values_equal(&a, &b));
    }

    #[test]
    fn test_differing_keys_respects_ignore_list() {
        let desired = json!({"subnet": "10.0.0.0/16", "vlan": 100});
        let actual = json!({"subnet": "10.0.1.0/16", "vlan": 100, "status": {"ready": true}});
        let ignored: BTreeSet<String> = ["status".to_string()].into_iter().collect();

        let keys = differing_keys(
            desired.as_object().unwrap(),
            actual.as_object().unwrap(),
            &ignored,
        );
        assert_eq!(keys, vec!["subnet".to_string()]);
    }

    #[test]
    fn test_change_magnitude() {
        assert_eq!(change_magnitude(None, Some(&json!(1))), 1.0);
        assert_eq!(change_magnitude(Some(&json!(10)), Some(&json!(9))), 0.1);
        assert_eq!(change_magnitude(Some(&json!("a")), Some(&json!(1))), 1.0);
        assert_eq!(change_magnitude(Some(&json!([1, 2])), Some(&json!([1, 3]))), 0.5);
        assert_eq!(change_magnitude(Some(&json!("x")), Some(&json!("x"))), 0.0);
    }

    #[test]
    fn test_lookup_path() {
        let value = json!({"metadata": {"creationTimestamp": "2026-01-01T00:00:00Z"}});
        assert_eq!(
            lookup_path(&value, "metadata.creationTimestamp"),
            Some(&json!("2026-01-01T00:00:00Z"))
        );
        assert!(lookup_path(&value, "metadata.missing").is_none());
    }
}
