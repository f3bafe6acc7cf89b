//! # Attribute Flattening
//!
//! Component attributes are open, possibly nested maps. The datastore and the
//! remote service only deal in scalar properties, so nested maps are turned
//! into dotted paths:
//!
//! ```text
//! {"vendor": "Intel", "cache": {"l2": 256, "l3": {"size": 8}}}
//!
//!     vendor      = "Intel"
//!     cache.l2    = 256
//!     cache.l3.size = 8
//! ```
//!
//! Arrays are kept as a single property holding the JSON array. The walk is
//! an explicit stack, so deep nesting cannot overflow the call stack.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Flattened property map, ordered by dotted path.
pub type FlatMap = BTreeMap<String, Value>;

/// Flattens a nested attribute map into dotted-path scalar properties.
///
/// Empty nested maps produce no properties.
pub fn flatten(attrs: &Map<String, Value>) -> FlatMap {
    let mut out = FlatMap::new();
    let mut stack: Vec<(String, &Map<String, Value>)> = vec![(String::new(), attrs)];

    while let Some((prefix, map)) = stack.pop() {
        for (key, value) in map {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };

            match value {
                Value::Object(inner) => stack.push((path, inner)),
                other => {
                    out.insert(path, other.clone());
                }
            }
        }
    }

    out
}

/// Renders a flattened value as the TEXT stored in a property row.
///
/// Strings are stored without quotes; everything else is its JSON text.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten_nested() {
        let attrs = json!({
            "vendor": "Intel",
            "cores": 8,
            "cache": {"l2": 256, "l3": {"size": 8}},
        });
        let flat = flatten(attrs.as_object().unwrap());

        assert_eq!(flat.len(), 4);
        assert_eq!(flat["vendor"], json!("Intel"));
        assert_eq!(flat["cores"], json!(8));
        assert_eq!(flat["cache.l2"], json!(256));
        assert_eq!(flat["cache.l3.size"], json!(8));
    }

    #[test]
    fn test_flatten_keeps_arrays_whole() {
        let attrs = json!({"flags": ["sse", "avx"], "empty": {}});
        let flat = flatten(attrs.as_object().unwrap());

        assert_eq!(flat.len(), 1);
        assert_eq!(flat["flags"], json!(["sse", "avx"]));
    }

    #[test]
    fn test_flatten_deep_nesting() {
        let mut value = json!(1);
        for _ in 0..500 {
            value = json!({ "n": value });
        }
        let flat = flatten(value.as_object().unwrap());
        assert_eq!(flat.len(), 1);
    }

    #[test]
    fn test_value_to_text() {
        assert_eq!(value_to_text(&json!("abc")), "abc");
        assert_eq!(value_to_text(&json!(42)), "42");
        assert_eq!(value_to_text(&json!(true)), "true");
        assert_eq!(value_to_text(&json!(null)), "null");
    }
}
