//! Dot-path navigation over parsed JSON values.
//!
//! Paths are GJSON-flavoured: dot-separated keys, numeric array indices,
//! and double-quoted segments for keys containing dots. Single quotes in
//! stored rules are normalised to double quotes before lookup.

use serde_json::Value;

/// Replaces single quotes with double quotes so rule authors can avoid
/// escaping quotes inside JSON rule strings.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    path.replace('\'', "\"")
}

fn split_segments(path: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in path.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            '.' if !in_quotes => {
                segments.push(std::mem::take(&mut current));
                current.clear();
            }
            other => current.push(other),
        }
    }
    segments.push(current);
    segments
}

/// Resolves a normalised dot path against a JSON value.
#[must_use]
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in split_segments(path) {
        if segment.is_empty() {
            return None;
        }
        current = match current {
            Value::Object(map) => map.get(&segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// String form of a JSON value as extraction output: strings verbatim,
/// null empty, everything else compact JSON.
#[must_use]
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_object_path() {
        let value = json!({"data": {"id": "X", "chapters": 3}});
        assert_eq!(lookup(&value, "data.id").unwrap(), "X");
        assert_eq!(lookup(&value, "data.chapters").unwrap(), 3);
        assert!(lookup(&value, "data.missing").is_none());
    }

    #[test]
    fn test_lookup_array_index() {
        let value = json!({"items": [{"url": "a"}, {"url": "b"}]});
        assert_eq!(lookup(&value, "items.1.url").unwrap(), "b");
        assert!(lookup(&value, "items.2.url").is_none());
        assert!(lookup(&value, "items.x").is_none());
    }

    #[test]
    fn test_quoted_segment_keeps_dots() {
        let value = json!({"a.b": {"c": 1}});
        assert_eq!(lookup(&value, "\"a.b\".c").unwrap(), 1);
    }

    #[test]
    fn test_normalize_path_rewrites_single_quotes() {
        assert_eq!(normalize_path("'a.b'.c"), "\"a.b\".c");
    }

    #[test]
    fn test_value_to_string_forms() {
        assert_eq!(value_to_string(&json!("text")), "text");
        assert_eq!(value_to_string(&json!(3)), "3");
        assert_eq!(value_to_string(&json!(null)), "");
        assert_eq!(value_to_string(&json!(true)), "true");
        assert_eq!(value_to_string(&json!({"a": 1})), r#"{"a":1}"#);
        assert_eq!(value_to_string(&json!(["x"])), r#"["x"]"#);
    }
}
