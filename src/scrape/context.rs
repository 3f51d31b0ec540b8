//! The keyed evaluation context threaded through one scrape invocation.
//!
//! Reserved keys: `url`, `id`, query-string keys, named regex captures, and
//! per-step `{stepId}` (parsed payload) / `{stepId}_raw` (raw body). The
//! default HTML document of a static scrape is carried separately so CSS
//! rules without a `from` have a source.

use std::collections::HashMap;

use serde_json::Value;

use super::json_path::value_to_string;

/// A value stored in the context: either raw text (URLs, ids, captures, raw
/// step bodies, HTML payloads) or a parsed JSON payload.
#[derive(Debug, Clone)]
pub enum ContextValue {
    Text(String),
    Json(Value),
}

impl ContextValue {
    /// String form used by the `{key}` template renderer.
    #[must_use]
    pub fn render_string(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Json(value) => value_to_string(value),
        }
    }
}

/// The mutable keyed bag of values built up during one scrape.
#[derive(Debug, Clone, Default)]
pub struct ScrapeContext {
    values: HashMap<String, ContextValue>,
    /// Parsed page of a static scrape, used as the default extraction
    /// source for rules without a `from`.
    pub default_html: Option<String>,
}

impl ScrapeContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a text value.
    pub fn set_text(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values
            .insert(key.into(), ContextValue::Text(value.into()));
    }

    /// Stores a parsed JSON value.
    pub fn set_json(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), ContextValue::Json(value));
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        self.values.get(key)
    }

    /// Text form of a stored value, if present.
    #[must_use]
    pub fn text(&self, key: &str) -> Option<String> {
        self.values.get(key).map(ContextValue::render_string)
    }

    /// Source lookup for a field's `from`: the raw step body wins over the
    /// parsed payload.
    #[must_use]
    pub fn lookup_source(&self, from: &str) -> Option<&ContextValue> {
        self.values
            .get(&format!("{from}_raw"))
            .or_else(|| self.values.get(from))
    }

    /// Sorted key list for error messages.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.values.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// The context as a JSON object, for JSON rules evaluated directly
    /// against the context map.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let map = self
            .values
            .iter()
            .map(|(key, value)| {
                let json = match value {
                    ContextValue::Text(text) => Value::String(text.clone()),
                    ContextValue::Json(value) => value.clone(),
                };
                (key.clone(), json)
            })
            .collect();
        Value::Object(map)
    }
}
