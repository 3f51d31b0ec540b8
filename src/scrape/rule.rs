//! Declarative site-rule schema.
//!
//! Rules are stored as JSON in the `scraping_rules` table
//! (`manga_rule_json` / `chapter_rule_json`) and deserialize into these
//! types. Optional scalar fields default to empty strings so rule JSON can
//! stay sparse.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// How a source site is fetched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Plain GET plus HTML parsing.
    #[default]
    Static,
    /// Headless browser rendering for dynamic pages.
    Browser,
    /// Ordered HTTP steps building up a context.
    Api,
    /// Currently behaves as `static`.
    Auto,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Static => "static",
            Self::Browser => "browser",
            Self::Api => "api",
            Self::Auto => "auto",
        };
        f.write_str(name)
    }
}

/// Node type of the extraction tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    #[default]
    Css,
    Json,
    Template,
    Text,
}

/// Whether a CSS filter keeps or discards matching elements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    #[default]
    Has,
    Not,
}

/// Payload kind of an API step response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    #[default]
    Json,
    Html,
}

fn default_enabled() -> bool {
    true
}

/// A declarative scraping program for one source site.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiteRule {
    /// Stable key of the source site.
    #[serde(default, rename = "site")]
    pub site_key: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub website_url: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default)]
    pub entry: Option<EntryRule>,
    #[serde(default)]
    pub api: Option<ApiWorkflow>,
    #[serde(default)]
    pub extract: Vec<FieldRule>,
    #[serde(default)]
    pub wait_config: Option<WaitConfig>,
}

/// Entry point of a rule: the page URL template and how to pull parameters
/// out of an override URL.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntryRule {
    /// Page URL; may contain an `{id}` placeholder.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    /// Regex with named capture groups applied to the override URL.
    #[serde(default)]
    pub regex: String,
}

/// Ordered list of API steps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiWorkflow {
    #[serde(default)]
    pub steps: Vec<ApiStep>,
}

/// One HTTP exchange inside an API strategy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiStep {
    pub id: String,
    pub request: ApiRequest,
    /// Payload kind; defaults to JSON.
    #[serde(default, rename = "response")]
    pub response_kind: ResponseKind,
}

/// Request description of an API step. The URL is rendered against the
/// context with `{key}` placeholders before sending.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiRequest {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
}

/// One node of the extraction tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldRule {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: FieldKind,

    // Common
    #[serde(default)]
    pub multiple: bool,
    #[serde(default)]
    pub trim: bool,
    #[serde(default)]
    pub regex: String,
    #[serde(default)]
    pub children: Vec<FieldRule>,
    /// Name of a prior API step whose payload becomes this field's source.
    #[serde(default)]
    pub from: String,

    // CSS
    #[serde(default)]
    pub selector: String,
    /// First existing attribute wins; empty means node text.
    #[serde(default)]
    pub attr: Vec<String>,
    #[serde(default)]
    pub filter: String,
    #[serde(default)]
    pub filter_mode: FilterMode,

    // JSON
    #[serde(default)]
    pub path: String,

    // Template
    #[serde(default)]
    pub template: String,

    // Text (fixed value)
    #[serde(default)]
    pub text: String,
}

/// Wait tuning for the headless browser strategy.
///
/// `content_selectors`, `min_text_length`, `require_image_loaded` and
/// `skip_waits` are carried so stored rules round-trip, but only the
/// container/navigation/stability waits drive behaviour.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WaitConfig {
    #[serde(default)]
    pub container_selectors: Vec<String>,
    #[serde(default)]
    pub content_selectors: Vec<String>,
    #[serde(default)]
    pub min_text_length: usize,
    #[serde(default)]
    pub require_image_loaded: bool,
    #[serde(default, rename = "timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default, rename = "poll_ms")]
    pub poll_ms: u64,
    #[serde(default)]
    pub skip_waits: bool,
    #[serde(default)]
    pub skip_render_stable: bool,
    #[serde(default)]
    pub skip_navigation_wait: bool,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_rule_gets_defaults() {
        let rule: SiteRule = serde_json::from_str(r#"{"extract":[]}"#).unwrap();
        assert_eq!(rule.strategy, Strategy::Static);
        assert!(rule.enabled);
        assert!(rule.entry.is_none());
        assert!(rule.extract.is_empty());
    }

    #[test]
    fn test_full_rule_roundtrip() {
        let json = r##"{
            "site": "mangaex",
            "domains": ["mangaex.to"],
            "strategy": "api",
            "entry": {"url": "https://mangaex.to/manga/{id}", "regex": "manga/(?P<id>[^/]+)"},
            "api": {"steps": [
                {"id": "info", "request": {"url": "https://api.mangaex.to/{id}"}},
                {"id": "page", "request": {"url": "https://mangaex.to/{id}"}, "response": "html"}
            ]},
            "extract": [
                {"name": "title", "type": "json", "from": "info", "path": "data.title"},
                {"name": "pages", "type": "css", "from": "page", "selector": "img.page",
                 "attr": ["data-src", "src"], "multiple": true,
                 "filter": ".ad", "filter_mode": "not"}
            ],
            "wait_config": {"container_selectors": ["#root"], "timeout_ms": 5000}
        }"##;

        let rule: SiteRule = serde_json::from_str(json).unwrap();
        assert_eq!(rule.site_key, "mangaex");
        assert_eq!(rule.strategy, Strategy::Api);

        let api = rule.api.as_ref().unwrap();
        assert_eq!(api.steps.len(), 2);
        assert_eq!(api.steps[0].response_kind, ResponseKind::Json);
        assert_eq!(api.steps[1].response_kind, ResponseKind::Html);

        let pages = &rule.extract[1];
        assert_eq!(pages.kind, FieldKind::Css);
        assert!(pages.multiple);
        assert_eq!(pages.attr, vec!["data-src", "src"]);
        assert_eq!(pages.filter_mode, FilterMode::Not);

        let wait = rule.wait_config.as_ref().unwrap();
        assert_eq!(wait.container_selectors, vec!["#root"]);
        assert_eq!(wait.timeout_ms, 5000);

        // Round-trips without losing the unconsumed wait knobs.
        let reserialized = serde_json::to_string(&rule).unwrap();
        let reparsed: SiteRule = serde_json::from_str(&reserialized).unwrap();
        assert_eq!(reparsed.wait_config.unwrap().timeout_ms, 5000);
    }

    #[test]
    fn test_field_kind_defaults_to_css() {
        let field: FieldRule = serde_json::from_str(r#"{"name": "x", "selector": "h1"}"#).unwrap();
        assert_eq!(field.kind, FieldKind::Css);
        assert_eq!(field.filter_mode, FilterMode::Has);
        assert!(!field.multiple);
    }

    #[test]
    fn test_unknown_strategy_is_rejected() {
        let result = serde_json::from_str::<SiteRule>(r#"{"strategy": "magic"}"#);
        assert!(result.is_err());
    }
}
