//! Field-rule evaluation against HTML selections, JSON payloads and the
//! scrape context.
//!
//! Every extraction yields a `serde_json::Value`: a scalar string, a list,
//! or a nested object. A field that finds nothing yields an empty value and
//! never aborts the scrape.

use scraper::{ElementRef, Html, Selector};
use serde_json::{Map, Value};

use super::context::{ContextValue, ScrapeContext};
use super::json_path::{lookup, normalize_path, value_to_string};
use super::rule::{FieldKind, FieldRule, FilterMode};
use super::template::render;

/// The evaluation source a field rule is applied to.
#[derive(Clone, Copy)]
enum Source<'a> {
    Element(ElementRef<'a>),
    Json(&'a Value),
    Raw(&'a str),
    Context(&'a ScrapeContext),
}

/// Evaluates an extraction tree against an HTML selection (static and
/// browser top level, and CSS children producing objects).
#[must_use]
pub fn extract_fields(scope: ElementRef<'_>, rules: &[FieldRule]) -> Map<String, Value> {
    let mut result = Map::new();
    for rule in rules {
        result.insert(rule.name.clone(), extract_field_on_element(scope, rule));
    }
    result
}

/// Evaluates an extraction tree against the context map (API mode, and
/// static mode that stored a default selection).
#[must_use]
pub fn extract_from_context(ctx: &ScrapeContext, rules: &[FieldRule]) -> Map<String, Value> {
    let doc = ctx.default_html.as_deref().map(Html::parse_document);
    let mut result = Map::new();

    for rule in rules {
        let value = if rule.kind == FieldKind::Template {
            // Templates always see the whole context.
            extract_generic(Source::Context(ctx), rule)
        } else if !rule.from.is_empty() {
            match ctx.lookup_source(&rule.from) {
                Some(ContextValue::Text(text)) => extract_generic(Source::Raw(text), rule),
                Some(ContextValue::Json(json)) => extract_generic(Source::Json(json), rule),
                None => Value::Null,
            }
        } else if let Some(doc) = &doc {
            extract_field_on_element(doc.root_element(), rule)
        } else {
            extract_generic(Source::Context(ctx), rule)
        };
        result.insert(rule.name.clone(), value);
    }
    result
}

/// Dispatches one rule against an HTML scope.
///
/// JSON rules first take the selected elements' text (pages embedding JSON
/// in a `<script>` tag) and then run the JSON logic on it.
fn extract_field_on_element(scope: ElementRef<'_>, rule: &FieldRule) -> Value {
    match rule.kind {
        FieldKind::Text => Value::String(rule.text.clone()),
        FieldKind::Template => extract_generic(Source::Element(scope), rule),
        FieldKind::Json => {
            let mut text = selection_text(scope, &rule.selector);
            if rule.trim {
                text = text.trim().to_string();
            }
            extract_json_text(&text, rule)
        }
        FieldKind::Css => extract_css(scope, rule),
    }
}

/// Concatenated text of every element matched by `selector` (the scope
/// itself when empty).
fn selection_text(scope: ElementRef<'_>, selector: &str) -> String {
    if selector.is_empty() {
        return scope.text().collect();
    }
    match Selector::parse(selector) {
        Ok(sel) => scope
            .select(&sel)
            .flat_map(|element| element.text())
            .collect(),
        Err(_) => String::new(),
    }
}

fn select_elements<'a>(scope: ElementRef<'a>, selector: &str) -> Vec<ElementRef<'a>> {
    if selector.is_empty() {
        return vec![scope];
    }
    match Selector::parse(selector) {
        Ok(sel) => scope.select(&sel).collect(),
        Err(_) => Vec::new(),
    }
}

/// CSS extraction: select, optionally filter, then produce a scalar, a list
/// or a nested object per the rule shape.
fn extract_css(scope: ElementRef<'_>, rule: &FieldRule) -> Value {
    let elements = select_elements(scope, &rule.selector);

    if rule.multiple {
        let filter = (!rule.filter.is_empty())
            .then(|| Selector::parse(&rule.filter).ok())
            .flatten();
        // Ids of every node in scope matching the filter, so an element can
        // be tested against the filter itself (not just its descendants).
        let filter_ids: std::collections::HashSet<_> = filter
            .as_ref()
            .map(|sel| scope.select(sel).map(|element| element.id()).collect())
            .unwrap_or_default();

        let mut items = Vec::new();
        for element in elements {
            if let Some(filter) = &filter {
                let matched = filter_ids.contains(&element.id())
                    || element.select(filter).next().is_some();
                let keep = match rule.filter_mode {
                    FilterMode::Has => matched,
                    FilterMode::Not => !matched,
                };
                if !keep {
                    continue;
                }
            }
            if rule.children.is_empty() {
                items.push(extract_value(Some(element), rule));
            } else {
                items.push(Value::Object(extract_fields(element, &rule.children)));
            }
        }
        return Value::Array(items);
    }

    let first = elements.first().copied();
    if !rule.children.is_empty() {
        return match first {
            Some(element) => Value::Object(extract_fields(element, &rule.children)),
            None => {
                // No match: children still appear, as empty scalars.
                let mut object = Map::new();
                for child in &rule.children {
                    object.insert(child.name.clone(), Value::String(String::new()));
                }
                Value::Object(object)
            }
        };
    }
    extract_value(first, rule)
}

/// Scalar extraction from one element: first existing attribute (node text
/// when `attr` is empty), then trim, then regex.
fn extract_value(element: Option<ElementRef<'_>>, rule: &FieldRule) -> Value {
    let mut value = match element {
        Some(element) => {
            if rule.attr.is_empty() {
                element.text().collect()
            } else {
                rule.attr
                    .iter()
                    .find_map(|attr| element.value().attr(attr))
                    .unwrap_or_default()
                    .to_string()
            }
        }
        None => String::new(),
    };

    if rule.trim {
        value = value.trim().to_string();
    }
    if !rule.regex.is_empty() {
        value = apply_regex(value, &rule.regex);
    }
    Value::String(value)
}

/// Applies a rule regex: capture group 1 when present, else the whole
/// match; the value passes through unchanged when nothing matches.
fn apply_regex(value: String, pattern: &str) -> String {
    let Ok(re) = regex::Regex::new(pattern) else {
        return value;
    };
    let replaced = re.captures(&value).and_then(|caps| {
        caps.get(1)
            .or_else(|| caps.get(0))
            .map(|m| m.as_str().to_string())
    });
    replaced.unwrap_or(value)
}

/// JSON extraction from a raw string; malformed JSON behaves as `null`.
fn extract_json_text(text: &str, rule: &FieldRule) -> Value {
    match serde_json::from_str::<Value>(text) {
        Ok(parsed) => extract_json_value(&parsed, rule),
        Err(_) => extract_json_value(&Value::Null, rule),
    }
}

/// JSON extraction from a parsed value.
fn extract_json_value(source: &Value, rule: &FieldRule) -> Value {
    if rule.path.is_empty() {
        return Value::Null;
    }
    let path = normalize_path(&rule.path);
    let resolved = lookup(source, &path);

    if rule.multiple {
        let Some(Value::Array(items)) = resolved else {
            return Value::Array(Vec::new());
        };
        let collected = items
            .iter()
            .map(|item| {
                if rule.children.is_empty() {
                    item.clone()
                } else {
                    let mut object = Map::new();
                    for child in &rule.children {
                        object.insert(child.name.clone(), extract_json_value(item, child));
                    }
                    Value::Object(object)
                }
            })
            .collect();
        return Value::Array(collected);
    }

    if !rule.children.is_empty() {
        let base = resolved.unwrap_or(&Value::Null);
        let mut object = Map::new();
        for child in &rule.children {
            object.insert(child.name.clone(), extract_json_value(base, child));
        }
        return Value::Object(object);
    }

    let mut value = resolved.map(value_to_string).unwrap_or_default();
    if !rule.regex.is_empty() {
        value = apply_regex(value, &rule.regex);
    }
    Value::String(value)
}

/// Generic dispatch used for `from`-directed fields and template children,
/// where the source may be any of the evaluation variants.
fn extract_generic(source: Source<'_>, rule: &FieldRule) -> Value {
    match rule.kind {
        FieldKind::Text => Value::String(rule.text.clone()),
        FieldKind::Css => match source {
            Source::Element(element) => extract_css(element, rule),
            Source::Raw(html) => {
                let doc = Html::parse_document(html);
                extract_css(doc.root_element(), rule)
            }
            Source::Json(_) | Source::Context(_) => Value::Null,
        },
        FieldKind::Json => match source {
            Source::Raw(text) => extract_json_text(text, rule),
            Source::Json(json) => extract_json_value(json, rule),
            Source::Element(element) => {
                let text: String = element.text().collect();
                extract_json_text(text.trim(), rule)
            }
            Source::Context(ctx) => extract_json_value(&ctx.to_json(), rule),
        },
        FieldKind::Template => extract_template(source, rule),
    }
}

/// Template evaluation with child zipping.
///
/// Children are evaluated first; if any child is multiple (yields a list),
/// the template renders once per index, taking the i-th entry from
/// multi-valued children (empty string when short) and the scalar value for
/// the rest. Otherwise the template renders once.
fn extract_template(source: Source<'_>, rule: &FieldRule) -> Value {
    if rule.children.is_empty() {
        return Value::String(match source {
            Source::Context(ctx) => render(&rule.template, &|key| ctx.text(key)),
            // Without a context map there is nothing to substitute.
            _ => rule.template.clone(),
        });
    }

    let mut children: Vec<(String, Value)> = Vec::with_capacity(rule.children.len());
    for child in &rule.children {
        let value = extract_template_child(source, child);
        children.push((child.name.clone(), value));
    }

    let max_len = children
        .iter()
        .filter_map(|(_, value)| value.as_array().map(Vec::len))
        .max();

    match max_len {
        // At least one multi-valued child: zip into a rendered list.
        Some(len) => {
            let mut results = Vec::with_capacity(len);
            for index in 0..len {
                let rendered = render(&rule.template, &|key| {
                    children.iter().find(|(name, _)| name == key).map(
                        |(_, value)| match value {
                            Value::Array(items) => {
                                items.get(index).map(value_to_string).unwrap_or_default()
                            }
                            other => value_to_string(other),
                        },
                    )
                });
                results.push(Value::String(rendered));
            }
            Value::Array(results)
        }
        None => {
            let rendered = render(&rule.template, &|key| {
                children
                    .iter()
                    .find(|(name, _)| name == key)
                    .map(|(_, value)| value_to_string(value))
            });
            Value::String(rendered)
        }
    }
}

/// Resolves the source a template child is evaluated against.
fn extract_template_child(source: Source<'_>, child: &FieldRule) -> Value {
    match source {
        Source::Context(ctx) => {
            if !child.from.is_empty() {
                return match ctx.lookup_source(&child.from) {
                    Some(ContextValue::Text(text)) => extract_generic(Source::Raw(text), child),
                    Some(ContextValue::Json(json)) => extract_generic(Source::Json(json), child),
                    None => Value::Null,
                };
            }
            if child.kind == FieldKind::Css {
                // CSS children without a source fall back to the page the
                // static strategy parsed.
                return match ctx.default_html.as_deref() {
                    Some(html) => {
                        let doc = Html::parse_document(html);
                        extract_css(doc.root_element(), child)
                    }
                    None => Value::Null,
                };
            }
            extract_generic(Source::Context(ctx), child)
        }
        other => extract_generic(other, child),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn css(name: &str, selector: &str) -> FieldRule {
        FieldRule {
            name: name.to_string(),
            selector: selector.to_string(),
            ..FieldRule::default()
        }
    }

    const PAGE: &str = r#"
        <html><body>
          <h1 class="title">  One Piece  </h1>
          <div class="chapters">
            <div class="row"><a href="/ch/1">Chapter 1</a></div>
            <div class="row ad"><a href="/promo"><span class="sponsor">Ad</span></a></div>
            <div class="row"><a href="/ch/2">Chapter 2</a></div>
          </div>
          <img class="page" data-src="https://cdn/1.jpg" />
          <img class="page" src="https://cdn/2.jpg" />
          <script id="state">{"manga": {"id": "op", "chapters": 2}}</script>
        </body></html>"#;

    #[test]
    fn test_css_scalar_with_trim() {
        let doc = Html::parse_document(PAGE);
        let mut rule = css("title", "h1.title");
        rule.trim = true;

        let result = extract_fields(doc.root_element(), &[rule]);
        assert_eq!(result["title"], "One Piece");
    }

    #[test]
    fn test_css_scalar_missing_selector_yields_empty_string() {
        let doc = Html::parse_document(PAGE);
        let result = extract_fields(doc.root_element(), &[css("x", "h2.nope")]);
        assert_eq!(result["x"], "");
    }

    #[test]
    fn test_css_first_existing_attribute_wins() {
        let doc = Html::parse_document(PAGE);
        let mut rule = css("pages", "img.page");
        rule.multiple = true;
        rule.attr = vec!["data-src".to_string(), "src".to_string()];

        let result = extract_fields(doc.root_element(), &[rule]);
        assert_eq!(
            result["pages"],
            json!(["https://cdn/1.jpg", "https://cdn/2.jpg"])
        );
    }

    #[test]
    fn test_css_multiple_with_not_filter_drops_matches() {
        let doc = Html::parse_document(PAGE);
        let mut rule = css("links", "div.row a");
        rule.multiple = true;
        rule.attr = vec!["href".to_string()];
        rule.filter = ".sponsor".to_string();
        rule.filter_mode = FilterMode::Not;

        let result = extract_fields(doc.root_element(), &[rule]);
        assert_eq!(result["links"], json!(["/ch/1", "/ch/2"]));
    }

    #[test]
    fn test_css_filter_matches_element_itself() {
        let doc = Html::parse_document(PAGE);
        let mut rule = css("ads", "div.row");
        rule.multiple = true;
        rule.filter = ".ad".to_string();
        rule.children = vec![{
            let mut child = css("href", "a");
            child.attr = vec!["href".to_string()];
            child
        }];

        let result = extract_fields(doc.root_element(), &[rule]);
        assert_eq!(result["ads"], json!([{"href": "/promo"}]));
    }

    #[test]
    fn test_css_regex_capture_group() {
        let doc = Html::parse_document(PAGE);
        let mut rule = css("first", "div.chapters a");
        rule.regex = r"Chapter (\d+)".to_string();

        let result = extract_fields(doc.root_element(), &[rule]);
        assert_eq!(result["first"], "1");
    }

    #[test]
    fn test_regex_without_match_keeps_value() {
        assert_eq!(apply_regex("keep me".to_string(), r"\d+"), "keep me");
        // Invalid pattern also keeps the value.
        assert_eq!(apply_regex("keep".to_string(), "("), "keep");
    }

    #[test]
    fn test_json_rule_on_html_reads_script_tag() {
        let doc = Html::parse_document(PAGE);
        let mut rule = css("n", "script#state");
        rule.kind = FieldKind::Json;
        rule.trim = true;
        rule.path = "manga.chapters".to_string();

        let result = extract_fields(doc.root_element(), &[rule]);
        assert_eq!(result["n"], "2");
    }

    #[test]
    fn test_text_rule_returns_fixed_value() {
        let doc = Html::parse_document(PAGE);
        let rule = FieldRule {
            name: "lang".to_string(),
            kind: FieldKind::Text,
            text: "en".to_string(),
            ..FieldRule::default()
        };
        let result = extract_fields(doc.root_element(), &[rule]);
        assert_eq!(result["lang"], "en");
    }

    #[test]
    fn test_json_multiple_with_children() {
        let source = json!({"data": {"list": [
            {"id": "a", "n": 1},
            {"id": "b", "n": 2}
        ]}});
        let rule = FieldRule {
            name: "items".to_string(),
            kind: FieldKind::Json,
            multiple: true,
            path: "data.list".to_string(),
            children: vec![
                FieldRule {
                    name: "id".to_string(),
                    kind: FieldKind::Json,
                    path: "id".to_string(),
                    ..FieldRule::default()
                },
                FieldRule {
                    name: "n".to_string(),
                    kind: FieldKind::Json,
                    path: "n".to_string(),
                    ..FieldRule::default()
                },
            ],
            ..FieldRule::default()
        };

        let value = extract_json_value(&source, &rule);
        assert_eq!(
            value,
            json!([{"id": "a", "n": "1"}, {"id": "b", "n": "2"}])
        );
    }

    #[test]
    fn test_json_multiple_on_non_array_yields_empty_list() {
        let source = json!({"data": "scalar"});
        let rule = FieldRule {
            name: "items".to_string(),
            kind: FieldKind::Json,
            multiple: true,
            path: "data".to_string(),
            ..FieldRule::default()
        };
        assert_eq!(extract_json_value(&source, &rule), json!([]));
    }

    #[test]
    fn test_json_single_quotes_in_path_are_normalised() {
        let source = json!({"a.b": {"c": "deep"}});
        let rule = FieldRule {
            name: "v".to_string(),
            kind: FieldKind::Json,
            path: "'a.b'.c".to_string(),
            ..FieldRule::default()
        };
        assert_eq!(extract_json_value(&source, &rule), "deep");
    }

    #[test]
    fn test_malformed_json_yields_empty_value() {
        let rule = FieldRule {
            name: "v".to_string(),
            kind: FieldKind::Json,
            path: "a".to_string(),
            ..FieldRule::default()
        };
        assert_eq!(extract_json_text("not json", &rule), "");
    }

    #[test]
    fn test_template_zips_multi_valued_children() {
        let mut ctx = ScrapeContext::new();
        ctx.set_text("host", "https://cdn.ex");
        ctx.set_json("chapters", json!({"list": ["/a", "/b", "/c"]}));

        let rule = FieldRule {
            name: "urls".to_string(),
            kind: FieldKind::Template,
            template: "{host}{path}".to_string(),
            children: vec![
                FieldRule {
                    name: "host".to_string(),
                    kind: FieldKind::Template,
                    template: "{host}".to_string(),
                    ..FieldRule::default()
                },
                FieldRule {
                    name: "path".to_string(),
                    kind: FieldKind::Json,
                    from: "chapters".to_string(),
                    multiple: true,
                    path: "list".to_string(),
                    ..FieldRule::default()
                },
            ],
            ..FieldRule::default()
        };

        let result = extract_from_context(&ctx, std::slice::from_ref(&rule));
        assert_eq!(
            result["urls"],
            json!(["https://cdn.ex/a", "https://cdn.ex/b", "https://cdn.ex/c"])
        );
    }

    #[test]
    fn test_template_single_render_against_context() {
        let mut ctx = ScrapeContext::new();
        ctx.set_text("id", "op");
        ctx.set_text("host", "https://ex");

        let rule = FieldRule {
            name: "url".to_string(),
            kind: FieldKind::Template,
            template: "{host}/manga/{id}".to_string(),
            ..FieldRule::default()
        };

        let result = extract_from_context(&ctx, &[rule]);
        assert_eq!(result["url"], "https://ex/manga/op");
    }

    #[test]
    fn test_from_directs_lookup_to_step_payload() {
        let mut ctx = ScrapeContext::new();
        ctx.set_json("info", json!({"data": {"chapters": 3}}));
        ctx.set_text("info_raw", r#"{"data":{"chapters":3}}"#);

        let rule = FieldRule {
            name: "n".to_string(),
            kind: FieldKind::Json,
            from: "info".to_string(),
            path: "data.chapters".to_string(),
            ..FieldRule::default()
        };

        let result = extract_from_context(&ctx, &[rule]);
        assert_eq!(result["n"], "3");
    }

    #[test]
    fn test_from_missing_step_yields_null() {
        let ctx = ScrapeContext::new();
        let rule = FieldRule {
            name: "n".to_string(),
            kind: FieldKind::Json,
            from: "absent".to_string(),
            path: "x".to_string(),
            ..FieldRule::default()
        };
        let result = extract_from_context(&ctx, &[rule]);
        assert_eq!(result["n"], Value::Null);
    }

    #[test]
    fn test_default_selection_serves_css_rules_without_from() {
        let mut ctx = ScrapeContext::new();
        ctx.default_html = Some("<html><body><h1>T</h1></body></html>".to_string());

        let result = extract_from_context(&ctx, &[css("title", "h1")]);
        assert_eq!(result["title"], "T");
    }

    #[test]
    fn test_css_rule_from_html_step() {
        let mut ctx = ScrapeContext::new();
        ctx.set_text("page", "<div><a class=\"x\" href=\"/go\">go</a></div>");
        ctx.set_text("page_raw", "<div><a class=\"x\" href=\"/go\">go</a></div>");

        let mut rule = css("link", "a.x");
        rule.from = "page".to_string();
        rule.attr = vec!["href".to_string()];

        let result = extract_from_context(&ctx, &[rule]);
        assert_eq!(result["link"], "/go");
    }
}
