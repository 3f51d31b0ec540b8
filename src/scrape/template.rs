//! Simple `{key}` template rendering.
//!
//! The renderer substitutes flat keys only: `{info.data.id}` is looked up
//! as the literal key `info.data.id` and left in place when absent, which
//! is what lets API step validation report unrendered placeholders.

use std::sync::LazyLock;

use regex::Regex;

#[allow(clippy::unwrap_used)]
fn placeholder_regex() -> &'static Regex {
    // The pattern is a constant; it cannot fail to compile.
    static RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{([^{}]+)\}").unwrap());
    &RE
}

/// Renders `template`, replacing every `{key}` whose lookup resolves.
/// Unresolved placeholders are kept verbatim.
pub fn render(template: &str, lookup: &dyn Fn(&str) -> Option<String>) -> String {
    placeholder_regex()
        .replace_all(template, |caps: &regex::Captures<'_>| {
            lookup(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// True when the string still contains `{…}` placeholder syntax.
#[must_use]
pub fn has_placeholder(value: &str) -> bool {
    value.contains('{') && value.contains('}')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn map_lookup<'a>(map: &'a HashMap<&'a str, &'a str>) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| map.get(key).map(ToString::to_string)
    }

    #[test]
    fn test_render_replaces_known_keys() {
        let mut vars = HashMap::new();
        vars.insert("id", "abc");
        vars.insert("offset", "0");

        let rendered = render("https://api/ex/{id}?o={offset}", &map_lookup(&vars));
        assert_eq!(rendered, "https://api/ex/abc?o=0");
    }

    #[test]
    fn test_render_keeps_unknown_keys() {
        let vars = HashMap::new();
        let rendered = render("https://api/ex/{info.data.id}", &map_lookup(&vars));
        assert_eq!(rendered, "https://api/ex/{info.data.id}");
        assert!(has_placeholder(&rendered));
    }

    #[test]
    fn test_render_does_not_descend_into_nested_keys() {
        // A flat "info" key does not satisfy "{info.data.id}".
        let mut vars = HashMap::new();
        vars.insert("info", "whole-object");

        let rendered = render("{info.data.id}", &map_lookup(&vars));
        assert_eq!(rendered, "{info.data.id}");
    }

    #[test]
    fn test_has_placeholder() {
        assert!(has_placeholder("x{id}y"));
        assert!(!has_placeholder("no placeholders"));
        assert!(!has_placeholder("half {open"));
    }
}
