//! `{{ KEY }}` substitution between configuration values

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use thiserror::Error;

static VARIABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("Invalid regex pattern")
});

static QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""\((.*?)\)""#).expect("Invalid regex pattern"));

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RenderError {
    #[error("unclosed tag at offset {0}")]
    Unclosed(usize),
    #[error("invalid tag {0:?}")]
    InvalidTag(String),
}

/// Variables available to a template, keyed by config key
pub type RenderContext = HashMap<String, String>;

/// Whether `value` contains a `{{ … }}` tag mentioning `key`
pub fn references(value: &str, key: &str) -> bool {
    if key.is_empty() {
        return false;
    }
    value.lines().any(|line| {
        line.match_indices(key).any(|(start, _)| {
            line[..start].contains("{{") && line[start + key.len()..].contains("}}")
        })
    })
}

/// Build the render context for `key` from the other active configs.
///
/// Candidates whose own value refers back to `key` are left out so that
/// mutually referencing configs do not expand into each other. JSON string
/// values are inserted without their quotes.
pub fn context_for<'a>(
    key: &str,
    candidates: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> RenderContext {
    candidates
        .into_iter()
        .filter(|(name, value)| *name != key && !references(value, key))
        .map(|(name, value)| {
            let text = serde_json::from_str::<String>(value).unwrap_or_else(|_| value.to_string());
            (name.to_string(), text)
        })
        .collect()
}

/// Replace every `{{ NAME }}` tag. Unknown names render as an empty string.
pub fn render(template: &str, context: &RenderContext) -> Result<String, RenderError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    let mut offset = 0;
    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start..].find("}}") else {
            return Err(RenderError::Unclosed(offset + start));
        };
        let tag = &rest[start..start + len + 2];
        let captures = VARIABLE
            .captures(tag)
            .filter(|c| c.get(0).map(|m| m.as_str()) == Some(tag))
            .ok_or_else(|| RenderError::InvalidTag(tag.to_string()))?;
        out.push_str(&rest[..start]);
        if let Some(value) = captures.get(1).and_then(|name| context.get(name.as_str())) {
            out.push_str(value);
        }
        offset += start + len + 2;
        rest = &rest[start + len + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Strip the `"( … )"` quoting that lets a string config expand to a bare value
pub fn unquote(value: &str) -> String {
    QUOTED.replace_all(value, "$1").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(pairs: &[(&str, &str)]) -> RenderContext {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_render_substitutes() {
        let context = ctx(&[("SITE_TITLE", "xadmin")]);
        assert_eq!(
            render(r#""Welcome to {{ SITE_TITLE }}""#, &context).unwrap(),
            r#""Welcome to xadmin""#
        );
        assert_eq!(render("{{MISSING}}!", &context).unwrap(), "!");
        assert_eq!(render("plain", &context).unwrap(), "plain");
    }

    #[test]
    fn test_render_errors() {
        assert_eq!(render("a {{ B", &RenderContext::new()), Err(RenderError::Unclosed(2)));
        assert!(matches!(
            render("{{ a b }}", &RenderContext::new()),
            Err(RenderError::InvalidTag(_))
        ));
    }

    #[test]
    fn test_context_skips_back_references() {
        let configs = [
            ("A", "\"{{ B }}\""),
            ("B", "\"{{ A }}\""),
            ("C", "3"),
            ("D", "\"text\""),
        ];
        let context = context_for("A", configs.iter().copied());
        assert!(!context.contains_key("A"));
        assert!(!context.contains_key("B"));
        assert_eq!(context.get("C").map(String::as_str), Some("3"));
        assert_eq!(context.get("D").map(String::as_str), Some("text"));
    }

    #[test]
    fn test_references() {
        assert!(references("{{ SITE_TITLE }}", "SITE_TITLE"));
        assert!(references("see {{SITE_TITLE|upper}} now", "TITLE"));
        assert!(references("{{ A }} and {{ B }}", "and"));
        assert!(!references("SITE_TITLE", "SITE_TITLE"));
        assert!(!references("{{ A }} SITE_TITLE", "SITE_TITLE"));
        assert!(!references("{{ SITE\n_TITLE }}", "SITE_TITLE"));
        assert!(!references("{{ (.*) }}", "(x)"));
        assert!(!references("{{ A }}", ""));
    }

    #[test]
    fn test_unquote() {
        assert_eq!(unquote(r#""(5242880)""#), "5242880");
        assert_eq!(unquote(r#"{"size": "(10)"}"#), r#"{"size": 10}"#);
    }
}
