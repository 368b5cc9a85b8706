//! `{{field}}` placeholder substitution from a data row.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::models::DataRow;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    // Shortest token from the first "{{": "{{a{{b}}" is one token named "a{{b".
    Regex::new(r"\{\{(.*?)\}\}").expect("placeholder pattern is valid")
});

/// Replace every `{{name}}` in `template` with the row's value for `name`.
///
/// A missing row, a missing field and an empty value all substitute the empty
/// string. Substituted values are never re-scanned.
pub fn substitute(template: &str, row: Option<&DataRow>) -> String {
    if !template.contains("{{") {
        return template.to_string();
    }

    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            row.and_then(|r| r.get(&caps[1]))
                .unwrap_or_default()
                .to_string()
        })
        .into_owned()
}

/// Placeholder names referenced by `template`, in order of appearance.
pub fn placeholders(template: &str) -> Vec<String> {
    PLACEHOLDER
        .captures_iter(template)
        .map(|caps| caps[1].to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn row(pairs: &[(&str, &str)]) -> DataRow {
        let fields: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        DataRow::new(0, fields)
    }

    #[test]
    fn test_missing_field_becomes_empty() {
        let r = row(&[("a", "x")]);
        assert_eq!(substitute("{{a}}-{{b}}", Some(&r)), "x-");
    }

    #[test]
    fn test_no_tokens_is_identity() {
        let r = row(&[("a", "x")]);
        assert_eq!(substitute("no tokens", Some(&r)), "no tokens");
        assert_eq!(substitute("no tokens", None), "no tokens");
    }

    #[test]
    fn test_absent_row_empties_placeholders() {
        assert_eq!(substitute("https://{{host}}/login", None), "https:///login");
    }

    #[test]
    fn test_empty_value_substitutes_empty() {
        let r = row(&[("LoginEmail", "")]);
        assert_eq!(substitute("[{{LoginEmail}}]", Some(&r)), "[]");
    }

    #[test]
    fn test_repeated_placeholder_all_replaced() {
        let r = row(&[("user", "bob")]);
        assert_eq!(substitute("{{user}}/{{user}}", Some(&r)), "bob/bob");
    }

    #[test]
    fn test_substituted_value_not_rescanned() {
        let r = row(&[("a", "{{b}}"), ("b", "nope")]);
        assert_eq!(substitute("{{a}}", Some(&r)), "{{b}}");
    }

    #[test]
    fn test_nested_braces_consume_whole_token() {
        let r = row(&[("b", "x")]);
        assert_eq!(substitute("{{a{{b}}", Some(&r)), "");
        assert_eq!(substitute("[{{a{{b}}]-{{b}}", Some(&r)), "[]-x");
        assert_eq!(placeholders("{{a{{b}}"), vec!["a{{b".to_string()]);
    }

    #[test]
    fn test_placeholders_lists_names() {
        assert_eq!(
            placeholders("{{user}} at {{host}}"),
            vec!["user".to_string(), "host".to_string()]
        );
    }
}
