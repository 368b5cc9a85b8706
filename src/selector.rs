//! Selector lowering, element resolution, and selector suggestions for an
//! HTML snippet.

use scraper::{ElementRef, Html};
use serde::{Deserialize, Serialize};

use crate::browser::{BrowserSession, Query};
use crate::error::StepError;
use crate::models::{Selector, SelectorKind};

/// Quote `value` as an XPath string literal.
pub fn xpath_literal(value: &str) -> String {
    if !value.contains('\'') {
        format!("'{}'", value)
    } else if !value.contains('"') {
        format!("\"{}\"", value)
    } else {
        let parts: Vec<String> = value.split('\'').map(|p| format!("'{}'", p)).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

fn css_attr(name: &str, value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("[{}=\"{}\"]", name, escaped)
}

/// `"btn primary"` means both classes on one element: `.btn.primary`.
fn class_chain(value: &str) -> String {
    value
        .split_whitespace()
        .map(|class| format!(".{}", class))
        .collect()
}

impl Selector {
    /// Lower to the native lookup the browser understands.
    pub fn query(&self) -> Query {
        let v = self.value.as_str();
        match self.kind {
            SelectorKind::Id => Query::Css(css_attr("id", v)),
            SelectorKind::Name => Query::Css(css_attr("name", v)),
            SelectorKind::Css | SelectorKind::Tag => Query::Css(v.to_string()),
            SelectorKind::Class => Query::Css(class_chain(v)),
            SelectorKind::XPath => Query::XPath(v.to_string()),
            SelectorKind::LinkText => {
                Query::XPath(format!("//a[normalize-space(.)={}]", xpath_literal(v)))
            }
            SelectorKind::PartialLinkText => Query::XPath(format!(
                "//a[contains(normalize-space(.), {})]",
                xpath_literal(v)
            )),
            SelectorKind::Placeholder => {
                Query::XPath(format!("//*[@placeholder={}]", xpath_literal(v)))
            }
        }
    }
}

/// Resolve `selector` to its `index`-th matching element.
///
/// No waiting or retrying happens here; a lookup failure of the session
/// itself is a [`StepError::SessionFault`].
pub async fn resolve<S: BrowserSession>(
    session: &S,
    selector: &Selector,
) -> Result<S::Element, StepError> {
    let elements = session
        .find_elements(&selector.query())
        .await
        .map_err(StepError::fault)?;

    let count = elements.len();
    let found = elements.into_iter().nth(selector.index);
    tracing::debug!(
        "Selector {}={:?}[{}] matched {} element(s)",
        selector.kind,
        selector.value,
        selector.index,
        count
    );

    found.ok_or_else(|| StepError::ElementNotFound {
        kind: selector.kind,
        value: selector.value.clone(),
        index: selector.index,
    })
}

/// Selector values derived from one element, keyed like stored selector types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestedSelectors {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub css_selector: Option<String>,
    pub xpath: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
}

/// Suggest selectors for the first element of `html`.
///
/// Returns `None` when the snippet holds no element. Empty attributes are
/// ignored. The XPath is keyed by id, else by name, then narrowed by class.
pub fn identify_selectors(html: &str) -> Option<SuggestedSelectors> {
    let fragment = Html::parse_fragment(html);
    let element = fragment
        .root_element()
        .descendants()
        .skip(1)
        .find_map(ElementRef::wrap)?;
    let el = element.value();

    let attr = |name: &str| {
        el.attr(name)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    let id = attr("id");
    let name = attr("name");
    let placeholder = attr("placeholder");
    let classes: Vec<&str> = el
        .attr("class")
        .map(|c| c.split_whitespace().collect())
        .unwrap_or_default();

    let mut xpath = format!("//{}", el.name());
    if let Some(id) = &id {
        xpath.push_str(&format!("[@id={}]", xpath_literal(id)));
    } else if let Some(name) = &name {
        xpath.push_str(&format!("[@name={}]", xpath_literal(name)));
    }
    if !classes.is_empty() {
        xpath.push_str(&format!(
            "[contains(@class, {})]",
            xpath_literal(&classes.join(" "))
        ));
    }

    let suggested = SuggestedSelectors {
        id,
        name,
        css_selector: (!classes.is_empty()).then(|| class_chain(&classes.join(" "))),
        xpath,
        placeholder,
    };
    tracing::debug!("Suggested selectors for <{}>: {:?}", el.name(), suggested);
    Some(suggested)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::mock::{MockElement, MockPage, MockSession};

    #[test]
    fn test_placeholder_lowers_to_xpath() {
        let sel = Selector::new(SelectorKind::Placeholder, "Email");
        assert_eq!(sel.query(), Query::xpath("//*[@placeholder='Email']"));
    }

    #[test]
    fn test_native_kinds_lower_one_to_one() {
        assert_eq!(
            Selector::new(SelectorKind::Id, "login").query(),
            Query::css("[id=\"login\"]")
        );
        assert_eq!(
            Selector::new(SelectorKind::Name, "email").query(),
            Query::css("[name=\"email\"]")
        );
        assert_eq!(
            Selector::new(SelectorKind::Class, "btn").query(),
            Query::css(".btn")
        );
        assert_eq!(
            Selector::new(SelectorKind::Tag, "button").query(),
            Query::css("button")
        );
        assert_eq!(
            Selector::new(SelectorKind::XPath, "//div[1]").query(),
            Query::xpath("//div[1]")
        );
        assert_eq!(
            Selector::new(SelectorKind::LinkText, "Home").query(),
            Query::xpath("//a[normalize-space(.)='Home']")
        );
        assert_eq!(
            Selector::new(SelectorKind::PartialLinkText, "Ho").query(),
            Query::xpath("//a[contains(normalize-space(.), 'Ho')]")
        );
    }

    #[test]
    fn test_class_with_spaces_is_compound_not_descendant() {
        assert_eq!(
            Selector::new(SelectorKind::Class, " btn  primary ").query(),
            Query::css(".btn.primary")
        );
    }

    #[test]
    fn test_xpath_literal_quoting() {
        assert_eq!(xpath_literal("plain"), "'plain'");
        assert_eq!(xpath_literal("it's"), "\"it's\"");
        assert_eq!(
            xpath_literal(r#"it's "x""#),
            r#"concat('it', "'", 's "x"')"#
        );
    }

    fn three_buttons() -> MockSession {
        let q = Query::css(".item");
        MockSession::new(
            MockPage::new()
                .element(MockElement::new("first").matching(q.clone()))
                .element(MockElement::new("second").matching(q.clone()))
                .element(MockElement::new("third").matching(q)),
        )
    }

    #[tokio::test]
    async fn test_resolve_returns_nth_match() {
        let session = three_buttons();
        let sel = Selector::css(".item").nth(1);
        let element = resolve(&session, &sel).await.unwrap();
        assert_eq!(element, 1);
    }

    #[tokio::test]
    async fn test_resolve_index_out_of_range() {
        let session = three_buttons();
        let sel = Selector::css(".item").nth(3);
        let err = resolve(&session, &sel).await.unwrap_err();
        assert!(matches!(err, StepError::ElementNotFound { index: 3, .. }));
    }

    #[tokio::test]
    async fn test_resolve_zero_matches() {
        let session = three_buttons();
        let err = resolve(&session, &Selector::css("#missing")).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "No element found at index 0 for css_selector: #missing"
        );
    }

    #[test]
    fn test_identify_input_with_every_attribute() {
        let suggested = identify_selectors(
            r#"<input id="email" name="user_email" class="form-control  big" placeholder="Email">"#,
        )
        .unwrap();

        assert_eq!(suggested.id.as_deref(), Some("email"));
        assert_eq!(suggested.name.as_deref(), Some("user_email"));
        assert_eq!(suggested.css_selector.as_deref(), Some(".form-control.big"));
        assert_eq!(
            suggested.xpath,
            "//input[@id='email'][contains(@class, 'form-control big')]"
        );
        assert_eq!(suggested.placeholder.as_deref(), Some("Email"));
    }

    #[test]
    fn test_identify_falls_back_to_name_in_xpath() {
        let suggested = identify_selectors(r#"<button name="go" id="">Go</button>"#).unwrap();
        assert_eq!(suggested.id, None);
        assert_eq!(suggested.css_selector, None);
        assert_eq!(suggested.xpath, "//button[@name='go']");
    }

    #[test]
    fn test_identify_uses_outermost_element() {
        let suggested =
            identify_selectors(r#"  <div class="card"><a id="inner">x</a></div>"#).unwrap();
        assert_eq!(suggested.xpath, "//div[contains(@class, 'card')]");
        assert_eq!(suggested.id, None);
    }

    #[test]
    fn test_identify_without_element_is_none() {
        assert!(identify_selectors("just some text").is_none());
        assert!(identify_selectors("").is_none());
    }

    #[test]
    fn test_identify_serializes_only_found_keys() {
        let suggested = identify_selectors(r#"<a href="/home">Home</a>"#).unwrap();
        let value = serde_json::to_value(&suggested).unwrap();
        assert_eq!(value, serde_json::json!({"xpath": "//a"}));
    }
}
