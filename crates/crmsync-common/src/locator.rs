use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocatorError {
    #[error("Unknown locator strategy: {0}")]
    UnknownStrategy(String),
    #[error("Locator expression is empty")]
    EmptyExpression,
    #[error("Unresolved placeholder {{{token}}} in locator {locator}")]
    UnresolvedPlaceholder { locator: String, token: String },
}

/// How an element is looked up on the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    Id,
    XPath,
    Css,
    Name,
    ClassName,
    TagName,
    LinkText,
    PartialLinkText,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Id => "id",
            Strategy::XPath => "xpath",
            Strategy::Css => "css",
            Strategy::Name => "name",
            Strategy::ClassName => "class_name",
            Strategy::TagName => "tag_name",
            Strategy::LinkText => "link_text",
            Strategy::PartialLinkText => "partial_link_text",
        }
    }
}

impl FromStr for Strategy {
    type Err = LocatorError;

    /// Accepts the lowercase names as well as Selenium-style tags (`XPATH`,
    /// `CSS_SELECTOR`, `LINK_TEXT`, ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "id" => Ok(Strategy::Id),
            "xpath" => Ok(Strategy::XPath),
            "css" | "css_selector" | "selector" => Ok(Strategy::Css),
            "name" => Ok(Strategy::Name),
            "class" | "class_name" | "classname" => Ok(Strategy::ClassName),
            "tag" | "tag_name" | "tagname" => Ok(Strategy::TagName),
            "link_text" | "linktext" => Ok(Strategy::LinkText),
            "partial_link_text" | "partiallinktext" => Ok(Strategy::PartialLinkText),
            _ => Err(LocatorError::UnknownStrategy(s.to_string())),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Strategy {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Strategy {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// On-disk shape of a locator: `{ type: XPATH, value: "//input[@name='q']" }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocatorSpec {
    #[serde(rename = "type", alias = "strategy")]
    pub strategy: Strategy,
    #[serde(alias = "expression")]
    pub value: String,
}

/// A strategy + expression pair identifying a UI element.
///
/// The expression may contain `{token}` placeholders. They are collected when
/// the locator is built and must all be substituted through [`Locator::render`]
/// before the locator reaches a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "LocatorSpec", into = "LocatorSpec")]
pub struct Locator {
    strategy: Strategy,
    expression: String,
    placeholders: BTreeSet<String>,
}

impl TryFrom<LocatorSpec> for Locator {
    type Error = LocatorError;

    fn try_from(spec: LocatorSpec) -> Result<Self, Self::Error> {
        Locator::new(spec.strategy, spec.value)
    }
}

impl From<Locator> for LocatorSpec {
    fn from(locator: Locator) -> Self {
        LocatorSpec {
            strategy: locator.strategy,
            value: locator.expression,
        }
    }
}

impl Locator {
    pub fn new(strategy: Strategy, expression: impl Into<String>) -> Result<Self, LocatorError> {
        let expression = expression.into();
        if expression.trim().is_empty() {
            return Err(LocatorError::EmptyExpression);
        }
        let placeholders = PLACEHOLDER
            .captures_iter(&expression)
            .map(|c| c[1].to_string())
            .collect();
        Ok(Self {
            strategy,
            expression,
            placeholders,
        })
    }

    pub fn id(expression: impl Into<String>) -> Result<Self, LocatorError> {
        Self::new(Strategy::Id, expression)
    }

    pub fn xpath(expression: impl Into<String>) -> Result<Self, LocatorError> {
        Self::new(Strategy::XPath, expression)
    }

    pub fn css(expression: impl Into<String>) -> Result<Self, LocatorError> {
        Self::new(Strategy::Css, expression)
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn placeholders(&self) -> &BTreeSet<String> {
        &self.placeholders
    }

    pub fn is_resolved(&self) -> bool {
        self.placeholders.is_empty()
    }

    /// Substitute every placeholder, producing a concrete locator.
    pub fn render(&self, substitutions: &Substitutions) -> Result<Locator, LocatorError> {
        if let Some(missing) = self
            .placeholders
            .iter()
            .find(|token| !substitutions.contains(token))
        {
            return Err(LocatorError::UnresolvedPlaceholder {
                locator: self.to_string(),
                token: missing.clone(),
            });
        }

        let expression = PLACEHOLDER
            .replace_all(&self.expression, |caps: &regex::Captures| {
                substitutions.get(&caps[1]).unwrap_or_default().to_string()
            })
            .into_owned();

        Ok(Locator {
            strategy: self.strategy,
            expression,
            placeholders: BTreeSet::new(),
        })
    }

    /// CSS selector equivalent, for engines that only query by selector.
    /// XPath and link-text locators have none.
    pub fn css_equivalent(&self) -> Option<String> {
        match self.strategy {
            Strategy::Css => Some(self.expression.clone()),
            Strategy::Id => Some(format!("[id=\"{}\"]", escape_attr(&self.expression))),
            Strategy::Name => Some(format!("[name=\"{}\"]", escape_attr(&self.expression))),
            Strategy::ClassName => Some(
                self.expression
                    .split_whitespace()
                    .map(|class| format!(".{}", class))
                    .collect(),
            ),
            Strategy::TagName => Some(self.expression.trim().to_string()),
            Strategy::XPath | Strategy::LinkText | Strategy::PartialLinkText => None,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.strategy, self.expression)
    }
}

fn escape_attr(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Token -> value table applied by [`Locator::render`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Substitutions(BTreeMap<String, String>);

impl Substitutions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, token: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(token.into(), value.into());
        self
    }

    pub fn contains(&self, token: &str) -> bool {
        self.0.contains_key(token)
    }

    pub fn get(&self, token: &str) -> Option<&str> {
        self.0.get(token).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_aliases() {
        assert_eq!("XPATH".parse::<Strategy>().unwrap(), Strategy::XPath);
        assert_eq!("CSS_SELECTOR".parse::<Strategy>().unwrap(), Strategy::Css);
        assert_eq!("link text".parse::<Strategy>().unwrap(), Strategy::LinkText);
        assert_eq!("Name".parse::<Strategy>().unwrap(), Strategy::Name);
        assert!(matches!(
            "shadow".parse::<Strategy>(),
            Err(LocatorError::UnknownStrategy(_))
        ));
    }

    #[test]
    fn test_placeholders_collected() {
        let locator =
            Locator::xpath("//div[contains(text(), 'Booking #: {row_identifier}')]").unwrap();
        assert!(!locator.is_resolved());
        assert!(locator.placeholders().contains("row_identifier"));
    }

    #[test]
    fn test_render_substitutes_all_tokens() {
        let locator = Locator::xpath("//a[@data-id='{identifier}' or text()='{identifier}']")
            .unwrap();
        let rendered = locator
            .render(&Substitutions::new().with("identifier", "100"))
            .unwrap();
        assert!(rendered.is_resolved());
        assert_eq!(rendered.expression(), "//a[@data-id='100' or text()='100']");
        // template is untouched
        assert!(!locator.is_resolved());
    }

    #[test]
    fn test_render_missing_token_is_error() {
        let locator = Locator::css("tr[data-row='{row_identifier}']").unwrap();
        let err = locator
            .render(&Substitutions::new().with("identifier", "1"))
            .unwrap_err();
        assert_eq!(
            err,
            LocatorError::UnresolvedPlaceholder {
                locator: "css=tr[data-row='{row_identifier}']".into(),
                token: "row_identifier".into(),
            }
        );
    }

    #[test]
    fn test_empty_expression_rejected() {
        assert_eq!(Locator::id("  "), Err(LocatorError::EmptyExpression));
    }

    #[test]
    fn test_deserialize_spec_shape() {
        let locator: Locator =
            serde_json::from_str(r#"{"type": "NAME", "value": "supplier"}"#).unwrap();
        assert_eq!(locator.strategy(), Strategy::Name);
        assert_eq!(locator.css_equivalent().unwrap(), "[name=\"supplier\"]");

        let bad = serde_json::from_str::<Locator>(r#"{"type": "FRAME", "value": "x"}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_css_equivalent() {
        assert_eq!(
            Locator::new(Strategy::ClassName, "btn primary")
                .unwrap()
                .css_equivalent()
                .unwrap(),
            ".btn.primary"
        );
        assert!(Locator::xpath("//a").unwrap().css_equivalent().is_none());
    }
}
