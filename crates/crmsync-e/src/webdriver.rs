use crmsync_engine::backend::BackendError;
use crmsync_engine::locator::{Locator, Strategy};
use fantoccini::elements::Element;
use fantoccini::error::CmdError;
use fantoccini::{Client, ClientBuilder};
use serde_json::{Map, Value};

/// Owned form of a WebDriver element query. WebDriver only knows CSS, XPath,
/// link text and (through fantoccini) id, so the remaining strategies are
/// rewritten into one of those.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    Css(String),
    Id(String),
    XPath(String),
    LinkText(String),
}

impl Query {
    pub fn from_locator(locator: &Locator) -> Self {
        let expr = locator.expression();
        match locator.strategy() {
            Strategy::Id => Query::Id(expr.to_string()),
            Strategy::XPath => Query::XPath(expr.to_string()),
            Strategy::Css => Query::Css(expr.to_string()),
            Strategy::LinkText => Query::LinkText(expr.to_string()),
            Strategy::PartialLinkText => Query::XPath(format!(
                "//a[contains(normalize-space(.), {})]",
                xpath_literal(expr)
            )),
            Strategy::Name | Strategy::ClassName | Strategy::TagName => {
                Query::Css(locator.css_equivalent().unwrap_or_else(|| expr.to_string()))
            }
        }
    }

    pub fn as_locator(&self) -> fantoccini::Locator<'_> {
        match self {
            Query::Css(s) => fantoccini::Locator::Css(s),
            Query::Id(s) => fantoccini::Locator::Id(s),
            Query::XPath(s) => fantoccini::Locator::XPath(s),
            Query::LinkText(s) => fantoccini::Locator::LinkText(s),
        }
    }
}

/// Quote `text` as an XPath string literal.
pub fn xpath_literal(text: &str) -> String {
    if !text.contains('\'') {
        format!("'{}'", text)
    } else if !text.contains('"') {
        format!("\"{}\"", text)
    } else {
        let parts: Vec<String> = text.split('\'').map(|p| format!("'{}'", p)).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

/// Map a WebDriver error message onto the backend taxonomy.
pub fn classify_message(locator: &str, message: &str) -> BackendError {
    let lower = message.to_ascii_lowercase();
    let locator = locator.to_string();
    if lower.contains("no such element") {
        BackendError::ElementNotFound { locator }
    } else if lower.contains("stale element") {
        BackendError::ElementStale { locator }
    } else if lower.contains("click intercepted") {
        BackendError::ClickIntercepted {
            locator,
            reason: message.to_string(),
        }
    } else if lower.contains("not interactable") || lower.contains("invalid element state") {
        BackendError::ElementNotInteractable {
            locator,
            reason: message.to_string(),
        }
    } else if lower.contains("invalid session id")
        || lower.contains("session deleted")
        || lower.contains("disconnected")
        || lower.contains("connection refused")
    {
        BackendError::ConnectionLost
    } else if lower.contains("timeout") || lower.contains("timed out") {
        BackendError::Timeout
    } else {
        BackendError::Other(message.to_string())
    }
}

pub fn classify(locator: &str, err: &CmdError) -> BackendError {
    if err.is_no_such_element() {
        return BackendError::ElementNotFound {
            locator: locator.to_string(),
        };
    }
    classify_message(locator, &err.to_string())
}

pub struct WebDriverClient {
    pub client: Client,
}

impl WebDriverClient {
    pub async fn connect(url: &str, capabilities: Map<String, Value>) -> Result<Self, BackendError> {
        let client = ClientBuilder::native()
            .capabilities(capabilities)
            .connect(url)
            .await
            .map_err(|e| {
                BackendError::Launch(format!("Failed to connect to WebDriver at {}: {}", url, e))
            })?;

        Ok(Self { client })
    }

    pub async fn find(&self, locator: &Locator) -> Result<Element, BackendError> {
        let query = Query::from_locator(locator);
        self.client
            .find(query.as_locator())
            .await
            .map_err(|e| classify(&locator.to_string(), &e))
    }

    pub async fn close(self) -> Result<(), BackendError> {
        self.client
            .close()
            .await
            .map_err(|e| BackendError::Other(format!("Failed to close session: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_mapping() {
        let name = Locator::new(Strategy::Name, "username").unwrap();
        assert_eq!(
            Query::from_locator(&name),
            Query::Css("[name=\"username\"]".into())
        );

        let partial = Locator::new(Strategy::PartialLinkText, "Add Actual").unwrap();
        assert_eq!(
            Query::from_locator(&partial),
            Query::XPath("//a[contains(normalize-space(.), 'Add Actual')]".into())
        );

        let xpath = Locator::xpath("//span[text()='Save']").unwrap();
        assert_eq!(
            Query::from_locator(&xpath),
            Query::XPath("//span[text()='Save']".into())
        );
    }

    #[test]
    fn test_xpath_literal_quoting() {
        assert_eq!(xpath_literal("Save"), "'Save'");
        assert_eq!(xpath_literal("O'Brien"), "\"O'Brien\"");
        assert_eq!(
            xpath_literal(r#"a'b"c"#),
            r#"concat('a', "'", 'b"c')"#
        );
    }

    #[test]
    fn test_error_classification() {
        let loc = "xpath=//span";
        assert!(matches!(
            classify_message(loc, "no such element: Unable to locate element"),
            BackendError::ElementNotFound { .. }
        ));
        assert!(matches!(
            classify_message(loc, "element click intercepted: Other element would receive the click"),
            BackendError::ClickIntercepted { .. }
        ));
        assert!(matches!(
            classify_message(loc, "stale element reference: element is not attached"),
            BackendError::ElementStale { .. }
        ));
        assert!(matches!(
            classify_message(loc, "element not interactable"),
            BackendError::ElementNotInteractable { .. }
        ));
        assert!(matches!(
            classify_message(loc, "invalid session id"),
            BackendError::ConnectionLost
        ));
        assert!(matches!(
            classify_message(loc, "something else"),
            BackendError::Other(_)
        ));
    }
}
