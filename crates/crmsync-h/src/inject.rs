//! Element operations evaluated inside the page.
//!
//! DevTools has no element query for XPath or link text, so every locator
//! strategy is resolved by a small script. Each operation wraps a body in
//! the resolver and reports `{found: false}` when nothing matches, letting
//! the caller tell a miss from a script failure.

use chromiumoxide::Page;
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use crmsync_engine::backend::BackendError;
use crmsync_engine::locator::Locator;
use serde_json::Value;
use std::time::Duration;

/// Bound on a single evaluation. A blocking dialog would otherwise hang it.
const EVAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Retries while the page is between documents.
const MAX_CONTEXT_RETRIES: u32 = 10;

const CONTEXT_RETRY_DELAY: Duration = Duration::from_millis(100);

const RESOLVE_JS: &str = r#"function (strategy, expr) {
  const first = (list) => (list && list.length ? list[0] : null);
  const anchors = () => Array.from(document.querySelectorAll('a'));
  const text = (a) => (a.textContent || '').replace(/\s+/g, ' ').trim();
  switch (strategy) {
    case 'id': return document.getElementById(expr);
    case 'xpath': return document.evaluate(expr, document, null,
      XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue;
    case 'css': return document.querySelector(expr);
    case 'name': return first(document.getElementsByName(expr));
    case 'class_name': return first(document.getElementsByClassName(expr));
    case 'tag_name': return first(document.getElementsByTagName(expr));
    case 'link_text': return anchors().find((a) => text(a) === expr) || null;
    case 'partial_link_text': return anchors().find((a) => text(a).includes(expr)) || null;
    default: return null;
  }
}"#;

pub const VISIBLE_BODY: &str = r#"
  const style = window.getComputedStyle(el);
  const boxed = el.getClientRects().length > 0;
  return { found: true, value: boxed && style.visibility !== 'hidden' && style.display !== 'none' };"#;

pub const CLICK_BODY: &str = r#"
  el.scrollIntoView({ block: 'center' });
  el.click();
  return { found: true };"#;

pub const TEXT_BODY: &str = r#"
  return { found: true, value: (el.innerText || el.textContent || '').trim() };"#;

/// Body that writes `text` into a form control and fires the events UI
/// frameworks listen for. The native setter is used so that frameworks
/// tracking `value` see the change.
pub fn set_value_body(text: &str, clear_first: bool) -> Result<String, BackendError> {
    let text = serde_json::to_string(text)?;
    Ok(format!(
        r#"
  if (el.disabled || el.readOnly) return {{ found: true, value: 'not editable' }};
  el.scrollIntoView({{ block: 'center' }});
  el.focus();
  const next = ({clear} ? '' : (el.value || '')) + {text};
  const proto = Object.getPrototypeOf(el);
  const desc = Object.getOwnPropertyDescriptor(proto, 'value');
  if (desc && desc.set) {{ desc.set.call(el, next); }} else {{ el.value = next; }}
  el.dispatchEvent(new Event('input', {{ bubbles: true }}));
  el.dispatchEvent(new Event('change', {{ bubbles: true }}));
  return {{ found: true, value: null }};"#,
        clear = clear_first,
        text = text,
    ))
}

/// Complete expression running `body` against the element `locator` names.
pub fn element_script(locator: &Locator, body: &str) -> Result<String, BackendError> {
    let strategy = serde_json::to_string(locator.strategy().as_str())?;
    let expression = serde_json::to_string(locator.expression())?;
    Ok(format!(
        "(() => {{ const el = ({})({}, {}); if (!el) return {{ found: false }};{}\n}})()",
        RESOLVE_JS, strategy, expression, body
    ))
}

/// Wrap a WebDriver-style script (`return` and `arguments`) for evaluation.
pub fn function_script(script: &str, args: &[Value]) -> Result<String, BackendError> {
    Ok(format!(
        "(function () {{ {} }}).apply(null, {})",
        script,
        serde_json::to_string(args)?
    ))
}

/// Run `body` against the element and return its `value` field.
pub async fn on_element(page: &Page, locator: &Locator, body: &str) -> Result<Value, BackendError> {
    let script = element_script(locator, body)?;
    let result = evaluate(page, &script).await?;
    element_value(locator, result)
}

/// Interpret the `{found, value}` envelope.
pub fn element_value(locator: &Locator, mut result: Value) -> Result<Value, BackendError> {
    if result.get("found").and_then(Value::as_bool) != Some(true) {
        return Err(BackendError::ElementNotFound {
            locator: locator.to_string(),
        });
    }
    Ok(result
        .get_mut("value")
        .map(Value::take)
        .unwrap_or(Value::Null))
}

/// Evaluate with a timeout, retrying while the execution context is gone.
pub async fn evaluate(page: &Page, expression: &str) -> Result<Value, BackendError> {
    let mut last_error = None;

    for attempt in 0..MAX_CONTEXT_RETRIES {
        match evaluate_with_timeout(page, expression).await {
            Ok(value) => return Ok(value),
            Err(EvalError::Timeout) => return Err(BackendError::Timeout),
            Err(EvalError::Context(err)) => {
                tracing::debug!(
                    "Context error during evaluation (attempt {}/{}), retrying...",
                    attempt + 1,
                    MAX_CONTEXT_RETRIES
                );
                last_error = Some(err);
                tokio::time::sleep(CONTEXT_RETRY_DELAY).await;
            }
            Err(EvalError::Other(err)) => return Err(classify_message(&err)),
        }
    }

    Err(BackendError::ScriptError(last_error.unwrap_or_else(|| {
        "Execution context unavailable after retries".to_string()
    })))
}

enum EvalError {
    Timeout,
    Context(String),
    Other(String),
}

fn is_context_error(err: &str) -> bool {
    err.contains("Cannot find context")
        || err.contains("Execution context was destroyed")
        || err.contains("Cannot find default execution context")
}

/// Map a DevTools error onto the backend taxonomy. Transport failures mean
/// the browser is gone; everything else is a script problem.
pub fn classify_message(message: &str) -> BackendError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("channel closed")
        || lower.contains("connection closed")
        || lower.contains("websocket")
        || lower.contains("target closed")
        || lower.contains("browser closed")
    {
        BackendError::ConnectionLost
    } else if lower.contains("timeout") || lower.contains("timed out") {
        BackendError::Timeout
    } else {
        BackendError::ScriptError(message.to_string())
    }
}

async fn evaluate_with_timeout(page: &Page, expression: &str) -> Result<Value, EvalError> {
    let params = EvaluateParams::builder()
        .expression(expression)
        .return_by_value(true)
        .build()
        .map_err(EvalError::Other)?;
    match tokio::time::timeout(EVAL_TIMEOUT, page.evaluate_expression(params)).await {
        Err(_) => Err(EvalError::Timeout),
        Ok(Err(e)) => {
            let err = e.to_string();
            if is_context_error(&err) {
                Err(EvalError::Context(err))
            } else {
                Err(EvalError::Other(err))
            }
        }
        // `undefined` results carry no value
        Ok(Ok(result)) => Ok(result.value().cloned().unwrap_or(Value::Null)),
    }
}
