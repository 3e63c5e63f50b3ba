use crate::cdp::CdpClient;
use crate::inject::{self, CLICK_BODY, TEXT_BODY, VISIBLE_BODY};
use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::page::ScreenshotParams;
use crmsync_engine::backend::{Backend, BackendError, LaunchOptions, NavigationResult};
use crmsync_engine::locator::Locator;
use serde_json::Value;
use tracing::info;

/// Chromium over the DevTools protocol. Needs no driver process, only a
/// Chrome/Chromium binary.
pub struct HeadlessBackend {
    client: Option<CdpClient>,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self { client: None }
    }

    pub fn get_client(&self) -> Option<&CdpClient> {
        self.client.as_ref()
    }

    fn page(&self) -> Result<&Page, BackendError> {
        self.client
            .as_ref()
            .map(|client| &client.page)
            .ok_or(BackendError::NotReady)
    }

    async fn navigation_result(page: &Page) -> Result<NavigationResult, BackendError> {
        let title = page
            .get_title()
            .await
            .unwrap_or_default()
            .unwrap_or_default();
        let url = page
            .url()
            .await
            .map_err(|e| BackendError::Navigation(e.to_string()))?
            .unwrap_or_default();
        Ok(NavigationResult { url, title })
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors from a native (input-event) click. Anything short of a dead
/// browser is left to the script click.
fn native_click_error(locator: &Locator, message: &str) -> BackendError {
    match inject::classify_message(message) {
        BackendError::ScriptError(reason) => BackendError::ElementNotInteractable {
            locator: locator.to_string(),
            reason,
        },
        other => other,
    }
}

#[async_trait]
impl Backend for HeadlessBackend {
    fn name(&self) -> &str {
        "devtools"
    }

    async fn launch(&mut self, options: &LaunchOptions) -> Result<(), BackendError> {
        info!("Launching headless backend (Chromium)...");
        let client = CdpClient::launch(options)
            .await
            .map_err(|e| BackendError::Launch(e.to_string()))?;
        self.client = Some(client);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        if let Some(client) = self.client.take() {
            client
                .close()
                .await
                .map_err(|e| BackendError::Other(e.to_string()))?;
        }
        Ok(())
    }

    async fn is_ready(&self) -> bool {
        self.client.is_some()
    }

    async fn navigate(&mut self, url: &str) -> Result<NavigationResult, BackendError> {
        let page = self.page()?;

        info!("Navigating to: {}", url);
        page.goto(url)
            .await
            .map_err(|e| BackendError::Navigation(e.to_string()))?;

        Self::navigation_result(page).await
    }

    async fn current_url(&mut self) -> Result<String, BackendError> {
        let page = self.page()?;
        page.url()
            .await
            .map(Option::unwrap_or_default)
            .map_err(|e| inject::classify_message(&e.to_string()))
    }

    async fn is_visible(&mut self, locator: &Locator) -> Result<bool, BackendError> {
        let value = inject::on_element(self.page()?, locator, VISIBLE_BODY).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    /// Real mouse events where the locator has a CSS form. XPath and link
    /// text report `NotSupported`, which routes the click through script.
    async fn click(&mut self, locator: &Locator) -> Result<(), BackendError> {
        let page = self.page()?;
        let Some(selector) = locator.css_equivalent() else {
            return Err(BackendError::NotSupported(format!(
                "native click by {}",
                locator.strategy()
            )));
        };

        let element = match page.find_element(selector).await {
            Ok(element) => element,
            Err(e) => {
                return match inject::classify_message(&e.to_string()) {
                    BackendError::ScriptError(_) => Err(BackendError::ElementNotFound {
                        locator: locator.to_string(),
                    }),
                    other => Err(other),
                };
            }
        };
        element
            .click()
            .await
            .map(|_| ())
            .map_err(|e| native_click_error(locator, &e.to_string()))
    }

    async fn script_click(&mut self, locator: &Locator) -> Result<(), BackendError> {
        inject::on_element(self.page()?, locator, CLICK_BODY).await?;
        Ok(())
    }

    async fn type_text(
        &mut self,
        locator: &Locator,
        text: &str,
        clear_first: bool,
    ) -> Result<(), BackendError> {
        let body = inject::set_value_body(text, clear_first)?;
        match inject::on_element(self.page()?, locator, &body).await? {
            Value::String(reason) => Err(BackendError::ElementNotInteractable {
                locator: locator.to_string(),
                reason,
            }),
            _ => Ok(()),
        }
    }

    async fn read_text(&mut self, locator: &Locator) -> Result<String, BackendError> {
        let value = inject::on_element(self.page()?, locator, TEXT_BODY).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn execute_script(
        &mut self,
        script: &str,
        args: Vec<Value>,
    ) -> Result<Value, BackendError> {
        let expression = inject::function_script(script, &args)?;
        inject::evaluate(self.page()?, &expression).await
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, BackendError> {
        let page = self.page()?;
        page.screenshot(ScreenshotParams::builder().build())
            .await
            .map_err(|e| BackendError::Other(format!("Screenshot failed: {}", e)))
    }
}
