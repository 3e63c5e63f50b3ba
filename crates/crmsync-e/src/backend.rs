use crate::chromedriver::{self, ChromeDriverProcess};
use crate::webdriver::{WebDriverClient, classify};
use async_trait::async_trait;
use crmsync_engine::backend::{Backend, BackendError, LaunchOptions, NavigationResult};
use crmsync_engine::locator::Locator;
use std::path::PathBuf;
use tracing::{info, warn};

/// Chrome over WebDriver. Connects to a configured WebDriver server when one
/// is given and reachable; otherwise finds and spawns a local chromedriver.
pub struct EmbeddedBackend {
    client: Option<WebDriverClient>,
    webdriver_url: Option<String>,
    chromedriver_path: Option<PathBuf>,
    driver_process: Option<ChromeDriverProcess>,
    port: u16,
}

impl EmbeddedBackend {
    /// Spawn chromedriver on its default port.
    pub fn new() -> Self {
        Self {
            client: None,
            webdriver_url: None,
            chromedriver_path: None,
            driver_process: None,
            port: chromedriver::DEFAULT_CHROMEDRIVER_PORT,
        }
    }

    /// Try an existing WebDriver server first.
    pub fn with_url(webdriver_url: String) -> Self {
        Self {
            webdriver_url: Some(webdriver_url),
            ..Self::new()
        }
    }

    pub fn chromedriver(mut self, path: Option<PathBuf>) -> Self {
        self.chromedriver_path = path;
        self
    }

    /// Port for a spawned chromedriver. Useful for parallel runs.
    pub fn on_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    fn client(&self) -> Result<&WebDriverClient, BackendError> {
        self.client.as_ref().ok_or(BackendError::NotReady)
    }

    async fn spawn_and_connect(&mut self, options: &LaunchOptions) -> Result<(), BackendError> {
        let binary = chromedriver::find_chromedriver_binary(self.chromedriver_path.as_deref())
            .ok_or_else(|| {
                BackendError::Launch(format!(
                    "chromedriver not found. Install it or set {}",
                    chromedriver::CHROMEDRIVER_ENV
                ))
            })?;

        info!("Launching chromedriver on port {}...", self.port);
        let process = chromedriver::launch_chromedriver(&binary, self.port)
            .await
            .map_err(BackendError::Launch)?;
        let url = process.webdriver_url();
        self.driver_process = Some(process);
        info!("chromedriver launched at {}", url);

        let client =
            WebDriverClient::connect(&url, chromedriver::chrome_capabilities(options)).await?;
        self.client = Some(client);
        Ok(())
    }
}

impl Default for EmbeddedBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for EmbeddedBackend {
    fn name(&self) -> &str {
        "webdriver"
    }

    async fn launch(&mut self, options: &LaunchOptions) -> Result<(), BackendError> {
        if let Some(url) = &self.webdriver_url {
            info!("Connecting to WebDriver at {}...", url);
            match WebDriverClient::connect(url, chromedriver::chrome_capabilities(options)).await {
                Ok(client) => {
                    self.client = Some(client);
                    return Ok(());
                }
                Err(e) => warn!("{}; falling back to a local chromedriver", e),
            }
        }
        self.spawn_and_connect(options).await
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        let closed = match self.client.take() {
            Some(client) => client.close().await,
            None => Ok(()),
        };
        // Kills chromedriver even when the session could not be closed
        self.driver_process = None;
        closed
    }

    async fn is_ready(&self) -> bool {
        self.client.is_some()
    }

    async fn navigate(&mut self, url: &str) -> Result<NavigationResult, BackendError> {
        let client = self.client()?;

        info!("Navigating to: {}", url);
        client
            .client
            .goto(url)
            .await
            .map_err(|e| BackendError::Navigation(e.to_string()))?;

        let title = client.client.title().await.unwrap_or_default();
        let url = client
            .client
            .current_url()
            .await
            .map(|u| u.to_string())
            .unwrap_or_else(|_| url.to_string());
        Ok(NavigationResult { url, title })
    }

    async fn current_url(&mut self) -> Result<String, BackendError> {
        let client = self.client()?;
        client
            .client
            .current_url()
            .await
            .map(|u| u.to_string())
            .map_err(|e| classify("current_url", &e))
    }

    async fn is_visible(&mut self, locator: &Locator) -> Result<bool, BackendError> {
        let element = self.client()?.find(locator).await?;
        element
            .is_displayed()
            .await
            .map_err(|e| classify(&locator.to_string(), &e))
    }

    async fn click(&mut self, locator: &Locator) -> Result<(), BackendError> {
        let element = self.client()?.find(locator).await?;
        element
            .click()
            .await
            .map_err(|e| classify(&locator.to_string(), &e))
    }

    async fn script_click(&mut self, locator: &Locator) -> Result<(), BackendError> {
        let client = self.client()?;
        let element = client.find(locator).await?;
        let arg = serde_json::to_value(&element)?;
        client
            .client
            .execute("arguments[0].click();", vec![arg])
            .await
            .map_err(|e| classify(&locator.to_string(), &e))?;
        Ok(())
    }

    async fn type_text(
        &mut self,
        locator: &Locator,
        text: &str,
        clear_first: bool,
    ) -> Result<(), BackendError> {
        let element = self.client()?.find(locator).await?;
        if clear_first {
            element
                .clear()
                .await
                .map_err(|e| classify(&locator.to_string(), &e))?;
        }
        element
            .send_keys(text)
            .await
            .map_err(|e| classify(&locator.to_string(), &e))
    }

    async fn read_text(&mut self, locator: &Locator) -> Result<String, BackendError> {
        let element = self.client()?.find(locator).await?;
        element
            .text()
            .await
            .map_err(|e| classify(&locator.to_string(), &e))
    }

    async fn execute_script(
        &mut self,
        script: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, BackendError> {
        let client = self.client()?;
        client
            .client
            .execute(script, args)
            .await
            .map_err(|e| BackendError::ScriptError(e.to_string()))
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, BackendError> {
        let client = self.client()?;
        client
            .client
            .screenshot()
            .await
            .map_err(|e| BackendError::Other(format!("Screenshot failed: {}", e)))
    }
}
