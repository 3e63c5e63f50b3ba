use async_trait::async_trait;
use crmsync_common::locator::Locator;

#[derive(Debug, Clone)]
pub struct NavigationResult {
    pub url: String,
    pub title: String,
}

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            headless: false,
            window_width: 1920,
            window_height: 1080,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone)]
pub enum BackendError {
    // ============================================================
    // Session Errors
    // ============================================================
    #[error("Browser launch failed: {0}")]
    Launch(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Connection lost")]
    ConnectionLost,

    #[error("Not ready")]
    NotReady,

    // ============================================================
    // Element Errors
    // ============================================================
    #[error("Element not found: {locator}")]
    ElementNotFound { locator: String },

    #[error("Element not visible: {locator}")]
    ElementNotVisible { locator: String },

    #[error("Element is stale (removed from DOM): {locator}")]
    ElementStale { locator: String },

    #[error("Click intercepted on {locator}: {reason}")]
    ClickIntercepted { locator: String, reason: String },

    #[error("Element {locator} is not interactable: {reason}")]
    ElementNotInteractable { locator: String, reason: String },

    // ============================================================
    // Execution Errors
    // ============================================================
    #[error("Script execution error: {0}")]
    ScriptError(String),

    #[error("Timeout")]
    Timeout,

    // ============================================================
    // System Errors
    // ============================================================
    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Other: {0}")]
    Other(String),

    #[error("Not supported: {0}")]
    NotSupported(String),
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        BackendError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::Serialization(err.to_string())
    }
}

impl BackendError {
    pub fn code(&self) -> &'static str {
        match self {
            BackendError::Launch(_) => "LAUNCH_ERROR",
            BackendError::Navigation(_) => "NAVIGATION_ERROR",
            BackendError::ConnectionLost => "CONNECTION_LOST",
            BackendError::NotReady => "NOT_READY",
            BackendError::ElementNotFound { .. } => "ELEMENT_NOT_FOUND",
            BackendError::ElementNotVisible { .. } => "ELEMENT_NOT_VISIBLE",
            BackendError::ElementStale { .. } => "ELEMENT_STALE",
            BackendError::ClickIntercepted { .. } => "CLICK_INTERCEPTED",
            BackendError::ElementNotInteractable { .. } => "ELEMENT_NOT_INTERACTABLE",
            BackendError::ScriptError(_) => "SCRIPT_ERROR",
            BackendError::Timeout => "TIMEOUT",
            BackendError::Io(_) => "IO_ERROR",
            BackendError::Serialization(_) => "SERIALIZATION_ERROR",
            BackendError::Other(_) => "INTERNAL_ERROR",
            BackendError::NotSupported(_) => "NOT_SUPPORTED",
        }
    }

    /// A miss means the page simply doesn't (yet) offer the element. Anything
    /// else points at the session itself and is worth a full retry.
    pub fn is_miss(&self) -> bool {
        matches!(
            self,
            BackendError::ElementNotFound { .. }
                | BackendError::ElementNotVisible { .. }
                | BackendError::ClickIntercepted { .. }
                | BackendError::ElementNotInteractable { .. }
                | BackendError::Timeout
        )
    }

    /// Native click failures that a script-driven click can still get past.
    pub fn wants_script_click(&self) -> bool {
        matches!(
            self,
            BackendError::ClickIntercepted { .. }
                | BackendError::ElementNotInteractable { .. }
                | BackendError::NotSupported(_)
        )
    }
}

/// Primitive browser capabilities. Implemented once per automation engine;
/// the resilient surface the orchestrator talks to is
/// [`RemoteDriver`](crate::driver::RemoteDriver).
///
/// All locators handed to a backend are fully rendered.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Acquire a browser (spawn a driver process, connect, open a page).
    async fn launch(&mut self, options: &LaunchOptions) -> Result<(), BackendError>;

    /// Close the browser and cleanup resources.
    async fn close(&mut self) -> Result<(), BackendError>;

    /// Check if the backend is ready to accept commands.
    async fn is_ready(&self) -> bool;

    async fn navigate(&mut self, url: &str) -> Result<NavigationResult, BackendError>;

    async fn current_url(&mut self) -> Result<String, BackendError>;

    /// `Ok(false)` when the element exists but is not displayed,
    /// `ElementNotFound` when it does not exist at all.
    async fn is_visible(&mut self, locator: &Locator) -> Result<bool, BackendError>;

    /// Native (pointer) click.
    async fn click(&mut self, locator: &Locator) -> Result<(), BackendError>;

    /// Click through `element.click()` in page script.
    async fn script_click(&mut self, locator: &Locator) -> Result<(), BackendError>;

    async fn type_text(
        &mut self,
        locator: &Locator,
        text: &str,
        clear_first: bool,
    ) -> Result<(), BackendError>;

    async fn read_text(&mut self, locator: &Locator) -> Result<String, BackendError>;

    /// Execute a script in the page context.
    async fn execute_script(
        &mut self,
        _script: &str,
        _args: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, BackendError> {
        Err(BackendError::NotSupported("execute_script".into()))
    }

    /// Capture a PNG screenshot of the current viewport.
    async fn screenshot(&mut self) -> Result<Vec<u8>, BackendError>;
}
