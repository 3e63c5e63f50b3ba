use crate::backend::{Backend, BackendError, LaunchOptions};
use crmsync_common::locator::Locator;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, warn};

/// Wait behaviour for element lookups.
#[derive(Debug, Clone, Copy)]
pub struct DriverTimeouts {
    pub element_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for DriverTimeouts {
    fn default() -> Self {
        Self {
            element_timeout: Duration::from_secs(15),
            poll_interval: Duration::from_millis(250),
        }
    }
}

impl DriverTimeouts {
    /// Single lookup, no polling. Used by tests.
    pub fn immediate() -> Self {
        Self {
            element_timeout: Duration::ZERO,
            poll_interval: Duration::ZERO,
        }
    }
}

/// An element that became visible within its wait.
#[derive(Debug, Clone)]
pub struct FoundElement {
    pub locator: Locator,
    pub waited: Duration,
}

/// The resilient UI surface over one or more [`Backend`]s.
///
/// Every operation returns a value or a sentinel (`false`, `None`, empty
/// string) and logs what went wrong; nothing is raised to the caller.
/// Failures caused by the session rather than by the page (connection lost,
/// stale elements, navigation or script errors) are remembered and can be
/// drained with [`RemoteDriver::take_fault`].
pub struct RemoteDriver {
    strategies: Vec<Box<dyn Backend>>,
    active: Option<usize>,
    timeouts: DriverTimeouts,
    last_fault: Option<BackendError>,
}

impl RemoteDriver {
    pub fn new(backend: Box<dyn Backend>) -> Self {
        Self {
            strategies: vec![backend],
            active: None,
            timeouts: DriverTimeouts::default(),
            last_fault: None,
        }
    }

    /// Acquisition strategies are tried in order by [`RemoteDriver::start`].
    pub fn with_fallback(mut self, backend: Box<dyn Backend>) -> Self {
        self.strategies.push(backend);
        self
    }

    pub fn with_timeouts(mut self, timeouts: DriverTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn timeouts(&self) -> DriverTimeouts {
        self.timeouts
    }

    pub fn is_started(&self) -> bool {
        self.active.is_some()
    }

    /// Name of the backend that is driving the browser, if any.
    pub fn backend_name(&self) -> Option<&str> {
        self.active.map(|i| self.strategies[i].name())
    }

    fn backend(&mut self) -> Option<&mut Box<dyn Backend>> {
        let index = self.active?;
        self.strategies.get_mut(index)
    }

    /// Drain the most recent session-level fault.
    pub fn take_fault(&mut self) -> Option<BackendError> {
        self.last_fault.take()
    }

    fn note(&mut self, context: &str, err: BackendError) {
        if err.is_miss() {
            warn!("{}: {}", context, err);
        } else {
            error!("{}: {} [{}]", context, err, err.code());
            self.last_fault = Some(err);
        }
    }

    pub async fn start(&mut self, headless: bool) -> bool {
        self.start_with(&LaunchOptions {
            headless,
            ..LaunchOptions::default()
        })
        .await
    }

    pub async fn start_with(&mut self, options: &LaunchOptions) -> bool {
        if self.active.is_some() {
            return true;
        }

        for (index, backend) in self.strategies.iter_mut().enumerate() {
            info!(
                "Starting browser via {} (headless: {})",
                backend.name(),
                options.headless
            );
            match backend.launch(options).await {
                Ok(()) => {
                    info!("Browser ready via {}", backend.name());
                    self.active = Some(index);
                    return true;
                }
                Err(e) => {
                    warn!("Failed to start browser via {}: {}", backend.name(), e);
                    if let Err(close_err) = backend.close().await {
                        debug!("Cleanup after failed launch: {}", close_err);
                    }
                }
            }
        }

        error!("No browser acquisition strategy succeeded");
        false
    }

    /// Idempotent; safe before `start` and after a failed start.
    pub async fn close(&mut self) {
        let Some(index) = self.active.take() else {
            return;
        };
        let backend = &mut self.strategies[index];
        if let Err(e) = backend.close().await {
            error!("Error closing browser: {}", e);
        } else {
            info!("Browser closed");
        }
    }

    pub async fn navigate(&mut self, url: &str) -> bool {
        let Some(backend) = self.backend() else {
            warn!("navigate({}) with no browser", url);
            return false;
        };
        match backend.navigate(url).await {
            Ok(result) => {
                debug!("Navigated to {} ({})", result.url, result.title);
                true
            }
            Err(e) => {
                self.note(&format!("Error navigating to {}", url), e);
                false
            }
        }
    }

    pub async fn current_url(&mut self) -> Option<String> {
        let backend = self.backend()?;
        match backend.current_url().await {
            Ok(url) => Some(url),
            Err(e) => {
                self.note("Error reading current URL", e);
                None
            }
        }
    }

    /// Poll until `locator` is visible. `None` timeout uses the configured
    /// element timeout. Running out of time is not a fault.
    pub async fn wait_for(
        &mut self,
        locator: &Locator,
        timeout: Option<Duration>,
    ) -> Option<FoundElement> {
        if !locator.is_resolved() {
            error!("Refusing to look up unrendered locator {}", locator);
            return None;
        }

        let timeout = timeout.unwrap_or(self.timeouts.element_timeout);
        let poll = self.timeouts.poll_interval;
        let started = Instant::now();
        let deadline = started + timeout;

        loop {
            let backend = self.backend()?;
            match backend.is_visible(locator).await {
                Ok(true) => {
                    return Some(FoundElement {
                        locator: locator.clone(),
                        waited: started.elapsed(),
                    });
                }
                Ok(false) => {}
                Err(e) if e.is_miss() => {}
                Err(e) => {
                    self.note(&format!("Error waiting for element {}", locator), e);
                    return None;
                }
            }

            let now = Instant::now();
            if now >= deadline {
                warn!("Timeout waiting for element: {}", locator);
                return None;
            }
            sleep(poll.min(deadline - now)).await;
        }
    }

    /// Waits for the element, clicks it, then sleeps `post_wait`. An
    /// intercepted native click is retried as a script click.
    pub async fn click(&mut self, locator: &Locator, post_wait: Duration) -> bool {
        if self.wait_for(locator, None).await.is_none() {
            return false;
        }
        let Some(backend) = self.backend() else {
            return false;
        };

        let clicked = match backend.click(locator).await {
            Ok(()) => Ok(()),
            Err(BackendError::NotSupported(_)) => backend.script_click(locator).await,
            Err(e) if e.wants_script_click() => {
                warn!("Direct click on {} failed ({}), using script click", locator, e);
                backend.script_click(locator).await
            }
            Err(e) => Err(e),
        };

        match clicked {
            Ok(()) => {
                if !post_wait.is_zero() {
                    sleep(post_wait).await;
                }
                true
            }
            Err(e) => {
                self.note(&format!("Error clicking element {}", locator), e);
                false
            }
        }
    }

    pub async fn type_text(&mut self, locator: &Locator, text: &str, clear_first: bool) -> bool {
        if self.wait_for(locator, None).await.is_none() {
            return false;
        }
        let Some(backend) = self.backend() else {
            return false;
        };
        match backend.type_text(locator, text, clear_first).await {
            Ok(()) => true,
            Err(e) => {
                self.note(&format!("Error inputting text into {}", locator), e);
                false
            }
        }
    }

    /// Element text, or an empty string when it cannot be read.
    pub async fn read_text(&mut self, locator: &Locator) -> String {
        if self.wait_for(locator, None).await.is_none() {
            return String::new();
        }
        let Some(backend) = self.backend() else {
            return String::new();
        };
        match backend.read_text(locator).await {
            Ok(text) => text,
            Err(e) => {
                self.note(&format!("Error getting text from {}", locator), e);
                String::new()
            }
        }
    }

    pub async fn run_script(&mut self, script: &str, args: Vec<Value>) -> Option<Value> {
        let backend = self.backend()?;
        match backend.execute_script(script, args).await {
            Ok(value) => Some(value),
            Err(e) => {
                self.note("Error executing script", e);
                None
            }
        }
    }

    /// Best effort. Failures are logged and never recorded as faults.
    pub async fn screenshot(&mut self, path: &Path) -> bool {
        let Some(backend) = self.backend() else {
            return false;
        };
        let bytes = match backend.screenshot().await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Error taking screenshot {}: {}", path.display(), e);
                return false;
            }
        };

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && let Err(e) = tokio::fs::create_dir_all(parent).await
        {
            warn!("Cannot create screenshot directory {}: {}", parent.display(), e);
            return false;
        }

        match tokio::fs::write(path, bytes).await {
            Ok(()) => {
                debug!("Saved screenshot {}", path.display());
                true
            }
            Err(e) => {
                warn!("Error writing screenshot {}: {}", path.display(), e);
                false
            }
        }
    }
}

impl Drop for RemoteDriver {
    fn drop(&mut self) {
        let Some(index) = self.active.take() else {
            return;
        };
        let mut backend = self.strategies.swap_remove(index);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("Driver dropped while browser open; closing {}", backend.name());
                handle.spawn(async move {
                    if let Err(e) = backend.close().await {
                        error!("Error closing browser on drop: {}", e);
                    }
                });
            }
            Err(_) => {
                // Backends own their processes and kill them on drop.
                warn!("Driver dropped outside a runtime; relying on backend drop");
            }
        }
    }
}
