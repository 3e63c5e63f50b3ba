#![allow(dead_code)]

use async_trait::async_trait;
use crmsync_engine::backend::{Backend, BackendError, LaunchOptions, NavigationResult};
use crmsync_engine::driver::{DriverTimeouts, RemoteDriver};
use crmsync_engine::locator::Locator;
use crmsync_engine::orchestrator::{Orchestrator, RetryPolicy, Session, SettlePolicy};
use crmsync_engine::registry::{LocatorRegistry, names};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub const BASE_URL: &str = "https://crm.example.com/login";
pub const LISTING_URL: &str = "https://crm.example.com/booking-list";
pub const DASHBOARD_URL: &str = "https://crm.example.com/dashboard";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// What the fake page looks like, shared between a test and its backend.
#[derive(Debug)]
pub struct PageState {
    pub url: String,
    /// Successful actions, in order.
    pub trace: Vec<String>,
    /// Expressions with no matching element.
    pub missing: HashSet<String>,
    /// Expressions whose element exists but is hidden.
    pub hidden: HashSet<String>,
    /// Hidden until the login button is clicked and accepted.
    pub hidden_until_login: HashSet<String>,
    /// Native clicks on these are intercepted by an overlay.
    pub intercepted: HashSet<String>,
    /// Clicks on these hit a stale element this many more times.
    pub stale_clicks: HashMap<String, usize>,
    /// `current_url` loses the connection this many more times.
    pub url_failures: usize,
    pub url_reads: usize,
    pub reject_login: bool,
    pub launch_fails: bool,
    pub screenshot_fails: bool,
    pub launches: usize,
    pub closes: usize,
}

impl Default for PageState {
    fn default() -> Self {
        Self {
            url: LISTING_URL.to_string(),
            trace: Vec::new(),
            missing: HashSet::new(),
            hidden: HashSet::new(),
            hidden_until_login: HashSet::new(),
            intercepted: HashSet::new(),
            stale_clicks: HashMap::new(),
            url_failures: 0,
            url_reads: 0,
            reject_login: false,
            launch_fails: false,
            screenshot_fails: false,
            launches: 0,
            closes: 0,
        }
    }
}

#[derive(Clone, Default)]
pub struct Page(Arc<Mutex<PageState>>);

impl Page {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, PageState> {
        self.0.lock().unwrap()
    }

    pub fn trace(&self) -> Vec<String> {
        self.state().trace.clone()
    }

    pub fn count(&self, action: &str) -> usize {
        self.state().trace.iter().filter(|a| *a == action).count()
    }

    pub fn clear_trace(&self) {
        self.state().trace.clear();
    }
}

pub struct ScriptedBackend {
    name: String,
    page: Page,
}

impl ScriptedBackend {
    pub fn new(page: &Page) -> Self {
        Self::named("scripted", page)
    }

    pub fn named(name: &str, page: &Page) -> Self {
        Self {
            name: name.to_string(),
            page: page.clone(),
        }
    }

    fn lookup(state: &PageState, locator: &Locator) -> Result<(), BackendError> {
        if state.missing.contains(locator.expression()) {
            return Err(BackendError::ElementNotFound {
                locator: locator.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn launch(&mut self, _options: &LaunchOptions) -> Result<(), BackendError> {
        let mut state = self.page.state();
        if state.launch_fails {
            return Err(BackendError::Launch("no browser here".into()));
        }
        state.launches += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        self.page.state().closes += 1;
        Ok(())
    }

    async fn is_ready(&self) -> bool {
        true
    }

    async fn navigate(&mut self, url: &str) -> Result<NavigationResult, BackendError> {
        let mut state = self.page.state();
        state.url = url.to_string();
        state.trace.push(format!("navigate({})", url));
        Ok(NavigationResult {
            url: url.to_string(),
            title: "CRM".into(),
        })
    }

    async fn current_url(&mut self) -> Result<String, BackendError> {
        let mut state = self.page.state();
        state.url_reads += 1;
        if state.url_failures > 0 {
            state.url_failures -= 1;
            return Err(BackendError::ConnectionLost);
        }
        Ok(state.url.clone())
    }

    async fn is_visible(&mut self, locator: &Locator) -> Result<bool, BackendError> {
        let state = self.page.state();
        Self::lookup(&state, locator)?;
        let expr = locator.expression();
        Ok(!state.hidden.contains(expr) && !state.hidden_until_login.contains(expr))
    }

    async fn click(&mut self, locator: &Locator) -> Result<(), BackendError> {
        let mut state = self.page.state();
        Self::lookup(&state, locator)?;
        let expr = locator.expression().to_string();

        if let Some(remaining) = state.stale_clicks.get_mut(&expr)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(BackendError::ElementStale {
                locator: locator.to_string(),
            });
        }
        if state.intercepted.contains(&expr) {
            return Err(BackendError::ClickIntercepted {
                locator: locator.to_string(),
                reason: "overlay".into(),
            });
        }

        match expr.as_str() {
            "login-btn" if !state.reject_login => {
                state.url = DASHBOARD_URL.to_string();
                state.hidden_until_login.clear();
            }
            "crm" => state.url = LISTING_URL.to_string(),
            _ => {}
        }
        state.trace.push(format!("click({})", expr));
        Ok(())
    }

    async fn script_click(&mut self, locator: &Locator) -> Result<(), BackendError> {
        let mut state = self.page.state();
        Self::lookup(&state, locator)?;
        state
            .trace
            .push(format!("script_click({})", locator.expression()));
        Ok(())
    }

    async fn type_text(
        &mut self,
        locator: &Locator,
        text: &str,
        _clear_first: bool,
    ) -> Result<(), BackendError> {
        let mut state = self.page.state();
        Self::lookup(&state, locator)?;
        state
            .trace
            .push(format!("type({}, {})", locator.expression(), text));
        Ok(())
    }

    async fn read_text(&mut self, locator: &Locator) -> Result<String, BackendError> {
        let state = self.page.state();
        Self::lookup(&state, locator)?;
        Ok(format!("text of {}", locator.expression()))
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, BackendError> {
        if self.page.state().screenshot_fails {
            return Err(BackendError::ScriptError("capture failed".into()));
        }
        Ok(b"\x89PNG\r\n\x1a\n".to_vec())
    }
}

pub const ROW_TEMPLATE: &str = "//div[text()='Booking #: {row_identifier}']";

pub fn row_for(row_key: &str) -> String {
    ROW_TEMPLATE.replace("{row_identifier}", row_key)
}

pub fn registry() -> LocatorRegistry {
    LocatorRegistry::new()
        .with_locator(names::USERNAME_FIELD, Locator::id("user").unwrap())
        .with_locator(names::PASSWORD_FIELD, Locator::id("pass").unwrap())
        .with_locator(names::LOGIN_BUTTON, Locator::id("login-btn").unwrap())
        .with_locator(names::CRM_MODULE, Locator::id("crm").unwrap())
        .with_locator(names::SEARCH_FIELD, Locator::id("search").unwrap())
        .with_locator(names::SEARCH_BUTTON, Locator::id("search-btn").unwrap())
        .with_locator(names::RECORD_ROW, Locator::xpath(ROW_TEMPLATE).unwrap())
        .with_locator(names::EDIT_BUTTON, Locator::css(".add-actual-net").unwrap())
        .with_locator(names::SAVE_BUTTON, Locator::css(".save").unwrap())
        .with_field("supplier", Locator::id("supplier").unwrap())
        .with_field("actual_net_cost", Locator::id("actual-net-cost").unwrap())
}

pub fn driver(page: &Page) -> RemoteDriver {
    RemoteDriver::new(Box::new(ScriptedBackend::new(page))).with_timeouts(DriverTimeouts::immediate())
}

/// An orchestrator over a started scripted session with no delays.
pub async fn orchestrator(page: &Page, attempts: usize) -> Orchestrator {
    let session = Session::acquire(driver(page), &LaunchOptions::default())
        .await
        .unwrap();
    Orchestrator::new(session, registry())
        .with_base_url(BASE_URL)
        .with_settle(SettlePolicy::immediate())
        .with_retry(RetryPolicy::new(attempts, Duration::ZERO))
        .with_search_timeout(Duration::ZERO)
}
