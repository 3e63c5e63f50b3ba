//! Record-level form automation.
//!
//! The [`Orchestrator`] owns a [`Session`] and turns one record into the
//! sequence search -> open row -> enter edit mode -> update fields -> save,
//! retrying the whole sequence when the browser session misbehaves and giving
//! up on the record when the page simply does not have what is needed.

pub mod diagnostics;
pub mod phase;
pub mod session;
pub mod settle;

pub use diagnostics::{Checkpoint, CheckpointObserver, NoopObserver, ScreenshotObserver};
pub use phase::{PageHint, Phase};
pub use session::Session;
pub use settle::{RetryPolicy, SettlePolicy};

use crate::backend::BackendError;
use crate::config::{ConfigError, CrmSyncConfig};
use crate::registry::{LocatorRegistry, names};
use crmsync_common::locator::{Locator, Substitutions};
use crmsync_common::record::{IdentifierRules, OperationResult, Record, RunSummary};
use diagnostics::steps;
use settle::settle;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum AutomationError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Fatal: {0}")]
    Fatal(String),
    #[error("Login failed")]
    LoginFailed,
    #[error("Could not navigate to the CRM module")]
    NavigationFailed,
}

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Shared stop flag, checked between records.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How processing a single record ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Updated,
    /// Every field value was empty; nothing was attempted.
    NoUpdates,
    NotFound,
    SearchUnavailable,
    EditUnavailable,
    FieldFailed(String),
    SaveFailed,
    Config(String),
    RetriesExhausted,
    NotStarted,
}

impl RecordOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RecordOutcome::Updated)
    }
}

impl fmt::Display for RecordOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordOutcome::Updated => f.write_str("updated"),
            RecordOutcome::NoUpdates => f.write_str("no field values to update"),
            RecordOutcome::NotFound => f.write_str("record not found"),
            RecordOutcome::SearchUnavailable => f.write_str("search controls unavailable"),
            RecordOutcome::EditUnavailable => f.write_str("edit control unavailable"),
            RecordOutcome::FieldFailed(field) => write!(f, "failed to update field {}", field),
            RecordOutcome::SaveFailed => f.write_str("save failed"),
            RecordOutcome::Config(reason) => write!(f, "configuration error: {}", reason),
            RecordOutcome::RetriesExhausted => f.write_str("retries exhausted"),
            RecordOutcome::NotStarted => f.write_str("browser not started"),
        }
    }
}

/// Why an attempt stopped short of a save.
enum Halt {
    /// Session-level fault; the sequence is worth running again.
    Retry(BackendError),
    /// The record cannot be processed; retrying would not help.
    Stop(RecordOutcome),
}

impl From<ConfigError> for Halt {
    fn from(err: ConfigError) -> Self {
        Halt::Stop(RecordOutcome::Config(err.to_string()))
    }
}

/// Case-insensitive URL fragment test. An empty fragment never matches.
fn url_has_fragment(url: &str, fragment: &str) -> bool {
    !fragment.is_empty()
        && url
            .to_ascii_lowercase()
            .contains(&fragment.to_ascii_lowercase())
}

/// Controls a record needs, rendered for its identifier.
struct Targets {
    search_field: Locator,
    search_button: Locator,
    row: Locator,
    edit_button: Locator,
    save_button: Locator,
    close_button: Option<Locator>,
}

pub struct Orchestrator {
    session: Session,
    registry: LocatorRegistry,
    base_url: String,
    listing_fragment: String,
    login_fragment: String,
    rules: IdentifierRules,
    settle: SettlePolicy,
    retry: RetryPolicy,
    search_timeout: Duration,
    observer: Box<dyn CheckpointObserver>,
    abort: AbortHandle,
}

impl Orchestrator {
    pub fn new(session: Session, registry: LocatorRegistry) -> Self {
        Self {
            session,
            registry,
            base_url: String::new(),
            listing_fragment: "booking-list".to_string(),
            login_fragment: "login".to_string(),
            rules: IdentifierRules::default(),
            settle: SettlePolicy::default(),
            retry: RetryPolicy::default(),
            search_timeout: Duration::from_secs(5),
            observer: Box::new(NoopObserver),
            abort: AbortHandle::new(),
        }
    }

    pub fn from_config(session: Session, config: &CrmSyncConfig) -> Result<Self, ConfigError> {
        let registry = LocatorRegistry::from_config(&config.crm)?;
        let observer: Box<dyn CheckpointObserver> = if config.diagnostics.screenshots {
            Box::new(ScreenshotObserver::new(&config.diagnostics.screenshot_dir))
        } else {
            Box::new(NoopObserver)
        };

        Ok(Self::new(session, registry)
            .with_base_url(config.crm.url.trim())
            .with_url_fragments(
                config.crm.listing_url_fragment.clone(),
                config.crm.login_url_fragment.clone(),
            )
            .with_rules(config.identifier.clone())
            .with_settle(SettlePolicy::from_config(&config.automation))
            .with_retry(RetryPolicy::from_config(&config.automation))
            .with_search_timeout(Duration::from_millis(config.automation.search_timeout_ms))
            .with_observer(observer))
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_url_fragments(
        mut self,
        listing: impl Into<String>,
        login: impl Into<String>,
    ) -> Self {
        self.listing_fragment = listing.into();
        self.login_fragment = login.into();
        self
    }

    pub fn with_rules(mut self, rules: IdentifierRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_settle(mut self, settle: SettlePolicy) -> Self {
        self.settle = settle;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_search_timeout(mut self, timeout: Duration) -> Self {
        self.search_timeout = timeout;
        self
    }

    pub fn with_observer(mut self, observer: Box<dyn CheckpointObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_abort(mut self, abort: AbortHandle) -> Self {
        self.abort = abort;
        self
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Close the browser and hand the session back.
    pub async fn release(mut self) -> Session {
        self.session.release().await;
        self.session
    }

    // ============================================================
    // Authentication and navigation
    // ============================================================

    pub async fn login(&mut self, credentials: &Credentials) -> bool {
        match self.sign_in(credentials).await {
            Ok(ok) => ok,
            Err(e) => {
                error!("Cannot log in: {}", e);
                false
            }
        }
    }

    pub async fn navigate_to_module(&mut self) -> bool {
        match self.open_module().await {
            Ok(ok) => ok,
            Err(e) => {
                error!("Cannot navigate to module: {}", e);
                false
            }
        }
    }

    async fn sign_in(&mut self, credentials: &Credentials) -> Result<bool, ConfigError> {
        if self.base_url.is_empty() {
            return Err(ConfigError::MissingUrl);
        }
        let none = Substitutions::new();
        let username_field = self.registry.resolve(names::USERNAME_FIELD, &none)?;
        let password_field = self.registry.resolve(names::PASSWORD_FIELD, &none)?;
        let login_button = self.registry.resolve(names::LOGIN_BUTTON, &none)?;

        let who = credentials.username.clone();
        self.session.set_phase(Phase::Authenticating, &who);
        self.session.set_authenticated(false);

        let base_url = self.base_url.clone();
        let driver = self.session.driver_mut();
        if !driver.navigate(&base_url).await {
            error!("Failed to open login page {}", base_url);
            return Ok(false);
        }
        settle(self.settle.page_load).await;

        let driver = self.session.driver_mut();
        if !driver
            .type_text(&username_field, &credentials.username, true)
            .await
        {
            error!("Failed to enter username");
            return Ok(false);
        }
        if !driver
            .type_text(&password_field, credentials.password(), true)
            .await
        {
            error!("Failed to enter password");
            return Ok(false);
        }
        if !driver.click(&login_button, self.settle.after_login).await {
            error!("Failed to click login button");
            return Ok(false);
        }

        let Some(current) = driver.current_url().await else {
            error!("Login state unknown: current URL unavailable");
            return Ok(false);
        };
        if url_has_fragment(&current, &self.login_fragment) {
            error!("Login failed: still on login page ({})", current);
            self.session.set_page(PageHint::Login);
            return Ok(false);
        }

        self.session.set_authenticated(true);
        self.session.set_page(PageHint::Unknown);
        info!("Login successful as {}", who);
        Ok(true)
    }

    async fn open_module(&mut self) -> Result<bool, ConfigError> {
        let none = Substitutions::new();
        let module = self.registry.resolve(names::CRM_MODULE, &none)?;
        let listing = if self.registry.has_locator(names::LISTING) {
            Some(self.registry.resolve(names::LISTING, &none)?)
        } else {
            None
        };

        self.session.set_phase(Phase::Navigating, "-");
        let wait = self.settle.after_navigation;
        if !self.session.driver_mut().click(&module, wait).await {
            error!("Failed to open CRM module");
            return Ok(false);
        }
        self.session.set_page(PageHint::Module);

        if let Some(listing) = listing {
            if !self.session.driver_mut().click(&listing, wait).await {
                error!("Failed to open record listing");
                return Ok(false);
            }
        }
        self.session.set_page(PageHint::Listing);
        info!("Navigated to CRM module");
        Ok(true)
    }

    // ============================================================
    // Per-record protocol
    // ============================================================

    /// Apply one record. Never fails; the outcome says what happened.
    pub async fn process_record(
        &mut self,
        record: &Record,
        credentials: Option<&Credentials>,
    ) -> RecordOutcome {
        let key = self.rules.search_key(&record.identifier);

        if !self.session.is_started() {
            error!("Cannot update record {}: browser not started", key);
            return RecordOutcome::NotStarted;
        }
        if !record.has_updates() {
            warn!("No updates for record {}", key);
            self.session.set_phase(Phase::Failed, &key);
            return RecordOutcome::NoUpdates;
        }

        let subs = self.rules.substitutions(&record.identifier);
        let targets = match self.targets(&subs) {
            Ok(targets) => targets,
            Err(e) => {
                error!("Cannot update record {}: {}", key, e);
                self.session.set_phase(Phase::Failed, &key);
                return RecordOutcome::Config(e.to_string());
            }
        };

        let attempts = self.retry.attempts();
        for attempt in 1..=attempts {
            if attempt > 1 {
                self.session.set_phase(Phase::Retrying { attempt }, &key);
                info!("Retrying record {} (attempt {}/{})", key, attempt, attempts);
                settle(self.retry.delay).await;
                if let Some(credentials) = credentials {
                    self.recover_session(credentials).await;
                }
            }

            match self
                .attempt(record, &key, &subs, &targets, credentials)
                .await
            {
                Ok(()) => {
                    self.session.set_phase(Phase::Done, &key);
                    info!("Successfully updated record {}", key);
                    return RecordOutcome::Updated;
                }
                Err(Halt::Stop(outcome)) => {
                    self.session.set_phase(Phase::Failed, &key);
                    warn!("Record {} failed: {}", key, outcome);
                    return outcome;
                }
                Err(Halt::Retry(fault)) => {
                    warn!(
                        "Attempt {}/{} for record {} failed: {}",
                        attempt, attempts, key, fault
                    );
                }
            }
        }

        self.session.set_phase(Phase::Failed, &key);
        error!("Failed to update record {} after {} attempts", key, attempts);
        RecordOutcome::RetriesExhausted
    }

    pub async fn update_record(
        &mut self,
        record: &Record,
        credentials: Option<&Credentials>,
    ) -> bool {
        self.process_record(record, credentials).await.is_success()
    }

    /// Authenticate and open the module once (when credentials are given),
    /// then process every record in order. One record's failure never stops
    /// the batch; the abort handle does, between records.
    pub async fn update_many<I>(
        &mut self,
        records: I,
        credentials: Option<&Credentials>,
    ) -> Result<RunSummary, AutomationError>
    where
        I: IntoIterator<Item = Record>,
    {
        if !self.session.is_started() {
            return Err(AutomationError::Fatal("browser session not started".into()));
        }

        if let Some(credentials) = credentials {
            if !self.sign_in(credentials).await? {
                return Err(AutomationError::LoginFailed);
            }
            if !self.open_module().await? {
                return Err(AutomationError::NavigationFailed);
            }
        }

        let mut summary = RunSummary::new();
        for record in records {
            if self.abort.is_aborted() {
                warn!("Batch aborted after {} records", summary.total());
                break;
            }

            let key = self.rules.search_key(&record.identifier);
            if key.is_empty() {
                warn!("Skipping record without identifier");
                continue;
            }
            if summary.get(&key).is_some() {
                warn!("Duplicate record {} skipped", key);
                continue;
            }

            let outcome = self.process_record(&record, credentials).await;
            summary.insert(OperationResult::new(key, outcome.is_success()));
        }

        info!(
            "Batch finished: {} succeeded, {} failed",
            summary.succeeded(),
            summary.failed()
        );
        Ok(summary)
    }

    fn targets(&self, subs: &Substitutions) -> Result<Targets, ConfigError> {
        let close_button = if self.registry.has_locator(names::CLOSE_BUTTON) {
            Some(self.registry.resolve(names::CLOSE_BUTTON, subs)?)
        } else {
            None
        };
        Ok(Targets {
            search_field: self.registry.resolve(names::SEARCH_FIELD, subs)?,
            search_button: self.registry.resolve(names::SEARCH_BUTTON, subs)?,
            row: self.registry.resolve(names::RECORD_ROW, subs)?,
            edit_button: self.registry.resolve(names::EDIT_BUTTON, subs)?,
            save_button: self.registry.resolve(names::SAVE_BUTTON, subs)?,
            close_button,
        })
    }

    async fn recover_session(&mut self, credentials: &Credentials) {
        self.session.set_authenticated(false);
        match self.sign_in(credentials).await {
            Ok(true) => {}
            Ok(false) => warn!("Re-authentication failed"),
            Err(e) => warn!("Cannot re-authenticate: {}", e),
        }
    }

    async fn checkpoint(&mut self, step: &str, key: &str) {
        let checkpoint = Checkpoint::new(step, key);
        self.observer
            .on_checkpoint(self.session.driver_mut(), &checkpoint)
            .await;
    }

    /// A failed step with a pending session fault is transient; without one
    /// it is terminal for the record.
    fn check(&mut self, ok: bool, otherwise: RecordOutcome) -> Result<(), Halt> {
        if ok {
            return Ok(());
        }
        match self.session.driver_mut().take_fault() {
            Some(fault) => Err(Halt::Retry(fault)),
            None => Err(Halt::Stop(otherwise)),
        }
    }

    fn transient(&mut self, what: &str) -> Halt {
        Halt::Retry(
            self.session
                .driver_mut()
                .take_fault()
                .unwrap_or_else(|| BackendError::Navigation(what.to_string())),
        )
    }

    async fn attempt(
        &mut self,
        record: &Record,
        key: &str,
        subs: &Substitutions,
        targets: &Targets,
        credentials: Option<&Credentials>,
    ) -> Result<(), Halt> {
        if let Some(stale) = self.session.driver_mut().take_fault() {
            debug!("Discarding earlier fault: {}", stale);
        }

        self.ensure_listing(key, credentials).await?;
        self.search(key, targets).await?;
        self.open_for_edit(key, targets).await?;
        self.update_fields(record, key, subs).await?;
        self.save(key, targets).await
    }

    async fn ensure_listing(
        &mut self,
        key: &str,
        credentials: Option<&Credentials>,
    ) -> Result<(), Halt> {
        self.session.set_phase(Phase::Navigating, key);

        let Some(current) = self.session.driver_mut().current_url().await else {
            return Err(self.transient("current URL unavailable"));
        };
        if url_has_fragment(&current, &self.listing_fragment) {
            self.session.set_page(PageHint::Listing);
            return Ok(());
        }

        debug!("Not on listing page ({}), navigating to module", current);
        if self.open_module().await? {
            return Ok(());
        }

        if self.base_url.is_empty() {
            return Err(ConfigError::MissingUrl.into());
        }
        warn!("Module navigation failed, reloading {}", self.base_url);
        if let Some(fault) = self.session.driver_mut().take_fault() {
            debug!("Superseded by reload: {}", fault);
        }
        let base_url = self.base_url.clone();
        if !self.session.driver_mut().navigate(&base_url).await {
            return Err(self.transient("cannot reach base URL"));
        }
        if let Some(credentials) = credentials
            && !self.sign_in(credentials).await?
        {
            return Err(self.transient("re-authentication failed"));
        }
        if !self.open_module().await? {
            return Err(self.transient("cannot reach listing page"));
        }
        Ok(())
    }

    async fn search(&mut self, key: &str, targets: &Targets) -> Result<(), Halt> {
        self.session.set_phase(Phase::Searching, key);
        self.checkpoint(steps::BEFORE_SEARCH, key).await;

        let typed = self
            .session
            .driver_mut()
            .type_text(&targets.search_field, key, true)
            .await;
        self.check(typed, RecordOutcome::SearchUnavailable)?;

        let wait = self.settle.after_search;
        let clicked = self
            .session
            .driver_mut()
            .click(&targets.search_button, wait)
            .await;
        self.check(clicked, RecordOutcome::SearchUnavailable)?;
        self.checkpoint(steps::AFTER_SEARCH, key).await;

        let timeout = self.search_timeout;
        let found = self
            .session
            .driver_mut()
            .wait_for(&targets.row, Some(timeout))
            .await;
        if let Some(found) = found {
            debug!("Record {} listed after {:?}", key, found.waited);
            return Ok(());
        }
        if let Some(fault) = self.session.driver_mut().take_fault() {
            return Err(Halt::Retry(fault));
        }
        self.checkpoint(steps::SEARCH_NOT_FOUND, key).await;
        warn!("Record {} not found in search results", key);
        Err(Halt::Stop(RecordOutcome::NotFound))
    }

    async fn open_for_edit(&mut self, key: &str, targets: &Targets) -> Result<(), Halt> {
        self.session.set_phase(Phase::Editing, key);
        self.checkpoint(steps::BEFORE_OPEN_RECORD, key).await;

        let wait = self.settle.after_row_open;
        let opened = self.session.driver_mut().click(&targets.row, wait).await;
        self.check(opened, RecordOutcome::EditUnavailable)?;
        self.session.set_page(PageHint::Record);
        self.checkpoint(steps::AFTER_OPEN_RECORD, key).await;

        let wait = self.settle.after_edit_open;
        let editing = self
            .session
            .driver_mut()
            .click(&targets.edit_button, wait)
            .await;
        if !editing {
            if let Some(fault) = self.session.driver_mut().take_fault() {
                return Err(Halt::Retry(fault));
            }
            self.checkpoint(steps::EDIT_CONTROL_MISSING, key).await;
            return Err(Halt::Stop(RecordOutcome::EditUnavailable));
        }
        self.session.set_page(PageHint::EditForm);
        self.checkpoint(steps::AFTER_OPEN_EDIT, key).await;
        Ok(())
    }

    async fn update_fields(
        &mut self,
        record: &Record,
        key: &str,
        subs: &Substitutions,
    ) -> Result<(), Halt> {
        for (field, value) in record.updates() {
            self.session.set_phase(
                Phase::Updating {
                    field: field.to_string(),
                },
                key,
            );

            let locator = match self
                .registry
                .field(field)
                .and_then(|mapping| mapping.locator.render(subs).map_err(ConfigError::from))
            {
                Ok(locator) => locator,
                Err(e) => {
                    error!("Cannot update field {} of record {}: {}", field, key, e);
                    return Err(Halt::Stop(RecordOutcome::FieldFailed(field.to_string())));
                }
            };

            self.checkpoint(&steps::before_update(field), key).await;
            let typed = self
                .session
                .driver_mut()
                .type_text(&locator, value, true)
                .await;
            self.check(typed, RecordOutcome::FieldFailed(field.to_string()))?;
            debug!("Updated {} of record {}", field, key);
            self.checkpoint(&steps::after_update(field), key).await;
        }
        Ok(())
    }

    async fn save(&mut self, key: &str, targets: &Targets) -> Result<(), Halt> {
        self.session.set_phase(Phase::Saving, key);
        settle(self.settle.before_save).await;
        self.checkpoint(steps::BEFORE_SAVE, key).await;

        let wait = self.settle.after_save;
        let saved = self
            .session
            .driver_mut()
            .click(&targets.save_button, wait)
            .await;
        self.check(saved, RecordOutcome::SaveFailed)?;
        self.checkpoint(steps::AFTER_SAVE, key).await;

        if let Some(close) = &targets.close_button {
            let wait = self.settle.after_navigation;
            if !self.session.driver_mut().click(close, wait).await {
                debug!("Close control not clickable after saving {}", key);
                let _ = self.session.driver_mut().take_fault();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = Credentials::new("agent", "hunter2");
        let shown = format!("{:?}", creds);
        assert!(shown.contains("agent"));
        assert!(!shown.contains("hunter2"));
        assert_eq!(creds.password(), "hunter2");
    }

    #[test]
    fn test_abort_handle_is_shared() {
        let handle = AbortHandle::new();
        let clone = handle.clone();
        assert!(!handle.is_aborted());
        clone.abort();
        assert!(handle.is_aborted());
    }

    #[test]
    fn test_only_updated_is_success() {
        assert!(RecordOutcome::Updated.is_success());
        assert!(!RecordOutcome::NoUpdates.is_success());
        assert!(!RecordOutcome::FieldFailed("supplier".into()).is_success());
    }

    #[test]
    fn test_url_fragments_ignore_case() {
        assert!(url_has_fragment("https://crm.example.com/Login?next=/", "login"));
        assert!(url_has_fragment("https://crm.example.com/booking-list", "Booking-List"));
        assert!(!url_has_fragment("https://crm.example.com/dashboard", "login"));
        assert!(!url_has_fragment("https://crm.example.com/dashboard", ""));
    }
}
