use super::AutomationError;
use super::phase::{PageHint, Phase};
use crate::backend::LaunchOptions;
use crate::driver::RemoteDriver;
use tracing::debug;

/// One browser session, exclusively owned by an orchestrator for a run.
pub struct Session {
    driver: RemoteDriver,
    page: PageHint,
    authenticated: bool,
    phase: Phase,
}

impl Session {
    /// Start the driver (trying each of its acquisition strategies) and wrap
    /// it. A browser that cannot be started at all is fatal for the run.
    pub async fn acquire(
        mut driver: RemoteDriver,
        options: &LaunchOptions,
    ) -> Result<Self, AutomationError> {
        if !driver.start_with(options).await {
            return Err(AutomationError::Fatal(
                "no browser acquisition strategy succeeded".into(),
            ));
        }
        Ok(Self::attach(driver))
    }

    /// Wrap a driver as is. Operations report `NotStarted` until it is.
    pub fn attach(driver: RemoteDriver) -> Self {
        Self {
            driver,
            page: PageHint::Unknown,
            authenticated: false,
            phase: Phase::Idle,
        }
    }

    /// Close the browser. Safe to call more than once.
    pub async fn release(&mut self) {
        self.driver.close().await;
        self.page = PageHint::Unknown;
        self.authenticated = false;
        self.phase = Phase::Idle;
    }

    pub fn driver(&self) -> &RemoteDriver {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut RemoteDriver {
        &mut self.driver
    }

    pub fn into_driver(self) -> RemoteDriver {
        self.driver
    }

    pub fn is_started(&self) -> bool {
        self.driver.is_started()
    }

    pub fn page(&self) -> PageHint {
        self.page
    }

    pub fn set_page(&mut self, page: PageHint) {
        self.page = page;
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn set_authenticated(&mut self, authenticated: bool) {
        self.authenticated = authenticated;
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn set_phase(&mut self, phase: Phase, record: &str) {
        if self.phase != phase {
            debug!("[{}] {} -> {}", record, self.phase, phase);
            self.phase = phase;
        }
    }
}
