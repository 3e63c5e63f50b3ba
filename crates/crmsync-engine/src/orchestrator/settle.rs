use crate::config::schema::AutomationConfig;
use std::time::Duration;

/// Fixed delays between UI steps. The CRM renders asynchronously after
/// navigation and clicks, so each step waits a configured amount before the
/// next one looks for elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlePolicy {
    pub page_load: Duration,
    pub after_login: Duration,
    pub after_navigation: Duration,
    pub after_search: Duration,
    pub after_row_open: Duration,
    pub after_edit_open: Duration,
    pub before_save: Duration,
    pub after_save: Duration,
}

impl SettlePolicy {
    /// No delays at all; what tests should use.
    pub fn immediate() -> Self {
        Self {
            page_load: Duration::ZERO,
            after_login: Duration::ZERO,
            after_navigation: Duration::ZERO,
            after_search: Duration::ZERO,
            after_row_open: Duration::ZERO,
            after_edit_open: Duration::ZERO,
            before_save: Duration::ZERO,
            after_save: Duration::ZERO,
        }
    }

    pub fn from_config(config: &AutomationConfig) -> Self {
        let s = &config.settle;
        Self {
            page_load: Duration::from_millis(s.page_load_ms),
            after_login: Duration::from_millis(s.after_login_ms),
            after_navigation: Duration::from_millis(s.after_navigation_ms),
            after_search: Duration::from_millis(s.after_search_ms),
            after_row_open: Duration::from_millis(s.after_row_open_ms),
            after_edit_open: Duration::from_millis(s.after_edit_open_ms),
            before_save: Duration::from_millis(s.before_save_ms),
            after_save: Duration::from_millis(s.after_save_ms),
        }
    }
}

impl Default for SettlePolicy {
    fn default() -> Self {
        Self::from_config(&AutomationConfig::default())
    }
}

pub async fn settle(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

/// Attempt budget per record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first one included. Zero is treated as one.
    pub max_attempts: usize,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    pub fn from_config(config: &AutomationConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.retry_delay_ms),
        )
    }

    pub(crate) fn attempts(&self) -> usize {
        self.max_attempts.max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&AutomationConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_config() {
        let policy = SettlePolicy::default();
        assert_eq!(policy.after_login, Duration::from_secs(5));
        assert_eq!(policy.before_save, Duration::from_secs(1));

        let retry = RetryPolicy::default();
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.delay, Duration::from_secs(5));
    }

    #[test]
    fn test_zero_attempts_still_runs_once() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).attempts(), 1);
    }
}
