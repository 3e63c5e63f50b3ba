use crate::backend::LaunchOptions;
use crate::driver::DriverTimeouts;
use crmsync_common::locator::{Locator, Strategy};
use crmsync_common::record::IdentifierRules;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrmSyncConfig {
    #[serde(default)]
    pub crm: CrmConfig,
    #[serde(default)]
    pub identifier: IdentifierRules,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub automation: AutomationConfig,
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
    #[serde(default)]
    pub records: RecordsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmConfig {
    /// Base URL; also the login page.
    #[serde(default)]
    pub url: String,
    /// URL fragment that identifies the record listing page.
    #[serde(default = "default_listing_url_fragment")]
    pub listing_url_fragment: String,
    /// URL fragment that means we are still on the login page.
    #[serde(default = "default_login_url_fragment")]
    pub login_url_fragment: String,
    /// Named UI controls (search field, save button, ...).
    #[serde(default)]
    pub locators: BTreeMap<String, Locator>,
    /// Record field name -> input locator.
    #[serde(default)]
    pub fields: BTreeMap<String, FieldSpec>,
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            listing_url_fragment: default_listing_url_fragment(),
            login_url_fragment: default_login_url_fragment(),
            locators: BTreeMap::new(),
            fields: BTreeMap::new(),
        }
    }
}

fn default_listing_url_fragment() -> String {
    "booking-list".to_string()
}

fn default_login_url_fragment() -> String {
    "login".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    #[default]
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    #[serde(rename = "type", alias = "strategy")]
    pub strategy: Strategy,
    #[serde(alias = "expression")]
    pub value: String,
    #[serde(default)]
    pub field_type: FieldKind,
}

impl FieldSpec {
    pub fn new(locator: &Locator) -> Self {
        Self {
            strategy: locator.strategy(),
            value: locator.expression().to_string(),
            field_type: FieldKind::Text,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    #[serde(default)]
    pub headless: bool,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_window_width")]
    pub window_width: u32,
    #[serde(default = "default_window_height")]
    pub window_height: u32,
    /// Existing WebDriver server to connect to before trying to spawn one.
    #[serde(default)]
    pub webdriver_url: Option<String>,
    #[serde(default)]
    pub chromedriver_path: Option<PathBuf>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: false,
            timeout_ms: default_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            window_width: default_window_width(),
            window_height: default_window_height(),
            webdriver_url: None,
            chromedriver_path: None,
        }
    }
}

impl BrowserConfig {
    pub fn launch_options(&self) -> LaunchOptions {
        LaunchOptions {
            headless: self.headless,
            window_width: self.window_width,
            window_height: self.window_height,
        }
    }

    pub fn driver_timeouts(&self) -> DriverTimeouts {
        DriverTimeouts {
            element_timeout: Duration::from_millis(self.timeout_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

fn default_timeout_ms() -> u64 {
    15000
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_window_width() -> u32 {
    1920
}

fn default_window_height() -> u32 {
    1080
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationConfig {
    /// Attempts per record, first one included.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Bounded wait for the search result row.
    #[serde(default = "default_search_timeout_ms")]
    pub search_timeout_ms: u64,
    #[serde(default)]
    pub settle: SettleConfig,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            search_timeout_ms: default_search_timeout_ms(),
            settle: SettleConfig::default(),
        }
    }
}

fn default_max_retries() -> usize {
    3
}

fn default_retry_delay_ms() -> u64 {
    5000
}

fn default_search_timeout_ms() -> u64 {
    5000
}

/// Fixed delays that let the asynchronously rendered CRM catch up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettleConfig {
    #[serde(default = "default_page_load_ms")]
    pub page_load_ms: u64,
    #[serde(default = "default_after_login_ms")]
    pub after_login_ms: u64,
    #[serde(default = "default_after_navigation_ms")]
    pub after_navigation_ms: u64,
    #[serde(default = "default_after_search_ms")]
    pub after_search_ms: u64,
    #[serde(default = "default_after_row_open_ms")]
    pub after_row_open_ms: u64,
    #[serde(default = "default_after_edit_open_ms")]
    pub after_edit_open_ms: u64,
    #[serde(default = "default_before_save_ms")]
    pub before_save_ms: u64,
    #[serde(default = "default_after_save_ms")]
    pub after_save_ms: u64,
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            page_load_ms: default_page_load_ms(),
            after_login_ms: default_after_login_ms(),
            after_navigation_ms: default_after_navigation_ms(),
            after_search_ms: default_after_search_ms(),
            after_row_open_ms: default_after_row_open_ms(),
            after_edit_open_ms: default_after_edit_open_ms(),
            before_save_ms: default_before_save_ms(),
            after_save_ms: default_after_save_ms(),
        }
    }
}

fn default_page_load_ms() -> u64 {
    2000
}

fn default_after_login_ms() -> u64 {
    5000
}

fn default_after_navigation_ms() -> u64 {
    3000
}

fn default_after_search_ms() -> u64 {
    3000
}

fn default_after_row_open_ms() -> u64 {
    5000
}

fn default_after_edit_open_ms() -> u64 {
    2000
}

fn default_before_save_ms() -> u64 {
    1000
}

fn default_after_save_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    #[serde(default = "default_screenshots")]
    pub screenshots: bool,
    #[serde(default = "default_screenshot_dir")]
    pub screenshot_dir: PathBuf,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            screenshots: default_screenshots(),
            screenshot_dir: default_screenshot_dir(),
        }
    }
}

fn default_screenshots() -> bool {
    true
}

fn default_screenshot_dir() -> PathBuf {
    PathBuf::from("screenshots")
}

/// Default spreadsheet layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordsConfig {
    #[serde(default = "default_identifier_column")]
    pub identifier_column: String,
    /// Record field name -> column header.
    #[serde(default = "default_columns")]
    pub columns: BTreeMap<String, String>,
}

impl Default for RecordsConfig {
    fn default() -> Self {
        Self {
            identifier_column: default_identifier_column(),
            columns: default_columns(),
        }
    }
}

fn default_identifier_column() -> String {
    "Booking No".to_string()
}

fn default_columns() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("supplier".to_string(), "Supplier".to_string()),
        ("actual_net_cost".to_string(), "Actual Net Cost".to_string()),
    ])
}
