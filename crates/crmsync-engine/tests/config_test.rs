use crmsync_engine::config::{ConfigError, ConfigLoader, CrmSyncConfig};
use crmsync_engine::locator::Strategy;
use crmsync_engine::orchestrator::{RetryPolicy, SettlePolicy};
use crmsync_engine::registry::{LocatorRegistry, names};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

const CRM_YAML: &str = r#"
crm:
  url: https://crm.example.com/login
  listing_url_fragment: booking-list
  locators:
    username_field: { type: NAME, value: username }
    password_field: { type: NAME, value: password }
    login_button: { type: XPATH, value: "//button[@type='submit']" }
    crm_module: { type: XPATH, value: "//span[text()='CRM']" }
    search_field: { type: XPATH, value: "//input[@placeholder='Enter Booking Number']" }
    search_button: { type: CSS_SELECTOR, value: "button.search" }
    record_row: { type: XPATH, value: "//div[contains(text(), 'Booking #: {row_identifier}')]" }
    edit_button: { type: XPATH, value: "//span[contains(text(), 'Add Actual Net')]" }
    save_button: { strategy: xpath, expression: "//span[text()='Save']" }
  fields:
    supplier:
      type: XPATH
      value: "//input[@placeholder='Supplier']"
      field_type: text
identifier:
  strip_prefix: SZ
  row_prefix: SZ
automation:
  max_retries: 5
  settle:
    after_save_ms: 100
browser:
  headless: true
  webdriver_url: http://localhost:9515
"#;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[tokio::test]
async fn test_load_from_file() {
    let file = write_config(CRM_YAML);
    let config = ConfigLoader::load_from(file.path()).await.unwrap();

    assert_eq!(config.crm.url, "https://crm.example.com/login");
    assert_eq!(config.crm.login_url_fragment, "login");
    assert_eq!(
        config.crm.locators[names::SEARCH_BUTTON].strategy(),
        Strategy::Css
    );
    assert_eq!(config.crm.locators[names::SAVE_BUTTON].strategy(), Strategy::XPath);
    assert!(config.browser.headless);
    assert_eq!(config.browser.webdriver_url.as_deref(), Some("http://localhost:9515"));

    let retry = RetryPolicy::from_config(&config.automation);
    assert_eq!(retry.max_attempts, 5);
    let settle = SettlePolicy::from_config(&config.automation);
    assert_eq!(settle.after_save, Duration::from_millis(100));
    assert_eq!(settle.after_login, Duration::from_secs(5));

    let registry = LocatorRegistry::from_config(&config.crm).unwrap();
    assert!(registry.field("supplier").is_ok());
    assert!(!registry.has_locator(names::CLOSE_BUTTON));
}

#[test]
fn test_empty_document_gives_defaults() {
    let config = ConfigLoader::parse("").unwrap();
    assert!(config.crm.url.is_empty());
    assert_eq!(config.automation.max_retries, 3);
    assert_eq!(config.browser.timeout_ms, 15000);
    assert_eq!(config.records.identifier_column, "Booking No");
    assert!(config.diagnostics.screenshots);
    assert_eq!(config.identifier.strip_prefix.as_deref(), Some("SZ"));
}

#[test]
fn test_unknown_strategy_rejected_at_load() {
    let yaml = r##"
crm:
  locators:
    search_field: { type: SHADOW_DOM, value: "#q" }
"##;
    assert!(matches!(ConfigLoader::parse(yaml), Err(ConfigError::Parse(_))));
}

#[test]
fn test_empty_field_expression_rejected() {
    let yaml = r#"
crm:
  fields:
    supplier: { type: ID, value: "  " }
"#;
    assert!(matches!(
        ConfigLoader::parse(yaml),
        Err(ConfigError::FieldLocator { field, .. }) if field == "supplier"
    ));
}

#[test]
fn test_invalid_url_rejected() {
    let yaml = "crm:\n  url: not a url\n";
    assert!(matches!(
        ConfigLoader::parse(yaml),
        Err(ConfigError::InvalidUrl { .. })
    ));
}

#[test]
fn test_empty_listing_fragment_rejected() {
    let yaml = "crm:\n  url: https://crm.example.com/login\n  listing_url_fragment: \"  \"\n";
    assert!(matches!(
        ConfigLoader::parse(yaml),
        Err(ConfigError::EmptyListingFragment)
    ));
}

#[tokio::test]
async fn test_save_and_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("crmsync.yaml");
    let original = ConfigLoader::parse(CRM_YAML).unwrap();

    ConfigLoader::save_to(&path, &original).await.unwrap();
    let reloaded = ConfigLoader::load_from(&path).await.unwrap();

    assert_eq!(reloaded.crm.url, original.crm.url);
    assert_eq!(reloaded.crm.locators, original.crm.locators);
    assert_eq!(reloaded.automation.max_retries, 5);
    assert_eq!(reloaded.records.columns, original.records.columns);
}

#[tokio::test]
async fn test_default_config_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("crmsync.yaml");

    ConfigLoader::save_to(&path, &CrmSyncConfig::default()).await.unwrap();
    let reloaded = ConfigLoader::load_from(&path).await.unwrap();
    assert_eq!(reloaded.browser.window_width, 1920);
    assert_eq!(reloaded.identifier, CrmSyncConfig::default().identifier);
}

#[test]
fn test_example_config_is_valid() {
    let config = ConfigLoader::parse(include_str!("../../../crmsync.example.yaml")).unwrap();
    let registry = LocatorRegistry::from_config(&config.crm).unwrap();
    assert!(registry.has_locator(names::CLOSE_BUTTON));
    assert!(registry.has_locator(names::LISTING));
    assert_eq!(
        registry.field("actual_net_cost").unwrap().locator.strategy(),
        Strategy::Id
    );
    assert_eq!(config.records.columns["supplier"], "Supplier");
}
