use crmsync_engine::backend::{Backend, LaunchOptions};
use crmsync_engine::driver::RemoteDriver;
use crmsync_engine::locator::{Locator, Strategy};
use crmsync_h::backend::HeadlessBackend;
use serial_test::serial;
use std::time::Duration;

const FORM_PAGE: &str = "data:text/html,<a href='#' onclick=\"document.title='linked'\">Add Actual Net</a>\
<input id='supplier' value='old'>\
<button class='save' onclick=\"document.title='saved:'+document.getElementById('supplier').value\">Save</button>\
<div id='hidden' style='display:none'>x</div>";

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::INFO)
        .try_init()
        .ok();
}

fn headless() -> LaunchOptions {
    LaunchOptions {
        headless: true,
        ..LaunchOptions::default()
    }
}

#[tokio::test]
#[serial]
#[ignore] // Requires Chrome/Chromium
async fn test_headless_lifecycle() {
    init_tracing();
    let mut backend = HeadlessBackend::new();
    backend.launch(&headless()).await.expect("Failed to launch");
    assert!(backend.is_ready().await);

    let nav = backend.navigate("https://example.com").await.unwrap();
    assert!(nav.url.contains("example.com"));
    assert_eq!(nav.title, "Example Domain");

    let heading = Locator::new(Strategy::TagName, "h1").unwrap();
    assert!(backend.is_visible(&heading).await.unwrap());
    assert_eq!(backend.read_text(&heading).await.unwrap(), "Example Domain");

    let shot = backend.screenshot().await.unwrap();
    assert!(shot.starts_with(&[0x89, b'P', b'N', b'G']));

    backend.close().await.expect("Failed to close");
    assert!(!backend.is_ready().await);
}

#[tokio::test]
#[serial]
#[ignore] // Requires Chrome/Chromium
async fn test_headless_form_interaction() {
    init_tracing();
    let mut driver = RemoteDriver::new(Box::new(HeadlessBackend::new()));
    assert!(driver.start(true).await);
    assert!(driver.navigate(FORM_PAGE).await);

    let supplier = Locator::id("supplier").unwrap();
    let save = Locator::css(".save").unwrap();
    let link = Locator::new(Strategy::PartialLinkText, "Actual Net").unwrap();
    let hidden = Locator::id("hidden").unwrap();

    assert!(driver.click(&link, Duration::ZERO).await);
    let title = driver.run_script("return document.title;", vec![]).await;
    assert_eq!(title, Some(serde_json::json!("linked")));

    assert!(driver.type_text(&supplier, "Acme", true).await);
    assert!(driver.click(&save, Duration::ZERO).await);
    let title = driver.run_script("return document.title;", vec![]).await;
    assert_eq!(title, Some(serde_json::json!("saved:Acme")));

    assert!(
        driver
            .wait_for(&hidden, Some(Duration::from_millis(500)))
            .await
            .is_none()
    );
    assert!(driver.take_fault().is_none());

    driver.close().await;
}
