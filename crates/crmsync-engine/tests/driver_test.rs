mod common;

use common::*;
use crmsync_engine::backend::BackendError;
use crmsync_engine::driver::{DriverTimeouts, RemoteDriver};
use crmsync_engine::locator::{Locator, Substitutions};
use std::time::Duration;

#[tokio::test]
async fn test_start_falls_back_to_next_strategy() {
    let broken = Page::new();
    broken.state().launch_fails = true;
    let working = Page::new();

    let mut driver = RemoteDriver::new(Box::new(ScriptedBackend::named("primary", &broken)))
        .with_fallback(Box::new(ScriptedBackend::named("fallback", &working)));

    assert!(driver.start(true).await);
    assert_eq!(driver.backend_name(), Some("fallback"));
    assert_eq!(broken.state().closes, 1);
    assert_eq!(working.state().launches, 1);
    driver.close().await;
}

#[tokio::test]
async fn test_start_fails_when_every_strategy_fails() {
    let page = Page::new();
    page.state().launch_fails = true;
    let mut driver = driver(&page);

    assert!(!driver.start(true).await);
    assert!(!driver.is_started());
    // closing a driver that never started is harmless
    driver.close().await;
    driver.close().await;
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let page = Page::new();
    let mut driver = driver(&page);
    assert!(driver.start(false).await);

    driver.close().await;
    driver.close().await;
    assert_eq!(page.state().closes, 1);
    assert!(!driver.navigate(BASE_URL).await);
}

#[tokio::test]
async fn test_operations_before_start_return_sentinels() {
    let page = Page::new();
    let mut driver = driver(&page);
    let locator = Locator::id("search").unwrap();

    assert!(!driver.navigate(BASE_URL).await);
    assert!(driver.current_url().await.is_none());
    assert!(driver.wait_for(&locator, None).await.is_none());
    assert!(!driver.click(&locator, Duration::ZERO).await);
    assert_eq!(driver.read_text(&locator).await, "");
    assert!(driver.take_fault().is_none());
}

#[tokio::test]
async fn test_misses_are_not_faults() {
    let page = Page::new();
    page.state().missing.insert("gone".into());
    let mut driver = driver(&page);
    driver.start(true).await;
    let gone = Locator::id("gone").unwrap();

    assert!(driver.wait_for(&gone, None).await.is_none());
    assert!(!driver.type_text(&gone, "x", true).await);
    assert_eq!(driver.read_text(&gone).await, "");
    assert!(driver.take_fault().is_none());
    driver.close().await;
}

#[tokio::test]
async fn test_session_errors_are_remembered_once() {
    let page = Page::new();
    page.state().url_failures = 1;
    let mut driver = driver(&page);
    driver.start(true).await;

    assert!(driver.current_url().await.is_none());
    assert!(matches!(driver.take_fault(), Some(BackendError::ConnectionLost)));
    assert!(driver.take_fault().is_none());
    assert_eq!(driver.current_url().await.as_deref(), Some(LISTING_URL));
    driver.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_polls_until_visible() {
    let page = Page::new();
    page.state().hidden.insert("late".into());
    let mut driver = RemoteDriver::new(Box::new(ScriptedBackend::new(&page))).with_timeouts(
        DriverTimeouts {
            element_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(100),
        },
    );
    driver.start(true).await;

    let reveal = page.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(450)).await;
        reveal.state().hidden.clear();
    });

    let found = driver
        .wait_for(&Locator::id("late").unwrap(), None)
        .await
        .unwrap();
    assert!(found.waited >= Duration::from_millis(450));
    assert!(found.waited < Duration::from_secs(2));
    driver.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_gives_up_at_timeout() {
    let page = Page::new();
    page.state().hidden.insert("never".into());
    let mut driver = RemoteDriver::new(Box::new(ScriptedBackend::new(&page)))
        .with_timeouts(DriverTimeouts::default());
    driver.start(true).await;

    let started = tokio::time::Instant::now();
    let found = driver
        .wait_for(&Locator::id("never").unwrap(), Some(Duration::from_secs(1)))
        .await;
    assert!(found.is_none());
    assert!(started.elapsed() >= Duration::from_secs(1));
    driver.close().await;
}

#[tokio::test]
async fn test_unrendered_locator_is_refused() {
    let page = Page::new();
    let mut driver = driver(&page);
    driver.start(true).await;
    let template = Locator::xpath(ROW_TEMPLATE).unwrap();

    assert!(!driver.click(&template, Duration::ZERO).await);
    assert!(page.trace().is_empty());

    let rendered = template
        .render(&Substitutions::new().with("row_identifier", "SZ9"))
        .unwrap();
    assert!(driver.click(&rendered, Duration::ZERO).await);
    assert_eq!(page.trace(), vec![format!("click({})", row_for("SZ9"))]);
    driver.close().await;
}

#[tokio::test]
async fn test_screenshot_creates_directories() {
    let page = Page::new();
    let mut driver = driver(&page);
    driver.start(true).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("shot.png");

    assert!(driver.screenshot(&path).await);
    assert!(path.exists());

    page.state().screenshot_fails = true;
    assert!(!driver.screenshot(&dir.path().join("other.png")).await);
    assert!(driver.take_fault().is_none());
    driver.close().await;
}

#[tokio::test]
async fn test_dropping_started_driver_closes_browser() {
    let page = Page::new();
    let mut driver = driver(&page);
    driver.start(true).await;
    drop(driver);

    for _ in 0..10 {
        if page.state().closes == 1 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(page.state().closes, 1);
}
