use crate::driver::RemoteDriver;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A named point in the per-record flow where diagnostics may be captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub step: String,
    pub record: String,
}

impl Checkpoint {
    pub fn new(step: impl Into<String>, record: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            record: record.into(),
        }
    }
}

pub mod steps {
    pub const BEFORE_SEARCH: &str = "before_search";
    pub const AFTER_SEARCH: &str = "after_search";
    pub const SEARCH_NOT_FOUND: &str = "search_not_found";
    pub const BEFORE_OPEN_RECORD: &str = "before_open_record";
    pub const AFTER_OPEN_RECORD: &str = "after_open_record";
    pub const EDIT_CONTROL_MISSING: &str = "edit_control_missing";
    pub const AFTER_OPEN_EDIT: &str = "after_open_edit";
    pub const BEFORE_SAVE: &str = "before_save";
    pub const AFTER_SAVE: &str = "after_save";

    pub fn before_update(field: &str) -> String {
        format!("before_update_{}", field)
    }

    pub fn after_update(field: &str) -> String {
        format!("after_update_{}", field)
    }
}

/// Sees every checkpoint. Implementations must not influence control flow;
/// whatever they do is best effort.
#[async_trait]
pub trait CheckpointObserver: Send + Sync {
    async fn on_checkpoint(&self, driver: &mut RemoteDriver, checkpoint: &Checkpoint);
}

pub struct NoopObserver;

#[async_trait]
impl CheckpointObserver for NoopObserver {
    async fn on_checkpoint(&self, _driver: &mut RemoteDriver, _checkpoint: &Checkpoint) {}
}

/// Writes `<dir>/<step>_<record>_<unix-ms>.png` at every checkpoint.
/// Millisecond stamps keep a retried attempt from overwriting the last one.
pub struct ScreenshotObserver {
    dir: PathBuf,
}

impl ScreenshotObserver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, checkpoint: &Checkpoint) -> PathBuf {
        let ts = chrono::Utc::now().timestamp_millis();
        self.dir.join(format!(
            "{}_{}_{}.png",
            sanitize(&checkpoint.step),
            sanitize(&checkpoint.record),
            ts
        ))
    }
}

#[async_trait]
impl CheckpointObserver for ScreenshotObserver {
    async fn on_checkpoint(&self, driver: &mut RemoteDriver, checkpoint: &Checkpoint) {
        let path = self.path_for(checkpoint);
        if !driver.screenshot(&path).await {
            debug!("No screenshot for checkpoint {}", checkpoint.step);
        }
    }
}

fn sanitize(part: &str) -> String {
    let cleaned: String = part
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}
