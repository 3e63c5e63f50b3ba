use crmsync_engine::backend::LaunchOptions;
use serde_json::{Map, Value, json};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// chromedriver's own default port
pub const DEFAULT_CHROMEDRIVER_PORT: u16 = 9515;

/// Overrides every other lookup when set
pub const CHROMEDRIVER_ENV: &str = "CRMSYNC_CHROMEDRIVER";

const CHROMEDRIVER_PATHS: &[&str] = &[
    "/usr/bin/chromedriver",
    "/usr/local/bin/chromedriver",
    "/usr/lib/chromium/chromedriver",
    "/usr/lib/chromium-browser/chromedriver",
    "/snap/bin/chromium.chromedriver",
    "/opt/homebrew/bin/chromedriver",
];

pub fn default_chromedriver_url() -> String {
    format!("http://localhost:{}", DEFAULT_CHROMEDRIVER_PORT)
}

/// Locate a chromedriver binary: environment override, then the configured
/// path, then `PATH`, then well-known install locations.
pub fn find_chromedriver_binary(configured: Option<&Path>) -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CHROMEDRIVER_ENV) {
        let path = PathBuf::from(path.trim());
        if path.exists() {
            return Some(path);
        }
        warn!("{} points at missing file {}", CHROMEDRIVER_ENV, path.display());
    }

    if let Some(path) = configured {
        if path.exists() {
            return Some(path.to_path_buf());
        }
        warn!("Configured chromedriver {} does not exist", path.display());
    }

    if let Ok(output) = Command::new("which").arg("chromedriver").output()
        && output.status.success()
        && let Ok(path) = String::from_utf8(output.stdout)
    {
        let path = path.trim();
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    CHROMEDRIVER_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
}

/// A chromedriver server we spawned. Killed on drop.
pub struct ChromeDriverProcess {
    child: Child,
    port: u16,
}

impl ChromeDriverProcess {
    pub fn webdriver_url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }
}

impl Drop for ChromeDriverProcess {
    fn drop(&mut self) {
        info!("Shutting down chromedriver (pid {})...", self.child.id());
        terminate(&mut self.child);
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Ask politely first so chromedriver can take its browsers down with it.
#[cfg(unix)]
fn terminate(child: &mut Child) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Ok(pid) = i32::try_from(child.id()) else {
        return;
    };
    if kill(Pid::from_raw(pid), Signal::SIGTERM).is_err() {
        return;
    }
    for _ in 0..10 {
        match child.try_wait() {
            Ok(Some(_)) => return,
            Ok(None) => std::thread::sleep(Duration::from_millis(50)),
            Err(_) => return,
        }
    }
}

#[cfg(not(unix))]
fn terminate(_child: &mut Child) {}

/// Spawn chromedriver on `port` and wait for its `/status` endpoint.
pub async fn launch_chromedriver(binary: &Path, port: u16) -> Result<ChromeDriverProcess, String> {
    info!("Launching chromedriver from: {}", binary.display());

    let child = Command::new(binary)
        .arg(format!("--port={}", port))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| format!("Failed to launch chromedriver: {}", e))?;

    info!("chromedriver launched with PID: {}", child.id());
    // From here on the process is reaped by Drop if we bail out.
    let process = ChromeDriverProcess { child, port };

    let url = format!("http://localhost:{}/status", port);
    let client = reqwest::Client::new();

    for attempt in 1..=30 {
        sleep(Duration::from_millis(200)).await;

        match client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                info!("chromedriver ready after {} attempts", attempt);
                return Ok(process);
            }
            Ok(_) => {
                warn!(
                    "chromedriver responded but not ready yet (attempt {})",
                    attempt
                );
            }
            Err(_) => {
                if attempt % 5 == 0 {
                    info!("Waiting for chromedriver... (attempt {})", attempt);
                }
            }
        }
    }

    Err("chromedriver did not become ready within timeout".to_string())
}

/// Capabilities for a Chrome session through chromedriver.
pub fn chrome_capabilities(options: &LaunchOptions) -> Map<String, Value> {
    let mut args = vec![
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        format!(
            "--window-size={},{}",
            options.window_width, options.window_height
        ),
    ];
    if options.headless {
        args.push("--headless=new".to_string());
        args.push("--disable-gpu".to_string());
    }

    let mut chrome_options = Map::new();
    chrome_options.insert("args".into(), json!(args));
    if let Ok(binary) = std::env::var("CHROME_BIN") {
        chrome_options.insert("binary".into(), json!(binary));
    }

    let mut caps = Map::new();
    caps.insert("browserName".into(), json!("chrome"));
    caps.insert("goog:chromeOptions".into(), Value::Object(chrome_options));
    caps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_url() {
        assert_eq!(default_chromedriver_url(), "http://localhost:9515");
    }

    #[test]
    fn test_headless_capabilities() {
        let caps = chrome_capabilities(&LaunchOptions {
            headless: true,
            window_width: 1280,
            window_height: 800,
        });
        let args = caps["goog:chromeOptions"]["args"].as_array().unwrap();
        assert!(args.contains(&json!("--headless=new")));
        assert!(args.contains(&json!("--window-size=1280,800")));
        assert_eq!(caps["browserName"], json!("chrome"));
    }

    #[test]
    fn test_visible_capabilities() {
        let caps = chrome_capabilities(&LaunchOptions::default());
        let args = caps["goog:chromeOptions"]["args"].as_array().unwrap();
        assert!(!args.contains(&json!("--headless=new")));
        assert!(args.contains(&json!("--window-size=1920,1080")));
    }

    #[test]
    fn test_configured_binary_is_used() {
        let file = tempfile::NamedTempFile::new().unwrap();
        // only meaningful without an environment override
        if std::env::var(CHROMEDRIVER_ENV).is_err() {
            assert_eq!(
                find_chromedriver_binary(Some(file.path())),
                Some(file.path().to_path_buf())
            );
        }
    }

    #[test]
    fn test_find_binary_does_not_panic() {
        let _ = find_chromedriver_binary(None);
        let _ = find_chromedriver_binary(Some(Path::new("/nonexistent/chromedriver")));
    }
}
