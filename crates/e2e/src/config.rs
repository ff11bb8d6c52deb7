//! Harness configuration
//!
//! Everything a run needs is carried in one [`HarnessConfig`] value that is
//! passed down explicitly. Each scenario gets its own copy of the
//! [`DriverConfig`], so concurrently running sessions never share settings.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{E2eError, E2eResult};
use crate::server::ServerConfig;

/// Top-level harness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Root URL of the application under test
    pub app_url: String,

    /// Directory holding query FASTA fixtures
    pub fixtures_dir: PathBuf,

    /// Directory of additional YAML scenario catalogs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_dir: Option<PathBuf>,

    /// Output directory for results and screenshots
    pub output_dir: PathBuf,

    /// Number of scenarios run at once, each in its own session
    pub concurrency: usize,

    /// Capture a screenshot of the focused window when a scenario fails
    pub screenshot_on_failure: bool,

    /// Spawn SequenceServer before running (None = use `app_url` as is)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,

    /// Browser session settings
    pub driver: DriverConfig,

    /// Bounded-wait settings for UI state assertions
    pub poll: PollConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            app_url: "http://127.0.0.1:4567".to_string(),
            fixtures_dir: PathBuf::from("crates/e2e/fixtures"),
            catalog_dir: None,
            output_dir: PathBuf::from("test-results"),
            concurrency: 1,
            screenshot_on_failure: true,
            server: None,
            driver: DriverConfig::default(),
            poll: PollConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load(path: &Path) -> E2eResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> E2eResult<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| E2eError::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> E2eResult<()> {
        if self.concurrency == 0 {
            return Err(E2eError::Config("concurrency must be at least 1".into()));
        }
        if self.poll.interval_ms == 0 {
            return Err(E2eError::Config("poll.interval_ms must be positive".into()));
        }
        if !(self.app_url.starts_with("http://") || self.app_url.starts_with("https://")) {
            return Err(E2eError::Config(format!(
                "app_url must be an http(s) URL, got '{}'",
                self.app_url
            )));
        }
        Ok(())
    }

    /// Screenshot directory under the output directory
    pub fn screenshot_dir(&self) -> PathBuf {
        self.output_dir.join("screenshots")
    }
}

/// Browser family driven through WebDriver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    #[default]
    Firefox,
    Chrome,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Firefox => "firefox",
            Browser::Chrome => "chrome",
        }
    }
}

/// Configuration for one browser session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// W3C WebDriver endpoint (geckodriver / chromedriver)
    pub webdriver_url: String,
    pub browser: Browser,
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,

    /// Bound on element lookups performed by driver commands
    pub element_timeout_ms: u64,

    /// Retry interval for element lookups
    pub element_poll_ms: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            webdriver_url: "http://localhost:4444".to_string(),
            browser: Browser::Firefox,
            headless: true,
            window_width: 1280,
            window_height: 1024,
            element_timeout_ms: 10_000,
            element_poll_ms: 100,
        }
    }
}

impl DriverConfig {
    pub fn element_timeout(&self) -> Duration {
        Duration::from_millis(self.element_timeout_ms)
    }

    pub fn element_poll(&self) -> Duration {
        Duration::from_millis(self.element_poll_ms)
    }
}

/// Bounds for the UI state poller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Ceiling for any single asserted state transition
    pub timeout_ms: u64,

    /// Delay between two evaluations of the same predicate
    pub interval_ms: u64,

    /// How long to wait for a result window to appear after submission
    pub window_timeout_ms: u64,

    /// Extra consecutive matching samples required by "stable" expectations
    pub settle_samples: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            interval_ms: 100,
            window_timeout_ms: 5_000,
            settle_samples: 2,
        }
    }
}

impl PollConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn window_timeout(&self) -> Duration {
        Duration::from_millis(self.window_timeout_ms)
    }
}
