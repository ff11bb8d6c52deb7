//! Error types for E2E testing

use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Timeout waiting for {what}: expected {expected}, last observed {last_observed} after {elapsed_ms} ms")]
    Timeout {
        what: String,
        expected: String,
        last_observed: String,
        elapsed_ms: u64,
    },

    #[error("Element not found: {what} ({reason})")]
    ElementNotFound { what: String, reason: String },

    #[error("Result window not resolved: {0}")]
    WindowResolution(String),

    #[error("Assertion failed: {what} - expected {expected}, got {actual}")]
    AssertionFailed {
        what: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid scenario '{name}': {reason}")]
    InvalidScenario { name: String, reason: String },

    #[error("Browser session lost: {0}")]
    SessionLost(String),

    #[error("WebDriver endpoint unavailable at {url}: {reason}")]
    DriverUnavailable { url: String, reason: String },

    #[error("WebDriver error: {0}")]
    WebDriver(String),

    #[error("Server failed to start: {0}")]
    ServerStartup(String),

    #[error("Server health check failed after {0} attempts")]
    ServerHealthCheck(usize),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl E2eError {
    /// Errors that mean the browser itself is gone. These escape the
    /// scenario runner; everything else fails only the current scenario.
    pub fn is_fatal(&self) -> bool {
        matches!(self, E2eError::SessionLost(_) | E2eError::DriverUnavailable { .. })
    }

    /// Classification used when recording a failed scenario
    pub fn kind(&self) -> FailureKind {
        match self {
            E2eError::Timeout { .. } => FailureKind::Timeout,
            E2eError::ElementNotFound { .. } => FailureKind::ElementNotFound,
            E2eError::WindowResolution(_) => FailureKind::WindowResolution,
            E2eError::AssertionFailed { .. } => FailureKind::Assertion,
            E2eError::SessionLost(_)
            | E2eError::DriverUnavailable { .. }
            | E2eError::WebDriver(_) => FailureKind::Driver,
            _ => FailureKind::Other,
        }
    }
}

/// Coarse category of a scenario failure, as written to the results file
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    ElementNotFound,
    WindowResolution,
    Assertion,
    Driver,
    Other,
}

pub type E2eResult<T> = Result<T, E2eError>;
