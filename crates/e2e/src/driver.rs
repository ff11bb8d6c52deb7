//! Browser driver boundary
//!
//! The workflow only talks to a browser through [`BrowserDriver`]. Every
//! command is expected to wait, up to the session's element timeout, for its
//! target to become available before failing with
//! [`E2eError::ElementNotFound`](crate::error::E2eError::ElementNotFound).

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::DriverConfig;
use crate::error::E2eResult;

/// Opaque identifier of one browser window or tab
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowHandle(String);

impl WindowHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a clickable element is located
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// Any element matching a CSS selector
    Css(String),

    /// A button identified by id, name, value or visible text
    Button(String),

    /// A list item inside a menu whose text contains `text` (case-insensitive)
    MenuItem { menu: String, text: String },
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(css) => write!(f, "css '{}'", css),
            Locator::Button(name) => write!(f, "button '{}'", name),
            Locator::MenuItem { menu, text } => write!(f, "'{}' item in '{}'", text, menu),
        }
    }
}

/// Commands the harness needs from a browser session
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Load `url` in the focused window
    async fn navigate(&self, url: &str) -> E2eResult<()>;

    /// Replace the contents of a text field located by id, name or label
    async fn fill_field(&self, field: &str, text: &str) -> E2eResult<()>;

    /// Tick the checkbox whose label contains `label`
    async fn check(&self, label: &str) -> E2eResult<()>;

    /// Clear the checkbox whose label contains `label`
    async fn uncheck(&self, label: &str) -> E2eResult<()>;

    async fn click(&self, target: &Locator) -> E2eResult<()>;

    /// Run `script` as a function body in the focused window; `args` are
    /// available to it as `arguments[i]`
    async fn evaluate_script(
        &self,
        script: &str,
        args: Vec<serde_json::Value>,
    ) -> E2eResult<serde_json::Value>;

    /// Open windows in the order the backend enumerates them
    async fn window_handles(&self) -> E2eResult<Vec<WindowHandle>>;

    async fn current_window(&self) -> E2eResult<WindowHandle>;

    async fn switch_to_window(&self, handle: &WindowHandle) -> E2eResult<()>;

    /// Whether the visible text of the focused page contains `text`
    async fn page_contains(&self, text: &str) -> E2eResult<bool>;

    /// Whether at least one element matches `css` right now
    async fn has_element(&self, css: &str) -> E2eResult<bool>;

    /// Diagnostic capture of the focused window
    async fn screenshot(&self, path: &Path) -> E2eResult<()>;

    /// End the session and close all of its windows. Safe to call twice.
    async fn quit(&self) -> E2eResult<()>;
}

/// Creates one isolated browser session per call
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn connect(&self, config: &DriverConfig) -> E2eResult<Box<dyn BrowserDriver>>;
}
