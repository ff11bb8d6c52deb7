//! Bounded polling of asynchronous UI state
//!
//! The search form updates its controls after each edit, so a single check
//! right after an action is racy. [`poll_until`] turns that into a
//! deterministic pass/fail: retry on a fixed interval until the value matches
//! or the timeout elapses, and report the last thing seen.

use std::future::Future;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::PollConfig;
use crate::driver::{BrowserDriver, WindowHandle};
use crate::error::{E2eError, E2eResult};

/// Timing of one polling loop
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub timeout: Duration,
    pub interval: Duration,

    /// Further consecutive matching samples required after the first match
    pub settle: u32,
}

impl PollSettings {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self {
            timeout,
            interval,
            settle: 0,
        }
    }

    pub fn with_settle(mut self, settle: u32) -> Self {
        self.settle = settle;
        self
    }
}

/// What the last sample of a polling loop looked like
#[derive(Debug, Clone, PartialEq)]
pub enum Observation<T> {
    Value(T),
    Error(String),
}

impl<T: std::fmt::Debug> Observation<T> {
    pub fn describe(&self) -> String {
        match self {
            Observation::Value(v) => format!("{:?}", v),
            Observation::Error(e) => format!("error: {}", e),
        }
    }
}

/// Outcome of [`poll_until`]
#[derive(Debug, Clone, PartialEq)]
pub enum Polled<T> {
    Matched { value: T, elapsed: Duration },
    TimedOut { last: Observation<T>, elapsed: Duration },
}

/// Evaluate `probe` until `matches` accepts its value or `settings.timeout`
/// elapses.
///
/// The probe runs at least once. Fatal probe errors are returned
/// immediately; any other error counts as a non-matching sample.
pub async fn poll_until<T, F, Fut, M>(
    mut probe: F,
    mut matches: M,
    settings: PollSettings,
) -> E2eResult<Polled<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = E2eResult<T>>,
    M: FnMut(&T) -> bool,
{
    let start = Instant::now();
    let mut streak: u32 = 0;

    loop {
        let last = match probe().await {
            Ok(value) => {
                if matches(&value) {
                    if streak >= settings.settle {
                        return Ok(Polled::Matched {
                            value,
                            elapsed: start.elapsed(),
                        });
                    }
                    streak += 1;
                } else {
                    streak = 0;
                }
                Observation::Value(value)
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                streak = 0;
                Observation::Error(e.to_string())
            }
        };

        let elapsed = start.elapsed();
        if elapsed >= settings.timeout {
            return Ok(Polled::TimedOut { last, elapsed });
        }
        tokio::time::sleep(settings.interval.min(settings.timeout - elapsed)).await;
    }
}

/// Which property of the selected elements a [`UiState`] reads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "class", rename_all = "snake_case")]
pub enum UiQuery {
    /// Element matches `:disabled`
    Disabled,
    /// Element carries a CSS class
    HasClass(String),
    /// At least one element matches the selector (scope ignored)
    Exists,
    /// Number of matching elements (scope ignored)
    Count,
}

/// How per-element results are folded into one value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Only the first match counts; false when nothing matches
    #[default]
    First,
    /// True if any match satisfies the query
    Any,
    /// True if every match satisfies the query; false when nothing matches
    All,
}

/// A named observable property of the live DOM
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiState {
    #[serde(default)]
    pub name: String,
    pub selector: String,
    pub query: UiQuery,
    #[serde(default)]
    pub scope: Scope,
}

/// Evaluates one [`UiState`]. Arguments: selector, query kind, class, scope.
pub const UI_STATE_SCRIPT: &str = r#"
var els = Array.prototype.slice.call(document.querySelectorAll(arguments[0]));
var kind = arguments[1], cls = arguments[2], scope = arguments[3];
if (kind === 'exists') { return els.length > 0; }
if (kind === 'count') { return els.length; }
var test = function (el) {
  if (kind === 'disabled') { return el.matches(':disabled'); }
  return el.classList.contains(cls);
};
if (els.length === 0) { return false; }
if (scope === 'first') { return test(els[0]); }
if (scope === 'any') { return els.some(test); }
return els.every(test);
"#;

impl UiState {
    pub fn new(selector: impl Into<String>, query: UiQuery, scope: Scope) -> Self {
        let selector = selector.into();
        let name = match &query {
            UiQuery::Disabled => format!("{} disabled", selector),
            UiQuery::HasClass(class) => format!("{} has class '{}'", selector, class),
            UiQuery::Exists => format!("{} exists", selector),
            UiQuery::Count => format!("{} count", selector),
        };
        Self {
            name,
            selector,
            query,
            scope,
        }
    }

    pub fn disabled(selector: impl Into<String>) -> Self {
        Self::new(selector, UiQuery::Disabled, Scope::First)
    }

    pub fn has_class(selector: impl Into<String>, class: impl Into<String>) -> Self {
        Self::new(selector, UiQuery::HasClass(class.into()), Scope::First)
    }

    pub fn exists(selector: impl Into<String>) -> Self {
        Self::new(selector, UiQuery::Exists, Scope::First)
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Label used in logs and failures
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.selector
        } else {
            &self.name
        }
    }

    /// Script arguments matching [`UI_STATE_SCRIPT`]
    pub fn script_args(&self) -> Vec<Value> {
        let (kind, class) = match &self.query {
            UiQuery::Disabled => ("disabled", Value::Null),
            UiQuery::HasClass(class) => ("class", Value::String(class.clone())),
            UiQuery::Exists => ("exists", Value::Null),
            UiQuery::Count => ("count", Value::Null),
        };
        let scope = match self.scope {
            Scope::First => "first",
            Scope::Any => "any",
            Scope::All => "all",
        };
        vec![
            Value::String(self.selector.clone()),
            Value::String(kind.to_string()),
            class,
            Value::String(scope.to_string()),
        ]
    }

    /// Read the current value from the page
    pub async fn read(&self, driver: &dyn BrowserDriver) -> E2eResult<Value> {
        driver
            .evaluate_script(UI_STATE_SCRIPT, self.script_args())
            .await
    }
}

/// Assertion helpers bound to one [`PollConfig`]
#[derive(Debug, Clone)]
pub struct Poller {
    config: PollConfig,
}

impl Poller {
    pub fn new(config: PollConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    pub fn settings(&self) -> PollSettings {
        PollSettings::new(self.config.timeout(), self.config.interval())
    }

    /// Wait until `state` reads as `expected`; return the matching value
    pub async fn await_state(
        &self,
        driver: &dyn BrowserDriver,
        state: &UiState,
        expected: &Value,
    ) -> E2eResult<Value> {
        self.await_state_with(driver, state, expected, self.settings())
            .await
    }

    /// Like [`Poller::await_state`], additionally requiring the value to
    /// hold for the configured number of settle samples
    pub async fn await_stable_state(
        &self,
        driver: &dyn BrowserDriver,
        state: &UiState,
        expected: &Value,
    ) -> E2eResult<Value> {
        let settings = self.settings().with_settle(self.config.settle_samples);
        self.await_state_with(driver, state, expected, settings)
            .await
    }

    async fn await_state_with(
        &self,
        driver: &dyn BrowserDriver,
        state: &UiState,
        expected: &Value,
        settings: PollSettings,
    ) -> E2eResult<Value> {
        debug!("Awaiting {} == {}", state.label(), expected);
        let polled = poll_until(|| state.read(driver), |v| v == expected, settings).await?;

        match polled {
            Polled::Matched { value, elapsed } => {
                debug!("{} == {} after {:?}", state.label(), expected, elapsed);
                Ok(value)
            }
            Polled::TimedOut { last, elapsed } => Err(E2eError::Timeout {
                what: state.label().to_string(),
                expected: expected.to_string(),
                last_observed: describe_json(&last),
                elapsed_ms: elapsed.as_millis() as u64,
            }),
        }
    }

    /// Single evaluation, no retry
    pub async fn check_state(
        &self,
        driver: &dyn BrowserDriver,
        state: &UiState,
        expected: &Value,
    ) -> E2eResult<Value> {
        let actual = state.read(driver).await?;
        if &actual == expected {
            Ok(actual)
        } else {
            Err(E2eError::AssertionFailed {
                what: state.label().to_string(),
                expected: expected.to_string(),
                actual: actual.to_string(),
            })
        }
    }

    /// Wait until the focused page's text contains `marker`
    pub async fn await_content(&self, driver: &dyn BrowserDriver, marker: &str) -> E2eResult<()> {
        let polled = poll_until(|| driver.page_contains(marker), |found| *found, self.settings())
            .await?;

        match polled {
            Polled::Matched { .. } => Ok(()),
            Polled::TimedOut { last, elapsed } => Err(E2eError::Timeout {
                what: format!("page contains '{}'", marker),
                expected: "true".to_string(),
                last_observed: last.describe(),
                elapsed_ms: elapsed.as_millis() as u64,
            }),
        }
    }

    /// Wait until an element matching `css` is on the focused page
    pub async fn await_element(&self, driver: &dyn BrowserDriver, css: &str) -> E2eResult<()> {
        let polled = poll_until(|| driver.has_element(css), |found| *found, self.settings())
            .await?;

        match polled {
            Polled::Matched { .. } => Ok(()),
            Polled::TimedOut { last, elapsed } => Err(E2eError::Timeout {
                what: format!("{} present", css),
                expected: "true".to_string(),
                last_observed: last.describe(),
                elapsed_ms: elapsed.as_millis() as u64,
            }),
        }
    }

    /// Poll the window set until `accept` is satisfied or the window timeout
    /// elapses. Returns the last set seen and whether it was accepted.
    pub async fn await_windows<A>(
        &self,
        driver: &dyn BrowserDriver,
        accept: A,
    ) -> E2eResult<(Vec<WindowHandle>, bool)>
    where
        A: FnMut(&Vec<WindowHandle>) -> bool,
    {
        let settings = PollSettings::new(self.config.window_timeout(), self.config.interval());
        match poll_until(|| driver.window_handles(), accept, settings).await? {
            Polled::Matched { value, .. } => Ok((value, true)),
            Polled::TimedOut {
                last: Observation::Value(handles),
                ..
            } => Ok((handles, false)),
            Polled::TimedOut { .. } => Ok((driver.window_handles().await?, false)),
        }
    }
}

fn describe_json(observation: &Observation<Value>) -> String {
    match observation {
        Observation::Value(v) => v.to_string(),
        other => other.describe(),
    }
}
