//! Search workflow state machine
//!
//! ```text
//! Idle -> FormLoaded -> QueryFilled -> DatabasesSelected -> MethodChosen
//!      -> Submitted -> ResultWindowResolved -> Verified
//!
//! any step whose precondition times out            -> Failed
//! ```
//!
//! Every wait goes through the [`Poller`]; nothing here blocks without a
//! bound. Scenario-level problems end up in the returned [`WorkflowResult`].
//! Only errors that mean the browser is gone are returned as `Err`.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::driver::{BrowserDriver, Locator, WindowHandle};
use crate::error::{E2eError, E2eResult, FailureKind};
use crate::poll::{Poller, UiState};
use crate::scenario::{CheckMode, Expectation, FormProbe, Scenario, RESULT_MARKER};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Idle,
    FormLoaded,
    QueryFilled,
    DatabasesSelected,
    MethodChosen,
    Submitted,
    ResultWindowResolved,
    Verified,
    Failed,
}

/// Where and why a run stopped short of `Verified`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowFailure {
    /// The state the workflow was trying to reach
    pub state: WorkflowState,
    pub kind: FailureKind,
    pub reason: String,
}

/// Outcome of one scenario or probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub scenario: String,
    pub succeeded: bool,
    pub failure: Option<WorkflowFailure>,
    pub final_window: Option<WindowHandle>,
    pub visited: Vec<WorkflowState>,
    pub duration_ms: u64,
    #[serde(default)]
    pub screenshot: Option<PathBuf>,
}

impl WorkflowResult {
    /// Result for a run that never got a usable browser session
    pub fn aborted(scenario: &str, error: &E2eError) -> Self {
        Self {
            scenario: scenario.to_string(),
            succeeded: false,
            failure: Some(WorkflowFailure {
                state: WorkflowState::FormLoaded,
                kind: error.kind(),
                reason: error.to_string(),
            }),
            final_window: None,
            visited: vec![WorkflowState::Idle, WorkflowState::Failed],
            duration_ms: 0,
            screenshot: None,
        }
    }
}

/// Names of the controls the search form exposes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormLayout {
    /// Query textarea (id or name)
    pub query_field: String,

    /// Submit button (id or name)
    pub submit_button: String,

    /// CSS selector of the same submit button, for state checks
    pub submit_selector: String,

    pub dropdown_toggle: String,
    pub dropdown_menu: String,
}

impl Default for FormLayout {
    fn default() -> Self {
        Self {
            query_field: "sequence".to_string(),
            submit_button: "method".to_string(),
            submit_selector: "#method".to_string(),
            dropdown_toggle: ".dropdown-toggle".to_string(),
            dropdown_menu: ".dropdown-menu".to_string(),
        }
    }
}

/// Bookkeeping for one pass through the state machine
struct Run {
    state: WorkflowState,
    target: WorkflowState,
    visited: Vec<WorkflowState>,
    form_window: Option<WindowHandle>,
    focused: Option<WindowHandle>,
    opened_window: bool,
}

impl Run {
    fn new() -> Self {
        Self {
            state: WorkflowState::Idle,
            target: WorkflowState::Idle,
            visited: vec![WorkflowState::Idle],
            form_window: None,
            focused: None,
            opened_window: false,
        }
    }

    fn attempt(&mut self, target: WorkflowState) {
        self.target = target;
    }

    fn reach(&mut self, name: &str, state: WorkflowState) {
        debug!("[{}] {:?} -> {:?}", name, self.state, state);
        self.state = state;
        self.visited.push(state);
    }
}

/// Drives one browser session through a search
pub struct SearchWorkflow<'a> {
    driver: &'a dyn BrowserDriver,
    poller: Poller,
    app_url: String,
    layout: FormLayout,
    screenshot_dir: Option<PathBuf>,
}

impl<'a> SearchWorkflow<'a> {
    pub fn new(driver: &'a dyn BrowserDriver, poller: Poller, app_url: impl Into<String>) -> Self {
        Self {
            driver,
            poller,
            app_url: app_url.into(),
            layout: FormLayout::default(),
            screenshot_dir: None,
        }
    }

    pub fn with_layout(mut self, layout: FormLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Where probe screenshots are written
    pub fn with_screenshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.screenshot_dir = Some(dir.into());
        self
    }

    fn root_url(&self) -> String {
        format!("{}/", self.app_url.trim_end_matches('/'))
    }

    /// Run a full search scenario
    pub async fn run(&self, scenario: &Scenario) -> E2eResult<WorkflowResult> {
        info!("[{}] starting search", scenario.name());
        let start = Instant::now();
        let mut run = Run::new();
        let outcome = self.drive_search(scenario, &mut run).await;
        self.finish(scenario.name(), run, outcome, start)
    }

    /// Run a form-only probe: no submission, no result window
    pub async fn probe_form(&self, probe: &FormProbe) -> E2eResult<WorkflowResult> {
        info!("[{}] starting form probe", probe.name);
        let start = Instant::now();
        let mut run = Run::new();
        let outcome = self.drive_probe(probe, &mut run).await;
        self.finish(&probe.name, run, outcome, start)
    }

    fn finish(
        &self,
        name: &str,
        mut run: Run,
        outcome: E2eResult<()>,
        start: Instant,
    ) -> E2eResult<WorkflowResult> {
        let duration_ms = start.elapsed().as_millis() as u64;
        let final_window = run.focused.clone().or_else(|| run.form_window.clone());

        match outcome {
            Ok(()) => {
                info!("[{}] verified in {} ms", name, duration_ms);
                Ok(WorkflowResult {
                    scenario: name.to_string(),
                    succeeded: true,
                    failure: None,
                    final_window,
                    visited: run.visited,
                    duration_ms,
                    screenshot: None,
                })
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!("[{}] failed reaching {:?}: {}", name, run.target, e);
                run.reach(name, WorkflowState::Failed);
                Ok(WorkflowResult {
                    scenario: name.to_string(),
                    succeeded: false,
                    failure: Some(WorkflowFailure {
                        state: run.target,
                        kind: e.kind(),
                        reason: e.to_string(),
                    }),
                    final_window,
                    visited: run.visited,
                    duration_ms,
                    screenshot: None,
                })
            }
        }
    }

    async fn drive_search(&self, scenario: &Scenario, run: &mut Run) -> E2eResult<()> {
        let name = scenario.name();

        self.load_form(name, run).await?;
        self.fill_query(name, scenario.query(), run).await?;

        run.attempt(WorkflowState::DatabasesSelected);
        for db in scenario.databases() {
            debug!("[{}] selecting database '{}'", name, db);
            self.driver.check(db).await?;
        }
        let submit = UiState::disabled(self.layout.submit_selector.as_str());
        self.poller
            .await_stable_state(self.driver, &submit, &Value::Bool(false))
            .await?;
        for check in scenario.form_checks() {
            self.assert(check).await?;
        }
        run.reach(name, WorkflowState::DatabasesSelected);

        run.attempt(WorkflowState::MethodChosen);
        if let Some(method) = scenario.method() {
            self.choose_method(name, method).await?;
        }
        run.reach(name, WorkflowState::MethodChosen);

        run.attempt(WorkflowState::Submitted);
        let before = self.driver.window_handles().await?;
        self.driver
            .click(&Locator::Button(self.layout.submit_button.clone()))
            .await?;
        run.reach(name, WorkflowState::Submitted);

        run.attempt(WorkflowState::ResultWindowResolved);
        self.resolve_result_window(name, &before, run).await?;
        run.reach(name, WorkflowState::ResultWindowResolved);

        run.attempt(WorkflowState::Verified);
        self.verify_report(scenario, run).await?;
        run.reach(name, WorkflowState::Verified);

        Ok(())
    }

    async fn drive_probe(&self, probe: &FormProbe, run: &mut Run) -> E2eResult<()> {
        let name = probe.name.as_str();

        self.load_form(name, run).await?;
        self.fill_query(name, &probe.query, run).await?;

        run.attempt(WorkflowState::DatabasesSelected);
        for db in &probe.select {
            self.driver.check(db).await?;
        }
        for db in &probe.deselect {
            self.driver.uncheck(db).await?;
        }
        run.reach(name, WorkflowState::DatabasesSelected);

        if let (Some(file), Some(dir)) = (&probe.screenshot, &self.screenshot_dir) {
            let path = dir.join(file);
            // Diagnostic only
            if let Err(e) = self.driver.screenshot(&path).await {
                if e.is_fatal() {
                    return Err(e);
                }
                warn!("[{}] screenshot {} failed: {}", name, path.display(), e);
            }
        }

        run.attempt(WorkflowState::Verified);
        for check in &probe.checks {
            self.assert(check).await?;
        }
        run.reach(name, WorkflowState::Verified);
        Ok(())
    }

    async fn load_form(&self, name: &str, run: &mut Run) -> E2eResult<()> {
        run.attempt(WorkflowState::FormLoaded);
        self.driver.navigate(&self.root_url()).await?;

        let field = UiState::exists(format!(
            "textarea#{0}, textarea[name='{0}'], input#{0}, input[name='{0}']",
            self.layout.query_field
        ));
        self.poller
            .await_state(self.driver, &field, &Value::Bool(true))
            .await?;

        let window = self.driver.current_window().await?;
        run.form_window = Some(window.clone());
        run.focused = Some(window);
        run.reach(name, WorkflowState::FormLoaded);
        Ok(())
    }

    async fn fill_query(&self, name: &str, query: &str, run: &mut Run) -> E2eResult<()> {
        run.attempt(WorkflowState::QueryFilled);
        self.driver
            .fill_field(&self.layout.query_field, query)
            .await?;
        run.reach(name, WorkflowState::QueryFilled);
        Ok(())
    }

    async fn choose_method(&self, name: &str, method: &str) -> E2eResult<()> {
        info!("[{}] choosing alternate method '{}'", name, method);
        // The toggle only renders when the selection allows other methods
        self.poller
            .await_element(self.driver, &self.layout.dropdown_toggle)
            .await?;
        self.driver
            .click(&Locator::Css(self.layout.dropdown_toggle.clone()))
            .await?;
        self.driver
            .click(&Locator::MenuItem {
                menu: self.layout.dropdown_menu.clone(),
                text: method.to_string(),
            })
            .await
    }

    /// Focus the window the submission opened. The new window is the handle
    /// missing from the pre-submission set; enumeration order is only used
    /// when more than one handle appeared.
    async fn resolve_result_window(
        &self,
        name: &str,
        before: &[WindowHandle],
        run: &mut Run,
    ) -> E2eResult<()> {
        let known: HashSet<&WindowHandle> = before.iter().collect();
        let (after, appeared) = self
            .poller
            .await_windows(self.driver, |handles| {
                handles.iter().any(|h| !known.contains(h))
            })
            .await?;

        let fresh: Vec<&WindowHandle> = after.iter().filter(|h| !known.contains(h)).collect();
        let target = match fresh.as_slice() {
            [] => None,
            [only] => Some((*only).clone()),
            [.., last] => {
                warn!(
                    "[{}] {} windows opened on submit, using the last listed",
                    name,
                    fresh.len()
                );
                Some((*last).clone())
            }
        };

        match target {
            Some(handle) => {
                debug!("[{}] switching to result window {}", name, handle);
                self.driver.switch_to_window(&handle).await?;
                run.focused = Some(handle);
                run.opened_window = true;
            }
            None => {
                debug!(
                    "[{}] no new window (appeared={}), staying on the current one",
                    name, appeared
                );
                run.focused = Some(self.driver.current_window().await?);
            }
        }
        Ok(())
    }

    async fn verify_report(&self, scenario: &Scenario, run: &Run) -> E2eResult<()> {
        match self.poller.await_content(self.driver, RESULT_MARKER).await {
            Ok(()) => {}
            Err(E2eError::Timeout { last_observed, .. }) if !run.opened_window => {
                return Err(E2eError::WindowResolution(format!(
                    "submission opened no window within {} ms and the current page does not \
                     contain '{}' (last observed {})",
                    self.poller.config().window_timeout_ms,
                    RESULT_MARKER,
                    last_observed
                )));
            }
            Err(e) => return Err(e),
        }

        for check in scenario.result_checks() {
            self.assert(check).await?;
        }
        Ok(())
    }

    async fn assert(&self, check: &Expectation) -> E2eResult<Value> {
        match (check.mode, check.stable) {
            (CheckMode::Immediate, _) => {
                self.poller
                    .check_state(self.driver, &check.state, &check.expected)
                    .await
            }
            (CheckMode::Eventually, true) => {
                self.poller
                    .await_stable_state(self.driver, &check.state, &check.expected)
                    .await
            }
            (CheckMode::Eventually, false) => {
                self.poller
                    .await_state(self.driver, &check.state, &check.expected)
                    .await
            }
        }
    }
}
