//! In-memory stand-in for a browser session showing the SequenceServer form.
//!
//! It understands the commands the workflow issues and answers the
//! UI-state script by decoding its arguments, with configurable delays so
//! the asynchronous behaviour of the real form can be reproduced.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use seqserver_e2e::config::{DriverConfig, PollConfig};
use seqserver_e2e::poll::UI_STATE_SCRIPT;
use seqserver_e2e::scenario::Fixtures;
use seqserver_e2e::{BrowserDriver, DriverFactory, E2eError, E2eResult, Locator, WindowHandle};

pub const APP_URL: &str = "http://127.0.0.1:4567";

/// How the fake application behaves
#[derive(Debug, Clone)]
pub struct AppBehavior {
    /// Delay between the first compatible selection and `#method` enabling
    pub enable_delay: Duration,
    /// Delay between submit and the result window showing up
    pub window_delay: Duration,
    /// Delay between the result window opening and "Query" rendering
    pub render_delay: Duration,
    /// Submission opens a new window (otherwise renders in place when
    /// `report_in_place`, or does nothing)
    pub open_new_window: bool,
    pub report_in_place: bool,
    /// New windows are enumerated first instead of last
    pub new_window_first: bool,
    /// Every hit is longer than 10 kb
    pub long_hits: bool,
    pub never_enable: bool,
    /// Submitting kills the browser
    pub crash_on_submit: bool,
    pub nucleotide_databases: Vec<String>,
    pub protein_databases: Vec<String>,
    pub alternate_methods: Vec<String>,
}

impl Default for AppBehavior {
    fn default() -> Self {
        Self {
            enable_delay: Duration::from_millis(30),
            window_delay: Duration::from_millis(30),
            render_delay: Duration::from_millis(20),
            open_new_window: true,
            report_in_place: false,
            new_window_first: false,
            long_hits: true,
            never_enable: false,
            crash_on_submit: false,
            nucleotide_databases: Fixtures::default_nucleotide_databases(),
            protein_databases: Fixtures::default_protein_databases(),
            alternate_methods: vec!["tblastx".to_string()],
        }
    }
}

pub fn fixtures() -> Fixtures {
    Fixtures {
        nucleotide_query: ">nuc\nATGAAAGCGCTTACCGGTACGTTAGCGATCGATCGTAGCTAGCTAGGCTA\n".into(),
        protein_query: ">prot\nMKALTGTLAIDRS\n".into(),
        nucleotide_databases: Fixtures::default_nucleotide_databases(),
        protein_databases: Fixtures::default_protein_databases(),
    }
}

pub fn fast_poll() -> PollConfig {
    PollConfig {
        timeout_ms: 1_000,
        interval_ms: 10,
        window_timeout_ms: 300,
        settle_samples: 2,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Page {
    Blank,
    Form,
    Report { method: Option<String>, since: Instant },
}

#[derive(Debug)]
struct Window {
    handle: String,
    page: Page,
}

#[derive(Debug)]
struct Session {
    windows: Vec<Window>,
    focused: String,
    query: String,
    checked: Vec<String>,
    enabled_at: Option<Instant>,
    dropdown_open: bool,
    method: Option<String>,
    submitted_at: Option<Instant>,
    next_id: usize,
    closed: bool,
    crashed: bool,
}

/// Everything a test may want to inspect afterwards
#[derive(Debug, Default)]
pub struct Recorder {
    pub commands: Mutex<Vec<String>>,
    pub sessions: AtomicUsize,
    pub quits: AtomicUsize,
}

impl Recorder {
    pub fn sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    pub fn quits(&self) -> usize {
        self.quits.load(Ordering::SeqCst)
    }

    pub fn saw(&self, needle: &str) -> bool {
        self.commands.lock().iter().any(|c| c.contains(needle))
    }
}

pub struct FakeBrowser {
    behavior: AppBehavior,
    session: Mutex<Session>,
    recorder: Arc<Recorder>,
}

impl FakeBrowser {
    pub fn new(behavior: AppBehavior, recorder: Arc<Recorder>) -> Self {
        recorder.sessions.fetch_add(1, Ordering::SeqCst);
        Self {
            behavior,
            session: Mutex::new(Session {
                windows: vec![Window {
                    handle: "window-0".to_string(),
                    page: Page::Blank,
                }],
                focused: "window-0".to_string(),
                query: String::new(),
                checked: Vec::new(),
                enabled_at: None,
                dropdown_open: false,
                method: None,
                submitted_at: None,
                next_id: 1,
                closed: false,
                crashed: false,
            }),
            recorder,
        }
    }

    fn record(&self, command: String) {
        self.recorder.commands.lock().push(command);
    }

    fn alive(&self, session: &Session) -> E2eResult<()> {
        if session.closed || session.crashed {
            Err(E2eError::SessionLost("invalid session id".into()))
        } else {
            Ok(())
        }
    }

    /// Open the pending result window once its delay has passed
    fn settle(&self, session: &mut Session) {
        let Some(at) = session.submitted_at else {
            return;
        };
        if at.elapsed() < self.behavior.window_delay {
            return;
        }
        session.submitted_at = None;

        let report = Page::Report {
            method: session.method.clone(),
            since: Instant::now(),
        };
        if self.behavior.open_new_window {
            let window = Window {
                handle: format!("window-{}", session.next_id),
                page: report,
            };
            session.next_id += 1;
            if self.behavior.new_window_first {
                session.windows.insert(0, window);
            } else {
                session.windows.push(window);
            }
        } else if self.behavior.report_in_place {
            let focused = session.focused.clone();
            if let Some(w) = session.windows.iter_mut().find(|w| w.handle == focused) {
                w.page = report;
            }
        }
    }

    fn page(session: &Session) -> Page {
        session
            .windows
            .iter()
            .find(|w| w.handle == session.focused)
            .map(|w| w.page.clone())
            .unwrap_or(Page::Blank)
    }

    fn submit_enabled(&self, session: &Session) -> bool {
        !self.behavior.never_enable
            && !session.checked.is_empty()
            && session.enabled_at.map(|at| Instant::now() >= at).unwrap_or(false)
    }

    fn dropdown_shown(&self, session: &Session) -> bool {
        !session.checked.is_empty() && !self.behavior.alternate_methods.is_empty()
    }

    fn is_nucleotide(&self, db: &str) -> bool {
        self.behavior.nucleotide_databases.iter().any(|d| d == db)
    }

    fn is_protein(&self, db: &str) -> bool {
        self.behavior.protein_databases.iter().any(|d| d == db)
    }

    fn not_found(what: impl Into<String>) -> E2eError {
        E2eError::ElementNotFound {
            what: what.into(),
            reason: "no such element".into(),
        }
    }

    /// (element count, per-element predicate result) for a selector on the
    /// focused page
    fn elements(&self, session: &Session, selector: &str, kind: &str, class: &str) -> Vec<bool> {
        match Self::page(session) {
            Page::Form => {
                let nuc_checked = session.checked.iter().any(|d| self.is_nucleotide(d));
                let prot_checked = session.checked.iter().any(|d| self.is_protein(d));
                match selector {
                    "#method" => vec![kind == "disabled" && !self.submit_enabled(session)],
                    ".protein .database" => self
                        .behavior
                        .protein_databases
                        .iter()
                        .map(|_| kind == "class" && class == "disabled" && nuc_checked)
                        .collect(),
                    ".nucleotide .database" => self
                        .behavior
                        .nucleotide_databases
                        .iter()
                        .map(|_| kind == "class" && class == "disabled" && prot_checked)
                        .collect(),
                    "button.dropdown-toggle" | ".dropdown-toggle" if self.dropdown_shown(session) => {
                        vec![false]
                    }
                    s if s.contains("textarea#sequence") => vec![false],
                    _ => vec![],
                }
            }
            Page::Report { .. } => match selector {
                ".view-sequence" => vec![self.behavior.long_hits; 3],
                _ => vec![],
            },
            Page::Blank => vec![],
        }
    }

    fn evaluate(&self, session: &Session, args: &[Value]) -> E2eResult<Value> {
        let arg = |i: usize| args.get(i).and_then(Value::as_str).unwrap_or_default();
        let (selector, kind, class, scope) = (arg(0), arg(1), arg(2), arg(3));
        let els = self.elements(session, selector, kind, class);

        Ok(match kind {
            "exists" => Value::Bool(!els.is_empty()),
            "count" => Value::from(els.len()),
            _ if els.is_empty() => Value::Bool(false),
            _ => Value::Bool(match scope {
                "first" => els[0],
                "any" => els.iter().any(|b| *b),
                _ => els.iter().all(|b| *b),
            }),
        })
    }
}

#[async_trait]
impl BrowserDriver for FakeBrowser {
    async fn navigate(&self, url: &str) -> E2eResult<()> {
        self.record(format!("navigate {}", url));
        let mut s = self.session.lock();
        self.alive(&s)?;
        let focused = s.focused.clone();
        let page = if url == format!("{}/", APP_URL) {
            Page::Form
        } else {
            Page::Blank
        };
        if let Some(w) = s.windows.iter_mut().find(|w| w.handle == focused) {
            w.page = page;
        }
        s.query.clear();
        s.checked.clear();
        s.enabled_at = None;
        s.dropdown_open = false;
        s.method = None;
        Ok(())
    }

    async fn fill_field(&self, field: &str, text: &str) -> E2eResult<()> {
        self.record(format!("fill {}", field));
        let mut s = self.session.lock();
        self.alive(&s)?;
        if field != "sequence" || Self::page(&s) != Page::Form {
            return Err(Self::not_found(format!("field '{}'", field)));
        }
        s.query = text.to_string();
        Ok(())
    }

    async fn check(&self, label: &str) -> E2eResult<()> {
        self.record(format!("check {}", label));
        let mut s = self.session.lock();
        self.alive(&s)?;
        if Self::page(&s) != Page::Form || !(self.is_nucleotide(label) || self.is_protein(label)) {
            return Err(Self::not_found(format!("checkbox '{}'", label)));
        }
        if !s.checked.iter().any(|d| d == label) {
            if s.checked.is_empty() {
                s.enabled_at = Some(Instant::now() + self.behavior.enable_delay);
            }
            s.checked.push(label.to_string());
        }
        Ok(())
    }

    async fn uncheck(&self, label: &str) -> E2eResult<()> {
        self.record(format!("uncheck {}", label));
        let mut s = self.session.lock();
        self.alive(&s)?;
        if Self::page(&s) != Page::Form || !(self.is_nucleotide(label) || self.is_protein(label)) {
            return Err(Self::not_found(format!("checkbox '{}'", label)));
        }
        s.checked.retain(|d| d != label);
        if s.checked.is_empty() {
            s.enabled_at = None;
        }
        Ok(())
    }

    async fn click(&self, target: &Locator) -> E2eResult<()> {
        self.record(format!("click {}", target));
        let mut s = self.session.lock();
        self.alive(&s)?;
        if Self::page(&s) != Page::Form {
            return Err(Self::not_found(target.to_string()));
        }

        match target {
            Locator::Button(name) if name == "method" => {
                if !self.submit_enabled(&s) {
                    return Err(Self::not_found("clickable button 'method'"));
                }
                if self.behavior.crash_on_submit {
                    s.crashed = true;
                    return Err(E2eError::SessionLost("browser process exited".into()));
                }
                s.submitted_at = Some(Instant::now());
                Ok(())
            }
            Locator::Css(css) if css == ".dropdown-toggle" && self.dropdown_shown(&s) => {
                s.dropdown_open = true;
                Ok(())
            }
            Locator::MenuItem { text, .. } if s.dropdown_open => {
                let wanted = text.to_lowercase();
                if self.behavior.alternate_methods.iter().any(|m| *m == wanted) {
                    s.method = Some(wanted);
                    s.dropdown_open = false;
                    Ok(())
                } else {
                    Err(Self::not_found(target.to_string()))
                }
            }
            _ => Err(Self::not_found(target.to_string())),
        }
    }

    async fn evaluate_script(&self, script: &str, args: Vec<Value>) -> E2eResult<Value> {
        let mut s = self.session.lock();
        self.alive(&s)?;
        self.settle(&mut s);
        if script != UI_STATE_SCRIPT {
            return Err(E2eError::WebDriver("javascript error: unexpected script".into()));
        }
        self.evaluate(&s, &args)
    }

    async fn window_handles(&self) -> E2eResult<Vec<WindowHandle>> {
        let mut s = self.session.lock();
        self.alive(&s)?;
        self.settle(&mut s);
        Ok(s.windows.iter().map(|w| WindowHandle::new(w.handle.clone())).collect())
    }

    async fn current_window(&self) -> E2eResult<WindowHandle> {
        let s = self.session.lock();
        self.alive(&s)?;
        Ok(WindowHandle::new(s.focused.clone()))
    }

    async fn switch_to_window(&self, handle: &WindowHandle) -> E2eResult<()> {
        self.record(format!("switch {}", handle));
        let mut s = self.session.lock();
        self.alive(&s)?;
        if !s.windows.iter().any(|w| w.handle == handle.as_str()) {
            return Err(E2eError::WebDriver(format!("no such window: {}", handle)));
        }
        s.focused = handle.as_str().to_string();
        Ok(())
    }

    async fn page_contains(&self, text: &str) -> E2eResult<bool> {
        let mut s = self.session.lock();
        self.alive(&s)?;
        self.settle(&mut s);
        let content = match Self::page(&s) {
            Page::Report { method, since } if since.elapsed() >= self.behavior.render_delay => {
                format!(
                    "{} report\nQuery= nuc\nLength=52",
                    method.unwrap_or_else(|| "default".into())
                )
            }
            Page::Report { .. } => "Running search...".to_string(),
            Page::Form => "Enter sequence below in FASTA format.".to_string(),
            Page::Blank => String::new(),
        };
        Ok(content.contains(text))
    }

    async fn has_element(&self, css: &str) -> E2eResult<bool> {
        let s = self.session.lock();
        self.alive(&s)?;
        Ok(!self.elements(&s, css, "exists", "").is_empty())
    }

    async fn screenshot(&self, path: &Path) -> E2eResult<()> {
        self.record(format!("screenshot {}", path.display()));
        {
            let s = self.session.lock();
            self.alive(&s)?;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, b"\x89PNG fake")?;
        Ok(())
    }

    async fn quit(&self) -> E2eResult<()> {
        let mut s = self.session.lock();
        if !s.closed {
            s.closed = true;
            self.recorder.quits.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Hands out one [`FakeBrowser`] per session, all sharing a [`Recorder`]
pub struct FakeFactory {
    pub behavior: AppBehavior,
    pub recorder: Arc<Recorder>,
    pub refuse_connections: bool,
}

impl FakeFactory {
    pub fn new(behavior: AppBehavior) -> Self {
        Self {
            behavior,
            recorder: Arc::new(Recorder::default()),
            refuse_connections: false,
        }
    }
}

#[async_trait]
impl DriverFactory for FakeFactory {
    async fn connect(&self, config: &DriverConfig) -> E2eResult<Box<dyn BrowserDriver>> {
        if self.refuse_connections {
            return Err(E2eError::DriverUnavailable {
                url: config.webdriver_url.clone(),
                reason: "connection refused".into(),
            });
        }
        Ok(Box::new(FakeBrowser::new(
            self.behavior.clone(),
            self.recorder.clone(),
        )))
    }
}
