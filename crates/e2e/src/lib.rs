//! SequenceServer E2E Test Framework
//!
//! This crate drives a real browser through the SequenceServer search form
//! over WebDriver:
//! - Optionally spawns SequenceServer as a subprocess
//! - Fills the query, selects databases, picks alternate methods
//! - Polls asynchronous UI state (enable/disable, class toggles) with a bound
//! - Follows the submission into the result window and checks the report
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ScenarioRunner (runner.rs)                  │
//! │    ├── start_server() -> ServerHandle                       │
//! │    ├── DriverFactory::connect() -> Box<dyn BrowserDriver>   │
//! │    ├── SearchWorkflow::run(&Scenario) -> WorkflowResult     │
//! │    ├── SearchWorkflow::probe_form(&FormProbe)               │
//! │    └── write_results(&SuiteResult)                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  SearchWorkflow (workflow.rs)                               │
//! │    Idle → FormLoaded → QueryFilled → DatabasesSelected      │
//! │         → MethodChosen → Submitted → ResultWindowResolved   │
//! │         → Verified | Failed                                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Poller (poll.rs)          BrowserDriver (driver.rs)        │
//! │    poll_until(probe, ..)     └── WebDriverSession           │
//! │    await_state(UiState)          (webdriver.rs, thirtyfour) │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod poll;
pub mod runner;
pub mod scenario;
pub mod server;
pub mod webdriver;
pub mod workflow;

pub use config::HarnessConfig;
pub use driver::{BrowserDriver, DriverFactory, Locator, WindowHandle};
pub use error::{E2eError, E2eResult, FailureKind};
pub use poll::{Poller, UiState};
pub use runner::{ScenarioRunner, SuiteResult};
pub use scenario::{Catalog, Expectation, FormProbe, Scenario};
pub use workflow::{SearchWorkflow, WorkflowResult, WorkflowState};
