//! Scenario runner: one fresh browser session per scenario

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use futures::future;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::HarnessConfig;
use crate::driver::{BrowserDriver, DriverFactory};
use crate::error::{E2eError, E2eResult};
use crate::poll::Poller;
use crate::scenario::{Catalog, FormProbe, Fixtures, Scenario};
use crate::server::ServerHandle;
use crate::workflow::{SearchWorkflow, WorkflowResult};

/// Result of running a whole catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResult {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub results: Vec<WorkflowResult>,
}

impl SuiteResult {
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

#[derive(Clone, Copy)]
enum Job<'c> {
    Search(&'c Scenario),
    Probe(&'c FormProbe),
}

impl Job<'_> {
    fn name(&self) -> &str {
        match self {
            Job::Search(s) => s.name(),
            Job::Probe(p) => &p.name,
        }
    }
}

/// Main E2E scenario runner
pub struct ScenarioRunner {
    config: HarnessConfig,
    factory: Box<dyn DriverFactory>,

    /// Running SequenceServer (if we spawned one)
    server: Option<ServerHandle>,

    /// URL scenarios navigate to; replaced by the spawned server's URL
    app_url: String,
}

impl ScenarioRunner {
    pub fn new(config: HarnessConfig, factory: Box<dyn DriverFactory>) -> Self {
        let app_url = config.app_url.clone();
        Self {
            config,
            factory,
            server: None,
            app_url,
        }
    }

    pub fn app_url(&self) -> &str {
        &self.app_url
    }

    /// Start SequenceServer when the config asks for one
    pub async fn start_server(&mut self) -> E2eResult<()> {
        if self.server.is_some() {
            return Ok(());
        }
        let Some(server_config) = self.config.server.clone() else {
            return Ok(());
        };

        let server = ServerHandle::spawn(server_config).await?;
        self.app_url = server.base_url().to_string();
        self.server = Some(server);
        Ok(())
    }

    pub fn stop_server(&mut self) -> E2eResult<()> {
        if let Some(mut server) = self.server.take() {
            server.stop()?;
        }
        Ok(())
    }

    /// Built-in catalog plus any YAML catalogs from the configured directory
    pub fn load_catalog(&self) -> E2eResult<Catalog> {
        let fixtures = Fixtures::load(&self.config.fixtures_dir)?;
        let mut catalog = Catalog::builtin(&fixtures)?;
        if let Some(dir) = &self.config.catalog_dir {
            catalog.extend(Catalog::load_dir(dir, &self.config.fixtures_dir)?);
        }
        Ok(catalog)
    }

    pub async fn run_all(&mut self) -> E2eResult<SuiteResult> {
        let catalog = self.load_catalog()?;
        self.run_catalog(&catalog).await
    }

    pub async fn run_tagged(&mut self, tag: &str) -> E2eResult<SuiteResult> {
        let catalog = self.load_catalog()?.filter_by_tag(tag);
        self.run_catalog(&catalog).await
    }

    pub async fn run_named(&mut self, name: &str) -> E2eResult<SuiteResult> {
        let catalog = self.load_catalog()?.filter_by_name(name);
        if catalog.is_empty() {
            return Err(E2eError::Config(format!("Scenario not found: {}", name)));
        }
        self.run_catalog(&catalog).await
    }

    /// Run every probe and scenario of `catalog`. A failing scenario is
    /// recorded and the run continues; only a lost browser aborts it.
    pub async fn run_catalog(&mut self, catalog: &Catalog) -> E2eResult<SuiteResult> {
        self.start_server().await?;

        let start = Instant::now();
        let jobs: Vec<Job<'_>> = catalog
            .probes
            .iter()
            .map(Job::Probe)
            .chain(catalog.scenarios.iter().map(Job::Search))
            .collect();
        let total = jobs.len();

        info!(
            "Running {} scenario(s), {} at a time...",
            total, self.config.concurrency
        );

        // Jobs already in flight run to completion so their sessions get
        // quit; jobs not yet started are skipped once the browser is lost.
        let this = &*self;
        let lost = AtomicBool::new(false);
        let lost = &lost;
        let outcomes: Vec<E2eResult<WorkflowResult>> = stream::iter(jobs)
            .map(|job| async move {
                if lost.load(Ordering::SeqCst) {
                    debug!("Skipping {} after a fatal error", job.name());
                    return None;
                }
                let outcome = this.run_job(job).await;
                if outcome.is_err() {
                    lost.store(true, Ordering::SeqCst);
                }
                Some(outcome)
            })
            .buffered(this.config.concurrency.max(1))
            .filter_map(future::ready)
            .collect()
            .await;
        let results = outcomes.into_iter().collect::<E2eResult<Vec<_>>>()?;

        let mut passed = 0;
        let mut failed = 0;
        for result in &results {
            if result.succeeded {
                passed += 1;
                info!("✓ {} ({} ms)", result.scenario, result.duration_ms);
            } else {
                failed += 1;
                let reason = result
                    .failure
                    .as_ref()
                    .map(|f| format!("{:?}: {}", f.state, f.reason))
                    .unwrap_or_else(|| "unknown error".to_string());
                error!("✗ {} - {}", result.scenario, reason);
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Scenario results: {} passed, {} failed ({} ms)",
            passed, failed, duration_ms
        );

        Ok(SuiteResult {
            total,
            passed,
            failed,
            duration_ms,
            results,
        })
    }

    async fn run_job(&self, job: Job<'_>) -> E2eResult<WorkflowResult> {
        let name = job.name();
        debug!("Opening session for {}", name);

        let driver = match self.factory.connect(&self.config.driver).await {
            Ok(driver) => driver,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                error!("✗ {} - could not open a session: {}", name, e);
                return Ok(WorkflowResult::aborted(name, &e));
            }
        };

        let outcome = self.drive(driver.as_ref(), job).await;

        // Teardown on every path, including fatal ones
        if let Err(e) = driver.quit().await {
            warn!("Closing session for {} failed: {}", name, e);
        }
        outcome
    }

    async fn drive(&self, driver: &dyn BrowserDriver, job: Job<'_>) -> E2eResult<WorkflowResult> {
        let workflow = SearchWorkflow::new(
            driver,
            Poller::new(self.config.poll.clone()),
            self.app_url.as_str(),
        )
        .with_screenshot_dir(self.config.screenshot_dir());

        let mut result = match job {
            Job::Search(scenario) => workflow.run(scenario).await?,
            Job::Probe(probe) => workflow.probe_form(probe).await?,
        };

        if !result.succeeded && self.config.screenshot_on_failure {
            result.screenshot = self.capture_failure(driver, &result.scenario).await;
        }
        Ok(result)
    }

    async fn capture_failure(&self, driver: &dyn BrowserDriver, name: &str) -> Option<PathBuf> {
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S");
        let path = self
            .config
            .screenshot_dir()
            .join(format!("{}-failure-{}.png", name, stamp));

        match driver.screenshot(&path).await {
            Ok(()) => {
                info!("Failure screenshot: {}", path.display());
                Some(path)
            }
            Err(e) => {
                warn!("Could not capture failure screenshot for {}: {}", name, e);
                None
            }
        }
    }

    /// Write suite results to JSON
    pub fn write_results(&self, results: &SuiteResult) -> E2eResult<PathBuf> {
        std::fs::create_dir_all(&self.config.output_dir)?;

        let path = self.config.output_dir.join("e2e-results.json");
        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}

impl Drop for ScenarioRunner {
    fn drop(&mut self) {
        let _ = self.stop_server();
    }
}
