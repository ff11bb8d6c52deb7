//! E2E runner entry point
//!
//! Needs a WebDriver endpoint (geckodriver or chromedriver) and either a
//! running SequenceServer (`--app-url`) or its executable (`--server-binary`).

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use seqserver_e2e::config::{Browser, HarnessConfig};
use seqserver_e2e::webdriver::WebDriverFactory;
use seqserver_e2e::{E2eResult, ScenarioRunner};

#[derive(Parser, Debug)]
#[command(name = "seqserver-e2e")]
#[command(about = "Browser acceptance tests for the SequenceServer search UI")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "e2e.toml")]
    config: PathBuf,

    /// Run only scenarios carrying this tag
    #[arg(short, long)]
    tag: Option<String>,

    /// Run only the scenario with this name
    #[arg(short, long)]
    name: Option<String>,

    /// URL of an already running SequenceServer
    #[arg(long, env = "SEQSERV_APP_URL")]
    app_url: Option<String>,

    /// Spawn this sequenceserver executable instead of using --app-url
    #[arg(long)]
    server_binary: Option<PathBuf>,

    /// BLAST database directory for the spawned server
    #[arg(long)]
    database_dir: Option<PathBuf>,

    /// WebDriver endpoint
    #[arg(long, env = "SEQSERV_WEBDRIVER_URL")]
    webdriver_url: Option<String>,

    #[arg(long, value_enum)]
    browser: Option<Browser>,

    /// Show the browser window
    #[arg(long)]
    headed: bool,

    /// Bound on each asserted UI transition, in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Scenarios run at once, each in its own session
    #[arg(short = 'j', long)]
    concurrency: Option<usize>,

    /// Directory with query FASTA fixtures
    #[arg(long)]
    fixtures: Option<PathBuf>,

    /// Directory of additional YAML scenario catalogs
    #[arg(long)]
    catalogs: Option<PathBuf>,

    /// Output directory for results
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn main() {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let registry = tracing_subscriber::registry().with(filter);
    if args.json_logs {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to create tokio runtime: {}", e);
            std::process::exit(2);
        }
    };

    match rt.block_on(async_main(args)) {
        Ok(true) => std::process::exit(0),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    }
}

fn build_config(args: &Args) -> E2eResult<HarnessConfig> {
    let mut config = HarnessConfig::load(&args.config)?;

    if let Some(url) = &args.app_url {
        config.app_url = url.clone();
    }
    if let Some(binary) = &args.server_binary {
        let mut server = config.server.take().unwrap_or_default();
        server.binary_path = binary.clone();
        config.server = Some(server);
    }
    if let (Some(dir), Some(server)) = (&args.database_dir, config.server.as_mut()) {
        server.database_dir = dir.clone();
    }
    if let Some(url) = &args.webdriver_url {
        config.driver.webdriver_url = url.clone();
    }
    if let Some(browser) = args.browser {
        config.driver.browser = browser;
    }
    if args.headed {
        config.driver.headless = false;
    }
    if let Some(timeout) = args.timeout_ms {
        config.poll.timeout_ms = timeout;
    }
    if let Some(n) = args.concurrency {
        config.concurrency = n;
    }
    if let Some(dir) = &args.fixtures {
        config.fixtures_dir = dir.clone();
    }
    if let Some(dir) = &args.catalogs {
        config.catalog_dir = Some(dir.clone());
    }
    if let Some(dir) = &args.output {
        config.output_dir = dir.clone();
    }

    config.validate()?;
    Ok(config)
}

async fn async_main(args: Args) -> E2eResult<bool> {
    let config = build_config(&args)?;
    info!("seqserver-e2e v{}", env!("CARGO_PKG_VERSION"));

    let mut runner = ScenarioRunner::new(config, Box::new(WebDriverFactory));

    let results = if let Some(name) = &args.name {
        runner.run_named(name).await?
    } else if let Some(tag) = &args.tag {
        runner.run_tagged(tag).await?
    } else {
        runner.run_all().await?
    };

    runner.write_results(&results)?;
    runner.stop_server()?;

    Ok(results.all_passed())
}
