//! Server management - spawning and health checking SequenceServer

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::{E2eError, E2eResult};

/// Handle to a running SequenceServer process
pub struct ServerHandle {
    child: Child,
    pub base_url: String,
    pub port: u16,
}

impl ServerHandle {
    /// Spawn SequenceServer against the configured database directory
    pub async fn spawn(config: ServerConfig) -> E2eResult<Self> {
        let port = match config.port {
            Some(port) => port,
            None => find_free_port()?,
        };
        let base_url = format!("http://127.0.0.1:{}", port);

        info!("Spawning SequenceServer on port {}", port);

        let mut cmd = Command::new(&config.binary_path);
        cmd.arg("-d")
            .arg(&config.database_dir)
            .arg("-p")
            .arg(port.to_string())
            .args(&config.extra_args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let child = cmd.spawn().map_err(|e| {
            E2eError::ServerStartup(format!(
                "Failed to spawn {}: {}",
                config.binary_path.display(),
                e
            ))
        })?;

        let handle = ServerHandle {
            child,
            base_url: base_url.clone(),
            port,
        };

        handle.wait_for_healthy(config.startup_timeout()).await?;

        info!("Server is healthy at {}", base_url);
        Ok(handle)
    }

    /// Wait for the search form to be served
    async fn wait_for_healthy(&self, timeout_duration: Duration) -> E2eResult<()> {
        wait_for_http_ok(&format!("{}/", self.base_url), timeout_duration).await
    }

    /// Get the base URL for this server
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Stop the server
    pub fn stop(&mut self) -> E2eResult<()> {
        info!("Stopping server (pid: {})", self.child.id());

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            let pid = Pid::from_raw(self.child.id() as i32);
            if kill(pid, Signal::SIGTERM).is_ok() {
                std::thread::sleep(Duration::from_millis(500));
            }
        }

        // Force kill if still running
        let _ = self.child.kill();
        let _ = self.child.wait();

        Ok(())
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Poll `url` until it answers with a 2xx status or the bound elapses
pub async fn wait_for_http_ok(url: &str, timeout_duration: Duration) -> E2eResult<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()?;

    let start = std::time::Instant::now();
    let mut attempts = 0;

    while start.elapsed() < timeout_duration {
        attempts += 1;

        match client.get(url).send().await {
            Ok(resp) if resp.status().is_success() => {
                return Ok(());
            }
            Ok(resp) => {
                warn!("Health check returned {}", resp.status());
            }
            Err(e) => {
                if attempts == 1 {
                    info!("Waiting for server to start...");
                }
                // Connection refused is expected while the server boots
                if !e.is_connect() {
                    warn!("Health check error: {}", e);
                }
            }
        }

        sleep(Duration::from_millis(100)).await;
    }

    Err(E2eError::ServerHealthCheck(attempts))
}

/// Configuration for spawning SequenceServer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Path to the sequenceserver executable
    pub binary_path: PathBuf,

    /// Directory of BLAST databases to serve
    pub database_dir: PathBuf,

    /// Port to listen on (None = find free port)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Timeout for server startup, in seconds
    pub startup_timeout_secs: u64,

    /// Extra command-line arguments passed through verbatim
    pub extra_args: Vec<String>,
}

impl ServerConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            binary_path: PathBuf::from("sequenceserver"),
            database_dir: PathBuf::from("spec/database/v5"),
            port: None,
            startup_timeout_secs: 60,
            extra_args: Vec::new(),
        }
    }
}

/// Find a free port to use
fn find_free_port() -> E2eResult<u16> {
    use std::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}
