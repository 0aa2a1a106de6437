//! Client for connecting to the daemon process.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use droid_remote_core::protocol::{Command, Request, Response};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::timeout;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{DaemonConfig, CONFIG_JSON_ENV};
use crate::daemon::paths;

/// Maximum time to wait for daemon to start up.
const DAEMON_STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between socket connection attempts.
const RETRY_INTERVAL: Duration = Duration::from_millis(100);

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Screen commands may step through several screens, each with adb round trips.
const SCREEN_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// A confirmation may retry the whole flow.
const CONFIRM_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Client for communicating with the daemon.
pub struct DaemonClient {
    stream: UnixStream,
}

impl DaemonClient {
    /// Connect to the daemon, starting it with `config` if necessary.
    pub async fn connect(config: &DaemonConfig) -> Result<Self> {
        if let Some(client) = Self::try_connect().await {
            debug!("Connected to existing daemon");
            return Ok(client);
        }

        info!("Daemon not running, starting...");
        let mut child = spawn_detached("daemon", config)?;
        let stream = wait_for_daemon(&paths::get_socket_path(None), &mut child).await?;
        Ok(Self { stream })
    }

    /// Connect to a running daemon without starting one.
    pub async fn try_connect() -> Option<Self> {
        let socket_path = paths::get_socket_path(None);
        UnixStream::connect(&socket_path)
            .await
            .ok()
            .map(|stream| Self { stream })
    }

    /// Send `command` with a timeout suited to it.
    pub async fn send(&mut self, command: Command) -> Result<Response> {
        let timeout_duration = request_timeout(&command);
        let request = Request {
            id: Uuid::new_v4().to_string(),
            command,
        };
        self.request_with_timeout(request, timeout_duration).await
    }

    /// Send a request and wait for a response with a custom timeout.
    pub async fn request_with_timeout(
        &mut self,
        request: Request,
        timeout_duration: Duration,
    ) -> Result<Response> {
        let request_json =
            serde_json::to_string(&request).context("Failed to serialize request")?;
        debug!("Sending: {}", request_json);

        self.stream
            .write_all(request_json.as_bytes())
            .await
            .context("Failed to write request")?;
        self.stream
            .write_all(b"\n")
            .await
            .context("Failed to write newline")?;
        self.stream.flush().await.context("Failed to flush")?;

        let (reader, _writer) = self.stream.split();
        let mut reader = BufReader::new(reader);
        let mut response_line = String::new();

        let bytes_read = timeout(timeout_duration, reader.read_line(&mut response_line))
            .await
            .context("Request timed out")?
            .context("Failed to read response")?;

        if bytes_read == 0 {
            bail!("Daemon closed connection unexpectedly");
        }

        debug!("Received: {} bytes", response_line.trim().len());

        let response: Response =
            serde_json::from_str(&response_line).context("Failed to parse response")?;
        if response.id != request.id {
            bail!(
                "Response id {} does not match request id {}",
                response.id,
                request.id
            );
        }
        Ok(response)
    }
}

fn request_timeout(command: &Command) -> Duration {
    match command {
        Command::ConfirmKnownAction { .. } => CONFIRM_REQUEST_TIMEOUT,
        Command::ParseScreen { .. } | Command::ScreenAction { .. } => SCREEN_REQUEST_TIMEOUT,
        _ => DEFAULT_REQUEST_TIMEOUT,
    }
}

/// Start `droid-remote <subcommand>` as a detached background process.
///
/// The configuration travels in the environment, keeping the PIN out of the
/// process list. Returns the child so early crashes can be detected.
pub(crate) fn spawn_detached(subcommand: &str, config: &DaemonConfig) -> Result<std::process::Child> {
    let exe = std::env::current_exe().context("Failed to get current executable path")?;

    detached_command(&exe, subcommand, config)?
        .spawn()
        .with_context(|| format!("Failed to spawn {} process", subcommand))
}

/// Build the command for a detached `subcommand` whose stderr, and with it
/// every log line, is appended to the configured log file.
fn detached_command(
    exe: &Path,
    subcommand: &str,
    config: &DaemonConfig,
) -> Result<std::process::Command> {
    use std::os::unix::process::CommandExt;

    let log_path = config.log_path(subcommand);
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
    }
    let log = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;
    debug!("{} logs to {}", subcommand, log_path.display());

    let mut command = std::process::Command::new(exe);
    // process_group(0) keeps the daemon alive when the CLI's terminal closes.
    command
        .arg(subcommand)
        .env(CONFIG_JSON_ENV, config.to_json()?)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::from(log))
        .process_group(0);
    Ok(command)
}

/// Wait for the daemon socket to become available.
///
/// Fails fast when the daemon process exits before accepting connections.
pub(crate) async fn wait_for_daemon(
    socket_path: &Path,
    child: &mut std::process::Child,
) -> Result<UnixStream> {
    let start = std::time::Instant::now();

    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                bail!(
                    "Daemon exited immediately with status: {} (run 'droid-remote daemon' directly to diagnose)",
                    status
                );
            }
            Ok(None) => {}
            Err(e) => {
                debug!("Error checking daemon status: {}", e);
            }
        }

        match UnixStream::connect(socket_path).await {
            Ok(stream) => {
                info!("Connected to daemon after {:?}", start.elapsed());
                return Ok(stream);
            }
            Err(_) => {
                if start.elapsed() > DAEMON_STARTUP_TIMEOUT {
                    bail!("Daemon failed to start within {:?}", DAEMON_STARTUP_TIMEOUT);
                }
                tokio::time::sleep(RETRY_INTERVAL).await;
            }
        }
    }
}
