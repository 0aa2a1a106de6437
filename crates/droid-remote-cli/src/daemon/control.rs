//! Starting, stopping and probing the daemon and the watchdog from the CLI.

use std::fmt;
use std::path::Path;
use std::process::Child;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use droid_remote_core::protocol::{Command, DaemonStatus, Response, ResponseData};
use tracing::{debug, info, warn};

use crate::config::DaemonConfig;
use crate::daemon::client::{spawn_detached, wait_for_daemon, DaemonClient};
use crate::daemon::paths;
use crate::daemon::server::{is_process_alive, read_pid};

/// How long a health check may take before the daemon counts as unresponsive.
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait for a process to exit after asking it to.
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a freshly spawned watchdog has to write its PID file.
const WATCHDOG_STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Which background process a management command is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Daemon,
    Watchdog,
}

impl Target {
    fn name(self) -> &'static str {
        match self {
            Target::Daemon => "Daemon",
            Target::Watchdog => "Watchdog",
        }
    }

    fn pid_path(self) -> std::path::PathBuf {
        match self {
            Target::Daemon => paths::get_pid_path(None),
            Target::Watchdog => paths::get_watchdog_pid_path(None),
        }
    }
}

/// Outcome of probing the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Health {
    NotRunning,
    /// The PID file names a live process, but the socket does not answer.
    Unresponsive { pid: Option<i32> },
    Healthy(DaemonStatus),
}

impl Health {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Health::Healthy(_))
    }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Health::NotRunning => f.write_str("Daemon not running"),
            Health::Unresponsive { pid: Some(pid) } => {
                write!(f, "Daemon process running but not responding (pid {})", pid)
            }
            Health::Unresponsive { pid: None } => {
                f.write_str("Daemon process running but not responding")
            }
            Health::Healthy(status) => write!(
                f,
                "Daemon running and healthy (pid {}, up {}s, PIN {})",
                status.pid,
                status.uptime_secs,
                if status.pin_configured {
                    "configured"
                } else {
                    "not configured"
                }
            ),
        }
    }
}

/// Check the daemon: PID file liveness plus a `status` round trip.
pub async fn check_health() -> Health {
    if let Some(mut client) = DaemonClient::try_connect().await {
        match tokio::time::timeout(HEALTH_CHECK_TIMEOUT, client.send(Command::Status)).await {
            Ok(Ok(Response {
                data: Some(ResponseData::Status(status)),
                ..
            })) => return Health::Healthy(status),
            Ok(Ok(response)) => debug!("Unexpected status response: {:?}", response),
            Ok(Err(e)) => debug!("Health check failed: {}", e),
            Err(_) => debug!("Health check timed out after {:?}", HEALTH_CHECK_TIMEOUT),
        }
    }

    let pid_path = paths::get_pid_path(None);
    if is_process_alive(&pid_path) {
        Health::Unresponsive {
            pid: read_pid(&pid_path),
        }
    } else {
        Health::NotRunning
    }
}

/// Status line for `target`.
pub async fn status(target: Target) -> String {
    match target {
        Target::Daemon => check_health().await.to_string(),
        Target::Watchdog => {
            let pid_path = target.pid_path();
            match read_pid(&pid_path).filter(|_| is_process_alive(&pid_path)) {
                Some(pid) => format!("Watchdog running (pid {})", pid),
                None => "Watchdog not running".to_string(),
            }
        }
    }
}

/// Start the daemon in the background. The returned child lets a long-lived
/// caller reap it once it exits.
pub async fn start_daemon(config: &DaemonConfig) -> Result<(String, Child)> {
    match check_health().await {
        Health::NotRunning => {}
        Health::Healthy(status) => bail!("Daemon already running (pid {})", status.pid),
        unresponsive @ Health::Unresponsive { .. } => bail!(
            "{}; use 'droid-remote restart' or 'droid-remote force-stop'",
            unresponsive
        ),
    }

    paths::ensure_socket_dir().context("Failed to create socket directory")?;
    info!("Starting daemon...");
    let mut child = spawn_detached("daemon", config)?;
    wait_for_daemon(&paths::get_socket_path(None), &mut child).await?;
    Ok((format!("Daemon started (pid {})", child.id()), child))
}

/// Start the watchdog in the background.
pub async fn start_watchdog(config: &DaemonConfig) -> Result<String> {
    let pid_path = Target::Watchdog.pid_path();
    if is_process_alive(&pid_path) {
        bail!(
            "Watchdog already running (pid {})",
            read_pid(&pid_path).unwrap_or_default()
        );
    }

    paths::ensure_socket_dir().context("Failed to create socket directory")?;
    info!("Starting watchdog...");
    let mut child = spawn_detached("watchdog", config)?;
    let pid = child.id() as i32;
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().context("Failed to check watchdog process")? {
            bail!("Watchdog exited immediately with status: {}", status);
        }
        if read_pid(&pid_path) == Some(pid) {
            return Ok(format!("Watchdog started (pid {})", pid));
        }
        if start.elapsed() > WATCHDOG_STARTUP_TIMEOUT {
            bail!(
                "Watchdog did not write {:?} within {:?}",
                pid_path,
                WATCHDOG_STARTUP_TIMEOUT
            );
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Stop gracefully: a `shutdown` request for the daemon, SIGTERM otherwise
/// or when the daemon does not react.
pub async fn stop(target: Target) -> Result<String> {
    stop_within(target, STOP_TIMEOUT).await
}

/// Stop gracefully, escalating to SIGKILL when the process outlives the
/// grace period. Restarts use this, so a wedged daemon cannot block them.
pub async fn stop_or_kill(target: Target) -> Result<String> {
    stop_or_kill_within(target, STOP_TIMEOUT).await
}

async fn stop_or_kill_within(target: Target, grace: Duration) -> Result<String> {
    match stop_within(target, grace).await {
        Ok(message) => Ok(message),
        Err(e) => {
            warn!("{:#}; sending SIGKILL", e);
            force_stop_within(target, grace).await
        }
    }
}

async fn stop_within(target: Target, grace: Duration) -> Result<String> {
    let pid_path = target.pid_path();

    if target == Target::Daemon {
        if let Some(mut client) = DaemonClient::try_connect().await {
            match client.send(Command::Shutdown).await {
                Ok(response) if response.success => {
                    if wait_until_stopped(&pid_path, grace).await {
                        return Ok("Daemon stopped".to_string());
                    }
                    warn!("Daemon acknowledged shutdown but is still running, sending SIGTERM");
                }
                Ok(response) => warn!("Daemon refused shutdown: {:?}", response.error),
                Err(e) => warn!("Shutdown request failed: {}", e),
            }
        }
    }

    let Some(pid) = send_signal(&pid_path, libc::SIGTERM)? else {
        return Ok(format!("{} is not running", target.name()));
    };
    if wait_until_stopped(&pid_path, grace).await {
        Ok(format!("{} stopped (pid {})", target.name(), pid))
    } else {
        bail!(
            "{} (pid {}) did not stop within {:?}; try 'droid-remote force-stop'",
            target.name(),
            pid,
            grace
        )
    }
}

/// SIGKILL via the PID file. The process cannot clean up after itself, so
/// its PID file is removed here; a leftover socket is replaced on next start.
pub async fn force_stop(target: Target) -> Result<String> {
    force_stop_within(target, STOP_TIMEOUT).await
}

async fn force_stop_within(target: Target, limit: Duration) -> Result<String> {
    let pid_path = target.pid_path();
    let Some(pid) = send_signal(&pid_path, libc::SIGKILL)? else {
        return Ok(format!("{} is not running", target.name()));
    };
    if wait_until_stopped(&pid_path, limit).await {
        let _ = std::fs::remove_file(&pid_path);
    }
    Ok(format!("{} killed (pid {})", target.name(), pid))
}

/// Stop if running, then start.
pub async fn restart_daemon(config: &DaemonConfig) -> Result<(String, Child)> {
    info!("Restarting daemon...");
    let stopped = stop_or_kill(Target::Daemon).await?;
    debug!("{}", stopped);
    start_daemon(config).await
}

pub async fn restart_watchdog(config: &DaemonConfig) -> Result<String> {
    let stopped = stop_or_kill(Target::Watchdog).await?;
    debug!("{}", stopped);
    start_watchdog(config).await
}

/// Signal the process named in `pid_path`. `None` when nothing is running.
fn send_signal(pid_path: &Path, signal: libc::c_int) -> Result<Option<i32>> {
    let Some(pid) = read_pid(pid_path).filter(|pid| *pid > 0) else {
        debug!("No PID file at {:?}", pid_path);
        return Ok(None);
    };

    // SAFETY: kill has no memory-safety preconditions; pid was validated as positive.
    if unsafe { libc::kill(pid, signal) } == 0 {
        debug!("Sent signal {} to pid {}", signal, pid);
        return Ok(Some(pid));
    }

    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        debug!("Stale PID file {:?} (pid {} is gone)", pid_path, pid);
        return Ok(None);
    }
    Err(err).with_context(|| format!("Failed to signal pid {}", pid))
}

/// Poll until the PID file no longer names a live process.
async fn wait_until_stopped(pid_path: &Path, limit: Duration) -> bool {
    let start = Instant::now();
    while is_process_alive(pid_path) {
        if start.elapsed() > limit {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::paths::tests::EnvGuard;

    fn status(pin_configured: bool) -> DaemonStatus {
        DaemonStatus {
            pid: 4242,
            started_at: "2026-10-19T08:00:00+02:00".to_string(),
            uptime_secs: 90,
            adb_serial: None,
            pin_configured,
        }
    }

    #[test]
    fn test_health_messages() {
        assert_eq!(Health::NotRunning.to_string(), "Daemon not running");
        assert_eq!(
            Health::Unresponsive { pid: Some(7) }.to_string(),
            "Daemon process running but not responding (pid 7)"
        );
        assert_eq!(
            Health::Healthy(status(true)).to_string(),
            "Daemon running and healthy (pid 4242, up 90s, PIN configured)"
        );
        assert!(Health::Healthy(status(false)).is_healthy());
        assert!(!Health::NotRunning.is_healthy());
    }

    #[test]
    fn test_signal_without_pid_file_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let pid_path = dir.path().join("missing.pid");
        assert_eq!(send_signal(&pid_path, libc::SIGTERM).unwrap(), None);
    }

    #[test]
    fn test_signal_to_dead_pid_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let pid_path = dir.path().join("stale.pid");
        std::fs::write(&pid_path, i32::MAX.to_string()).unwrap();
        assert_eq!(send_signal(&pid_path, libc::SIGTERM).unwrap(), None);
    }

    #[tokio::test]
    async fn test_stop_terminates_the_recorded_process() {
        let dir = tempfile::tempdir().unwrap();
        let pid_path = dir.path().join("sleeper.pid");
        let mut child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .expect("spawn sleep");
        std::fs::write(&pid_path, child.id().to_string()).unwrap();

        let pid = send_signal(&pid_path, libc::SIGTERM).unwrap();
        assert_eq!(pid, Some(child.id() as i32));

        let status = child.wait().expect("wait for sleep");
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_stop_escalates_when_sigterm_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let _guard = EnvGuard::new(&["DROID_REMOTE_SOCKET_DIR", "DROID_REMOTE_INSTANCE"]);
        // SAFETY: We hold ENV_MUTEX via _guard
        unsafe {
            std::env::set_var("DROID_REMOTE_SOCKET_DIR", dir.path());
            std::env::set_var("DROID_REMOTE_INSTANCE", "stubborn");
        }

        let child = std::process::Command::new("sh")
            .args(["-c", "trap '' TERM; while :; do sleep 1; done"])
            .spawn()
            .expect("spawn sh");
        let pid = child.id() as i32;
        let pid_path = Target::Daemon.pid_path();
        std::fs::write(&pid_path, pid.to_string()).unwrap();
        // Let the shell install its trap before signalling it.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let waiter = std::thread::spawn(move || {
            let mut child = child;
            child.wait().expect("wait for sh")
        });

        let message = stop_or_kill_within(Target::Daemon, Duration::from_millis(500))
            .await
            .unwrap();

        assert_eq!(message, format!("Daemon killed (pid {})", pid));
        assert!(!waiter.join().unwrap().success());
        assert!(!pid_path.exists());
    }

    #[tokio::test]
    async fn test_wait_until_stopped_without_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(wait_until_stopped(&dir.path().join("none.pid"), Duration::ZERO).await);
    }
}
