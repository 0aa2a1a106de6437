//! Keeps the daemon alive: check it periodically and restart it when it is
//! unhealthy.

use std::path::PathBuf;
use std::process::Child;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{debug, error, info, warn};

use crate::config::DaemonConfig;
use crate::daemon::control;
use crate::daemon::paths;
use crate::daemon::server::{is_process_alive, read_pid};

/// Check interval while the daemon is healthy (or was just restarted).
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Check interval once a restart did not help, to avoid a tight restart loop.
const UNHEALTHY_RETRY_INTERVAL: Duration = Duration::from_secs(30);

/// The watchdog's own PID file, removed on drop.
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Claim `path` for this process. Fails while another live process owns it.
    pub fn acquire(path: PathBuf) -> Result<Self> {
        if is_process_alive(&path) {
            bail!(
                "Watchdog is still/already running (pid {})",
                read_pid(&path).unwrap_or_default()
            );
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }
        std::fs::write(&path, std::process::id().to_string())
            .with_context(|| format!("Failed to write PID file: {:?}", path))?;
        Ok(Self { path })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if std::fs::remove_file(&self.path).is_err() {
            warn!("Failed to remove PID file {:?}", self.path);
        }
    }
}

/// Run the watchdog until cancelled.
pub async fn run(config: DaemonConfig) -> Result<()> {
    let _pid_file = PidFile::acquire(paths::get_watchdog_pid_path(None))?;
    info!("Starting droid-remote watchdog...");
    watch_forever(&config).await;
    Ok(())
}

async fn watch_forever(config: &DaemonConfig) {
    let mut is_healthy: Option<bool> = None;

    loop {
        let was_healthy = is_healthy;
        let healthy = restart_if_unhealthy(config, was_healthy).await;
        is_healthy = Some(healthy);

        if was_healthy.is_none() {
            if healthy {
                info!("Daemon was already healthy, continuing to monitor...");
            } else {
                info!("Continuing to monitor...");
            }
        }

        let restart_loop = !healthy && was_healthy == Some(false);
        tokio::time::sleep(next_check_in(restart_loop)).await;
    }
}

fn next_check_in(restart_loop: bool) -> Duration {
    if restart_loop {
        UNHEALTHY_RETRY_INTERVAL
    } else {
        HEALTH_CHECK_INTERVAL
    }
}

/// Check once, restarting when unhealthy. Returns the health observed.
async fn restart_if_unhealthy(config: &DaemonConfig, was_healthy: Option<bool>) -> bool {
    let health = control::check_health().await;
    debug!("{}", health);

    if health.is_healthy() {
        if was_healthy == Some(false) {
            info!("Daemon has healed back to perfect health.");
        }
        return true;
    }

    match was_healthy {
        Some(false) => warn!("Daemon is still not healthy ({}). Restarting again...", health),
        Some(true) => warn!("Daemon has become unhealthy ({}). Restarting...", health),
        None => warn!("Daemon is unhealthy ({}). Restarting...", health),
    }

    // A daemon ignoring SIGTERM is killed after the grace period.
    match control::restart_daemon(config).await {
        Ok((message, child)) => {
            info!("{}", message);
            reap_in_background(child);
        }
        Err(e) => error!("Failed to restart daemon: {:#}", e),
    }
    false
}

/// Wait for a daemon we spawned on a separate thread, so that once it exits
/// it does not linger as a zombie that still looks alive to `kill(pid, 0)`.
fn reap_in_background(mut child: Child) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let pid = child.id();
        match child.wait() {
            Ok(status) => warn!("Daemon (pid {}) exited with {}", pid, status),
            Err(e) => debug!("Failed to wait for daemon (pid {}): {}", pid, e),
        }
    })
}
