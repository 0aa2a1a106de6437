//! Daemon configuration.
//!
//! Every setting comes from a flag, then a `DR_*` environment variable, then
//! a default. `--config-json` replaces all of them at once; `start` uses it to
//! hand the resolved configuration to the detached daemon.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use droid_remote_core::itsme::confirm::ConfirmOptions;
use serde::{Deserialize, Serialize};

use crate::daemon::paths;

pub const DEFAULT_ADB_TIMEOUT_SECS: u64 = 20;
pub const DEFAULT_SETTLE_MS: u64 = 1000;
pub const DEFAULT_MAX_TRIES: u32 = 3;

/// Env var carrying `--config-json` to a spawned daemon, so the PIN never
/// shows up in its argv.
pub const CONFIG_JSON_ENV: &str = "DR_CONFIG_JSON";

#[derive(Clone, PartialEq, Eq, clap::Args, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// itsme code used for confirmations and automatic PIN entry
    #[arg(long, global = true, env = "DR_ITSME_PIN", hide_env_values = true)]
    pub itsme_pin: Option<String>,

    /// adb serial of the phone (needed when several devices are attached)
    #[arg(long, global = true, env = "DR_ADB_SERIAL")]
    pub adb_serial: Option<String>,

    /// Timeout for a single adb invocation, in seconds
    #[arg(
        long,
        global = true,
        env = "DR_ADB_TIMEOUT_SECS",
        default_value_t = DEFAULT_ADB_TIMEOUT_SECS
    )]
    pub adb_timeout_secs: u64,

    /// Pause between an action and the next snapshot, in milliseconds
    #[arg(
        long,
        global = true,
        env = "DR_SETTLE_MS",
        default_value_t = DEFAULT_SETTLE_MS
    )]
    pub settle_ms: u64,

    /// Confirmation attempts before giving up
    #[arg(
        long,
        global = true,
        env = "DR_MAX_TRIES",
        default_value_t = DEFAULT_MAX_TRIES,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub max_tries: u32,

    /// JSON file collecting the app actions seen so far
    #[arg(long, global = true, env = "DR_KNOWN_ACTIONS_FILE")]
    pub known_actions_file: Option<PathBuf>,

    /// Log file for the background daemon and watchdog (appended to)
    #[arg(long, global = true, env = "DR_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            itsme_pin: None,
            adb_serial: None,
            adb_timeout_secs: DEFAULT_ADB_TIMEOUT_SECS,
            settle_ms: DEFAULT_SETTLE_MS,
            max_tries: DEFAULT_MAX_TRIES,
            known_actions_file: None,
            log_file: None,
        }
    }
}

impl fmt::Debug for DaemonConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DaemonConfig")
            .field("itsme_pin", &self.pin().map(|_| "<redacted>"))
            .field("adb_serial", &self.adb_serial)
            .field("adb_timeout_secs", &self.adb_timeout_secs)
            .field("settle_ms", &self.settle_ms)
            .field("max_tries", &self.max_tries)
            .field("known_actions_file", &self.known_actions_file)
            .field("log_file", &self.log_file)
            .finish()
    }
}

impl DaemonConfig {
    /// The configured PIN. Blank values count as unset.
    pub fn pin(&self) -> Option<&str> {
        self.itsme_pin
            .as_deref()
            .map(str::trim)
            .filter(|pin| !pin.is_empty())
    }

    pub fn adb_timeout(&self) -> Duration {
        Duration::from_secs(self.adb_timeout_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn confirm_options(&self, max_tries: Option<u32>) -> ConfirmOptions {
        ConfirmOptions {
            max_tries: max_tries.unwrap_or(self.max_tries).max(1),
            settle: self.settle(),
            ..ConfirmOptions::default()
        }
    }

    pub fn known_actions_path(&self) -> PathBuf {
        self.known_actions_file
            .clone()
            .unwrap_or_else(paths::default_known_actions_path)
    }

    /// Where a detached `process` writes its log.
    pub fn log_path(&self, process: &str) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(|| paths::default_log_path(process))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize daemon configuration")
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Invalid --config-json value")
    }
}

/// Arguments of every command that may start a daemon.
#[derive(Debug, Clone, clap::Args)]
pub struct DaemonArgs {
    #[command(flatten)]
    pub config: DaemonConfig,

    /// Complete configuration as JSON, overriding every other option
    #[arg(long, global = true, env = CONFIG_JSON_ENV, hide_env_values = true)]
    pub config_json: Option<String>,
}

impl DaemonArgs {
    pub fn resolve(&self) -> Result<DaemonConfig> {
        match &self.config_json {
            Some(json) => DaemonConfig::from_json(json),
            None => Ok(self.config.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::daemon::paths::tests::EnvGuard;

    #[derive(Debug, Parser)]
    struct TestCli {
        #[command(flatten)]
        args: DaemonArgs,
    }

    const VARS: &[&str] = &[
        "DR_ITSME_PIN",
        "DR_ADB_SERIAL",
        "DR_ADB_TIMEOUT_SECS",
        "DR_SETTLE_MS",
        "DR_MAX_TRIES",
        "DR_KNOWN_ACTIONS_FILE",
        "DR_LOG_FILE",
        "DR_CONFIG_JSON",
    ];

    fn clear_env() -> EnvGuard {
        let guard = EnvGuard::new(VARS);
        for var in VARS {
            // SAFETY: We hold ENV_MUTEX via the guard
            unsafe { std::env::remove_var(var) };
        }
        guard
    }

    #[test]
    fn test_defaults() {
        let _guard = clear_env();
        let cli = TestCli::try_parse_from(["test"]).unwrap();
        let config = cli.args.resolve().unwrap();

        assert_eq!(config, DaemonConfig::default());
        assert_eq!(config.settle(), Duration::from_secs(1));
        assert_eq!(config.pin(), None);
    }

    #[test]
    fn test_flag_beats_env() {
        let _guard = clear_env();
        // SAFETY: We hold ENV_MUTEX via _guard
        unsafe {
            std::env::set_var("DR_ITSME_PIN", "11111");
            std::env::set_var("DR_MAX_TRIES", "5");
        }

        let cli = TestCli::try_parse_from(["test", "--itsme-pin", "24680"]).unwrap();
        let config = cli.args.resolve().unwrap();

        assert_eq!(config.pin(), Some("24680"));
        assert_eq!(config.max_tries, 5);
    }

    #[test]
    fn test_zero_max_tries_is_rejected() {
        let _guard = clear_env();
        assert!(TestCli::try_parse_from(["test", "--max-tries", "0"]).is_err());
    }

    #[test]
    fn test_config_json_overrides_flags() {
        let _guard = clear_env();
        let json = DaemonConfig {
            adb_serial: Some("emulator-5554".into()),
            settle_ms: 10,
            ..DaemonConfig::default()
        }
        .to_json()
        .unwrap();

        let cli =
            TestCli::try_parse_from(["test", "--settle-ms", "999", "--config-json", &json]).unwrap();
        let config = cli.args.resolve().unwrap();

        assert_eq!(config.adb_serial.as_deref(), Some("emulator-5554"));
        assert_eq!(config.settle_ms, 10);
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let config = DaemonConfig::from_json(r#"{"itsme_pin":"13579"}"#).unwrap();
        assert_eq!(config.pin(), Some("13579"));
        assert_eq!(config.adb_timeout_secs, DEFAULT_ADB_TIMEOUT_SECS);
    }

    #[test]
    fn test_log_file_from_env_survives_config_json() {
        let _guard = clear_env();
        // SAFETY: We hold ENV_MUTEX via _guard
        unsafe { std::env::set_var("DR_LOG_FILE", "/var/log/droid-remote.log") };

        let config = TestCli::try_parse_from(["test"]).unwrap().args.resolve().unwrap();
        assert_eq!(config.log_path("daemon"), PathBuf::from("/var/log/droid-remote.log"));

        let round_trip = DaemonConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(round_trip.log_path("watchdog"), PathBuf::from("/var/log/droid-remote.log"));
    }

    #[test]
    fn test_blank_pin_counts_as_unset() {
        let config = DaemonConfig {
            itsme_pin: Some("  ".into()),
            ..DaemonConfig::default()
        };
        assert_eq!(config.pin(), None);
    }

    #[test]
    fn test_debug_redacts_pin() {
        let config = DaemonConfig {
            itsme_pin: Some("97531".into()),
            ..DaemonConfig::default()
        };
        let debug = format!("{:?}", config);
        assert!(!debug.contains("97531"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_confirm_options_use_request_override() {
        let config = DaemonConfig::default();
        assert_eq!(config.confirm_options(None).max_tries, DEFAULT_MAX_TRIES);
        assert_eq!(config.confirm_options(Some(7)).max_tries, 7);
        assert_eq!(config.confirm_options(Some(0)).max_tries, 1);
    }
}
