//! The phone, reached through the `adb` binary.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use droid_remote_core::device::{Device, DeviceError};
use droid_remote_core::geometry::Point;
use droid_remote_core::protocol::DeviceInfo;
use droid_remote_core::tree::UiTree;
use tokio::process::Command;
use tracing::debug;

/// Header `adb devices` prints before the device lines.
const DEVICE_LIST_FIRST_LINE: &str = "List of devices attached";

const LAUNCHER_CATEGORY: &str = "android.intent.category.LAUNCHER";

/// A phone driven through `adb`, optionally pinned to one serial.
#[derive(Debug, Clone)]
pub struct AdbDevice {
    serial: Option<String>,
    timeout: Duration,
}

impl AdbDevice {
    pub fn new(serial: Option<String>, timeout: Duration) -> Self {
        Self { serial, timeout }
    }

    /// Run `adb` for this device and return its stdout.
    async fn run(&self, args: &[&str]) -> Result<String, DeviceError> {
        let mut full_args = Vec::with_capacity(args.len() + 2);
        if let Some(serial) = &self.serial {
            full_args.extend(["-s", serial.as_str()]);
        }
        full_args.extend_from_slice(args);
        run_adb(&full_args, self.timeout).await
    }
}

/// A [`Device`] plus the housekeeping the daemon exposes to operators.
#[async_trait]
pub trait Phone: Device {
    /// Devices visible to the adb server.
    async fn list_devices(&self) -> Result<Vec<DeviceInfo>, DeviceError>;

    /// Turn the screen on. A no-op when it already is.
    async fn wake_up(&self) -> Result<(), DeviceError>;

    async fn reboot(&self) -> Result<(), DeviceError>;

    /// Attach a device over TCP/IP. Returns adb's own report.
    async fn connect(&self, address: &str) -> Result<String, DeviceError>;

    /// Detach a device attached with [`Phone::connect`].
    async fn disconnect(&self, address: &str) -> Result<String, DeviceError>;
}

#[async_trait]
impl Phone for AdbDevice {
    async fn list_devices(&self) -> Result<Vec<DeviceInfo>, DeviceError> {
        // Not pinned to our serial: the listing is how operators find it.
        let output = run_adb(&["devices", "-l"], self.timeout).await?;
        parse_device_list(&output)
    }

    async fn wake_up(&self) -> Result<(), DeviceError> {
        self.run(&["shell", "input", "keyevent", "KEYCODE_WAKEUP"])
            .await
            .map(drop)
    }

    async fn reboot(&self) -> Result<(), DeviceError> {
        self.run(&["reboot"]).await.map(drop)
    }

    // connect and disconnect talk to the adb server, not to a device.
    async fn connect(&self, address: &str) -> Result<String, DeviceError> {
        let output = run_adb(&["connect", address], self.timeout).await?;
        connection_report(&format!("adb connect {}", address), &output)
    }

    async fn disconnect(&self, address: &str) -> Result<String, DeviceError> {
        let output = run_adb(&["disconnect", address], self.timeout).await?;
        connection_report(&format!("adb disconnect {}", address), &output)
    }
}

/// adb exits with 0 even when a connection attempt fails, so the verdict is
/// in the text.
fn connection_report(command: &str, output: &str) -> Result<String, DeviceError> {
    let report = output.trim();
    let failed = ["failed", "cannot", "unable", "error", "no such device"]
        .iter()
        .any(|marker| report.to_lowercase().starts_with(marker));
    if failed || report.is_empty() {
        return Err(DeviceError::CommandFailed {
            command: command.to_string(),
            message: if report.is_empty() {
                "no output".to_string()
            } else {
                report.to_string()
            },
        });
    }
    Ok(report.to_string())
}

#[async_trait]
impl Device for AdbDevice {
    async fn dump_hierarchy(&self) -> Result<UiTree, DeviceError> {
        let output = self
            .run(&["exec-out", "uiautomator", "dump", "/dev/tty"])
            .await?;
        Ok(UiTree::parse_dump(&output)?)
    }

    async fn tap(&self, point: Point) -> Result<(), DeviceError> {
        let x = point.x.to_string();
        let y = point.y.to_string();
        self.run(&["shell", "input", "tap", &x, &y]).await.map(drop)
    }

    async fn launch_app(&self, package: &str) -> Result<(), DeviceError> {
        self.run(&["shell", "monkey", "-p", package, "-c", LAUNCHER_CATEGORY, "1"])
            .await
            .map(drop)
    }

    async fn force_stop_app(&self, package: &str) -> Result<(), DeviceError> {
        self.run(&["shell", "am", "force-stop", package])
            .await
            .map(drop)
    }
}

/// Run `adb` with a timeout, failing on a non-zero exit status.
async fn run_adb(args: &[&str], timeout: Duration) -> Result<String, DeviceError> {
    let command_line = format!("adb {}", args.join(" "));
    debug!("Running {}", command_line);

    let child = Command::new("adb")
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(timeout, child)
        .await
        .map_err(|_| DeviceError::Timeout {
            command: command_line.clone(),
            timeout,
        })?
        .map_err(|e| DeviceError::CommandFailed {
            command: command_line.clone(),
            message: e.to_string(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = match stderr.trim() {
            "" => output.status.to_string(),
            stderr => stderr.to_string(),
        };
        return Err(DeviceError::CommandFailed {
            command: command_line,
            message,
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parse the output of `adb devices -l`.
///
/// Lines the adb server prints while starting up (`* daemon ...`) may
/// precede the header; anything else before it is an error.
pub fn parse_device_list(output: &str) -> Result<Vec<DeviceInfo>, DeviceError> {
    let mut lines = output.lines().skip_while(|line| line.starts_with("* "));

    if lines.next().map(str::trim_end) != Some(DEVICE_LIST_FIRST_LINE) {
        return Err(DeviceError::CommandFailed {
            command: "adb devices -l".to_string(),
            message: format!("Unexpected output: {}", output.trim()),
        });
    }

    let devices = lines
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let serial = parts.next()?;
            let state = parts.next()?;
            Some(DeviceInfo {
                serial: serial.to_string(),
                state: state.to_string(),
                description: parts.collect::<Vec<_>>().join(" "),
            })
        })
        .collect();

    Ok(devices)
}
