//! Protocol types for CLI-daemon communication.
//!
//! One JSON object per line in each direction. Requests carry an id that the
//! matching response echoes back.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::itsme::confirm::ConfirmReport;
use crate::itsme::interactive::{AutoActions, ResolvedScreen, ScreenAction};
use crate::itsme::parse::ScreenParser;
use crate::itsme::screen::Screen;

/// A request from CLI to daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub command: Command,
}

/// Commands the daemon can execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Classify the current itsme screen, optionally handling it automatically.
    ParseScreen {
        #[serde(default)]
        parser: ScreenParser,
        #[serde(default)]
        auto: AutoActions,
    },
    /// Perform one action on the current screen, then report the next one.
    ScreenAction {
        action: ScreenAction,
        #[serde(default)]
        auto: AutoActions,
    },
    /// Drive a pending action to confirmation with the configured PIN.
    ConfirmKnownAction {
        app: String,
        action: String,
        max_tries: Option<u32>,
    },
    /// Bring itsme to the foreground.
    Launch,
    /// Force-stop itsme.
    ForceStop,
    /// Raw UI hierarchy of the current screen.
    ReadScreen,
    /// Devices visible to adb.
    ListDevices,
    /// Wake the phone's screen.
    WakeUp,
    /// Reboot the phone.
    Reboot,
    /// Attach a network device (`host[:port]`) to the adb server.
    Connect { address: String },
    /// Detach a network device from the adb server.
    Disconnect { address: String },
    /// Actions seen on the action screen so far, per app.
    KnownActions,
    /// Health check.
    Status,
    /// Shutdown the daemon gracefully.
    Shutdown,
}

impl Command {
    /// Whether the command drives the phone and must not overlap with another.
    pub fn touches_device(&self) -> bool {
        !matches!(
            self,
            Command::KnownActions
                | Command::Status
                | Command::Shutdown
                | Command::ListDevices
                | Command::Connect { .. }
                | Command::Disconnect { .. }
        )
    }
}

/// A response from daemon to CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl Response {
    pub fn success(id: impl Into<String>, data: ResponseData) -> Self {
        Self {
            id: id.into(),
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: impl Into<String>, error: ApiError) -> Self {
        Self {
            id: id.into(),
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

/// Response payload variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseData {
    /// A classified screen.
    Screen(ScreenReport),
    /// Outcome of a confirmation flow.
    Confirmed(ConfirmReport),
    /// Pretty-printed UI hierarchy.
    Hierarchy { xml: String },
    Devices { devices: Vec<DeviceInfo> },
    KnownActions {
        app_actions: BTreeMap<String, BTreeSet<String>>,
    },
    Status(DaemonStatus),
    /// Generic success message.
    Ok { message: String },
}

/// A classified screen plus everything an operator needs to act on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenReport {
    pub screen: Screen,
    pub description: String,
    pub available_actions: Vec<String>,
    /// Automatic actions performed before this screen was reached.
    pub actions_taken: Vec<ScreenAction>,
}

impl From<ResolvedScreen> for ScreenReport {
    fn from(resolved: ResolvedScreen) -> Self {
        Self {
            description: resolved.screen.describe(),
            available_actions: resolved.screen.available_actions(),
            screen: resolved.screen,
            actions_taken: resolved.actions_taken,
        }
    }
}

/// One line of `adb devices -l`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub serial: String,
    pub state: String,
    /// Remaining `key:value` fields (model, transport id, ...).
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub pid: u32,
    pub started_at: String,
    pub uptime_secs: u64,
    pub adb_serial: Option<String>,
    pub pin_configured: bool,
}
