//! The device seam.
//!
//! Screen logic never talks to adb directly. It goes through [`Device`], which
//! the CLI implements on top of `adb` and tests implement with scripted
//! snapshots. Every method is a suspension point; callers run them strictly
//! one after another.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::geometry::Point;
use crate::tree::{SnapshotError, UiTree};

/// Failures talking to the phone. The screen logic treats these as fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("device command `{command}` failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("device command `{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("unreadable UI dump: {0}")]
    Snapshot(#[from] SnapshotError),
}

/// Operations the screen driver needs from a phone.
#[async_trait]
pub trait Device: Send + Sync {
    /// Capture and parse the current UI hierarchy.
    async fn dump_hierarchy(&self) -> Result<UiTree, DeviceError>;

    /// Tap at a device-pixel coordinate.
    async fn tap(&self, point: Point) -> Result<(), DeviceError>;

    /// Bring an app to the foreground via its launcher intent.
    async fn launch_app(&self, package: &str) -> Result<(), DeviceError>;

    async fn force_stop_app(&self, package: &str) -> Result<(), DeviceError>;
}

/// Scripted devices for tests, here and in crates built on this one.
#[cfg(any(test, feature = "test-support"))]
#[doc(hidden)]
pub mod test_support {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// Something the scripted device was asked to do.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Recorded {
        Dump,
        Tap(Point),
        Launch(String),
        ForceStop(String),
    }

    /// Replays a fixed sequence of snapshots and records every call.
    ///
    /// Each dump pops the next snapshot; the last one repeats forever.
    pub struct ScriptedDevice {
        snapshots: Mutex<VecDeque<UiTree>>,
        log: Mutex<Vec<Recorded>>,
    }

    impl ScriptedDevice {
        pub fn new<S: AsRef<str>>(xml_snapshots: &[S]) -> Self {
            let snapshots = xml_snapshots
                .iter()
                .map(|xml| UiTree::parse(xml.as_ref()).unwrap())
                .collect();
            Self {
                snapshots: Mutex::new(snapshots),
                log: Mutex::new(Vec::new()),
            }
        }

        pub fn log(&self) -> Vec<Recorded> {
            self.log.lock().unwrap().clone()
        }

        pub fn taps(&self) -> Vec<Point> {
            self.log()
                .into_iter()
                .filter_map(|entry| match entry {
                    Recorded::Tap(point) => Some(point),
                    _ => None,
                })
                .collect()
        }

        pub fn dumps(&self) -> usize {
            self.log()
                .iter()
                .filter(|entry| **entry == Recorded::Dump)
                .count()
        }
    }

    #[async_trait]
    impl Device for ScriptedDevice {
        async fn dump_hierarchy(&self) -> Result<UiTree, DeviceError> {
            self.log.lock().unwrap().push(Recorded::Dump);
            let mut snapshots = self.snapshots.lock().unwrap();
            let tree = if snapshots.len() > 1 {
                snapshots.pop_front()
            } else {
                snapshots.front().cloned()
            };
            tree.ok_or_else(|| DeviceError::CommandFailed {
                command: "dump".to_string(),
                message: "no scripted snapshot".to_string(),
            })
        }

        async fn tap(&self, point: Point) -> Result<(), DeviceError> {
            self.log.lock().unwrap().push(Recorded::Tap(point));
            Ok(())
        }

        async fn launch_app(&self, package: &str) -> Result<(), DeviceError> {
            self.log
                .lock()
                .unwrap()
                .push(Recorded::Launch(package.to_string()));
            Ok(())
        }

        async fn force_stop_app(&self, package: &str) -> Result<(), DeviceError> {
            self.log
                .lock()
                .unwrap()
                .push(Recorded::ForceStop(package.to_string()));
            Ok(())
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use test_support::{Recorded, ScriptedDevice};
