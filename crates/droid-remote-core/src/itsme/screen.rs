//! Classified itsme screens and the device actions each one offers.
//!
//! A [`Screen`] is a snapshot-in-time: it is built from one UI dump, acted on
//! at most once, and then thrown away. Callers re-classify after every action.

use std::fmt::Write as _;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::device::{Device, DeviceError};
use crate::geometry::{Bounds, GeometryError, Point};
use crate::itsme::pinpad::{self, SUBMIT_SYMBOL};

/// Pause between consecutive pinpad taps.
pub const PIN_TAP_INTERVAL: Duration = Duration::from_millis(50);

/// Failures while acting on a classified screen.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScreenActionError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error("poka yoke image {0} not found on screen")]
    ImageNotFound(u32),
}

/// Identifies a pending action: what is asked, by whom, and when.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionBasicInfo {
    pub action: String,
    pub app: String,
    pub time: String,
}

impl ActionBasicInfo {
    pub fn matches(&self, app: &str, action: &str) -> bool {
        self.app == app && self.action == action
    }
}

impl std::fmt::Display for ActionBasicInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} ({})", self.app, self.action, self.time)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingActionsHome {
    pub action_count: u32,
    pub basic_info: ActionBasicInfo,
    pub card_center: Point,
}

impl PendingActionsHome {
    pub async fn tap_card<D: Device + ?Sized>(&self, device: &D) -> Result<(), DeviceError> {
        debug!("Tapping action card at {}", self.card_center);
        device.tap(self.card_center).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionScreen {
    pub basic_info: ActionBasicInfo,
    /// Longer description supplied by the requesting app, if any.
    pub extra_info: Vec<String>,
    /// What is being confirmed, when the action is not a plain login.
    pub details: Vec<String>,
    pub shared_data: Vec<String>,
    pub confirm_center: Point,
    pub reject_center: Point,
}

impl ActionScreen {
    pub async fn confirm<D: Device + ?Sized>(&self, device: &D) -> Result<(), DeviceError> {
        debug!(
            "Confirming action for app {} at {}",
            self.basic_info.app, self.confirm_center
        );
        device.tap(self.confirm_center).await
    }

    pub async fn reject<D: Device + ?Sized>(&self, device: &D) -> Result<(), DeviceError> {
        debug!(
            "Rejecting action for app {} at {}",
            self.basic_info.app, self.reject_center
        );
        device.tap(self.reject_center).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PokaYokeImage {
    pub number: u32,
    pub center: Point,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PokaYokeScreen {
    pub images: Vec<PokaYokeImage>,
}

impl PokaYokeScreen {
    pub fn image(&self, number: u32) -> Option<&PokaYokeImage> {
        self.images.iter().find(|image| image.number == number)
    }

    pub async fn tap_image<D: Device + ?Sized>(
        &self,
        device: &D,
        number: u32,
    ) -> Result<(), ScreenActionError> {
        let image = self
            .image(number)
            .ok_or(ScreenActionError::ImageNotFound(number))?;
        debug!("Tapping poka yoke image {} at {}", number, image.center);
        device.tap(image.center).await?;
        Ok(())
    }
}

/// The PIN entry screen. Only the (re-centered) pad rectangle is stored; key
/// positions are derived on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinpadScreen {
    pub pad_bounds: Bounds,
}

impl PinpadScreen {
    pub fn symbol_center(&self, symbol: char) -> Result<Point, GeometryError> {
        pinpad::symbol_center(&self.pad_bounds, symbol)
    }

    pub async fn tap_symbol<D: Device + ?Sized>(
        &self,
        device: &D,
        symbol: char,
    ) -> Result<(), ScreenActionError> {
        let center = self.symbol_center(symbol)?;
        device.tap(center).await?;
        Ok(())
    }

    /// Tap every digit of `pin`, then the submit key.
    ///
    /// All symbols are resolved before the first tap so that an invalid PIN
    /// never leaves a half-entered code behind.
    pub async fn enter_pin<D: Device + ?Sized>(
        &self,
        device: &D,
        pin: &str,
    ) -> Result<(), ScreenActionError> {
        let targets = pin
            .chars()
            .chain(std::iter::once(SUBMIT_SYMBOL))
            .map(|symbol| self.symbol_center(symbol))
            .collect::<Result<Vec<_>, _>>()?;

        debug!("Entering PIN ({} taps)", targets.len());
        for target in targets {
            device.tap(target).await?;
            tokio::time::sleep(PIN_TAP_INTERVAL).await;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionExpiredScreen {
    pub ok_center: Point,
}

impl ActionExpiredScreen {
    pub async fn ok<D: Device + ?Sized>(&self, device: &D) -> Result<(), DeviceError> {
        device.tap(self.ok_center).await
    }
}

/// The Play Store "rate this app" prompt that occasionally covers itsme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayRatingScreen {
    pub not_now_center: Point,
}

impl PlayRatingScreen {
    pub async fn not_now<D: Device + ?Sized>(&self, device: &D) -> Result<(), DeviceError> {
        device.tap(self.not_now_center).await
    }
}

/// Every screen the driver knows how to recognize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "screen", rename_all = "snake_case")]
pub enum Screen {
    NoPendingActionsHome,
    PendingActionsHome(PendingActionsHome),
    Action(ActionScreen),
    PokaYoke(PokaYokeScreen),
    Pinpad(PinpadScreen),
    ActionExpired(ActionExpiredScreen),
    PlayRating(PlayRatingScreen),
    ActionConfirmed,
}

/// Data-free discriminant of [`Screen`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenKind {
    NoPendingActionsHome,
    PendingActionsHome,
    Action,
    PokaYoke,
    Pinpad,
    ActionExpired,
    PlayRating,
    ActionConfirmed,
}

impl ScreenKind {
    pub const ALL: [ScreenKind; 8] = [
        ScreenKind::NoPendingActionsHome,
        ScreenKind::PendingActionsHome,
        ScreenKind::Action,
        ScreenKind::PokaYoke,
        ScreenKind::Pinpad,
        ScreenKind::ActionExpired,
        ScreenKind::PlayRating,
        ScreenKind::ActionConfirmed,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ScreenKind::NoPendingActionsHome => "no_pending_actions_home",
            ScreenKind::PendingActionsHome => "pending_actions_home",
            ScreenKind::Action => "action",
            ScreenKind::PokaYoke => "poka_yoke",
            ScreenKind::Pinpad => "pinpad",
            ScreenKind::ActionExpired => "action_expired",
            ScreenKind::PlayRating => "play_rating",
            ScreenKind::ActionConfirmed => "action_confirmed",
        }
    }
}

impl std::fmt::Display for ScreenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Screen {
    pub fn kind(&self) -> ScreenKind {
        match self {
            Screen::NoPendingActionsHome => ScreenKind::NoPendingActionsHome,
            Screen::PendingActionsHome(_) => ScreenKind::PendingActionsHome,
            Screen::Action(_) => ScreenKind::Action,
            Screen::PokaYoke(_) => ScreenKind::PokaYoke,
            Screen::Pinpad(_) => ScreenKind::Pinpad,
            Screen::ActionExpired(_) => ScreenKind::ActionExpired,
            Screen::PlayRating(_) => ScreenKind::PlayRating,
            Screen::ActionConfirmed => ScreenKind::ActionConfirmed,
        }
    }

    /// Actions an operator can trigger on this screen, by wire name.
    pub fn available_actions(&self) -> Vec<String> {
        match self {
            Screen::NoPendingActionsHome | Screen::ActionConfirmed => Vec::new(),
            Screen::PendingActionsHome(_) => vec!["home_tap_card".into()],
            Screen::Action(_) => vec!["action_confirm".into(), "action_reject".into()],
            Screen::PokaYoke(screen) => screen
                .images
                .iter()
                .map(|image| format!("poka_yoke_tap_image {}", image.number))
                .collect(),
            Screen::Pinpad(_) => vec!["pinpad_enter_pin".into()],
            Screen::ActionExpired(_) => vec!["action_expired_ok".into()],
            Screen::PlayRating(_) => vec!["play_rating_not_now".into()],
        }
    }

    /// Human-readable rendering for operators.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        match self {
            Screen::NoPendingActionsHome => out.push_str("No pending actions"),
            Screen::PendingActionsHome(home) => {
                let _ = writeln!(out, "Pending action ({} pending)", home.action_count);
                write_basic_info(&mut out, &home.basic_info);
            }
            Screen::Action(action) => {
                out.push_str("Pending action confirmation\n");
                write_basic_info(&mut out, &action.basic_info);
                write_section(&mut out, "Shared data", &action.shared_data);
                write_section(&mut out, "Extra info", &action.extra_info);
                write_section(&mut out, "Details", &action.details);
            }
            Screen::PokaYoke(poka_yoke) => {
                let numbers: Vec<String> = poka_yoke
                    .images
                    .iter()
                    .map(|image| image.number.to_string())
                    .collect();
                let _ = write!(out, "Poka yoke: pick one of images {}", numbers.join(", "));
            }
            Screen::Pinpad(pinpad) => {
                let _ = write!(out, "PIN confirmation (pad at {})", pinpad.pad_bounds);
            }
            Screen::ActionExpired(_) => out.push_str("Action expired"),
            Screen::PlayRating(_) => out.push_str("Play Store rating prompt"),
            Screen::ActionConfirmed => out.push_str("Action successfully confirmed"),
        }
        out.trim_end().to_string()
    }
}

fn write_basic_info(out: &mut String, info: &ActionBasicInfo) {
    let _ = writeln!(out, "  {}\n  {}\n  {}", info.action, info.app, info.time);
}

fn write_section(out: &mut String, title: &str, lines: &[String]) {
    if lines.is_empty() {
        return;
    }
    let _ = writeln!(out, "{}:", title);
    for line in lines {
        let _ = writeln!(out, "  - {}", line.replace('\n', "\n    "));
    }
}
