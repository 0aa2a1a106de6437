//! Operator-driven screen handling.
//!
//! An operator asks for a screen, optionally letting the driver step through
//! the boring parts (tap the card, type the PIN, dismiss notices) on its own.
//! Each automatic step re-classifies the screen, so the whole thing is a
//! bounded loop with a log of what was done.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::device::{Device, DeviceError};
use crate::itsme::parse::{CaptureError, ScreenParser, WrongScreen};
use crate::itsme::screen::{Screen, ScreenActionError, ScreenKind};

/// Upper bound on automatic actions in one request.
pub const MAX_AUTO_ROUNDS: usize = 10;

/// Which screens may be handled without asking. Rating prompts are always
/// dismissed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoActions {
    pub tap_card: bool,
    pub enter_pin: bool,
    pub dismiss_expired: bool,
}

impl AutoActions {
    /// The action to take on `screen` without asking, if any.
    pub fn action_for(&self, screen: &Screen) -> Option<ScreenAction> {
        match screen {
            Screen::PendingActionsHome(_) if self.tap_card => Some(ScreenAction::HomeTapCard),
            Screen::Pinpad(_) if self.enter_pin => Some(ScreenAction::PinpadEnterPin),
            Screen::ActionExpired(_) if self.dismiss_expired => Some(ScreenAction::ActionExpiredOk),
            Screen::PlayRating(_) => Some(ScreenAction::PlayRatingNotNow),
            _ => None,
        }
    }
}

/// A single named device action on a specific screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum ScreenAction {
    HomeTapCard,
    ActionConfirm,
    ActionReject,
    ActionExpiredOk,
    PokaYokeTapImage { image_number: u32 },
    PinpadEnterPin,
    PlayRatingNotNow,
}

impl ScreenAction {
    pub fn name(&self) -> &'static str {
        match self {
            ScreenAction::HomeTapCard => "home_tap_card",
            ScreenAction::ActionConfirm => "action_confirm",
            ScreenAction::ActionReject => "action_reject",
            ScreenAction::ActionExpiredOk => "action_expired_ok",
            ScreenAction::PokaYokeTapImage { .. } => "poka_yoke_tap_image",
            ScreenAction::PinpadEnterPin => "pinpad_enter_pin",
            ScreenAction::PlayRatingNotNow => "play_rating_not_now",
        }
    }

    /// Classifier for the screen this action applies to.
    pub fn expected_parser(&self) -> ScreenParser {
        match self {
            ScreenAction::HomeTapCard => ScreenParser::Home,
            ScreenAction::ActionConfirm | ScreenAction::ActionReject => ScreenParser::Action,
            ScreenAction::ActionExpiredOk => ScreenParser::ActionExpired,
            ScreenAction::PokaYokeTapImage { .. } | ScreenAction::PinpadEnterPin => {
                ScreenParser::PostConfirm
            }
            ScreenAction::PlayRatingNotNow => ScreenParser::PlayRating,
        }
    }

    /// Perform this action on an already classified `screen`.
    pub async fn perform<D: Device + ?Sized>(
        &self,
        device: &D,
        screen: &Screen,
        pin: Option<&str>,
    ) -> Result<(), ResolveError> {
        debug!("Performing {} on {}", self.name(), screen.kind());
        match (self, screen) {
            (ScreenAction::HomeTapCard, Screen::PendingActionsHome(home)) => {
                home.tap_card(device).await?
            }
            (ScreenAction::ActionConfirm, Screen::Action(action)) => action.confirm(device).await?,
            (ScreenAction::ActionReject, Screen::Action(action)) => action.reject(device).await?,
            (ScreenAction::ActionExpiredOk, Screen::ActionExpired(expired)) => {
                expired.ok(device).await?
            }
            (ScreenAction::PokaYokeTapImage { image_number }, Screen::PokaYoke(poka_yoke)) => {
                poka_yoke.tap_image(device, *image_number).await?
            }
            (ScreenAction::PinpadEnterPin, Screen::Pinpad(pinpad)) => {
                let pin = pin.ok_or(ResolveError::MissingPin)?;
                pinpad.enter_pin(device, pin).await?
            }
            (ScreenAction::PlayRatingNotNow, Screen::PlayRating(rating)) => {
                rating.not_now(device).await?
            }
            (action, screen) => {
                return Err(ResolveError::ActionNotAvailable {
                    action: action.name(),
                    screen: screen.kind(),
                })
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for ScreenAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScreenAction::PokaYokeTapImage { image_number } => {
                write!(f, "{} {}", self.name(), image_number)
            }
            _ => f.write_str(self.name()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedScreen {
    pub screen: Screen,
    /// Actions performed before `screen` was reached, oldest first.
    pub actions_taken: Vec<ScreenAction>,
}

#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    WrongScreen(#[from] WrongScreen),

    #[error(transparent)]
    Action(ScreenActionError),

    #[error("PIN entry requested but no PIN is configured")]
    MissingPin,

    #[error("{action} is not available on the {screen} screen")]
    ActionNotAvailable {
        action: &'static str,
        screen: ScreenKind,
    },

    #[error("screen still needs handling after {} automatic actions", .actions_taken.len())]
    TooManyRounds { actions_taken: Vec<ScreenAction> },
}

impl From<CaptureError> for ResolveError {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::Device(err) => ResolveError::Device(err),
            CaptureError::WrongScreen(err) => ResolveError::WrongScreen(err),
        }
    }
}

impl From<ScreenActionError> for ResolveError {
    fn from(err: ScreenActionError) -> Self {
        match err {
            ScreenActionError::Device(err) => ResolveError::Device(err),
            other => ResolveError::Action(other),
        }
    }
}

/// Classify the current screen with `parser`, handling it automatically as
/// long as `auto` allows, and return the first screen that needs a decision.
pub async fn resolve_screen<D: Device + ?Sized>(
    device: &D,
    parser: ScreenParser,
    auto: AutoActions,
    pin: Option<&str>,
    settle: Duration,
) -> Result<ResolvedScreen, ResolveError> {
    let mut actions_taken = Vec::new();
    loop {
        let screen = parser.capture(device).await?;
        let Some(action) = auto.action_for(&screen) else {
            return Ok(ResolvedScreen {
                screen,
                actions_taken,
            });
        };
        if actions_taken.len() >= MAX_AUTO_ROUNDS {
            return Err(ResolveError::TooManyRounds { actions_taken });
        }

        info!("Automatically performing {}", action);
        action.perform(device, &screen, pin).await?;
        actions_taken.push(action);
        tokio::time::sleep(settle).await;
    }
}

/// Perform `action` on a fresh snapshot of its screen, wait for the UI to
/// settle, then report whatever screen follows.
pub async fn perform_screen_action<D: Device + ?Sized>(
    device: &D,
    action: ScreenAction,
    auto: AutoActions,
    pin: Option<&str>,
    settle: Duration,
) -> Result<ResolvedScreen, ResolveError> {
    let screen = action.expected_parser().capture(device).await?;
    info!("Performing {}", action);
    action.perform(device, &screen, pin).await?;
    tokio::time::sleep(settle).await;

    let mut resolved = resolve_screen(device, ScreenParser::Any, auto, pin, settle).await?;
    resolved.actions_taken.insert(0, action);
    Ok(resolved)
}
