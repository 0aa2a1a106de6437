//! Driving a pending action to confirmation.
//!
//! The UI gives no "done" signal, so every step re-reads the screen, acts on
//! what it finds and records how far the flow has progressed. An attempt ends
//! when the action is confirmed, when a screen needs a human, or when it stops
//! making sense; the outer loop then starts over from the home screen.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::device::{Device, DeviceError};
use crate::itsme::parse::{parse_any_screen, WrongScreen};
use crate::itsme::screen::{ActionBasicInfo, Screen, ScreenActionError, ScreenKind};
use crate::tree::UiTree;

pub const DEFAULT_MAX_TRIES: u32 = 3;
pub const DEFAULT_MAX_STEPS: u32 = 12;
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(500);

/// Progress through a confirmation. Only the ordering matters: seeing the
/// empty home screen before [`ConfirmStep::Pin`] means there was nothing to
/// confirm, after it means the confirmation went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmStep {
    TapCard,
    Confirm,
    PokaYoke,
    Pin,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmOptions {
    /// Attempts before giving up.
    pub max_tries: u32,
    /// Screens classified per attempt. Bounds loops on screens that do not
    /// advance progress, such as the rating prompt.
    pub max_steps: u32,
    /// Pause after each action before the next snapshot.
    pub settle: Duration,
}

impl Default for ConfirmOptions {
    fn default() -> Self {
        Self {
            max_tries: DEFAULT_MAX_TRIES,
            max_steps: DEFAULT_MAX_STEPS,
            settle: DEFAULT_SETTLE,
        }
    }
}

/// One classified screen and the progress it led to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmEvent {
    pub attempt: u32,
    pub screen: ScreenKind,
    pub step: ConfirmStep,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmReport {
    pub message: String,
    pub attempts: u32,
    pub log: Vec<ConfirmEvent>,
}

#[derive(Debug, Clone, Error)]
pub enum ConfirmError {
    #[error("no pending actions")]
    NoPendingActions,

    #[error("unexpected pending action {found} (expected {expected_app}: {expected_action})")]
    UnexpectedPendingAction {
        found: ActionBasicInfo,
        expected_app: String,
        expected_action: String,
    },

    /// The flow reached a screen only a human can resolve.
    #[error("interaction required: {reason}")]
    InteractionRequired { reason: String, screen: Box<Screen> },

    #[error("action expired")]
    ActionExpired,

    #[error("failed to confirm action after {tries} tries")]
    ConfirmationFailed {
        tries: u32,
        last_rejection: Option<Box<WrongScreen>>,
        /// The most recent snapshot, whatever ended the last attempt.
        last_snapshot: Option<UiTree>,
        log: Vec<ConfirmEvent>,
    },

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Action(#[from] ScreenActionError),
}

enum AttemptOutcome {
    Done,
    Unrecognized(WrongScreen),
    StepLimit,
}

/// State carried across attempts.
#[derive(Default)]
struct Progress {
    log: Vec<ConfirmEvent>,
    last_snapshot: Option<UiTree>,
    /// Set once the PIN was submitted. The action may then already be
    /// confirmed, so later attempts must not read the empty home screen as
    /// "nothing was pending".
    pin_submitted: bool,
}

/// Confirm the pending action `action` requested by `app`.
///
/// Protocol failures (nothing pending, a different action pending, poka yoke,
/// expiry) and device failures return immediately. Unrecognized screens and
/// attempts that exceed `max_steps` are retried up to `max_tries` times.
pub async fn confirm_app_action<D: Device + ?Sized>(
    device: &D,
    pin: &str,
    app: &str,
    action: &str,
    options: &ConfirmOptions,
) -> Result<ConfirmReport, ConfirmError> {
    let mut progress = Progress::default();
    let mut last_rejection = None;

    for attempt in 1..=options.max_tries {
        info!(
            "Confirming {}: {} (attempt {}/{})",
            app, action, attempt, options.max_tries
        );
        match run_attempt(device, pin, app, action, options, attempt, &mut progress).await? {
            AttemptOutcome::Done => {
                info!("Confirmed app action {}: {}", app, action);
                return Ok(ConfirmReport {
                    message: format!("Confirmed app action {app}: {action}"),
                    attempts: attempt,
                    log: progress.log,
                });
            }
            AttemptOutcome::Unrecognized(rejection) => {
                warn!("Attempt {} hit an unrecognized screen: {}", attempt, rejection);
                last_rejection = Some(Box::new(rejection));
            }
            AttemptOutcome::StepLimit => {
                warn!(
                    "Attempt {} did not finish within {} screens",
                    attempt, options.max_steps
                );
            }
        }
    }

    Err(ConfirmError::ConfirmationFailed {
        tries: options.max_tries,
        last_rejection,
        last_snapshot: progress.last_snapshot,
        log: progress.log,
    })
}

async fn run_attempt<D: Device + ?Sized>(
    device: &D,
    pin: &str,
    app: &str,
    action: &str,
    options: &ConfirmOptions,
    attempt: u32,
    progress: &mut Progress,
) -> Result<AttemptOutcome, ConfirmError> {
    let mut last_completed = if progress.pin_submitted {
        ConfirmStep::Pin
    } else {
        ConfirmStep::TapCard
    };

    for _ in 0..options.max_steps {
        let tree = device.dump_hierarchy().await?;
        progress.last_snapshot = Some(tree.clone());
        let screen = match parse_any_screen(&tree) {
            Ok(screen) => screen,
            Err(rejection) => return Ok(AttemptOutcome::Unrecognized(rejection)),
        };

        last_completed = confirm_step(device, pin, app, action, &screen, last_completed).await?;
        progress.pin_submitted |= last_completed == ConfirmStep::Pin;
        progress.log.push(ConfirmEvent {
            attempt,
            screen: screen.kind(),
            step: last_completed,
        });
        if last_completed == ConfirmStep::Done {
            return Ok(AttemptOutcome::Done);
        }

        if !options.settle.is_zero() {
            tokio::time::sleep(options.settle).await;
        }
    }

    Ok(AttemptOutcome::StepLimit)
}

/// Act on one classified screen and return the new progress marker.
pub async fn confirm_step<D: Device + ?Sized>(
    device: &D,
    pin: &str,
    app: &str,
    action: &str,
    screen: &Screen,
    last_completed: ConfirmStep,
) -> Result<ConfirmStep, ConfirmError> {
    debug!("{} after {:?}", screen.kind(), last_completed);
    match screen {
        Screen::NoPendingActionsHome => {
            if last_completed < ConfirmStep::Pin {
                Err(ConfirmError::NoPendingActions)
            } else {
                Ok(ConfirmStep::Done)
            }
        }
        Screen::PendingActionsHome(home) => {
            if !home.basic_info.matches(app, action) {
                return Err(ConfirmError::UnexpectedPendingAction {
                    found: home.basic_info.clone(),
                    expected_app: app.to_string(),
                    expected_action: action.to_string(),
                });
            }
            home.tap_card(device).await?;
            Ok(ConfirmStep::TapCard)
        }
        Screen::Action(action_screen) => {
            action_screen.confirm(device).await?;
            Ok(ConfirmStep::Confirm)
        }
        Screen::PokaYoke(_) => Err(ConfirmError::InteractionRequired {
            reason: "Poka yoke".to_string(),
            screen: Box::new(screen.clone()),
        }),
        // A second pinpad means the PIN was refused. Typing it again risks
        // locking the account.
        Screen::Pinpad(_) if last_completed >= ConfirmStep::Pin => {
            Err(ConfirmError::InteractionRequired {
                reason: "Pinpad shown again after entering the PIN".to_string(),
                screen: Box::new(screen.clone()),
            })
        }
        Screen::Pinpad(pinpad) => {
            pinpad.enter_pin(device, pin).await?;
            Ok(ConfirmStep::Pin)
        }
        Screen::ActionExpired(_) => Err(ConfirmError::ActionExpired),
        Screen::PlayRating(rating) => {
            rating.not_now(device).await?;
            Ok(last_completed)
        }
        Screen::ActionConfirmed => Ok(ConfirmStep::Done),
    }
}
