//! Operator-facing error types with suggestions.
//!
//! Library errors are converted into an [`ApiError`] at the daemon boundary.
//! Whenever a snapshot was involved, its XML travels along in
//! [`ErrorDetails`] so the operator can see what the phone was showing.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::device::DeviceError;
use crate::itsme::confirm::{ConfirmError, ConfirmEvent};
use crate::itsme::interactive::ResolveError;
use crate::itsme::parse::{WrongScreen, WrongScreenKind};
use crate::itsme::screen::Screen;
use crate::tree::UiTree;

/// Error codes for protocol responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    WrongScreen,
    ForeignApp,
    NoPendingActions,
    UnexpectedPendingAction,
    InteractionRequired,
    ActionExpired,
    ConfirmationFailed,
    DeviceFailed,
    InvalidInput,
    InternalError,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            ErrorCode::WrongScreen => "WRONG_SCREEN",
            ErrorCode::ForeignApp => "FOREIGN_APP",
            ErrorCode::NoPendingActions => "NO_PENDING_ACTIONS",
            ErrorCode::UnexpectedPendingAction => "UNEXPECTED_PENDING_ACTION",
            ErrorCode::InteractionRequired => "INTERACTION_REQUIRED",
            ErrorCode::ActionExpired => "ACTION_EXPIRED",
            ErrorCode::ConfirmationFailed => "CONFIRMATION_FAILED",
            ErrorCode::DeviceFailed => "DEVICE_FAILED",
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        };
        f.write_str(code)
    }
}

/// One classifier's reason for rejecting a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub parser: String,
    pub message: String,
}

/// Diagnostic payload attached to screen-related errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Pretty-printed UI hierarchy at the time of the failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hierarchy: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejections: Vec<Rejection>,
    /// The classified screen that needs a human.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen: Option<Screen>,
    /// Screens a failed confirmation went through, attempt by attempt.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub confirm_log: Vec<ConfirmEvent>,
}

impl ErrorDetails {
    fn from_wrong_screen(err: &WrongScreen) -> Self {
        Self {
            hierarchy: Some(err.screen.to_xml()),
            rejections: err
                .rejections()
                .map(|(parser, message)| Rejection {
                    parser: parser.to_string(),
                    message: message.to_string(),
                })
                .collect(),
            ..Self::default()
        }
    }
}

/// An error response with operator-friendly context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    pub suggestion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " (hint: {})", suggestion)?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

impl ApiError {
    fn new(code: ErrorCode, message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            suggestion: Some(suggestion.into()),
            details: None,
        }
    }

    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = Some(details);
        self
    }

    pub fn wrong_screen(err: &WrongScreen) -> Self {
        let (code, suggestion) = match &err.kind {
            WrongScreenKind::ForeignApp { package } => (
                ErrorCode::ForeignApp,
                format!(
                    "'{}' is in the foreground. Run 'droid-remote launch' to bring itsme back",
                    if package.is_empty() {
                        "another app"
                    } else {
                        package.as_str()
                    }
                ),
            ),
            WrongScreenKind::UnknownScreen => (
                ErrorCode::WrongScreen,
                "itsme shows a screen the driver does not know. Inspect the hierarchy in the error details or run 'droid-remote dump'".to_string(),
            ),
            WrongScreenKind::Mismatch => (
                ErrorCode::WrongScreen,
                "Run 'droid-remote screen' to see which screen is showing".to_string(),
            ),
        };
        Self::new(code, err.message.clone(), suggestion)
            .with_details(ErrorDetails::from_wrong_screen(err))
    }

    pub fn no_pending_actions() -> Self {
        Self::new(
            ErrorCode::NoPendingActions,
            "No pending actions",
            "Trigger the action from the requesting app first, then retry",
        )
    }

    pub fn unexpected_pending_action(found: &str, expected_app: &str, expected_action: &str) -> Self {
        Self::new(
            ErrorCode::UnexpectedPendingAction,
            format!(
                "Pending action is {} (expected {}: {})",
                found, expected_app, expected_action
            ),
            "Handle the pending action manually with 'droid-remote screen' and 'droid-remote act'",
        )
    }

    pub fn interaction_required(reason: &str, screen: Screen) -> Self {
        let suggestion = match &screen {
            Screen::PokaYoke(_) => {
                "Pick the matching image with 'droid-remote act poka-yoke-tap-image --image <N>'"
            }
            _ => "Resolve the screen manually with 'droid-remote act'",
        };
        Self::new(
            ErrorCode::InteractionRequired,
            format!("Interaction required: {}", reason),
            suggestion,
        )
        .with_details(ErrorDetails {
            screen: Some(screen),
            ..ErrorDetails::default()
        })
    }

    pub fn action_expired() -> Self {
        Self::new(
            ErrorCode::ActionExpired,
            "Action expired",
            "Dismiss the notice with 'droid-remote act action-expired-ok' and request a new action",
        )
    }

    /// The hierarchy shown is the last snapshot taken, which may be newer
    /// than the last rejected one.
    pub fn confirmation_failed(
        tries: u32,
        last_rejection: Option<&WrongScreen>,
        last_snapshot: Option<&UiTree>,
        log: Vec<ConfirmEvent>,
    ) -> Self {
        let mut details = last_rejection
            .map(ErrorDetails::from_wrong_screen)
            .unwrap_or_default();
        if let Some(tree) = last_snapshot {
            details.hierarchy = Some(tree.to_xml());
        }
        details.confirm_log = log;
        Self::new(
            ErrorCode::ConfirmationFailed,
            format!("Failed to confirm action after {} tries", tries),
            "Check the current screen with 'droid-remote screen' and finish the confirmation manually",
        )
        .with_details(details)
    }

    pub fn device_failed(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::DeviceFailed,
            message,
            "Check that the phone is connected with 'droid-remote devices' and unlocked",
        )
    }

    pub fn missing_pin() -> Self {
        Self::invalid_input_with_suggestion(
            "No itsme PIN is configured",
            "Restart the daemon with --itsme-pin or DR_ITSME_PIN set",
        )
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InvalidInput,
            message,
            "Check the command syntax and try again",
        )
    }

    /// Create an invalid input error with a custom suggestion.
    pub fn invalid_input_with_suggestion(
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::new(ErrorCode::InvalidInput, message, suggestion)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InternalError,
            message,
            "This is an internal error. Please report it if it persists.",
        )
    }
}

impl From<&WrongScreen> for ApiError {
    fn from(err: &WrongScreen) -> Self {
        ApiError::wrong_screen(err)
    }
}

impl From<DeviceError> for ApiError {
    fn from(err: DeviceError) -> Self {
        ApiError::device_failed(err.to_string())
    }
}

impl From<ConfirmError> for ApiError {
    fn from(err: ConfirmError) -> Self {
        match err {
            ConfirmError::NoPendingActions => ApiError::no_pending_actions(),
            ConfirmError::UnexpectedPendingAction {
                found,
                expected_app,
                expected_action,
            } => ApiError::unexpected_pending_action(
                &found.to_string(),
                &expected_app,
                &expected_action,
            ),
            ConfirmError::InteractionRequired { reason, screen } => {
                ApiError::interaction_required(&reason, *screen)
            }
            ConfirmError::ActionExpired => ApiError::action_expired(),
            ConfirmError::ConfirmationFailed {
                tries,
                last_rejection,
                last_snapshot,
                log,
            } => ApiError::confirmation_failed(
                tries,
                last_rejection.as_deref(),
                last_snapshot.as_ref(),
                log,
            ),
            ConfirmError::Device(err) => err.into(),
            ConfirmError::Action(err) => ApiError::internal(err.to_string()),
        }
    }
}

impl From<ResolveError> for ApiError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Device(err) => err.into(),
            ResolveError::WrongScreen(err) => ApiError::wrong_screen(&err),
            ResolveError::MissingPin => ApiError::missing_pin(),
            ResolveError::Action(err) => ApiError::invalid_input(err.to_string()),
            err @ ResolveError::ActionNotAvailable { .. } => ApiError::invalid_input_with_suggestion(
                err.to_string(),
                "Run 'droid-remote screen' to see which actions the current screen offers",
            ),
            err @ ResolveError::TooManyRounds { .. } => ApiError::internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::itsme::fixtures;
    use crate::itsme::parse::parse_any_screen;
    use crate::itsme::screen::{PokaYokeImage, PokaYokeScreen, ScreenActionError};
    use crate::geometry::{GeometryError, Point};
    use crate::tree::UiTree;

    /// All error constructors must provide a suggestion.
    fn assert_has_suggestion(err: &ApiError, context: &str) {
        assert!(
            err.suggestion.is_some(),
            "{} should have a suggestion, but got None",
            context
        );
    }

    fn rejection_of(xml: &str) -> WrongScreen {
        parse_any_screen(&UiTree::parse(xml).unwrap()).unwrap_err()
    }

    #[test]
    fn every_constructor_has_a_suggestion() {
        let unknown = rejection_of(&fixtures::unknown_itsme());
        let poka_yoke = Screen::PokaYoke(PokaYokeScreen {
            images: vec![PokaYokeImage {
                number: 1,
                center: Point::new(0, 0),
            }],
        });
        let cases = [
            (ApiError::wrong_screen(&unknown), "wrong_screen"),
            (ApiError::no_pending_actions(), "no_pending_actions"),
            (
                ApiError::unexpected_pending_action("a", "b", "c"),
                "unexpected_pending_action",
            ),
            (
                ApiError::interaction_required("Poka yoke", poka_yoke),
                "interaction_required",
            ),
            (ApiError::action_expired(), "action_expired"),
            (
                ApiError::confirmation_failed(3, None, None, Vec::new()),
                "confirmation_failed",
            ),
            (ApiError::device_failed("adb gone"), "device_failed"),
            (ApiError::missing_pin(), "missing_pin"),
            (ApiError::invalid_input("bad"), "invalid_input"),
            (ApiError::internal("oops"), "internal"),
        ];
        for (err, context) in &cases {
            assert_has_suggestion(err, context);
        }
    }

    #[test]
    fn unknown_screen_carries_hierarchy_and_rejections() {
        let err = ApiError::from(&rejection_of(&fixtures::unknown_itsme()));

        assert_eq!(err.code, ErrorCode::WrongScreen);
        let details = err.details.unwrap();
        assert!(details.hierarchy.unwrap().contains("Settings"));
        assert_eq!(details.rejections.len(), 6);
        assert_eq!(details.rejections[0].parser, "parse_home_screen");
    }

    #[test]
    fn foreign_app_has_its_own_code() {
        let err = ApiError::from(&rejection_of(&fixtures::foreign_app()));
        assert_eq!(err.code, ErrorCode::ForeignApp);
        assert!(err.suggestion.unwrap().contains("com.android.launcher3"));
    }

    #[test]
    fn confirm_errors_map_to_codes() {
        assert_eq!(
            ApiError::from(ConfirmError::NoPendingActions).code,
            ErrorCode::NoPendingActions
        );
        assert_eq!(
            ApiError::from(ConfirmError::ActionExpired).code,
            ErrorCode::ActionExpired
        );
        let err = ApiError::from(ConfirmError::Device(DeviceError::CommandFailed {
            command: "adb".into(),
            message: "no devices/emulators found".into(),
        }));
        assert_eq!(err.code, ErrorCode::DeviceFailed);
        assert!(err.message.contains("no devices"));

        let err = ApiError::from(ConfirmError::ConfirmationFailed {
            tries: 3,
            last_rejection: Some(Box::new(rejection_of(&fixtures::unknown_itsme()))),
            last_snapshot: None,
            log: Vec::new(),
        });
        assert_eq!(err.code, ErrorCode::ConfirmationFailed);
        assert!(err.details.unwrap().hierarchy.is_some());
    }

    #[test]
    fn step_limited_confirmation_keeps_snapshot_and_log() {
        let snapshot = UiTree::parse(&fixtures::play_rating()).unwrap();
        let log = vec![ConfirmEvent {
            attempt: 1,
            screen: crate::itsme::screen::ScreenKind::PlayRating,
            step: crate::itsme::confirm::ConfirmStep::TapCard,
        }];

        let err = ApiError::from(ConfirmError::ConfirmationFailed {
            tries: 1,
            last_rejection: None,
            last_snapshot: Some(snapshot),
            log: log.clone(),
        });

        let details = err.details.unwrap();
        assert!(details.hierarchy.unwrap().contains("Not now"));
        assert!(details.rejections.is_empty());
        assert_eq!(details.confirm_log, log);

        let json = serde_json::to_string(&ErrorDetails::default()).unwrap();
        assert!(!json.contains("confirm_log"));
    }

    #[test]
    fn resolve_errors_map_to_codes() {
        assert_eq!(
            ApiError::from(ResolveError::MissingPin).code,
            ErrorCode::InvalidInput
        );
        let err = ApiError::from(ResolveError::Action(ScreenActionError::Geometry(
            GeometryError::SymbolNotFound('a'),
        )));
        assert_eq!(err.code, ErrorCode::InvalidInput);
    }

    #[test]
    fn display_format_with_suggestion() {
        let err = ApiError::no_pending_actions();
        let display = format!("{}", err);
        assert!(display.contains("[NO_PENDING_ACTIONS]"));
        assert!(display.contains("(hint:"));
    }

    #[test]
    fn json_round_trip_keeps_details() {
        let err = ApiError::from(&rejection_of(&fixtures::unknown_itsme()));
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"code\":\"WRONG_SCREEN\""));
        assert!(json.contains("\"rejections\""));

        let back: ApiError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn json_without_details_deserializes() {
        let json = r#"{"code":"INVALID_INPUT","message":"bad","suggestion":"hint"}"#;
        let err: ApiError = serde_json::from_str(json).unwrap();
        assert_eq!(err.code, ErrorCode::InvalidInput);
        assert!(err.details.is_none());
    }
}
