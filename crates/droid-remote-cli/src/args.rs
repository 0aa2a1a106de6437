//! CLI argument parsing with clap derive macros.

use clap::{Parser, Subcommand, ValueEnum};
use droid_remote_core::itsme::interactive::{AutoActions, ScreenAction};
use droid_remote_core::itsme::parse::ScreenParser;

use crate::config::DaemonArgs;

/// Remote control for the itsme app on an Android phone.
///
/// A background daemon talks to the phone over adb, classifies what the
/// itsme app shows and performs taps on request. Commands start the daemon
/// when it is not running yet.
#[derive(Debug, Parser)]
#[command(name = "droid-remote", version)]
pub struct Cli {
    #[command(flatten)]
    pub daemon: DaemonArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Classify the current itsme screen
    #[command(after_help = "\
Examples:
  droid-remote screen                       # Whatever screen is showing
  droid-remote screen home                  # Fail unless it is the home screen
  droid-remote screen --auto-tap-card       # Open a pending action right away
  droid-remote screen --auto-tap-card --auto-enter-pin
                                            # Stop only where a decision is needed")]
    Screen(ScreenArgs),

    /// Perform one action on the current screen and show the next screen
    #[command(after_help = "\
Examples:
  droid-remote act home-tap-card            # Open the pending action
  droid-remote act action-confirm           # Confirm it
  droid-remote act poka-yoke-tap-image --image 7
                                            # Tap the icon numbered 7
  droid-remote act pinpad-enter-pin         # Type the configured itsme code")]
    Act(ActArgs),

    /// Confirm a pending action end to end with the configured itsme code
    #[command(after_help = "\
Examples:
  droid-remote confirm --app 'My Bank' --action 'Log in'
  droid-remote confirm --app 'My Bank' --action 'Log in' --tries 1

The app and action must match the pending action exactly. Run
'droid-remote known-actions' to see the ones seen so far.")]
    Confirm(ConfirmArgs),

    /// Bring itsme to the foreground
    Launch,

    /// Force-stop itsme
    ForceStopApp,

    /// Print the raw UI hierarchy of the current screen
    Dump,

    /// List the devices adb can see
    Devices,

    /// Wake the phone's screen
    Wake,

    /// Reboot the phone
    Reboot,

    /// Attach a phone over the network (adb over TCP/IP)
    #[command(after_help = "\
Examples:
  droid-remote connect 192.168.1.20         # Default port 5555
  droid-remote connect 192.168.1.20:5555 --adb-serial 192.168.1.20:5555")]
    Connect(AddressArgs),

    /// Detach a phone attached with 'connect'
    Disconnect(AddressArgs),

    /// List the app actions seen on the action screen so far
    KnownActions,

    /// Show an end-to-end usage example
    Examples,

    /// Run the daemon in the foreground (usually auto-started)
    Daemon,

    /// Start the daemon (or the watchdog) in the background
    Start(TargetArgs),

    /// Stop the daemon (or the watchdog) gracefully
    Stop(TargetArgs),

    /// Kill the daemon (or the watchdog) with SIGKILL
    ForceStop(TargetArgs),

    /// Stop, then start the daemon (or the watchdog)
    Restart(TargetArgs),

    /// Report whether the daemon (or the watchdog) is running and healthy
    Status(TargetArgs),

    /// Run the watchdog in the foreground, restarting the daemon when unhealthy
    Watchdog,
}

#[derive(Debug, clap::Args)]
pub struct AddressArgs {
    /// Device address as host[:port]
    pub address: String,
}

#[derive(Debug, clap::Args)]
pub struct TargetArgs {
    /// Act on the watchdog instead of the daemon
    #[arg(long)]
    pub watchdog: bool,
}

/// Screens the driver may handle on its own. Rating prompts are always
/// dismissed.
#[derive(Debug, Clone, Copy, Default, clap::Args)]
pub struct AutoArgs {
    /// Open a pending action from the home screen
    #[arg(long)]
    pub auto_tap_card: bool,

    /// Type the configured itsme code on the pinpad
    #[arg(long)]
    pub auto_enter_pin: bool,

    /// Dismiss the "action has expired" notice
    #[arg(long)]
    pub auto_dismiss_expired: bool,
}

impl From<AutoArgs> for AutoActions {
    fn from(args: AutoArgs) -> Self {
        AutoActions {
            tap_card: args.auto_tap_card,
            enter_pin: args.auto_enter_pin,
            dismiss_expired: args.auto_dismiss_expired,
        }
    }
}

#[derive(Debug, clap::Args)]
pub struct ScreenArgs {
    /// Screen to expect
    #[arg(value_enum, default_value_t = ParserArg::Any)]
    pub parser: ParserArg,

    #[command(flatten)]
    pub auto: AutoArgs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ParserArg {
    /// Any known screen
    Any,
    /// Home screen, with or without a pending action
    Home,
    /// Details of a pending action with confirm and reject buttons
    Action,
    /// Poka yoke icons or the pinpad
    PostConfirm,
    /// "Action has expired" notice
    ActionExpired,
    /// Play Store rating prompt
    PlayRating,
    /// Confirmation animation
    ActionConfirmed,
}

impl From<ParserArg> for ScreenParser {
    fn from(arg: ParserArg) -> Self {
        match arg {
            ParserArg::Any => ScreenParser::Any,
            ParserArg::Home => ScreenParser::Home,
            ParserArg::Action => ScreenParser::Action,
            ParserArg::PostConfirm => ScreenParser::PostConfirm,
            ParserArg::ActionExpired => ScreenParser::ActionExpired,
            ParserArg::PlayRating => ScreenParser::PlayRating,
            ParserArg::ActionConfirmed => ScreenParser::ActionConfirmed,
        }
    }
}

#[derive(Debug, clap::Args)]
pub struct ActArgs {
    /// Action to perform
    #[arg(value_enum)]
    pub action: ActionArg,

    /// Icon number to tap (poka-yoke-tap-image only)
    #[arg(long, required_if_eq("action", "poka-yoke-tap-image"))]
    pub image: Option<u32>,

    #[command(flatten)]
    pub auto: AutoArgs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ActionArg {
    HomeTapCard,
    ActionConfirm,
    ActionReject,
    ActionExpiredOk,
    PokaYokeTapImage,
    PinpadEnterPin,
    PlayRatingNotNow,
}

impl ActArgs {
    pub fn screen_action(&self) -> ScreenAction {
        match self.action {
            ActionArg::HomeTapCard => ScreenAction::HomeTapCard,
            ActionArg::ActionConfirm => ScreenAction::ActionConfirm,
            ActionArg::ActionReject => ScreenAction::ActionReject,
            ActionArg::ActionExpiredOk => ScreenAction::ActionExpiredOk,
            ActionArg::PokaYokeTapImage => ScreenAction::PokaYokeTapImage {
                image_number: self.image.unwrap_or_default(),
            },
            ActionArg::PinpadEnterPin => ScreenAction::PinpadEnterPin,
            ActionArg::PlayRatingNotNow => ScreenAction::PlayRatingNotNow,
        }
    }
}

#[derive(Debug, clap::Args)]
pub struct ConfirmArgs {
    /// App that requested the action, as shown by itsme
    #[arg(long)]
    pub app: String,

    /// The action itself, as shown by itsme
    #[arg(long)]
    pub action: String,

    /// Attempts before giving up [default: the daemon's --max-tries]
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub tries: Option<u32>,
}

/// End-to-end example text for the `examples` command.
pub const EXAMPLES_TEXT: &str = r#"End-to-end example: Log in to a bank with itsme

# 1. Start the daemon with your itsme code (or export DR_ITSME_PIN)
droid-remote start --itsme-pin 12345

# 2. Check that the phone is visible and wake it up
droid-remote devices
droid-remote wake

# 3. Trigger the login on the bank's website, then open itsme
droid-remote launch

# 4. See what itsme shows, opening the pending action directly
droid-remote screen --auto-tap-card

# 5a. Confirm step by step...
droid-remote act action-confirm --auto-enter-pin

# 5b. ...or let the driver do all of it
droid-remote confirm --app 'My Bank' --action 'Log in'

# 6. Keep the daemon running across crashes
droid-remote start --watchdog
"#;
