//! droid-remote CLI and daemon entry point.

mod args;
mod config;
mod daemon;

use std::future::Future;
use std::io::IsTerminal;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use droid_remote_core::error::ApiError;
use droid_remote_core::protocol::{Command, ResponseData};
use tracing::{error, info};

use crate::args::{Cli, Commands, TargetArgs};
use crate::config::DaemonArgs;
use crate::daemon::adb::AdbDevice;
use crate::daemon::control::{self, Target};
use crate::daemon::{watchdog, DaemonClient, DaemonServer};

fn main() {
    // Logs go to stderr so command output on stdout stays machine-readable.
    // Detached processes have stderr pointed at their log file.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .init();

    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Daemon => run_daemon(&cli.daemon),
        Commands::Watchdog => run_watchdog(&cli.daemon),
        Commands::Start(target)
        | Commands::Stop(target)
        | Commands::ForceStop(target)
        | Commands::Restart(target)
        | Commands::Status(target) => run_control(&cli.command, target, &cli.daemon),
        _ => run_client_command(&cli),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

/// Convert CLI args to a protocol Command.
///
/// Returns None for commands that don't talk to the daemon.
fn cli_to_command(command: &Commands) -> Option<Command> {
    match command {
        Commands::Screen(args) => Some(Command::ParseScreen {
            parser: args.parser.into(),
            auto: args.auto.into(),
        }),
        Commands::Act(args) => Some(Command::ScreenAction {
            action: args.screen_action(),
            auto: args.auto.into(),
        }),
        Commands::Confirm(args) => Some(Command::ConfirmKnownAction {
            app: args.app.clone(),
            action: args.action.clone(),
            max_tries: args.tries,
        }),
        Commands::Launch => Some(Command::Launch),
        Commands::ForceStopApp => Some(Command::ForceStop),
        Commands::Dump => Some(Command::ReadScreen),
        Commands::Devices => Some(Command::ListDevices),
        Commands::Wake => Some(Command::WakeUp),
        Commands::Reboot => Some(Command::Reboot),
        Commands::Connect(args) => Some(Command::Connect {
            address: args.address.clone(),
        }),
        Commands::Disconnect(args) => Some(Command::Disconnect {
            address: args.address.clone(),
        }),
        Commands::KnownActions => Some(Command::KnownActions),
        Commands::Examples
        | Commands::Daemon
        | Commands::Watchdog
        | Commands::Start(_)
        | Commands::Stop(_)
        | Commands::ForceStop(_)
        | Commands::Restart(_)
        | Commands::Status(_) => None,
    }
}

/// Run a client command by connecting to the daemon.
fn run_client_command(cli: &Cli) -> Result<()> {
    let Some(command) = cli_to_command(&cli.command) else {
        if let Commands::Examples = cli.command {
            println!("{}", crate::args::EXAMPLES_TEXT);
        }
        return Ok(());
    };

    let config = cli.daemon.resolve()?;
    let runtime = tokio::runtime::Runtime::new()?;

    runtime.block_on(async {
        // Connect to daemon (auto-starts if not running)
        let mut client = DaemonClient::connect(&config).await?;
        let response = client.send(command).await?;

        if response.success {
            if let Some(data) = response.data {
                match data {
                    ResponseData::Hierarchy { xml } => println!("{}", xml),
                    ResponseData::Ok { message } => println!("{}", message),
                    _ => println!("{}", serde_json::to_string_pretty(&data)?),
                }
            }
        } else if let Some(err) = response.error {
            print_api_error(&err);
            std::process::exit(1);
        }

        Ok(())
    })
}

/// Show an error response, including what the phone was showing.
fn print_api_error(err: &ApiError) {
    eprintln!("Error: {}", err);
    let Some(details) = &err.details else {
        return;
    };
    for rejection in &details.rejections {
        eprintln!("  {}: {}", rejection.parser, rejection.message);
    }
    for event in &details.confirm_log {
        if let Ok(json) = serde_json::to_string(event) {
            eprintln!("  {}", json);
        }
    }
    if let Some(screen) = &details.screen {
        if let Ok(json) = serde_json::to_string_pretty(screen) {
            eprintln!("Screen:\n{}", json);
        }
    }
    if let Some(hierarchy) = &details.hierarchy {
        eprintln!("Screen hierarchy:\n{}", hierarchy);
    }
}

/// Start, stop, restart or check the background processes.
fn run_control(command: &Commands, target: &TargetArgs, args: &DaemonArgs) -> Result<()> {
    let target = if target.watchdog {
        Target::Watchdog
    } else {
        Target::Daemon
    };
    let runtime = tokio::runtime::Runtime::new()?;

    let message = runtime.block_on(async {
        match (command, target) {
            (Commands::Start(_), Target::Daemon) => {
                let (message, _child) = control::start_daemon(&args.resolve()?).await?;
                Ok(message)
            }
            (Commands::Start(_), Target::Watchdog) => {
                control::start_watchdog(&args.resolve()?).await
            }
            (Commands::Restart(_), Target::Daemon) => {
                let (message, _child) = control::restart_daemon(&args.resolve()?).await?;
                Ok(message)
            }
            (Commands::Restart(_), Target::Watchdog) => {
                control::restart_watchdog(&args.resolve()?).await
            }
            (Commands::Stop(_), _) => control::stop(target).await,
            (Commands::ForceStop(_), _) => control::force_stop(target).await,
            _ => Ok(control::status(target).await),
        }
    })?;

    println!("{}", message);
    Ok(())
}

/// Run the daemon server with graceful signal handling.
///
/// The DaemonServer's Drop impl cleans up socket and PID files.
fn run_daemon(args: &DaemonArgs) -> Result<()> {
    let config = args.resolve()?;
    let runtime = tokio::runtime::Runtime::new()?;

    runtime.block_on(async {
        let phone = AdbDevice::new(config.adb_serial.clone(), config.adb_timeout());
        info!(
            "Using adb device {}",
            config.adb_serial.as_deref().unwrap_or("<default>")
        );
        let server = DaemonServer::bind(Arc::new(phone), config).await?;

        until_signalled(server.run()).await?;
        // Server is dropped here, triggering cleanup of socket and PID files
        Ok(())
    })
}

/// Run the watchdog until signalled. Its PID file is removed on the way out.
fn run_watchdog(args: &DaemonArgs) -> Result<()> {
    let config = args.resolve()?;
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(until_signalled(watchdog::run(config)))
}

/// Drive `task` until it finishes or SIGINT/SIGTERM arrives.
async fn until_signalled(task: impl Future<Output = Result<()>>) -> Result<()> {
    tokio::select! {
        result = task => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, shutting down gracefully");
            Ok(())
        }
        _ = sigterm() => {
            info!("Received SIGTERM, shutting down gracefully");
            Ok(())
        }
    }
}

/// Wait for SIGTERM signal (Unix only).
///
/// If signal registration fails, logs a warning and waits indefinitely.
#[cfg(unix)]
async fn sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!(
                "Failed to register SIGTERM handler: {}, only SIGINT will stop this process",
                e
            );
            std::future::pending::<()>().await;
        }
    }
}

/// SIGTERM is not available on non-Unix platforms; use a never-completing future.
#[cfg(not(unix))]
async fn sigterm() {
    std::future::pending::<()>().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use droid_remote_core::itsme::interactive::{AutoActions, ScreenAction};
    use droid_remote_core::itsme::parse::ScreenParser;

    fn command_for(argv: &[&str]) -> Option<Command> {
        let cli = Cli::parse_from(argv);
        cli_to_command(&cli.command)
    }

    #[test]
    fn test_act_maps_to_screen_action() {
        assert_eq!(
            command_for(&["droid-remote", "act", "action-confirm", "--auto-enter-pin"]),
            Some(Command::ScreenAction {
                action: ScreenAction::ActionConfirm,
                auto: AutoActions {
                    enter_pin: true,
                    ..AutoActions::default()
                },
            })
        );
    }

    #[test]
    fn test_screen_maps_to_parse_screen() {
        assert_eq!(
            command_for(&["droid-remote", "screen", "home"]),
            Some(Command::ParseScreen {
                parser: ScreenParser::Home,
                auto: AutoActions::default(),
            })
        );
    }

    #[test]
    fn test_confirm_passes_try_override() {
        assert_eq!(
            command_for(&[
                "droid-remote",
                "confirm",
                "--app",
                "My Bank",
                "--action",
                "Log in",
                "--tries",
                "2"
            ]),
            Some(Command::ConfirmKnownAction {
                app: "My Bank".into(),
                action: "Log in".into(),
                max_tries: Some(2),
            })
        );
    }

    #[test]
    fn test_local_commands_do_not_reach_the_daemon() {
        assert_eq!(command_for(&["droid-remote", "examples"]), None);
        assert_eq!(command_for(&["droid-remote", "status"]), None);
        assert_eq!(command_for(&["droid-remote", "dump"]), Some(Command::ReadScreen));
        assert_eq!(
            command_for(&["droid-remote", "connect", "10.0.0.2"]),
            Some(Command::Connect {
                address: "10.0.0.2".into()
            })
        );
    }
}
