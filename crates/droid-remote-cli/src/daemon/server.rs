//! Unix socket server for the daemon process.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use droid_remote_core::device::Device;
use droid_remote_core::error::ApiError;
use droid_remote_core::itsme::confirm::confirm_app_action;
use droid_remote_core::itsme::interactive::{
    perform_screen_action, resolve_screen, AutoActions, ResolvedScreen, ScreenAction,
};
use droid_remote_core::itsme::parse::ScreenParser;
use droid_remote_core::itsme::screen::Screen;
use droid_remote_core::itsme::ITSME_PACKAGE;
use droid_remote_core::protocol::{
    Command, DaemonStatus, Request, Response, ResponseData, ScreenReport,
};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Mutex, Notify, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::DaemonConfig;
use crate::daemon::adb::Phone;
use crate::daemon::known_actions::KnownActionsStore;
use crate::daemon::paths;

/// Maximum number of concurrent client connections to prevent resource exhaustion.
const MAX_CONNECTIONS: usize = 100;

/// How long to wait for in-flight connections to complete during shutdown.
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum request size in bytes.
const MAX_REQUEST_SIZE: usize = 1024 * 1024;

/// Everything a request handler needs.
struct DaemonState {
    phone: Arc<dyn Phone>,
    /// Held by every command that drives the phone, so flows never interleave.
    phone_lock: Mutex<()>,
    config: DaemonConfig,
    known_actions: KnownActionsStore,
    started_at: DateTime<Local>,
    started: Instant,
}

/// The daemon server that listens for client connections.
pub struct DaemonServer {
    listener: UnixListener,
    socket_path: PathBuf,
    pid_path: PathBuf,
    state: Arc<DaemonState>,
    /// Semaphore to limit concurrent connections and prevent resource exhaustion.
    connection_semaphore: Arc<Semaphore>,
    /// Shutdown signal for graceful termination (allows Drop to run and clean up files).
    shutdown: Arc<Notify>,
}

impl DaemonServer {
    /// Create a new daemon server bound to the current instance's socket.
    pub async fn bind(phone: Arc<dyn Phone>, config: DaemonConfig) -> Result<Self> {
        paths::ensure_socket_dir().context("Failed to create socket directory")?;
        let socket_path = paths::get_socket_path(None);
        let pid_path = paths::get_pid_path(None);
        Self::bind_to(socket_path, pid_path, phone, config).await
    }

    /// Create a new daemon server bound to a specific socket path.
    ///
    /// Uses a bind-first approach to avoid TOCTOU race conditions:
    /// 1. Try to bind directly
    /// 2. If socket in use, check PID file to see if daemon is alive
    /// 3. If daemon dead, remove stale socket and retry
    /// 4. If daemon alive, return error
    pub async fn bind_to(
        socket_path: PathBuf,
        pid_path: PathBuf,
        phone: Arc<dyn Phone>,
        config: DaemonConfig,
    ) -> Result<Self> {
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create socket directory for {:?}", socket_path)
            })?;
        }

        // Write the PID right after bind, so nobody sees our socket without
        // a PID file and takes us for dead.
        let write_pid = |pid_path: &PathBuf| -> Result<()> {
            std::fs::write(pid_path, std::process::id().to_string())
                .with_context(|| format!("Failed to write PID file: {:?}", pid_path))
        };

        let listener = match UnixListener::bind(&socket_path) {
            Ok(l) => {
                write_pid(&pid_path)?;
                l
            }
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                if is_process_alive(&pid_path) {
                    anyhow::bail!(
                        "Daemon already running (socket {:?} in use, PID file valid)",
                        socket_path
                    );
                }

                // Don't follow symlinks (could delete unintended files)
                let metadata = std::fs::symlink_metadata(&socket_path)
                    .with_context(|| format!("Failed to stat socket path: {:?}", socket_path))?;

                if metadata.file_type().is_symlink() {
                    anyhow::bail!(
                        "Socket path {:?} is a symlink, refusing to delete for safety",
                        socket_path
                    );
                }

                #[cfg(unix)]
                {
                    use std::os::unix::fs::FileTypeExt;
                    if !metadata.file_type().is_socket() {
                        anyhow::bail!(
                            "Path {:?} exists but is not a socket file (type: {:?})",
                            socket_path,
                            metadata.file_type()
                        );
                    }
                }

                info!("Removing stale socket from dead daemon");
                std::fs::remove_file(&socket_path)
                    .with_context(|| format!("Failed to remove stale socket: {:?}", socket_path))?;

                let l = UnixListener::bind(&socket_path)
                    .with_context(|| format!("Failed to bind to socket: {:?}", socket_path))?;
                write_pid(&pid_path)?;
                l
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to bind to socket: {:?}", socket_path));
            }
        };

        info!("Daemon listening on {:?}", socket_path);
        debug!("Configuration: {:?}", config);

        let known_actions = KnownActionsStore::new(config.known_actions_path());
        Ok(Self {
            listener,
            socket_path,
            pid_path,
            state: Arc::new(DaemonState {
                phone,
                phone_lock: Mutex::new(()),
                config,
                known_actions,
                started_at: Local::now(),
                started: Instant::now(),
            }),
            connection_semaphore: Arc::new(Semaphore::new(MAX_CONNECTIONS)),
            shutdown: Arc::new(Notify::new()),
        })
    }

    /// Run the server, accepting connections and handling requests.
    ///
    /// On shutdown, waits for in-flight connections to complete (with timeout).
    /// Returns when shutdown is signaled, allowing Drop to clean up socket/PID files.
    pub async fn run(&self) -> Result<()> {
        let mut connection_tasks: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let permit = match self.connection_semaphore.clone().try_acquire_owned() {
                                Ok(permit) => permit,
                                Err(_) => {
                                    warn!(
                                        "Connection limit ({}) reached, rejecting new connection",
                                        MAX_CONNECTIONS
                                    );
                                    drop(stream);
                                    continue;
                                }
                            };

                            debug!("Accepted new connection");
                            let state = self.state.clone();
                            let shutdown = self.shutdown.clone();
                            connection_tasks.spawn(async move {
                                // Permit is held for the lifetime of the connection handler
                                let _permit = permit;
                                if let Err(e) = handle_connection(stream, state, shutdown).await {
                                    error!("Connection error: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                // Reap completed connection tasks to prevent unbounded growth
                Some(_) = connection_tasks.join_next(), if !connection_tasks.is_empty() => {}
                _ = self.shutdown.notified() => {
                    info!("Shutdown signal received, waiting for in-flight connections");
                    break;
                }
            }
        }

        if !connection_tasks.is_empty() {
            info!(
                "Waiting for {} in-flight connection(s) to complete",
                connection_tasks.len()
            );

            let drained = tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, async {
                while connection_tasks.join_next().await.is_some() {}
            })
            .await;

            if drained.is_err() {
                warn!(
                    "Graceful shutdown timed out after {:?}, aborting {} connection(s)",
                    GRACEFUL_SHUTDOWN_TIMEOUT,
                    connection_tasks.len()
                );
                connection_tasks.abort_all();
            }
        }

        Ok(())
    }
}

impl Drop for DaemonServer {
    fn drop(&mut self) {
        if self.socket_path.exists() && std::fs::remove_file(&self.socket_path).is_err() {
            warn!("Failed to remove socket on shutdown");
        }
        if self.pid_path.exists() && std::fs::remove_file(&self.pid_path).is_err() {
            warn!("Failed to remove PID file on shutdown");
        }
    }
}

/// Read a PID file. `None` when missing or garbled.
pub(crate) fn read_pid(pid_path: &Path) -> Option<i32> {
    std::fs::read_to_string(pid_path).ok()?.trim().parse().ok()
}

/// Check whether the process named by a PID file is still alive.
pub(crate) fn is_process_alive(pid_path: &Path) -> bool {
    match read_pid(pid_path) {
        // SAFETY: signal 0 delivers nothing; it only checks that the process
        // exists and that we may signal it.
        Some(pid) if pid > 0 => unsafe { libc::kill(pid, 0) == 0 },
        _ => false,
    }
}

/// Read a line with a maximum size limit to prevent memory DoS.
///
/// Returns the number of bytes read (0 means EOF).
/// Returns an error if the line exceeds max_size before finding a newline.
async fn read_line_bounded<R: tokio::io::AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut String,
    max_size: usize,
) -> Result<usize> {
    use tokio::io::AsyncBufReadExt;

    let mut total = 0;
    let mut bytes = Vec::new();

    loop {
        let available = reader
            .fill_buf()
            .await
            .context("Failed to read from client")?;

        if available.is_empty() {
            break;
        }

        let newline_pos = available.iter().position(|&b| b == b'\n');
        let bytes_to_consume = newline_pos.map(|p| p + 1).unwrap_or(available.len());

        if total + bytes_to_consume > max_size {
            anyhow::bail!("Request too large: exceeded {} byte limit", max_size);
        }

        // Validate UTF-8 once at the end; chunks may split a character.
        bytes.extend_from_slice(&available[..bytes_to_consume]);
        total += bytes_to_consume;
        reader.consume(bytes_to_consume);

        if newline_pos.is_some() {
            break;
        }
    }

    let line = std::str::from_utf8(&bytes).context("Invalid UTF-8 in request")?;
    buf.push_str(line);
    Ok(total)
}

/// Handle a single client connection.
async fn handle_connection(
    stream: UnixStream,
    state: Arc<DaemonState>,
    shutdown: Arc<Notify>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();

        let bytes_read = read_line_bounded(&mut reader, &mut line, MAX_REQUEST_SIZE).await?;
        if bytes_read == 0 {
            debug!("Client disconnected");
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        debug!("Received: {} bytes", trimmed.len());

        let response = match serde_json::from_str::<Request>(trimmed) {
            Ok(request) => handle_request(request, &state, &shutdown).await,
            Err(e) => Response::error(
                "unknown",
                ApiError::invalid_input_with_suggestion(
                    format!("Invalid JSON request: {}", e),
                    "Ensure the request is valid JSON with 'id' and 'command' fields. Example: {\"id\":\"1\",\"command\":{\"command\":\"status\"}}",
                ),
            ),
        };

        let response_json =
            serde_json::to_string(&response).context("Failed to serialize response")?;

        writer
            .write_all(response_json.as_bytes())
            .await
            .context("Failed to write response")?;
        writer
            .write_all(b"\n")
            .await
            .context("Failed to write newline")?;
        writer.flush().await.context("Failed to flush")?;
    }

    Ok(())
}

/// Handle a single request and return a response.
async fn handle_request(request: Request, state: &DaemonState, shutdown: &Arc<Notify>) -> Response {
    debug!("Handling command: {:?}", request.command);

    let _phone_guard = if request.command.touches_device() {
        Some(state.phone_lock.lock().await)
    } else {
        None
    };

    let result = match request.command {
        Command::ParseScreen { parser, auto } => handle_parse_screen(state, parser, auto).await,
        Command::ScreenAction { action, auto } => handle_screen_action(state, action, auto).await,
        Command::ConfirmKnownAction {
            app,
            action,
            max_tries,
        } => handle_confirm(state, &app, &action, max_tries).await,
        Command::Launch => state
            .phone
            .launch_app(ITSME_PACKAGE)
            .await
            .map(|()| ok("itsme launched"))
            .map_err(ApiError::from),
        Command::ForceStop => state
            .phone
            .force_stop_app(ITSME_PACKAGE)
            .await
            .map(|()| ok("itsme force-stopped"))
            .map_err(ApiError::from),
        Command::ReadScreen => state
            .phone
            .dump_hierarchy()
            .await
            .map(|tree| ResponseData::Hierarchy { xml: tree.to_xml() })
            .map_err(ApiError::from),
        Command::ListDevices => state
            .phone
            .list_devices()
            .await
            .map(|devices| ResponseData::Devices { devices })
            .map_err(ApiError::from),
        Command::WakeUp => state
            .phone
            .wake_up()
            .await
            .map(|()| ok("Screen woken up"))
            .map_err(ApiError::from),
        Command::Reboot => state
            .phone
            .reboot()
            .await
            .map(|()| ok("Phone is rebooting"))
            .map_err(ApiError::from),
        Command::Connect { address } => handle_connection_change(state, &address, true).await,
        Command::Disconnect { address } => {
            handle_connection_change(state, &address, false).await
        }
        Command::KnownActions => handle_known_actions(state),
        Command::Status => Ok(handle_status(state)),
        Command::Shutdown => Ok(handle_shutdown(shutdown)),
    };

    match result {
        Ok(data) => Response::success(request.id, data),
        Err(e) => {
            warn!("Request {} failed: {}", request.id, e);
            Response::error(request.id, e)
        }
    }
}

fn ok(message: &str) -> ResponseData {
    ResponseData::Ok {
        message: message.to_string(),
    }
}

async fn handle_connection_change(
    state: &DaemonState,
    address: &str,
    connect: bool,
) -> Result<ResponseData, ApiError> {
    let address = address.trim();
    if address.is_empty() || address.chars().any(char::is_whitespace) {
        return Err(ApiError::invalid_input(format!(
            "Invalid device address '{}', expected host[:port]",
            address
        )));
    }
    let report = if connect {
        state.phone.connect(address).await?
    } else {
        state.phone.disconnect(address).await?
    };
    info!("{}", report);
    Ok(ResponseData::Ok { message: report })
}

async fn handle_parse_screen(
    state: &DaemonState,
    parser: ScreenParser,
    auto: AutoActions,
) -> Result<ResponseData, ApiError> {
    let resolved = resolve_screen(
        &*state.phone,
        parser,
        auto,
        state.config.pin(),
        state.config.settle(),
    )
    .await?;
    Ok(screen_report(state, resolved))
}

async fn handle_screen_action(
    state: &DaemonState,
    action: ScreenAction,
    auto: AutoActions,
) -> Result<ResponseData, ApiError> {
    let resolved = perform_screen_action(
        &*state.phone,
        action,
        auto,
        state.config.pin(),
        state.config.settle(),
    )
    .await?;
    Ok(screen_report(state, resolved))
}

async fn handle_confirm(
    state: &DaemonState,
    app: &str,
    action: &str,
    max_tries: Option<u32>,
) -> Result<ResponseData, ApiError> {
    if app.trim().is_empty() || action.trim().is_empty() {
        return Err(ApiError::invalid_input_with_suggestion(
            "Both an app and an action are required",
            "Run 'droid-remote known-actions' to list the actions seen so far",
        ));
    }
    let pin = state.config.pin().ok_or_else(ApiError::missing_pin)?;

    let options = state.config.confirm_options(max_tries);
    let report = confirm_app_action(&*state.phone, pin, app, action, &options).await?;
    remember_action(state, app, action);
    Ok(ResponseData::Confirmed(report))
}

fn handle_known_actions(state: &DaemonState) -> Result<ResponseData, ApiError> {
    state
        .known_actions
        .load()
        .map(|known| ResponseData::KnownActions {
            app_actions: known.app_actions,
        })
        .map_err(|e| ApiError::internal(format!("{:#}", e)))
}

fn handle_status(state: &DaemonState) -> ResponseData {
    ResponseData::Status(DaemonStatus {
        pid: std::process::id(),
        started_at: state.started_at.to_rfc3339(),
        uptime_secs: state.started.elapsed().as_secs(),
        adb_serial: state.config.adb_serial.clone(),
        pin_configured: state.config.pin().is_some(),
    })
}

/// Signal the run loop to exit once the response had time to flush.
/// The DaemonServer's Drop impl cleans up the socket and PID files.
fn handle_shutdown(shutdown: &Arc<Notify>) -> ResponseData {
    info!("Received shutdown command, stopping daemon");

    let shutdown = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.notify_waiters();
    });

    ok("Daemon shutting down")
}

fn screen_report(state: &DaemonState, resolved: ResolvedScreen) -> ResponseData {
    if let Screen::Action(action) = &resolved.screen {
        remember_action(state, &action.basic_info.app, &action.basic_info.action);
    }
    ResponseData::Screen(ScreenReport::from(resolved))
}

/// Store failures are logged; they never fail the request that saw the action.
fn remember_action(state: &DaemonState, app: &str, action: &str) {
    if let Err(e) = state.known_actions.record(app, action) {
        warn!("Failed to save known action {}: {}: {:#}", app, action, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use droid_remote_core::device::{DeviceError, Recorded, ScriptedDevice};
    use droid_remote_core::error::ErrorCode;
    use droid_remote_core::itsme::fixtures::{self, ACTION, APP};
    use droid_remote_core::itsme::screen::ScreenKind;
    use droid_remote_core::protocol::DeviceInfo;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::UnixStream;
    use tokio::task::JoinHandle;
    use tokio::time::timeout;
    use uuid::Uuid;

    #[async_trait]
    impl Phone for ScriptedDevice {
        async fn list_devices(&self) -> Result<Vec<DeviceInfo>, DeviceError> {
            Ok(vec![DeviceInfo {
                serial: "emulator-5554".to_string(),
                state: "device".to_string(),
                description: "model:Pixel_7".to_string(),
            }])
        }

        async fn wake_up(&self) -> Result<(), DeviceError> {
            Ok(())
        }

        async fn reboot(&self) -> Result<(), DeviceError> {
            Ok(())
        }

        async fn connect(&self, address: &str) -> Result<String, DeviceError> {
            Ok(format!("connected to {}", address))
        }

        async fn disconnect(&self, address: &str) -> Result<String, DeviceError> {
            Ok(format!("disconnected {}", address))
        }
    }

    struct TestDaemon {
        socket_path: PathBuf,
        pid_path: PathBuf,
        handle: JoinHandle<()>,
        data_dir: tempfile::TempDir,
    }

    impl TestDaemon {
        fn known_actions_path(&self) -> PathBuf {
            self.data_dir.path().join("known.json")
        }
    }

    impl Drop for TestDaemon {
        fn drop(&mut self) {
            self.handle.abort();
            let _ = std::fs::remove_file(&self.socket_path);
            let _ = std::fs::remove_file(&self.pid_path);
        }
    }

    fn temp_socket(prefix: &str) -> (PathBuf, PathBuf) {
        let short_id = Uuid::new_v4().simple().to_string();
        let socket_path =
            PathBuf::from("/tmp").join(format!("{}-{}.sock", prefix, &short_id[..8]));
        let pid_path = socket_path.with_extension("pid");
        (socket_path, pid_path)
    }

    fn test_config(data_dir: &tempfile::TempDir, pin: Option<&str>) -> DaemonConfig {
        DaemonConfig {
            itsme_pin: pin.map(String::from),
            settle_ms: 0,
            known_actions_file: Some(data_dir.path().join("known.json")),
            ..DaemonConfig::default()
        }
    }

    async fn start_daemon(phone: Arc<ScriptedDevice>, pin: Option<&str>) -> TestDaemon {
        let (socket_path, pid_path) = temp_socket("droid-remote-test");
        let data_dir = tempfile::tempdir().unwrap();
        let server = DaemonServer::bind_to(
            socket_path.clone(),
            pid_path.clone(),
            phone,
            test_config(&data_dir, pin),
        )
        .await
        .expect("Failed to bind server");

        let handle = tokio::spawn(async move {
            let _ = timeout(Duration::from_secs(5), server.run()).await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        TestDaemon {
            socket_path,
            pid_path,
            handle,
            data_dir,
        }
    }

    async fn send_line(socket_path: &Path, line: &str) -> Response {
        let stream = UnixStream::connect(socket_path)
            .await
            .expect("Failed to connect");
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        writer.write_all(line.as_bytes()).await.expect("write");
        writer.write_all(b"\n").await.expect("newline");
        writer.flush().await.expect("flush");

        let mut response_line = String::new();
        timeout(Duration::from_secs(5), reader.read_line(&mut response_line))
            .await
            .expect("Timeout reading response")
            .expect("Failed to read");
        serde_json::from_str(&response_line).expect("Failed to parse response")
    }

    async fn send(daemon: &TestDaemon, command: Command) -> Response {
        let request = Request {
            id: "test-1".to_string(),
            command,
        };
        let response = send_line(&daemon.socket_path, &serde_json::to_string(&request).unwrap()).await;
        assert_eq!(response.id, "test-1");
        response
    }

    #[tokio::test]
    async fn test_status_reports_configuration() {
        let phone = Arc::new(ScriptedDevice::new(&[fixtures::home_no_pending()]));
        let daemon = start_daemon(phone.clone(), None).await;

        let response = send(&daemon, Command::Status).await;

        assert!(response.success);
        let Some(ResponseData::Status(status)) = response.data else {
            panic!("expected status data");
        };
        assert_eq!(status.pid, std::process::id());
        assert!(!status.pin_configured);
        assert!(phone.log().is_empty(), "status must not touch the phone");
    }

    #[tokio::test]
    async fn test_parse_screen_classifies_home() {
        let phone = Arc::new(ScriptedDevice::new(&[fixtures::home_no_pending()]));
        let daemon = start_daemon(phone, None).await;

        let response = send(
            &daemon,
            Command::ParseScreen {
                parser: ScreenParser::Any,
                auto: AutoActions::default(),
            },
        )
        .await;

        assert!(response.success);
        let Some(ResponseData::Screen(report)) = response.data else {
            panic!("expected screen data");
        };
        assert_eq!(report.screen.kind(), ScreenKind::NoPendingActionsHome);
        assert_eq!(report.description, "No pending actions");
    }

    #[tokio::test]
    async fn test_wrong_screen_carries_hierarchy() {
        let phone = Arc::new(ScriptedDevice::new(&[fixtures::foreign_app()]));
        let daemon = start_daemon(phone, None).await;

        let response = send(
            &daemon,
            Command::ParseScreen {
                parser: ScreenParser::Any,
                auto: AutoActions::default(),
            },
        )
        .await;

        assert!(!response.success);
        let error = response.error.expect("error response");
        assert_eq!(error.code, ErrorCode::ForeignApp);
        let details = error.details.expect("details");
        assert!(details.hierarchy.is_some());
        assert!(!details.rejections.is_empty());
    }

    #[tokio::test]
    async fn test_screen_action_reports_the_next_screen() {
        let phone = Arc::new(ScriptedDevice::new(&[
            fixtures::home_pending(APP, ACTION, None),
            fixtures::play_rating(),
            fixtures::home_no_pending(),
        ]));
        let daemon = start_daemon(phone.clone(), None).await;

        let response = send(
            &daemon,
            Command::ScreenAction {
                action: ScreenAction::HomeTapCard,
                auto: AutoActions::default(),
            },
        )
        .await;

        assert!(response.success, "{:?}", response.error);
        let Some(ResponseData::Screen(report)) = response.data else {
            panic!("expected screen data");
        };
        assert_eq!(report.screen.kind(), ScreenKind::NoPendingActionsHome);
        assert_eq!(
            report.actions_taken,
            vec![ScreenAction::HomeTapCard, ScreenAction::PlayRatingNotNow]
        );
        assert_eq!(phone.taps().len(), 2);
    }

    #[tokio::test]
    async fn test_action_screen_is_remembered() {
        let phone = Arc::new(ScriptedDevice::new(&[fixtures::action(APP, ACTION, &[], &[])]));
        let daemon = start_daemon(phone, None).await;

        let response = send(
            &daemon,
            Command::ParseScreen {
                parser: ScreenParser::Action,
                auto: AutoActions::default(),
            },
        )
        .await;
        assert!(response.success, "{:?}", response.error);

        let response = send(&daemon, Command::KnownActions).await;
        let Some(ResponseData::KnownActions { app_actions }) = response.data else {
            panic!("expected known actions");
        };
        assert!(app_actions[APP].contains(ACTION));
    }

    #[tokio::test]
    async fn test_confirm_without_pin_is_invalid_input() {
        let phone = Arc::new(ScriptedDevice::new(&[fixtures::home_pending(APP, ACTION, None)]));
        let daemon = start_daemon(phone.clone(), None).await;

        let response = send(
            &daemon,
            Command::ConfirmKnownAction {
                app: APP.to_string(),
                action: ACTION.to_string(),
                max_tries: None,
            },
        )
        .await;

        assert!(!response.success);
        assert_eq!(response.error.unwrap().code, ErrorCode::InvalidInput);
        assert!(phone.log().is_empty());
    }

    #[tokio::test]
    async fn test_confirm_drives_the_flow_and_remembers_the_action() {
        let phone = Arc::new(ScriptedDevice::new(&[
            fixtures::home_pending(APP, ACTION, None),
            fixtures::action(APP, ACTION, &[], &[]),
            fixtures::pinpad("[0,0][300,500]"),
            fixtures::home_no_pending(),
        ]));
        let daemon = start_daemon(phone.clone(), Some("2580")).await;

        let response = send(
            &daemon,
            Command::ConfirmKnownAction {
                app: APP.to_string(),
                action: ACTION.to_string(),
                max_tries: Some(1),
            },
        )
        .await;

        assert!(response.success, "{:?}", response.error);
        let Some(ResponseData::Confirmed(report)) = response.data else {
            panic!("expected confirmation report");
        };
        assert_eq!(report.attempts, 1);
        // Card, confirm, four digits and submit.
        assert_eq!(phone.taps().len(), 7);

        let known = KnownActionsStore::new(daemon.known_actions_path())
            .load()
            .unwrap();
        assert!(known.contains(APP, ACTION));
    }

    #[tokio::test]
    async fn test_no_pending_actions_error_code() {
        let phone = Arc::new(ScriptedDevice::new(&[fixtures::home_no_pending()]));
        let daemon = start_daemon(phone, Some("2580")).await;

        let response = send(
            &daemon,
            Command::ConfirmKnownAction {
                app: APP.to_string(),
                action: ACTION.to_string(),
                max_tries: None,
            },
        )
        .await;

        assert_eq!(response.error.unwrap().code, ErrorCode::NoPendingActions);
    }

    #[tokio::test]
    async fn test_read_screen_and_lifecycle_commands() {
        let phone = Arc::new(ScriptedDevice::new(&[fixtures::home_no_pending()]));
        let daemon = start_daemon(phone.clone(), None).await;

        let response = send(&daemon, Command::ReadScreen).await;
        let Some(ResponseData::Hierarchy { xml }) = response.data else {
            panic!("expected hierarchy");
        };
        assert!(xml.contains("No pending actions"));

        assert!(send(&daemon, Command::Launch).await.success);
        assert!(send(&daemon, Command::ForceStop).await.success);
        assert!(send(&daemon, Command::WakeUp).await.success);

        let log = phone.log();
        assert!(log.contains(&Recorded::Launch(ITSME_PACKAGE.to_string())));
        assert!(log.contains(&Recorded::ForceStop(ITSME_PACKAGE.to_string())));
    }

    #[tokio::test]
    async fn test_list_devices() {
        let phone = Arc::new(ScriptedDevice::new(&[fixtures::home_no_pending()]));
        let daemon = start_daemon(phone, None).await;

        let response = send(&daemon, Command::ListDevices).await;
        let Some(ResponseData::Devices { devices }) = response.data else {
            panic!("expected devices");
        };
        assert_eq!(devices[0].serial, "emulator-5554");
    }

    #[tokio::test]
    async fn test_reboot_and_network_connections() {
        let phone = Arc::new(ScriptedDevice::new(&[fixtures::home_no_pending()]));
        let daemon = start_daemon(phone, None).await;

        assert!(send(&daemon, Command::Reboot).await.success);

        let response = send(
            &daemon,
            Command::Connect {
                address: " 192.168.1.20:5555 ".into(),
            },
        )
        .await;
        let Some(ResponseData::Ok { message }) = response.data else {
            panic!("expected message");
        };
        assert_eq!(message, "connected to 192.168.1.20:5555");

        let response = send(
            &daemon,
            Command::Disconnect {
                address: "192.168.1.20:5555".into(),
            },
        )
        .await;
        assert!(response.success);

        let response = send(
            &daemon,
            Command::Connect {
                address: "  ".into(),
            },
        )
        .await;
        assert_eq!(response.error.unwrap().code, ErrorCode::InvalidInput);
    }

    #[tokio::test]
    async fn test_device_failure_maps_to_device_failed() {
        let phone = Arc::new(ScriptedDevice::new::<&str>(&[]));
        let daemon = start_daemon(phone, None).await;

        let response = send(&daemon, Command::ReadScreen).await;
        assert_eq!(response.error.unwrap().code, ErrorCode::DeviceFailed);
    }

    #[tokio::test]
    async fn test_invalid_json_is_rejected() {
        let phone = Arc::new(ScriptedDevice::new(&[fixtures::home_no_pending()]));
        let daemon = start_daemon(phone, None).await;

        let response = send_line(&daemon.socket_path, "{not json").await;

        assert!(!response.success);
        assert_eq!(response.id, "unknown");
        assert_eq!(response.error.unwrap().code, ErrorCode::InvalidInput);
    }

    #[tokio::test]
    async fn test_shutdown_removes_socket_and_pid() {
        let (socket_path, pid_path) = temp_socket("droid-remote-shutdown");
        let data_dir = tempfile::tempdir().unwrap();
        let phone = Arc::new(ScriptedDevice::new(&[fixtures::home_no_pending()]));
        let server = DaemonServer::bind_to(
            socket_path.clone(),
            pid_path.clone(),
            phone,
            test_config(&data_dir, None),
        )
        .await
        .expect("Failed to bind server");
        assert!(pid_path.exists());

        let handle = tokio::spawn(async move {
            let _ = server.run().await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let request = serde_json::to_string(&Request {
            id: "bye".to_string(),
            command: Command::Shutdown,
        })
        .unwrap();
        let response = send_line(&socket_path, &request).await;
        assert!(response.success);

        timeout(Duration::from_secs(5), handle)
            .await
            .expect("daemon did not stop")
            .expect("daemon task panicked");
        assert!(!socket_path.exists());
        assert!(!pid_path.exists());
    }

    #[tokio::test]
    async fn test_second_daemon_is_refused() {
        let phone = Arc::new(ScriptedDevice::new(&[fixtures::home_no_pending()]));
        let daemon = start_daemon(phone.clone(), None).await;
        let data_dir = tempfile::tempdir().unwrap();

        let second = DaemonServer::bind_to(
            daemon.socket_path.clone(),
            daemon.pid_path.clone(),
            phone,
            test_config(&data_dir, None),
        )
        .await;

        let err = second.err().expect("second bind must fail");
        assert!(err.to_string().contains("already running"));
    }

    #[tokio::test]
    async fn test_stale_socket_is_replaced() {
        let (socket_path, pid_path) = temp_socket("droid-remote-stale");
        let stale = std::os::unix::net::UnixListener::bind(&socket_path).unwrap();
        drop(stale);
        std::fs::write(&pid_path, i32::MAX.to_string()).unwrap();

        let data_dir = tempfile::tempdir().unwrap();
        let phone = Arc::new(ScriptedDevice::new(&[fixtures::home_no_pending()]));
        let server = DaemonServer::bind_to(
            socket_path.clone(),
            pid_path.clone(),
            phone,
            test_config(&data_dir, None),
        )
        .await
        .expect("stale socket should be replaced");

        assert_eq!(read_pid(&pid_path), Some(std::process::id() as i32));
        drop(server);
        assert!(!socket_path.exists());
    }

    #[tokio::test]
    async fn test_read_line_bounded_handles_utf8_chunks() {
        let data = "app: Bank 銀行\n".as_bytes().to_vec();
        let cursor = std::io::Cursor::new(data);
        let mut reader = BufReader::with_capacity(1, cursor);
        let mut buf = String::new();

        let bytes = read_line_bounded(&mut reader, &mut buf, 1024)
            .await
            .expect("read line");

        assert!(bytes > 0);
        assert_eq!(buf, "app: Bank 銀行\n");
    }

    #[tokio::test]
    async fn test_read_line_bounded_rejects_oversized_lines() {
        let data = vec![b'x'; 2048];
        let mut reader = BufReader::new(std::io::Cursor::new(data));
        let mut buf = String::new();

        let err = read_line_bounded(&mut reader, &mut buf, 1024)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("too large"));
    }
}
