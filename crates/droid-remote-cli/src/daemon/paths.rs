//! Socket, PID file and data path resolution.
//!
//! Priority for the socket directory:
//! 1. `DROID_REMOTE_SOCKET_DIR` (explicit override)
//! 2. `XDG_RUNTIME_DIR/droid-remote` (Linux standard)
//! 3. `~/.droid-remote` (home directory fallback)
//! 4. `/tmp/droid-remote` (last resort)
//!
//! Several daemons (one per phone, say) can coexist via the
//! `DROID_REMOTE_INSTANCE` env var (default: "default"). Each instance gets
//! `{socket_dir}/{instance}.sock`, `{instance}.pid` and
//! `{instance}-watchdog.pid`.

use std::env;
use std::path::PathBuf;

const DEFAULT_INSTANCE: &str = "default";
const KNOWN_ACTIONS_FILE: &str = "itsme_known_actions.json";

/// Get current instance name from env or default.
pub fn get_instance() -> String {
    env::var("DROID_REMOTE_INSTANCE").unwrap_or_else(|_| DEFAULT_INSTANCE.to_string())
}

/// Get socket directory with priority fallback. Empty env values are ignored.
pub fn get_socket_dir() -> PathBuf {
    if let Ok(dir) = env::var("DROID_REMOTE_SOCKET_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }

    if let Ok(runtime_dir) = env::var("XDG_RUNTIME_DIR") {
        if !runtime_dir.is_empty() {
            return PathBuf::from(runtime_dir).join("droid-remote");
        }
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".droid-remote");
    }

    env::temp_dir().join("droid-remote")
}

/// Validate an instance name to prevent path traversal.
///
/// Names must be non-empty, contain only alphanumerics, hyphens and
/// underscores, and not start with a hyphen. Anything else falls back to
/// the default instance.
pub(crate) fn sanitize_instance_name(name: &str) -> String {
    let is_valid = !name.is_empty()
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if is_valid {
        name.to_string()
    } else {
        tracing::warn!(
            "Invalid instance name '{}', using '{}'. Names must contain only alphanumeric, hyphen, underscore.",
            name,
            DEFAULT_INSTANCE
        );
        DEFAULT_INSTANCE.to_string()
    }
}

fn instance_file(instance: Option<&str>, suffix: &str) -> PathBuf {
    let name = instance.map(String::from).unwrap_or_else(get_instance);
    let safe_name = sanitize_instance_name(&name);
    get_socket_dir().join(format!("{}{}", safe_name, suffix))
}

/// Socket path for an instance (current instance when `None`).
pub fn get_socket_path(instance: Option<&str>) -> PathBuf {
    instance_file(instance, ".sock")
}

/// Daemon PID file path for an instance.
pub fn get_pid_path(instance: Option<&str>) -> PathBuf {
    instance_file(instance, ".pid")
}

/// Watchdog PID file path for an instance.
pub fn get_watchdog_pid_path(instance: Option<&str>) -> PathBuf {
    instance_file(instance, "-watchdog.pid")
}

/// Default location of the known-actions store.
pub fn default_known_actions_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(get_socket_dir)
        .join("droid-remote")
        .join(KNOWN_ACTIONS_FILE)
}

/// Default log file of a background `process` (`daemon` or `watchdog`).
pub fn default_log_path(process: &str) -> PathBuf {
    let instance = sanitize_instance_name(&get_instance());
    dirs::data_dir()
        .unwrap_or_else(get_socket_dir)
        .join("droid-remote")
        .join("log")
        .join(format!("{}-{}.log", instance, process))
}

/// Ensure socket directory exists with secure permissions (0700 on Unix).
pub fn ensure_socket_dir() -> std::io::Result<()> {
    let dir = get_socket_dir();
    std::fs::create_dir_all(&dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))?;
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex;

    use super::*;

    // Env var manipulation is not thread-safe, so tests touching it run serially.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Saves and restores env vars while holding [`ENV_MUTEX`].
    pub(crate) struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
        _lock: std::sync::MutexGuard<'static, ()>,
    }

    impl EnvGuard {
        pub(crate) fn new(var_names: &[&str]) -> Self {
            let lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let vars = var_names
                .iter()
                .map(|name| (name.to_string(), std::env::var(name).ok()))
                .collect();
            Self { vars, _lock: lock }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (name, value) in &self.vars {
                // SAFETY: We hold ENV_MUTEX, so no other test thread is modifying env vars
                unsafe {
                    match value {
                        Some(v) => std::env::set_var(name, v),
                        None => std::env::remove_var(name),
                    }
                }
            }
        }
    }

    const VARS: &[&str] = &[
        "DROID_REMOTE_SOCKET_DIR",
        "DROID_REMOTE_INSTANCE",
        "XDG_RUNTIME_DIR",
    ];

    #[test]
    fn test_instance_defaults_to_default() {
        let _guard = EnvGuard::new(VARS);
        // SAFETY: We hold ENV_MUTEX via _guard
        unsafe { std::env::remove_var("DROID_REMOTE_INSTANCE") };

        assert_eq!(get_instance(), "default");
    }

    #[test]
    fn test_socket_dir_explicit_override() {
        let _guard = EnvGuard::new(VARS);
        // SAFETY: We hold ENV_MUTEX via _guard
        unsafe {
            std::env::set_var("DROID_REMOTE_SOCKET_DIR", "/custom/socket/path");
            std::env::set_var("XDG_RUNTIME_DIR", "/run/user/1000");
        }

        assert_eq!(get_socket_dir(), PathBuf::from("/custom/socket/path"));
    }

    #[test]
    fn test_socket_dir_xdg_runtime() {
        let _guard = EnvGuard::new(VARS);
        // SAFETY: We hold ENV_MUTEX via _guard
        unsafe {
            std::env::set_var("DROID_REMOTE_SOCKET_DIR", "");
            std::env::set_var("XDG_RUNTIME_DIR", "/run/user/1000");
        }

        assert_eq!(get_socket_dir(), PathBuf::from("/run/user/1000/droid-remote"));
    }

    #[test]
    fn test_socket_dir_home_fallback() {
        let _guard = EnvGuard::new(VARS);
        // SAFETY: We hold ENV_MUTEX via _guard
        unsafe {
            std::env::remove_var("DROID_REMOTE_SOCKET_DIR");
            std::env::remove_var("XDG_RUNTIME_DIR");
        }

        assert!(get_socket_dir().to_string_lossy().ends_with(".droid-remote"));
    }

    #[test]
    fn test_instance_files_share_the_socket_dir() {
        let _guard = EnvGuard::new(VARS);
        // SAFETY: We hold ENV_MUTEX via _guard
        unsafe {
            std::env::set_var("DROID_REMOTE_SOCKET_DIR", "/tmp/test");
            std::env::set_var("DROID_REMOTE_INSTANCE", "pixel");
        }

        assert_eq!(get_socket_path(None), PathBuf::from("/tmp/test/pixel.sock"));
        assert_eq!(get_pid_path(None), PathBuf::from("/tmp/test/pixel.pid"));
        assert_eq!(
            get_watchdog_pid_path(Some("work")),
            PathBuf::from("/tmp/test/work-watchdog.pid")
        );
    }

    #[test]
    fn test_socket_path_sanitizes_instance() {
        let _guard = EnvGuard::new(VARS);
        // SAFETY: We hold ENV_MUTEX via _guard
        unsafe { std::env::set_var("DROID_REMOTE_SOCKET_DIR", "/tmp/test") };

        assert_eq!(
            get_socket_path(Some("../../../etc/passwd")),
            PathBuf::from("/tmp/test/default.sock")
        );
    }

    #[test]
    fn test_sanitize_valid_names() {
        assert_eq!(sanitize_instance_name("default"), "default");
        assert_eq!(sanitize_instance_name("pixel-7_work"), "pixel-7_work");
        assert_eq!(sanitize_instance_name("_private"), "_private");
    }

    #[test]
    fn test_sanitize_rejects_unsafe_names() {
        for name in [
            "",
            " ",
            "..",
            "foo/bar",
            "/etc/passwd",
            "-instance",
            "session;rm -rf",
            "$(whoami)",
            "nul\0byte",
        ] {
            assert_eq!(sanitize_instance_name(name), "default", "{name:?}");
        }
    }

    #[test]
    fn test_log_path_is_per_instance_and_process() {
        let _guard = EnvGuard::new(VARS);
        // SAFETY: We hold ENV_MUTEX via _guard
        unsafe { std::env::set_var("DROID_REMOTE_INSTANCE", "pixel") };

        assert!(default_log_path("watchdog").ends_with("droid-remote/log/pixel-watchdog.log"));
    }

    #[test]
    fn test_known_actions_path_file_name() {
        assert!(default_known_actions_path().ends_with("droid-remote/itsme_known_actions.json"));
    }
}
