//! Well-known filesystem locations for registry, sockets, and bridge logs.

use std::path::PathBuf;

/// Returns the mcport data directory.
///
/// Resolution order:
/// 1. `MCPORT_DATA_DIR` environment variable
/// 2. platform data dir via `directories` (`~/.local/share/mcport` on Linux)
/// 3. `.mcport` in the current directory as a last resort
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("MCPORT_DATA_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    directories::ProjectDirs::from("", "", "mcport")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".mcport"))
}

/// `sessions.json` — the session registry file.
#[must_use]
pub fn sessions_file() -> PathBuf {
    data_dir().join("sessions.json")
}

/// `auth-profiles.json` — OAuth profile metadata (never token material).
#[must_use]
pub fn profiles_file() -> PathBuf {
    data_dir().join("auth-profiles.json")
}

/// Directory holding bridge IPC sockets.
#[must_use]
pub fn bridges_dir() -> PathBuf {
    data_dir().join("bridges")
}

/// Directory holding per-session bridge log files.
#[must_use]
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// IPC socket path for a session bridge.
#[must_use]
pub fn socket_path(session: &str) -> PathBuf {
    bridges_dir().join(format!("{session}.sock"))
}

/// Log file path for a session bridge.
#[must_use]
pub fn log_path(session: &str) -> PathBuf {
    logs_dir().join(format!("{session}.log"))
}

/// Seconds since the unix epoch.
#[must_use]
pub fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_path_uses_session_name() {
        let p = socket_path("demo");
        assert!(p.to_string_lossy().ends_with("bridges/demo.sock"));
    }

    #[test]
    fn log_path_uses_session_name() {
        let p = log_path("demo");
        assert!(p.to_string_lossy().ends_with("logs/demo.log"));
    }

    #[test]
    fn now_unix_is_sane() {
        // Anything after 2020 is fine.
        assert!(now_unix() > 1_577_836_800);
    }
}
