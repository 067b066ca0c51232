//! Locked, atomic JSON file primitives shared by the registry stores.

use std::{
    fs::{self, File, OpenOptions},
    path::Path,
    time::{Duration, Instant},
};

use {
    serde::{Serialize, de::DeserializeOwned},
    tracing::warn,
};

use mcport_common::{Error, Result};

/// Run `f` while holding an exclusive advisory lock on `<path>.lock`.
///
/// The sidecar lock file is never replaced, so lockers always contend on the
/// same inode even though the data file is swapped by atomic rename. Retries
/// with backoff until `timeout` elapses.
pub(crate) fn with_lock<R>(path: &Path, timeout: Duration, f: impl FnOnce() -> Result<R>) -> Result<R> {
    let lock_path = lock_path_for(path);
    if let Some(parent) = lock_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = open_owner_only(&lock_path)?;
    let mut lock = fd_lock::RwLock::new(file);

    let deadline = Instant::now() + timeout;
    let mut backoff = Duration::from_millis(25);
    let guard = loop {
        match lock.try_write() {
            Ok(guard) => break guard,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return Err(Error::client(format!(
                        "timed out waiting for lock on {} after {}ms; another mcport \
                         command may hold it — retry shortly",
                        path.display(),
                        timeout.as_millis()
                    )));
                }
                std::thread::sleep(backoff.min(deadline.saturating_duration_since(Instant::now())));
                backoff = (backoff * 2).min(Duration::from_millis(250));
            },
            Err(e) => return Err(e.into()),
        }
    };

    let result = f();
    drop(guard);
    result
}

fn lock_path_for(path: &Path) -> std::path::PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    path.with_file_name(name)
}

/// Read a JSON file, treating a missing or malformed file as the default.
/// A corrupt registry must never crash the CLI.
pub(crate) fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return T::default(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read store file, treating as empty");
            return T::default();
        },
    };
    match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "malformed store file, treating as empty");
            T::default()
        },
    }
}

/// Write JSON via tempfile-then-rename so readers never observe a partial
/// file. Both the temp file and the final file are mode 0600.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let data = serde_json::to_string_pretty(value)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    {
        use std::io::Write;
        let mut tmp = open_owner_only(&tmp_path)?;
        tmp.set_len(0)?;
        tmp.write_all(data.as_bytes())?;
        tmp.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Open (creating if needed) a file readable and writable by the owner only.
fn open_owner_only(path: &Path) -> Result<File> {
    let mut opts = OpenOptions::new();
    opts.read(true).write(true).create(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    Ok(opts.open(path)?)
}
