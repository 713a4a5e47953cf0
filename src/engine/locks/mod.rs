//! Update Lock
//!
//! Keeps two update attempts from racing on the same installation. The lock
//! is an advisory `flock` on `<install_root>/update.lock`, so it is released
//! by the kernel if the holder dies; the file itself carries the holder's
//! `LockInfo` for diagnostics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const LOCK_FILE_NAME: &str = "update.lock";

/// Information stored in a lock file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub description: String,
}

impl LockInfo {
    pub fn new(description: &str) -> Self {
        Self {
            pid: std::process::id(),
            started_at: Utc::now(),
            description: description.to_string(),
        }
    }
}

/// Lock errors
#[derive(Error, Debug)]
pub enum LockError {
    #[error("Update already in progress{}", holder_suffix(.holder))]
    AlreadyLocked { holder: Option<LockInfo> },
    #[error("Lock IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn holder_suffix(holder: &Option<LockInfo>) -> String {
    match holder {
        Some(info) => format!(" (PID {} since {}: {})", info.pid, info.started_at.to_rfc3339(), info.description),
        None => String::new(),
    }
}

/// Installation-scoped update lock
pub struct UpdateLock {
    lock_path: PathBuf,
}

impl UpdateLock {
    pub fn new(install_root: &Path) -> Self {
        Self {
            lock_path: install_root.join(LOCK_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }

    /// Try to take the lock without blocking
    pub fn acquire(&self, description: &str) -> Result<LockGuard, LockError> {
        let io_err = |source| LockError::Io { path: self.lock_path.clone(), source };

        if let Some(parent) = self.lock_path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(io_err)?;

        match try_lock_exclusive(&file) {
            Ok(true) => {}
            Ok(false) => {
                return Err(LockError::AlreadyLocked { holder: self.holder() });
            }
            Err(e) => return Err(io_err(e)),
        }

        let info = LockInfo::new(description);
        write_info(&mut file, &info).map_err(io_err)?;

        Ok(LockGuard { file, info })
    }

    /// Who holds (or last held) the lock, as recorded in the file
    pub fn holder(&self) -> Option<LockInfo> {
        fs::read_to_string(&self.lock_path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
    }
}

fn write_info(file: &mut File, info: &LockInfo) -> io::Result<()> {
    let content = serde_json::to_vec_pretty(info)?;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&content)?;
    file.sync_data()
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> io::Result<bool> {
    use std::os::unix::io::AsRawFd;

    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    if err.kind() == io::ErrorKind::WouldBlock {
        Ok(false)
    } else {
        Err(err)
    }
}

#[cfg(not(unix))]
fn try_lock_exclusive(_file: &File) -> io::Result<bool> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "update lock requires a Unix host"))
}

/// RAII guard; closing the file releases the flock
pub struct LockGuard {
    file: File,
    info: LockInfo,
}

impl LockGuard {
    pub fn info(&self) -> &LockInfo {
        &self.info
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // Clear the record while still holding the lock; the flock itself
        // goes away when `file` is closed.
        let _ = self.file.set_len(0);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_acquire_release() {
        let dir = tempdir().unwrap();
        let lock = UpdateLock::new(dir.path());

        let guard = lock.acquire("update").unwrap();
        assert_eq!(guard.info().pid, std::process::id());

        // A second open file description conflicts even within one process
        match lock.acquire("update") {
            Err(LockError::AlreadyLocked { holder }) => {
                assert_eq!(holder.unwrap().pid, std::process::id());
            }
            other => panic!("expected AlreadyLocked, got {:?}", other.map(|_| ())),
        }

        drop(guard);
        assert!(lock.acquire("update").is_ok());
    }

    #[test]
    fn test_leftover_lock_file_does_not_block() {
        let dir = tempdir().unwrap();
        let lock = UpdateLock::new(dir.path());

        let stale = LockInfo { pid: 999_999, started_at: Utc::now(), description: "crashed".into() };
        fs::write(lock.path(), serde_json::to_string(&stale).unwrap()).unwrap();

        let guard = lock.acquire("update").unwrap();
        assert_eq!(lock.holder().unwrap().pid, guard.info().pid);
    }

    #[test]
    fn test_holder_cleared_on_release() {
        let dir = tempdir().unwrap();
        let lock = UpdateLock::new(dir.path());

        drop(lock.acquire("update").unwrap());
        assert!(lock.holder().is_none());
    }
}
