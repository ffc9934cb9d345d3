//! Exclusive process lock over a workspace's state directory.
//!
//! Adapted near-verbatim from the pack's daemon PID-file lock: a PID file
//! created with `O_EXCL`, stale-PID detection via a null signal, and an
//! advisory `flock` held for the process's lifetime. The daemon-lifecycle
//! framing (start/stop a background process) is replaced with
//! session-lifecycle framing (one workspace, one writer, released on
//! `Session::shutdown` or `Drop`).

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::process;

use nix::fcntl::{flock, FlockArg};
use nix::sys::signal::kill;
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::error::{EngineError, ErrorContext, Result};

pub struct ProcessLock {
    path: PathBuf,
    file: Option<File>,
    owns_file: bool,
}

impl ProcessLock {
    pub fn new(path: PathBuf) -> Self {
        Self { path, file: None, owns_file: false }
    }

    /// Acquires the lock: fails fast with `storage_locked{pid}` if another
    /// live process already holds it.
    pub fn acquire(&mut self) -> Result<()> {
        if let Some(pid) = self.holder_pid()? {
            return Err(EngineError::StorageLocked { pid, context: ErrorContext::default() });
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| EngineError::io(e, ErrorContext::default()))?;
        }

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .or_else(|err| {
                if let Ok(pid) = self.read_pid() {
                    if Self::process_exists(pid) {
                        return Err(err);
                    }
                    warn!(pid, "removing stale lock file for dead process");
                    fs::remove_file(&self.path)?;
                    OpenOptions::new().write(true).create_new(true).open(&self.path)
                } else {
                    Err(err)
                }
            })
            .map_err(|e| EngineError::io(e, ErrorContext::default()))?;

        let pid = process::id();
        {
            let mut f = &file;
            writeln!(f, "{pid}").map_err(|e| EngineError::io(e, ErrorContext::default()))?;
            file.sync_all().map_err(|e| EngineError::io(e, ErrorContext::default()))?;
        }

        match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
            Ok(()) => {}
            Err(nix::errno::Errno::EWOULDBLOCK) => {
                let holder = self.read_pid().unwrap_or(0);
                return Err(EngineError::StorageLocked { pid: holder, context: ErrorContext::default() });
            }
            Err(e) => {
                return Err(EngineError::StorageUnavailable {
                    reason: format!("failed to flock lock file: {e}"),
                    context: ErrorContext::default(),
                })
            }
        }

        debug!(pid, path = %self.path.display(), "acquired workspace lock");
        self.file = Some(file);
        self.owns_file = true;
        Ok(())
    }

    fn holder_pid(&self) -> Result<Option<u32>> {
        if !self.path.exists() {
            return Ok(None);
        }
        match self.read_pid() {
            Ok(pid) if Self::process_exists(pid) => Ok(Some(pid)),
            _ => Ok(None),
        }
    }

    fn read_pid(&self) -> std::result::Result<u32, std::io::Error> {
        let mut contents = String::new();
        File::open(&self.path)?.read_to_string(&mut contents)?;
        contents
            .trim()
            .parse::<u32>()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Side-effect-free liveness probe: `kill(pid, 0)` delivers no signal,
    /// it only checks whether the permission/existence checks would allow
    /// one to be sent. `Ok` or `EPERM` means the process exists; `ESRCH`
    /// means it doesn't.
    fn process_exists(pid: u32) -> bool {
        match kill(Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX)), None) {
            Ok(()) | Err(nix::errno::Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    /// Releases the lock and removes the lock file if it still names this
    /// process. Idempotent: safe to call from a signal handler or twice.
    pub fn release(&mut self) -> Result<()> {
        if !self.owns_file {
            return Ok(());
        }
        if let Some(file) = self.file.take() {
            let _ = flock(file.as_raw_fd(), FlockArg::Unlock);
        }
        if let Ok(pid) = self.read_pid() {
            if pid == process::id() {
                let _ = fs::remove_file(&self.path);
                debug!(path = %self.path.display(), "released workspace lock");
            }
        }
        self.owns_file = false;
        Ok(())
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_then_release_allows_reacquisition() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lock");
        let mut lock = ProcessLock::new(path.clone());
        lock.acquire().unwrap();
        lock.release().unwrap();
        assert!(!path.exists());

        let mut lock2 = ProcessLock::new(path);
        lock2.acquire().unwrap();
    }

    #[test]
    fn stale_lock_from_dead_pid_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lock");
        std::fs::write(&path, "999999999\n").unwrap();

        let mut lock = ProcessLock::new(path);
        lock.acquire().unwrap();
    }

    #[test]
    fn drop_releases_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lock");
        {
            let mut lock = ProcessLock::new(path.clone());
            lock.acquire().unwrap();
        }
        assert!(!path.exists());
    }
}
