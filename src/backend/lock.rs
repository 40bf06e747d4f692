//! Exclusive advisory lock with bounded retry
//!
//! A writer takes an `flock` on a lock file for the duration of a write
//! session. On contention the attempt is repeated every `retry` until
//! `timeout` has elapsed, then acquisition fails instead of blocking forever.

use crate::core::error::BackendError;
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Held lock; released on drop.
#[derive(Debug)]
pub struct DirLock {
    path: PathBuf,
    _lock: Flock<File>,
}

impl DirLock {
    /// Acquires an exclusive lock on `path`, creating the file if needed.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::LockTimeout`] when another holder keeps the lock
    /// past `timeout`, or [`BackendError::Io`] if the file can't be opened.
    pub fn acquire(path: &Path, timeout: Duration, retry: Duration) -> Result<Self, BackendError> {
        let started = Instant::now();
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;

        loop {
            match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
                Ok(lock) => {
                    tracing::debug!("Acquired lock {}", path.display());
                    return Ok(Self {
                        path: path.to_path_buf(),
                        _lock: lock,
                    });
                }
                Err((returned, errno)) if errno == Errno::EWOULDBLOCK || errno == Errno::EAGAIN => {
                    if started.elapsed() >= timeout {
                        tracing::warn!(
                            "Gave up on lock {} after {:?}",
                            path.display(),
                            started.elapsed()
                        );
                        return Err(BackendError::LockTimeout {
                            path: path.display().to_string(),
                            secs: timeout.as_secs(),
                        });
                    }
                    tracing::debug!("Lock {} busy, retrying", path.display());
                    std::thread::sleep(retry.min(timeout.saturating_sub(started.elapsed())));
                    file = returned;
                }
                Err((_, errno)) => return Err(BackendError::Io(std::io::Error::from(errno))),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
