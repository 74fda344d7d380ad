use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Name of the lock file inside the data directory
pub const LOCK_FILE: &str = ".lock";

const DEFAULT_WAIT: Duration = Duration::from_secs(5);
const MAX_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("could not open lock file {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("vault is busy: gave up on {path} after {waited_ms} ms (is another tz running?)")]
    Busy { path: PathBuf, waited_ms: u128 },
}

/// Exclusive advisory lock on `.taskzero/.lock`, held while a document or
/// the database is written. Shared by `tz watch` and one-shot commands.
///
/// Released when dropped. The file stays behind; deleting it would let a
/// new process lock a different inode than a waiter holds.
#[derive(Debug)]
pub struct VaultLock {
    _file: File,
    path: PathBuf,
}

impl VaultLock {
    pub fn acquire(data_dir: &Path) -> Result<Self, LockError> {
        Self::acquire_within(data_dir, DEFAULT_WAIT)
    }

    /// Wait at most `wait` for the lock, backing off between attempts
    pub fn acquire_within(data_dir: &Path, wait: Duration) -> Result<Self, LockError> {
        let path = data_dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| LockError::Open {
                path: path.clone(),
                source,
            })?;

        let started = Instant::now();
        let mut backoff = Duration::from_millis(5);
        while !flock_exclusive(&file) {
            let waited = started.elapsed();
            if waited >= wait {
                tracing::warn!(path = %path.display(), "vault lock contended");
                return Err(LockError::Busy {
                    path,
                    waited_ms: waited.as_millis(),
                });
            }
            std::thread::sleep(backoff.min(wait - waited));
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
        tracing::trace!(path = %path.display(), "vault lock held");
        Ok(VaultLock { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Non-blocking exclusive flock; false when someone else holds it
#[cfg(unix)]
fn flock_exclusive(file: &File) -> bool {
    use std::os::unix::io::AsRawFd;
    // SAFETY: the descriptor is owned by `file` and valid for the call
    unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) == 0 }
}

#[cfg(not(unix))]
fn flock_exclusive(_file: &File) -> bool {
    true
}
