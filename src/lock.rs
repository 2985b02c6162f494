//! Repository lock for mutating operations.
//!
//! The lock is a file created with `create_new`, held under an exclusive
//! kernel lock and carrying an owner record. A crashed holder leaves the file
//! behind but loses the kernel lock, so acquirers can tell it apart from a
//! live holder and report `LockError::Stale`. Breaking a stale lock is always
//! an explicit call.
use crate::error::LockError;
use crate::util::{hostname, now_epoch_ms};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

/// Lock file name at the repository root.
pub const LOCK_FILE: &str = "repo.lock";

const FIRST_POLL: Duration = Duration::from_millis(5);
const MAX_POLL: Duration = Duration::from_millis(200);

/// Who holds the lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockOwner {
    pub pid: u32,
    pub hostname: String,
    pub acquired_at_epoch_ms: u128,
}

impl LockOwner {
    fn current() -> Self {
        Self {
            pid: std::process::id(),
            hostname: hostname(),
            acquired_at_epoch_ms: now_epoch_ms(),
        }
    }
}

impl fmt::Display for LockOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid {} on {:?}", self.pid, self.hostname)
    }
}

/// State of the lock as seen by an observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockState {
    Free,
    Held(Option<LockOwner>),
    Stale(Option<LockOwner>),
}

/// Creates, inspects and breaks the repository lock.
#[derive(Debug, Clone)]
pub struct LockManager {
    path: PathBuf,
    stale_after: Duration,
}

/// Held lock; released on drop.
#[derive(Debug)]
pub struct RepoLock {
    path: PathBuf,
    file: Option<File>,
}

impl LockManager {
    pub fn new(path: PathBuf, stale_after: Duration) -> Self {
        Self { path, stale_after }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the lock, polling until `timeout` elapses.
    pub fn acquire(&self, timeout: Duration) -> Result<RepoLock, LockError> {
        let started = Instant::now();
        let owner = LockOwner::current();
        let mut delay = FIRST_POLL;
        loop {
            match self.try_create(&owner) {
                Ok(file) => {
                    tracing::debug!(
                        path = %self.path.display(),
                        waited_ms = started.elapsed().as_millis(),
                        "repository lock acquired"
                    );
                    return Ok(RepoLock {
                        path: self.path.clone(),
                        file: Some(file),
                    });
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
                Err(source) => {
                    return Err(LockError::Io {
                        path: self.path.clone(),
                        source,
                    })
                }
            }

            match self.state() {
                LockState::Stale(holder) => {
                    return Err(LockError::Stale {
                        path: self.path.clone(),
                        owner: describe(holder.as_ref()),
                    })
                }
                LockState::Free => continue,
                LockState::Held(holder) => {
                    let waited = started.elapsed();
                    if waited >= timeout {
                        return Err(LockError::Busy {
                            owner: describe(holder.as_ref()),
                            waited_ms: waited.as_millis(),
                        });
                    }
                    thread::sleep(delay.min(timeout - waited));
                    delay = (delay * 2).min(MAX_POLL);
                }
            }
        }
    }

    fn try_create(&self, owner: &LockOwner) -> io::Result<File> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)?;
        let written = file
            .try_lock_exclusive()
            .and_then(|()| serde_json::to_vec(owner).map_err(io::Error::from))
            .and_then(|bytes| file.write_all(&bytes))
            .and_then(|()| file.sync_all());
        if let Err(err) = written {
            let _ = fs::remove_file(&self.path);
            return Err(err);
        }
        Ok(file)
    }

    /// Owner record of the current holder, if any can be read.
    pub fn holder(&self) -> Option<LockOwner> {
        let bytes = fs::read(&self.path).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Inspect the lock without taking it.
    ///
    /// A file whose kernel lock is held belongs to a live process. A file
    /// nobody has locked is stale once its owner record is written; before
    /// that the creator may still be between `create_new` and locking, so
    /// only the file's age counts.
    pub fn state(&self) -> LockState {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(_) => return LockState::Free,
        };
        let holder = self.holder();
        match file.try_lock_exclusive() {
            Ok(()) => {
                let _ = file.unlock();
                if holder.is_some() {
                    return LockState::Stale(holder);
                }
            }
            Err(err) if err.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                return LockState::Held(holder);
            }
            Err(err) => {
                tracing::debug!(path = %self.path.display(), error = %err, "cannot test kernel lock");
            }
        }
        let old = file
            .metadata()
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|time| SystemTime::now().duration_since(time).ok())
            .is_some_and(|age| age > self.stale_after);
        if old {
            LockState::Stale(holder)
        } else {
            LockState::Held(holder)
        }
    }

    /// Remove the lock file regardless of who holds it.
    pub fn break_lock(&self) -> Result<Option<LockOwner>, LockError> {
        let holder = self.holder();
        match fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::warn!(path = %self.path.display(), holder = %describe(holder.as_ref()), "repository lock broken");
                Ok(holder)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(LockError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

fn describe(holder: Option<&LockOwner>) -> String {
    holder.map_or_else(|| "an unknown owner".to_string(), LockOwner::to_string)
}

impl RepoLock {
    /// Release explicitly, surfacing removal failures.
    pub fn release(mut self) -> Result<(), LockError> {
        // The file goes first so no waiter sees it unlocked but present.
        let file = self.file.take();
        let removed = fs::remove_file(&self.path).map_err(|source| LockError::Io {
            path: self.path.clone(),
            source,
        });
        drop(file);
        removed
    }
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        let Some(file) = self.file.take() else {
            return;
        };
        if let Err(err) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to release repository lock");
        }
        drop(file);
    }
}
