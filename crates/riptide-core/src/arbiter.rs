//! Single-instance arbitration.
//!
//! Exactly one process per [`ApplicationIdentity`] holds the identity's lock
//! file at a time. That process is the owner; everyone else is a client and
//! learns where to relay its intent.
//!
//! # Design
//!
//! - **Atomic**: the non-blocking `flock()` is the check and the acquisition
//! - **Crash-safe**: the kernel releases the lock with the last descriptor
//! - **Grace period**: a bounded number of retries tolerates an owner that is
//!   still exiting after a fast restart

use crate::config::ArbitrationConfig;
use crate::file_lock::{HeldLock, LockFile};
use crate::identity::ApplicationIdentity;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of [`IdentityArbiter::acquire`].
#[derive(Debug)]
pub enum ArbitrationOutcome {
    /// This process owns the identity for as long as the guard lives.
    Owner(OwnerGuard),
    /// Another process owns it.
    Client(OwnerHandle),
}

impl ArbitrationOutcome {
    pub fn is_owner(&self) -> bool {
        matches!(self, Self::Owner(_))
    }
}

/// Where a client finds the running owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerHandle {
    pub socket_path: PathBuf,
    /// Recorded by the owner; absent if it was still being written.
    pub pid: Option<u32>,
}

/// Scoped ownership of an identity.
///
/// Dropping the guard removes the relay socket file and then releases the
/// lock. The lock file itself stays; unlinking it would let a late opener
/// lock an orphaned inode.
#[derive(Debug)]
pub struct OwnerGuard {
    identity: ApplicationIdentity,
    socket_path: PathBuf,
    lock: HeldLock,
}

impl OwnerGuard {
    pub fn identity(&self) -> &ApplicationIdentity {
        &self.identity
    }

    /// Where the owner should bind its relay endpoint.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn lock_path(&self) -> &Path {
        self.lock.path()
    }

    /// Rewrites the owner pid, e.g. after forking into the background.
    pub fn refresh_pid(&self) -> io::Result<()> {
        self.lock.record_pid(std::process::id())
    }

    /// Gives up ownership now instead of at process exit.
    pub fn release(self) {
        info!(identity = %self.identity, "Released instance ownership");
    }
}

impl Drop for OwnerGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.socket_path)
            && e.kind() != io::ErrorKind::NotFound
        {
            debug!(
                path = %self.socket_path.display(),
                error = %e,
                "Failed to remove relay socket"
            );
        }
    }
}

/// Errors that prevent arbitration from reaching a decision.
#[derive(Debug, thiserror::Error)]
pub enum ArbitrationError {
    #[error("Failed to lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Decides whether this process owns an identity.
#[derive(Debug, Clone)]
pub struct IdentityArbiter {
    identity: ApplicationIdentity,
    runtime_dir: PathBuf,
    grace_attempts: u32,
    grace_interval: Duration,
}

impl IdentityArbiter {
    pub fn new(identity: ApplicationIdentity, runtime_dir: impl Into<PathBuf>) -> Self {
        let defaults = ArbitrationConfig::default();
        Self {
            identity,
            runtime_dir: runtime_dir.into(),
            grace_attempts: defaults.grace_attempts,
            grace_interval: defaults.grace_interval(),
        }
    }

    pub fn with_config(mut self, config: &ArbitrationConfig) -> Self {
        self.grace_attempts = config.grace_attempts.max(1);
        self.grace_interval = config.grace_interval();
        self
    }

    /// Overrides the retry schedule. `attempts` is clamped to at least one.
    pub fn with_grace(mut self, attempts: u32, interval: Duration) -> Self {
        self.grace_attempts = attempts.max(1);
        self.grace_interval = interval;
        self
    }

    pub fn identity(&self) -> &ApplicationIdentity {
        &self.identity
    }

    pub fn lock_path(&self) -> PathBuf {
        self.identity.lock_path(&self.runtime_dir)
    }

    pub fn socket_path(&self) -> PathBuf {
        self.identity.socket_path(&self.runtime_dir)
    }

    /// Claims the identity, or reports who holds it.
    ///
    /// Of any number of concurrent callers with the same identity, exactly
    /// one sees [`ArbitrationOutcome::Owner`].
    pub fn acquire(&self) -> Result<ArbitrationOutcome, ArbitrationError> {
        let lock_path = self.lock_path();
        let lock_err = |source| ArbitrationError::Lock {
            path: lock_path.clone(),
            source,
        };
        let lock = LockFile::new(&lock_path).map_err(lock_err)?;

        for attempt in 1..=self.grace_attempts {
            if let Some(held) = lock.try_lock().map_err(lock_err)? {
                let pid = std::process::id();
                if let Err(e) = held.record_pid(pid) {
                    warn!(error = %e, "Could not record owner pid in lock file");
                }
                info!(identity = %self.identity, pid, "Acquired instance ownership");
                return Ok(ArbitrationOutcome::Owner(OwnerGuard {
                    identity: self.identity.clone(),
                    socket_path: self.socket_path(),
                    lock: held,
                }));
            }

            if attempt < self.grace_attempts {
                debug!(
                    attempt,
                    of = self.grace_attempts,
                    "Instance lock busy, retrying"
                );
                std::thread::sleep(self.grace_interval);
            }
        }

        let owner = OwnerHandle {
            socket_path: self.socket_path(),
            pid: lock.read_owner_pid(),
        };
        debug!(identity = %self.identity, pid = ?owner.pid, "Already running for this user");
        Ok(ArbitrationOutcome::Client(owner))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;
    use tempfile::TempDir;

    fn arbiter(dir: &Path) -> IdentityArbiter {
        IdentityArbiter::new(ApplicationIdentity::new("riptide-test"), dir)
            .with_grace(1, Duration::ZERO)
    }

    #[test]
    fn test_first_is_owner_second_is_client() {
        let temp_dir = TempDir::new().unwrap();

        let first = arbiter(temp_dir.path()).acquire().unwrap();
        assert!(first.is_owner());

        match arbiter(temp_dir.path()).acquire().unwrap() {
            ArbitrationOutcome::Client(handle) => {
                assert_eq!(handle.pid, Some(std::process::id()));
                assert_eq!(
                    handle.socket_path,
                    temp_dir.path().join("riptide-test.sock")
                );
            }
            ArbitrationOutcome::Owner(_) => panic!("second acquire must not own"),
        }
    }

    #[test]
    fn test_refresh_pid_rewrites_lock_file() {
        let temp_dir = TempDir::new().unwrap();
        let ArbitrationOutcome::Owner(guard) = arbiter(temp_dir.path()).acquire().unwrap() else {
            panic!("expected ownership");
        };
        std::fs::write(guard.lock_path(), "1\n").unwrap();

        guard.refresh_pid().unwrap();
        let recorded = std::fs::read_to_string(guard.lock_path()).unwrap();
        assert_eq!(recorded.trim(), std::process::id().to_string());
    }

    #[test]
    fn test_ownership_released_on_drop() {
        let temp_dir = TempDir::new().unwrap();

        let first = arbiter(temp_dir.path()).acquire().unwrap();
        drop(first);

        assert!(arbiter(temp_dir.path()).acquire().unwrap().is_owner());
    }

    #[test]
    fn test_distinct_identities_do_not_conflict() {
        let temp_dir = TempDir::new().unwrap();

        let _a = IdentityArbiter::new(ApplicationIdentity::new("riptide-1000"), temp_dir.path())
            .acquire()
            .unwrap();
        let b = IdentityArbiter::new(ApplicationIdentity::new("riptide-1001"), temp_dir.path())
            .acquire()
            .unwrap();
        assert!(b.is_owner());
    }

    #[test]
    fn test_grace_period_waits_for_exiting_owner() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().to_path_buf();

        let owner = arbiter(&dir).acquire().unwrap();
        let releaser = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(60));
            drop(owner);
        });

        let outcome = IdentityArbiter::new(ApplicationIdentity::new("riptide-test"), &dir)
            .with_grace(20, Duration::from_millis(25))
            .acquire()
            .unwrap();
        releaser.join().unwrap();
        assert!(outcome.is_owner());
    }

    #[test]
    fn test_grace_period_is_bounded() {
        let temp_dir = TempDir::new().unwrap();
        let _owner = arbiter(temp_dir.path()).acquire().unwrap();

        let start = Instant::now();
        let outcome = IdentityArbiter::new(ApplicationIdentity::new("riptide-test"), temp_dir.path())
            .with_grace(3, Duration::from_millis(20))
            .acquire()
            .unwrap();
        assert!(!outcome.is_owner());
        // Two sleeps between three attempts
        assert!(start.elapsed() >= Duration::from_millis(40));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_guard_removes_socket_file() {
        let temp_dir = TempDir::new().unwrap();
        let guard = match arbiter(temp_dir.path()).acquire().unwrap() {
            ArbitrationOutcome::Owner(guard) => guard,
            ArbitrationOutcome::Client(_) => panic!("expected ownership"),
        };
        std::fs::write(guard.socket_path(), b"").unwrap();
        let socket = guard.socket_path().to_path_buf();

        guard.release();
        assert!(!socket.exists());
        // Lock file is left in place
        assert!(temp_dir.path().join("riptide-test.lock").exists());
    }
}
