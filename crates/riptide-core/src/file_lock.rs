//! Advisory whole-file locks that die with their process.
//!
//! Uses `flock()` on a dedicated lock file. The kernel drops the lock when
//! the last descriptor for the open file closes, so a crashed owner never
//! leaves a stale lock behind.
//!
//! # Example
//!
//! ```no_run
//! use riptide_core::file_lock::LockFile;
//!
//! fn claim(path: &std::path::Path) -> std::io::Result<bool> {
//!     let lock = LockFile::new(path)?;
//!     Ok(lock.try_lock()?.is_some())
//! }
//! ```

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A lock file path that processes compete for.
#[derive(Debug, Clone)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    /// Creates the parent directory if it doesn't exist.
    pub fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    /// Tries to take the exclusive lock without blocking.
    ///
    /// Returns `Ok(None)` if another descriptor holds it.
    pub fn try_lock(&self) -> io::Result<Option<HeldLock>> {
        let file = self.open()?;

        #[cfg(unix)]
        {
            use nix::errno::Errno;
            use nix::fcntl::{Flock, FlockArg};

            match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
                Ok(flock) => Ok(Some(HeldLock {
                    flock,
                    path: self.path.clone(),
                })),
                Err((_, errno)) if errno == Errno::EWOULDBLOCK || errno == Errno::EAGAIN => {
                    Ok(None)
                }
                Err((_, errno)) => Err(io::Error::other(format!("flock failed: {errno}"))),
            }
        }

        #[cfg(not(unix))]
        {
            let _ = file;
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "File locking not supported on this platform",
            ))
        }
    }

    /// Reads the pid the current holder recorded, if any.
    ///
    /// Needs no lock; a holder mid-write simply yields `None`.
    pub fn read_owner_pid(&self) -> Option<u32> {
        let mut contents = String::new();
        File::open(&self.path)
            .and_then(|mut f| f.read_to_string(&mut contents))
            .ok()?;
        contents.trim().parse().ok()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> io::Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
    }
}

/// An exclusively held lock. Released when dropped or when the process dies.
#[derive(Debug)]
pub struct HeldLock {
    #[cfg(unix)]
    flock: nix::fcntl::Flock<File>,
    path: PathBuf,
}

impl HeldLock {
    /// Replaces the lock file contents with `pid`.
    #[cfg(unix)]
    pub fn record_pid(&self, pid: u32) -> io::Result<()> {
        let mut file: &File = &self.flock;
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        writeln!(file, "{pid}")?;
        file.sync_data()
    }

    #[cfg(not(unix))]
    pub fn record_pid(&self, _pid: u32) -> io::Result<()> {
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
