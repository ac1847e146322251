use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};

use crate::error::{Result, UpdaterError};

const LOCK_FILE: &str = ".plex-updater.lock";

/// Exclusive advisory lock held for the lifetime of a run.
pub struct RunLock {
    _lock: Flock<File>,
    path: PathBuf,
}

impl RunLock {
    /// Take the lock in `dir`, failing immediately if another run holds it.
    pub fn acquire(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => Ok(Self { _lock: lock, path }),
            Err((_, Errno::EWOULDBLOCK)) => Err(UpdaterError::AlreadyRunning(path)),
            Err((_, errno)) => Err(UpdaterError::Io(std::io::Error::from(errno))),
        }
    }

    /// Location of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
