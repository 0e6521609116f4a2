//! Advisory file locks over open file descriptions.
//!
//! OFD locks travel with the file description, not the process, which
//! gives correct semantics when several worker tasks in one process
//! contend for the same lock file.

use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("lock is held elsewhere")]
    Busy,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockType {
    Shared,
    Exclusive,
}

/// An acquired lock: the path, the descriptor holding the lock, and the
/// mode it was taken in. Dropping the record releases the lock.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    file: Option<File>,
    lock_type: LockType,
}

fn ofd_lock(file: &File, lock_type: LockType, blocking: bool) -> Result<(), LockError> {
    let mut fl: libc::flock = unsafe { std::mem::zeroed() };
    fl.l_type = match lock_type {
        LockType::Shared => libc::F_RDLCK as libc::c_short,
        LockType::Exclusive => libc::F_WRLCK as libc::c_short,
    };
    fl.l_whence = libc::SEEK_SET as libc::c_short;
    // l_start/l_len zero: the whole file. l_pid must be 0 for OFD locks.

    let cmd = if blocking {
        libc::F_OFD_SETLKW
    } else {
        libc::F_OFD_SETLK
    };

    loop {
        if unsafe { libc::fcntl(file.as_raw_fd(), cmd, &fl) } == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EINTR) => continue,
            Some(libc::EAGAIN) | Some(libc::EACCES) if !blocking => return Err(LockError::Busy),
            _ => return Err(LockError::Io(err)),
        }
    }
}

impl LockFile {
    /// Acquire a lock on `path`, blocking until it is granted. The file
    /// is created if absent.
    pub fn acquire(path: &Path, lock_type: LockType) -> Result<Self, LockError> {
        Self::acquire_inner(path, lock_type, true)
    }

    /// Non-blocking variant: returns `Busy` if the lock is contended.
    pub fn try_acquire(path: &Path, lock_type: LockType) -> Result<Self, LockError> {
        Self::acquire_inner(path, lock_type, false)
    }

    fn acquire_inner(path: &Path, lock_type: LockType, blocking: bool) -> Result<Self, LockError> {
        loop {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)?;

            ofd_lock(&file, lock_type, blocking)?;

            // A previous exclusive holder may have unlinked the path
            // between our open and the lock grant; a lock on a dead inode
            // guards nothing, so start over on the fresh file.
            if file.metadata()?.nlink() == 0 {
                debug!(path = %path.display(), "lock file unlinked under us, retrying");
                continue;
            }

            return Ok(Self {
                path: path.to_path_buf(),
                file: Some(file),
                lock_type,
            });
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock. An exclusive holder owns the file and unlinks it
    /// before closing; a shared holder first tries a non-blocking upgrade
    /// to exclusive and only unlinks if that succeeds.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        let Some(file) = self.file.take() else {
            return;
        };

        let may_unlink = match self.lock_type {
            LockType::Exclusive => true,
            LockType::Shared => ofd_lock(&file, LockType::Exclusive, false).is_ok(),
        };
        if may_unlink {
            let _ = std::fs::remove_file(&self.path);
        }

        drop(file);
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        self.release_inner();
    }
}
