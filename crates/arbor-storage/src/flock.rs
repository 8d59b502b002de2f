//! Store ownership across processes.
//!
//! A store is owned by one `NodeStore` at a time. Ownership is an exclusive
//! advisory `flock` on the store's lock file, taken without waiting, so a
//! second opener in any process fails immediately with `StoreInUse` instead
//! of seeding its own id counter from the same file.
//!
//! The lock is released when the [`StoreLock`] is dropped or the owning
//! process exits.

use arbor_common::{ArborError, Result};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Exclusive ownership of one store.
#[derive(Debug)]
pub struct StoreLock {
    /// Open handle; the lock lives as long as it does.
    file: File,
    path: PathBuf,
}

impl StoreLock {
    /// Takes ownership of the store guarded by `path`, creating the lock file
    /// if needed.
    pub fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        try_flock(&file, path)?;
        debug!(path = %path.display(), "acquired store lock");

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Returns the lock file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        unlock(&self.file);
        debug!(path = %self.path.display(), "released store lock");
    }
}

#[cfg(unix)]
fn try_flock(file: &File, path: &Path) -> Result<()> {
    use std::os::unix::io::AsRawFd;

    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if result == 0 {
        return Ok(());
    }

    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        Err(ArborError::StoreInUse(path.display().to_string()))
    } else {
        Err(ArborError::LockFailed(format!("{}: {}", path.display(), err)))
    }
}

#[cfg(unix)]
fn unlock(file: &File) {
    use std::os::unix::io::AsRawFd;
    unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
}

// No OS lock elsewhere; only the in-process appender claim applies.
#[cfg(not(unix))]
fn try_flock(_file: &File, _path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(not(unix))]
fn unlock(_file: &File) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_second_handle_is_refused() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.lock");

        let held = StoreLock::acquire(&path).unwrap();
        assert_eq!(held.path(), path.as_path());
        assert!(matches!(
            StoreLock::acquire(&path),
            Err(ArborError::StoreInUse(_))
        ));

        drop(held);
        assert!(StoreLock::acquire(&path).is_ok());
    }

    #[test]
    fn test_refused_while_raw_flock_is_held() {
        use std::os::unix::io::AsRawFd;

        let dir = tempdir().unwrap();
        let path = dir.path().join("store.lock");
        let other = File::create(&path).unwrap();
        let rc = unsafe { libc::flock(other.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        assert_eq!(rc, 0);

        assert!(matches!(
            StoreLock::acquire(&path),
            Err(ArborError::StoreInUse(_))
        ));

        drop(other);
        assert!(StoreLock::acquire(&path).is_ok());
    }
}
