//! Cross-process named locks.
//!
//! A named lock is an exclusive `flock` on `<lock dir>/<sha256(resource name)>`. Every
//! partkit process on a host derives the same file from the same resource name, so the lock
//! serializes them without any shared daemon. The kernel drops `flock` state when the holder
//! exits, so a leftover lock file never blocks later callers.

use crate::config::Settings;
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Error, Debug)]
pub enum LockError {
    #[error("unable to obtain '{resource}' lock in {}s", .timeout.as_secs())]
    Timeout { resource: String, timeout: Duration },

    #[error("lock file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Lock file path used for `resource` inside `lock_dir`.
pub fn lock_path(lock_dir: &Path, resource: &str) -> PathBuf {
    let digest = Sha256::digest(resource.as_bytes());
    lock_dir.join(format!("{:x}", digest))
}

/// Acquire-only handle; the lock is held by the returned [`NamedLockGuard`].
#[derive(Debug)]
pub struct NamedLock;

impl NamedLock {
    /// Block until the exclusive lock for `resource` is held, or fail after `timeout`.
    pub fn acquire(
        lock_dir: &Path,
        resource: &str,
        timeout: Duration,
    ) -> Result<NamedLockGuard, LockError> {
        let path = lock_path(lock_dir, resource);
        let io_err = |source| LockError::Io {
            path: path.clone(),
            source,
        };
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(io_err)?;

        let start = Instant::now();
        loop {
            let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
            if rc == 0 {
                log::debug!("acquired lock {} for '{}'", path.display(), resource);
                return Ok(NamedLockGuard {
                    file,
                    path: path.clone(),
                    resource: resource.to_string(),
                });
            }

            let err = std::io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EWOULDBLOCK) => {}
                Some(libc::EINTR) => continue,
                _ => return Err(io_err(err)),
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(LockError::Timeout {
                    resource: resource.to_string(),
                    timeout,
                });
            }
            std::thread::sleep(POLL_INTERVAL.min(timeout - elapsed));
        }
    }
}

/// Holds a named lock; unlocks on drop.
#[derive(Debug)]
pub struct NamedLockGuard {
    file: File,
    path: PathBuf,
    resource: String,
}

impl NamedLockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for NamedLockGuard {
    fn drop(&mut self) {
        // Closing the descriptor releases the lock as well; unlocking first makes the
        // release independent of any duplicated descriptors.
        let rc = unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
        if rc != 0 {
            log::warn!(
                "failed to unlock {}: {}",
                self.path.display(),
                std::io::Error::last_os_error()
            );
        } else {
            log::debug!("released lock for '{}'", self.resource);
        }
    }
}

/// Scoped guard serializing mount table mutations on this host.
///
/// Holds the named lock keyed on the mtab path plus an open read handle on the mtab itself.
/// Both are released when the guard drops.
#[derive(Debug)]
pub struct MtabLock {
    // Field order matters: the mtab handle closes before the lock is released.
    _mtab: File,
    lock: NamedLockGuard,
}

impl MtabLock {
    pub fn acquire(settings: &Settings) -> Result<Self, LockError> {
        let mtab_path = &settings.mount_table.mtab;
        let resource = mtab_path.to_string_lossy();
        let lock = NamedLock::acquire(&settings.lock.dir, &resource, settings.lock.timeout())?;
        let mtab = File::open(mtab_path).map_err(|source| LockError::Io {
            path: mtab_path.clone(),
            source,
        })?;
        Ok(Self { _mtab: mtab, lock })
    }

    pub fn lock_path(&self) -> &Path {
        self.lock.path()
    }
}
