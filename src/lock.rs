//! File-based locking so a single orchestrator owns the dump marker.
//!
//! Uses flock-style advisory locking on a `.lock` file next to the marker.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::error::RknError;

/// A guard holding an exclusive lock next to the marker file.
/// The lock is released when the guard is dropped.
#[derive(Debug)]
pub struct LockGuard {
    _file: File,
    path: PathBuf,
}

/// Lock file path belonging to a marker file (`/tmp/lastrkndump.lock`).
pub fn lock_path_for(marker: &Path) -> PathBuf {
    let mut name = marker.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

impl LockGuard {
    /// Attempt to acquire the exclusive lock guarding `marker`.
    /// Fails immediately if another process holds it.
    ///
    /// Opens with create+read+write (no truncate) to avoid a race between
    /// creation and locking.
    pub fn acquire(marker: &Path) -> Result<Self> {
        let lock_path = lock_path_for(marker);
        if let Some(parent) = lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create lock directory: {:?}", parent))?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock file: {:?}", lock_path))?;

        fs::set_permissions(&lock_path, fs::Permissions::from_mode(0o600))
            .context("Failed to set lock file permissions")?;

        file.try_lock_exclusive().map_err(|_| {
            RknError::Lock(format!(
                "Another rkndaemon instance owns {:?}.\n\
                 If you believe this is an error, remove the lock file: {:?}",
                marker, lock_path
            ))
        })?;

        Ok(Self {
            _file: file,
            path: lock_path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
