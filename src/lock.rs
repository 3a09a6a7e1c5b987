//! Chroot lock management
//!
//! Provides exclusive locking so two builds never share one chroot.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::ffi::OsString;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Lock file path for a chroot: a `.lock` sibling of the directory.
pub fn lock_path(chroot: &Path) -> PathBuf {
    let mut name = chroot
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("chroot"));
    name.push(".lock");
    chroot.with_file_name(name)
}

/// Acquire an exclusive lock on a chroot directory.
/// Returns a guard that releases the lock when dropped.
pub fn acquire_chroot_lock(chroot: &Path) -> Result<ChrootLock> {
    let lock_path = lock_path(chroot);

    let lock_file = File::create(&lock_path)
        .with_context(|| format!("Failed to create lock file: {}", lock_path.display()))?;

    if lock_file.try_lock_exclusive().is_err() {
        return Err(anyhow::anyhow!(
            "Chroot '{}' is already in use by another build. \
             If this is incorrect, delete '{}'",
            chroot.display(),
            lock_path.display()
        ));
    }

    Ok(ChrootLock {
        _file: lock_file,
        path: lock_path,
    })
}

/// RAII guard for a chroot lock - releases lock and deletes lock file when dropped
#[derive(Debug)]
pub struct ChrootLock {
    _file: File,
    path: PathBuf,
}

impl ChrootLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ChrootLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
