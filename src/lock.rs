//! Single-instance guard per flavor.
//!
//! Two MTA deliveries for the same flavor must not read standard input
//! concurrently. The guard is an advisory OS lock on a file in the temp
//! directory; the file holds the owner's PID for operators. The kernel
//! drops the lock when the owning process exits, so a killed run never
//! blocks later ones.

use std::fs::{File, OpenOptions, TryLockError};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Mail2RmqError, Result};

/// Held for the lifetime of the value. The lock file itself stays in place.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
    _file: File,
}

impl InstanceLock {
    /// Lock `{dir}/mail2rmq-{flavor}.lock`, creating it if needed.
    ///
    /// Returns [`Mail2RmqError::Locked`] if another instance holds it.
    pub fn acquire(dir: &Path, flavor: &str) -> Result<Self> {
        let path = lock_path(dir, flavor);
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| Mail2RmqError::io(&path, e))?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                return Err(Mail2RmqError::Locked {
                    flavor: flavor.to_string(),
                    path,
                });
            }
            Err(TryLockError::Error(e)) => return Err(Mail2RmqError::io(&path, e)),
        }

        // Only the holder rewrites the contents, replacing any stale PID.
        file.set_len(0)
            .and_then(|()| writeln!(file, "{}", std::process::id()))
            .map_err(|e| Mail2RmqError::io(&path, e))?;

        tracing::debug!(path = %path.display(), "Instance lock acquired");
        Ok(Self { path, _file: file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn lock_path(dir: &Path, flavor: &str) -> PathBuf {
    let flavor: String = flavor
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    dir.join(format!("mail2rmq-{flavor}.lock"))
}
