//! Temporary write access to installed binaries.

use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Grants owner-write on a file for as long as it lives.
///
/// The original mode is restored on drop, whether or not the patching done
/// in between succeeded. Files that were already writable are left alone.
#[derive(Debug)]
pub struct WritableGuard {
    path: PathBuf,
    original: Option<u32>,
}

impl WritableGuard {
    pub fn new(path: &Path) -> Result<Self> {
        let mode = fs::metadata(path)
            .with_context(|| format!("Failed to stat {}", path.display()))?
            .permissions()
            .mode();

        let original = if mode & 0o200 == 0 {
            fs::set_permissions(path, fs::Permissions::from_mode(mode | 0o200))
                .with_context(|| format!("Failed to make {} writable", path.display()))?;
            Some(mode)
        } else {
            None
        };

        Ok(Self {
            path: path.to_path_buf(),
            original,
        })
    }
}

impl Drop for WritableGuard {
    fn drop(&mut self) {
        if let Some(mode) = self.original {
            if let Err(e) = fs::set_permissions(&self.path, fs::Permissions::from_mode(mode)) {
                eprintln!(
                    "  [WARN] Failed to restore mode {:o} on {}: {}",
                    mode & 0o7777,
                    self.path.display(),
                    e
                );
            }
        }
    }
}
