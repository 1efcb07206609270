//! SHA256 checksums for distribution artifacts.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Hex SHA256 of a file, streamed so large tarballs are not read into memory.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file
            .read(&mut buffer)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Write `<artifact>.sha256` in `sha256sum` format and return its path.
pub fn write_sidecar(artifact: &Path) -> Result<PathBuf> {
    let hash = sha256_file(artifact)?;
    let name = artifact
        .file_name()
        .context("Artifact path has no file name")?
        .to_string_lossy();
    let sidecar = artifact.with_file_name(format!("{}.sha256", name));
    std::fs::write(&sidecar, format!("{}  {}\n", hash, name))
        .with_context(|| format!("Failed to write {}", sidecar.display()))?;
    Ok(sidecar)
}
