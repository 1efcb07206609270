//! Session folder cleaning (`--clean build,deps,downloads,logs`).

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

use crate::folders::Folders;

/// Folders cleaned when `--clean` is not given. Downloads are preserved.
pub const DEFAULT_CLEAN: &str = "build,logs";

/// Folder names `--clean` accepts.
pub const CLEANABLE: &[&str] = &["build", "deps", "downloads", "logs"];

/// Parse a `--clean` CSV, failing on unknown names before anything is removed.
pub fn parse_clean_list(csv: &str) -> Result<Vec<String>> {
    let names: Vec<String> = csv
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    let unknown: Vec<&str> = names
        .iter()
        .map(String::as_str)
        .filter(|name| !CLEANABLE.contains(name))
        .collect();
    if !unknown.is_empty() {
        bail!(
            "Unknown folder(s) to clean: {} (expected one of: {})",
            unknown.join(", "),
            CLEANABLE.join(", ")
        );
    }

    Ok(names)
}

/// Remove the requested session folders. Returns how many were removed.
pub fn clean_folders(folders: &Folders, names: &[String]) -> Result<usize> {
    let mut cleaned = 0;
    for name in names {
        let path = match name.as_str() {
            "build" => vec![folders.components.clone(), folders.destdir.clone()],
            "deps" => vec![folders.deps.clone()],
            "downloads" => vec![folders.downloads.clone()],
            "logs" => vec![folders.logs.clone()],
            other => bail!("Unknown folder to clean: {}", other),
        };
        for path in path {
            if remove_dir(&path)? {
                cleaned += 1;
            }
        }
    }
    Ok(cleaned)
}

fn remove_dir(path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }
    println!("Removing {}...", path.display());
    fs::remove_dir_all(path).with_context(|| format!("Failed to remove {}", path.display()))?;
    Ok(true)
}
