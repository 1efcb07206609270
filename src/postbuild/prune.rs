//! Remove files the portable build doesn't ship (`cpython-clean`).

use anyhow::{Context, Result};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Compile wildcard patterns (`*`, `?`) into one anchored regex on file names.
pub fn patterns_regex(patterns: &[String]) -> Result<Option<Regex>> {
    let alternatives: Vec<String> = patterns
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(|p| regex::escape(p).replace(r"\*", ".*").replace(r"\?", "."))
        .collect();
    if alternatives.is_empty() {
        return Ok(None);
    }
    let pattern = format!("^({})$", alternatives.join("|"));
    Regex::new(&pattern)
        .map(Some)
        .with_context(|| format!("Invalid clean patterns {:?}", patterns))
}

/// Delete every file or folder under `root` whose name matches one of
/// `patterns`. Returns how many entries were removed.
pub fn prune(root: &Path, patterns: &[String]) -> Result<usize> {
    let re = match patterns_regex(patterns)? {
        Some(re) => re,
        None => return Ok(0),
    };
    if !root.is_dir() {
        return Ok(0);
    }

    let mut doomed: Vec<(PathBuf, bool)> = Vec::new();
    let mut walker = WalkDir::new(root).min_depth(1).into_iter();
    while let Some(entry) = walker.next() {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !re.is_match(&entry.file_name().to_string_lossy()) {
            continue;
        }
        let is_dir = entry.file_type().is_dir();
        if is_dir {
            walker.skip_current_dir();
        }
        doomed.push((entry.into_path(), is_dir));
    }

    for (path, is_dir) in &doomed {
        tracing::debug!("Pruning {}", path.display());
        let result = if *is_dir {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        result.with_context(|| format!("Failed to remove {}", path.display()))?;
    }
    Ok(doomed.len())
}
