//! Source tarball download and decompression.
//!
//! Downloads are cached: a tarball already present in the downloads folder is
//! reused as-is. Every transfer is a single attempt; a network failure aborts
//! the module that needed it.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::process::Cmd;

const USER_AGENT: &str = concat!("portable-python/", env!("CARGO_PKG_VERSION"));

/// File name a URL will be saved under.
pub fn archive_name(url: &str) -> Result<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    // Drop `scheme://host` so a bare host is never taken for a file name
    let path = match path.split_once("://") {
        Some((_, rest)) => rest.split_once('/').map_or("", |(_, p)| p),
        None => path,
    };
    let name = path.trim_end_matches('/').rsplit('/').next().unwrap_or("");
    if name.is_empty() || !name.contains('.') {
        bail!("Can't determine archive name from URL {}", url);
    }
    Ok(name.to_string())
}

/// Download `url` into `dest_dir`, skipping the transfer if already cached.
pub fn download(url: &str, dest_dir: &Path) -> Result<PathBuf> {
    let dest = dest_dir.join(archive_name(url)?);
    if dest.exists() {
        tracing::debug!("Using cached {}", dest.display());
        return Ok(dest);
    }

    fs::create_dir_all(dest_dir)
        .with_context(|| format!("Failed to create {}", dest_dir.display()))?;

    println!("  Downloading {}...", url);
    let rt = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    rt.block_on(http(url, &dest))?;
    Ok(dest)
}

/// Fetch a small text document (e.g. a release index).
pub fn fetch_text(url: &str) -> Result<String> {
    let rt = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    rt.block_on(async {
        let response = client()?
            .get(url)
            .send()
            .await
            .with_context(|| format!("HTTP request failed: {}", url))?;
        let status = response.status();
        if !status.is_success() {
            bail!("HTTP {} for {}", status.as_u16(), url);
        }
        response
            .text()
            .await
            .with_context(|| format!("Failed to read response from {}", url))
    })
}

fn client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .context("Failed to create HTTP client")
}

/// Stream `url` to a `.part` file, renamed into place once complete.
async fn http(url: &str, dest: &Path) -> Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut response = client()?
        .get(url)
        .send()
        .await
        .with_context(|| format!("HTTP request failed: {}", url))?;

    let status = response.status();
    if !status.is_success() {
        bail!(
            "HTTP {} for {}: {}",
            status.as_u16(),
            url,
            status.canonical_reason().unwrap_or("Unknown error")
        );
    }

    let partial = dest.with_extension("part");
    let file = tokio::fs::File::create(&partial)
        .await
        .with_context(|| format!("Failed to create {}", partial.display()))?;
    let mut writer = tokio::io::BufWriter::new(file);

    while let Some(chunk) = response
        .chunk()
        .await
        .with_context(|| format!("Failed to read chunk from {}", url))?
    {
        writer
            .write_all(&chunk)
            .await
            .with_context(|| format!("Failed to write to {}", partial.display()))?;
    }
    writer
        .flush()
        .await
        .with_context(|| format!("Failed to flush {}", partial.display()))?;

    tokio::fs::rename(&partial, dest)
        .await
        .with_context(|| format!("Failed to move download into {}", dest.display()))?;
    Ok(())
}

/// Unpack `archive` into `dest`, dropping the archive's top-level folder.
///
/// `dest` is recreated from scratch so a module always builds from pristine
/// sources.
pub fn decompress(archive: &Path, dest: &Path) -> Result<()> {
    if dest.exists() {
        fs::remove_dir_all(dest)
            .with_context(|| format!("Failed to clear {}", dest.display()))?;
    }
    fs::create_dir_all(dest).with_context(|| format!("Failed to create {}", dest.display()))?;

    Cmd::new("tar")
        .arg("-xf")
        .arg_path(archive)
        .arg("-C")
        .arg_path(dest)
        .arg("--strip-components=1")
        .error_msg(format!("Failed to unpack {}", archive.display()))
        .run()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process;

    #[test]
    fn test_archive_name() {
        assert_eq!(
            archive_name("https://zlib.net/fossils/zlib-1.3.1.tar.gz").unwrap(),
            "zlib-1.3.1.tar.gz"
        );
        assert_eq!(
            archive_name("https://example.com/files/tcl8.6.13-src.tar.gz?viasf=1").unwrap(),
            "tcl8.6.13-src.tar.gz"
        );
        assert!(archive_name("https://example.com/").is_err());
        assert!(archive_name("https://example.com").is_err());
        assert!(archive_name("https://example.com/?file=a.tar.gz").is_err());
        assert_eq!(
            archive_name("https://example.com/pkg-1.0.tar.gz/").unwrap(),
            "pkg-1.0.tar.gz"
        );
    }

    #[test]
    fn test_cached_download_is_reused() {
        let temp = tempfile::tempdir().unwrap();
        let cached = temp.path().join("zlib-1.3.1.tar.gz");
        fs::write(&cached, "cached").unwrap();

        // Unroutable host: any network access would fail the test.
        let path = download("https://invalid.invalid/zlib-1.3.1.tar.gz", temp.path()).unwrap();
        assert_eq!(path, cached);
    }

    #[test]
    fn test_decompress_strips_top_folder() {
        let temp = tempfile::tempdir().unwrap();
        let tree = temp.path().join("pkg-1.0");
        fs::create_dir_all(&tree).unwrap();
        fs::write(tree.join("configure"), "#!/bin/sh\n").unwrap();
        let archive = temp.path().join("pkg-1.0.tar.gz");
        process::run_in(
            "tar",
            ["-czf", archive.to_str().unwrap(), "pkg-1.0"],
            temp.path(),
        )
        .unwrap();

        let dest = temp.path().join("out");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("stale"), "old").unwrap();
        decompress(&archive, &dest).unwrap();

        assert!(dest.join("configure").exists());
        assert!(!dest.join("stale").exists());
    }
}
