//! List command - latest upstream releases.

use anyhow::{bail, Result};

use portable_python::download;
use portable_python::version::{self, SUPPORTED_FAMILIES};

/// Execute the list command.
pub fn cmd_list(family: &str) -> Result<()> {
    if !SUPPORTED_FAMILIES.contains(&family) {
        bail!(
            "Python family '{}' is not supported (supported: {})",
            family,
            SUPPORTED_FAMILIES.join(", ")
        );
    }

    let index = download::fetch_text(version::PYTHON_FTP_INDEX)?;
    let releases = version::latest_releases(&index);
    if releases.is_empty() {
        bail!("No releases found at {}", version::PYTHON_FTP_INDEX);
    }

    println!("{}:", family);
    for release in releases {
        println!("  {}", release);
    }
    Ok(())
}
