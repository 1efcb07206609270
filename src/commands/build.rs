//! Build command - compiles a portable CPython.

use anyhow::Result;

use portable_python::config::Config;
use portable_python::session::{BuildOptions, BuildSetup};

/// Execute the build command.
pub fn cmd_build(options: &BuildOptions, config: Config) -> Result<()> {
    let mut setup = BuildSetup::new(options, config)?;
    let tarball = setup.compile()?;
    println!("\nDone: {}", tarball.display());
    Ok(())
}
