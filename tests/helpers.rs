//! Shared test utilities for portable-python tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use portable_python::config::{Config, ConfigSource};
use portable_python::download;
use portable_python::process;
use portable_python::session::{BuildOptions, BuildSetup};
use portable_python::target::TargetSystem;

/// Test environment with a temporary working directory.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    /// Directory `build/` and `dist/` are resolved against
    pub base_dir: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base_dir = temp_dir.path().to_path_buf();
        Self {
            _temp_dir: temp_dir,
            base_dir,
        }
    }

    /// Build options for a linux-x86_64 build with no auto-detected modules.
    pub fn options(&self, python: &str) -> BuildOptions {
        BuildOptions {
            python: python.to_string(),
            modules: Some("none".to_string()),
            target: Some("linux-x86_64".to_string()),
            base_dir: self.base_dir.clone(),
            ..Default::default()
        }
    }

    /// `<base>/build/<version>`
    pub fn build_root(&self, version: &str) -> PathBuf {
        self.base_dir.join("build").join(version)
    }

    /// linux-x86_64 target whose system headers are `<base>/include`, with
    /// only the X11 headers present (so tkinter can be selected).
    pub fn x11_target(&self) -> TargetSystem {
        let include = self.base_dir.join("include");
        fs::create_dir_all(include.join("X11")).expect("Failed to create include dir");
        fs::write(include.join("X11/Xlib.h"), "").expect("Failed to write Xlib.h");
        TargetSystem::from_spec(Some("linux-x86_64"))
            .expect("Invalid target")
            .with_sys_include(include)
    }

    /// Place a source tarball for module `name` in the downloads folder, so
    /// the build never reaches the network.
    pub fn seed_download(&self, setup: &BuildSetup, name: &str, files: &[(&str, &str)]) -> PathBuf {
        let builder = setup
            .builders()
            .iter()
            .find(|b| b.name() == name)
            .expect("Module not selected");
        let archive = setup
            .session
            .folders
            .downloads
            .join(download::archive_name(&builder.url()).expect("Invalid URL"));
        create_source_tarball(&archive, &format!("{}-{}", name, builder.version()), files);
        archive
    }

    /// Write a config file under the base dir and return its path.
    pub fn write_config(&self, name: &str, yaml: &str) -> PathBuf {
        let path = self.base_dir.join(name);
        fs::write(&path, yaml).expect("Failed to write config");
        path
    }
}

/// Config from a single YAML document on top of the defaults.
pub fn config_from(yaml: &str) -> Config {
    let source = ConfigSource::from_yaml("test", yaml).expect("Invalid test config");
    Config::from_sources(vec![source]).expect("Failed to build config")
}

/// Create `archive` (a .tar.gz) holding `<top>/<file>` entries.
///
/// Files are written with mode 0644, so nothing in the archive is executable.
pub fn create_source_tarball(archive: &Path, top: &str, files: &[(&str, &str)]) {
    let staging = TempDir::new().expect("Failed to create staging dir");
    let tree = staging.path().join(top);
    for (name, content) in files {
        let path = tree.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create source dir");
        }
        fs::write(&path, content).expect("Failed to write source file");
    }
    if let Some(parent) = archive.parent() {
        fs::create_dir_all(parent).expect("Failed to create downloads dir");
    }
    process::run_in(
        "tar",
        ["-czf", archive.to_str().expect("utf-8 path"), top],
        staging.path(),
    )
    .expect("Failed to create tarball");
}
