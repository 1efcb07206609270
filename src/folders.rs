//! On-disk layout of a build session.
//!
//! ```text
//! <base>/<build>/<version>/
//!     build/<module>/   unpacked sources, one isolated folder per module
//!     deps/             shared install prefix of every compiled dependency
//!     downloads/        cached source tarballs
//!     logs/             NN-<module>.log, one per compiled module
//!     root/             DESTDIR of `make install` for CPython
//! <base>/<dist>/<name>-<platform>-<arch>.tar.gz
//! ```

use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::target::TargetSystem;
use crate::version::PythonSpec;

/// Prefix CPython is configured with when no `--prefix` is given. The
/// post-build corrector rewrites every reference to it.
pub const PORTABLE_MARKER: &str = "/ppp-marker";

/// Paths used by one build session.
#[derive(Debug, Clone)]
pub struct Folders {
    pub base: PathBuf,
    /// `<build>/<version>`
    pub build_root: PathBuf,
    pub components: PathBuf,
    pub deps: PathBuf,
    pub downloads: PathBuf,
    pub logs: PathBuf,
    pub destdir: PathBuf,
    pub dist: PathBuf,
    /// Expanded `--prefix`, if the user asked for a fixed install location.
    pub prefix: Option<String>,
    /// Prefix CPython is configured with (explicit prefix or the marker).
    pub build_prefix: String,
}

impl Folders {
    pub fn new(base: &Path, config: &Config, python: &PythonSpec, prefix: Option<&str>) -> Self {
        let resolve = |key: &str, default: &str| -> PathBuf {
            let value = config.get_str(key).unwrap_or_else(|| default.to_string());
            let path = PathBuf::from(python.expand(&value));
            if path.is_absolute() {
                path
            } else {
                base.join(path)
            }
        };

        let build_root = resolve("folders.build", "build").join(python.version.to_string());
        let prefix = prefix
            .map(|p| python.expand(p.trim()))
            .map(|p| normalize_prefix(&p))
            .filter(|p| p != "/");
        let build_prefix = prefix
            .clone()
            .unwrap_or_else(|| format!("{}/{}", PORTABLE_MARKER, python.version));

        Self {
            base: base.to_path_buf(),
            components: build_root.join("build"),
            deps: build_root.join("deps"),
            downloads: build_root.join("downloads"),
            logs: build_root.join("logs"),
            destdir: build_root.join("root"),
            dist: resolve("folders.dist", "dist"),
            build_root,
            prefix,
            build_prefix,
        }
    }

    /// True when the result must be relocatable (no fixed prefix).
    pub fn is_portable(&self) -> bool {
        self.prefix.is_none()
    }

    /// Where `make install DESTDIR=...` places the installation.
    pub fn install_dir(&self) -> PathBuf {
        self.destdir.join(self.build_prefix.trim_start_matches('/'))
    }

    /// Source folder of one module.
    pub fn component(&self, name: &str) -> PathBuf {
        self.components.join(name)
    }

    /// Final tarball path, e.g. `dist/apps-python3.9.7-linux-x86_64.tar.gz`.
    pub fn tarball(&self, python: &PythonSpec, target: &TargetSystem) -> PathBuf {
        let name = match &self.prefix {
            Some(prefix) => prefix.trim_matches('/').replace('/', "-"),
            None => format!("{}-{}", python.family, python.version),
        };
        self.dist.join(format!(
            "{}-{}-{}.tar.gz",
            name, target.platform, target.architecture
        ))
    }
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}
