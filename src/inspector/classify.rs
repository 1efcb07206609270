//! Library classification.

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

use super::linkage::LibraryReference;
use crate::target::Platform;

/// What a referenced library is, from a portability standpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LibType {
    /// Part of the minimal OS ABI, or explicitly allowed.
    Base,
    /// Shipped by the OS but not in the allowed set.
    System,
    /// Third-party library outside the OS and outside the produced tree.
    OtherPackage,
    /// Referenced but not resolvable.
    Missing,
    /// Points back into the produced Python tree.
    LibPython,
}

impl LibType {
    /// Whether this reference makes an installation non-portable on `platform`.
    pub fn is_problem(self, platform: &Platform) -> bool {
        match self {
            LibType::Base | LibType::LibPython => false,
            LibType::System => *platform == Platform::Linux,
            LibType::OtherPackage | LibType::Missing => true,
        }
    }
}

impl fmt::Display for LibType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LibType::Base => "base",
            LibType::System => "system",
            LibType::OtherPackage => "other_package",
            LibType::Missing => "missing",
            LibType::LibPython => "libpython",
        })
    }
}

/// C runtime and loader, by file name.
const LINUX_BASE: &str = r"^(ld-linux[-\w.]*|ld64|linux-vdso|linux-gate|libc|libm|libdl|libpthread|librt|libutil|libcrypt|libnsl|libresolv|libgcc_s|libstdc\+\+)\.so\b";

/// libSystem and Apple frameworks, by full path.
const MACOS_BASE: &str = r"^(/usr/lib/(libSystem\.B|libc\+\+\.1|libobjc\.A)\.dylib|/System/Library/Frameworks/)";

const LINUX_SYSTEM_DIRS: &[&str] = &["/lib/", "/lib32/", "/lib64/", "/usr/lib/", "/usr/lib32/", "/usr/lib64/"];

const MACOS_SYSTEM_DIRS: &[&str] = &["/usr/lib/", "/System/Library/"];

/// Relative references resolve inside the tree that carries them.
const RELATIVE_MARKERS: &[&str] = &["@rpath/", "@loader_path/", "@executable_path/", "$ORIGIN"];

/// Everything needed to classify references of one installation.
#[derive(Debug, Clone)]
pub struct ClassifyContext {
    platform: Platform,
    /// Installed tree being inspected.
    root: PathBuf,
    /// Prefix the tree was built for (references to it point back into the tree).
    prefixes: Vec<String>,
    base: Regex,
    allowed: Option<Regex>,
}

impl ClassifyContext {
    /// `allowed` is the `allowed-system-libs` regex, matched against both the
    /// full path and the file name.
    pub fn new(platform: &Platform, root: &Path, allowed: Option<&str>) -> Result<Self> {
        let base = match platform {
            Platform::Macos => MACOS_BASE,
            _ => LINUX_BASE,
        };
        let allowed = match allowed.map(str::trim).filter(|s| !s.is_empty()) {
            Some(pattern) => Some(
                Regex::new(pattern)
                    .with_context(|| format!("Invalid allowed-system-libs regex '{}'", pattern))?,
            ),
            None => None,
        };
        Ok(Self {
            platform: platform.clone(),
            root: root.to_path_buf(),
            prefixes: Vec::new(),
            base: Regex::new(base).context("Invalid base library regex")?,
            allowed,
        })
    }

    /// Also treat references under `prefix` as pointing into the tree.
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefixes.push(prefix.trim_end_matches('/').to_string());
        self
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    fn is_in_tree(&self, path: &str) -> bool {
        if RELATIVE_MARKERS.iter().any(|m| path.starts_with(m)) {
            return true;
        }
        if Path::new(path).starts_with(&self.root) {
            return true;
        }
        self.prefixes
            .iter()
            .any(|p| path == p || path.starts_with(&format!("{}/", p)))
    }

    fn is_base(&self, path: &str, name: &str) -> bool {
        let subject = match self.platform {
            Platform::Macos => path,
            _ => name,
        };
        self.base.is_match(subject)
    }

    fn is_allowed(&self, path: &str, name: &str) -> bool {
        self.allowed
            .as_ref()
            .map_or(false, |re| re.is_match(path) || re.is_match(name))
    }

    fn is_system_dir(&self, path: &str) -> bool {
        let dirs = match self.platform {
            Platform::Macos => MACOS_SYSTEM_DIRS,
            _ => LINUX_SYSTEM_DIRS,
        };
        dirs.iter().any(|d| path.starts_with(d))
    }

    /// Classify one reference.
    pub fn classify(&self, reference: &LibraryReference) -> LibType {
        let path = reference.referenced_path.as_str();
        let name = reference.basename();

        if !reference.found {
            return LibType::Missing;
        }
        if self.is_in_tree(path) {
            return LibType::LibPython;
        }
        if self.is_base(path, name) || self.is_allowed(path, name) {
            return LibType::Base;
        }
        if self.is_system_dir(path) {
            return LibType::System;
        }
        LibType::OtherPackage
    }

    /// Fill in `classification` of every reference.
    pub fn classify_all(&self, references: &mut [LibraryReference]) {
        for reference in references {
            reference.classification = Some(self.classify(reference));
        }
    }
}
