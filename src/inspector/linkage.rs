//! Linkage tables: `ldd` / `otool -L` parsing and the tools that patch them.
//!
//! Both listings normalize to the same [`LibraryReference`] shape. Everything
//! that touches real binaries goes through [`LinkageTool`], so the corrector
//! can run against an in-memory fake.

use anyhow::Result;
use serde::Serialize;
use std::path::{Path, PathBuf};

use super::classify::LibType;
use crate::process::Cmd;
use crate::target::Platform;

/// One library a binary links against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LibraryReference {
    pub referencing_binary: PathBuf,
    /// Resolved path, or the bare name when the loader could not resolve it.
    pub referenced_path: String,
    pub resolved_version: Option<String>,
    /// False for `=> not found`.
    pub found: bool,
    /// Filled in by the classifier.
    pub classification: Option<LibType>,
}

impl LibraryReference {
    fn new(binary: &Path, path: &str, version: Option<String>, found: bool) -> Self {
        Self {
            referencing_binary: binary.to_path_buf(),
            referenced_path: path.to_string(),
            resolved_version: version,
            found,
            classification: None,
        }
    }

    /// File name part of the referenced path.
    pub fn basename(&self) -> &str {
        basename(&self.referenced_path)
    }
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Version encoded in a shared object name: `libssl.so.1.1` -> `1.1`.
fn soname_version(name: &str) -> Option<String> {
    let (_, version) = name.split_once(".so.")?;
    if !version.is_empty() && version.split('.').all(|p| p.chars().all(|c| c.is_ascii_digit())) {
        Some(version.to_string())
    } else {
        None
    }
}

/// Parse `ldd` output for `binary`.
///
/// Handles `name => /path (0x..)`, `name => not found` and bare
/// `/path (0x..)` lines; the vdso pseudo-library is skipped.
pub fn parse_ldd_output(binary: &Path, output: &str) -> Vec<LibraryReference> {
    let mut references = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let reference = match line.split_once("=>") {
            Some((name, target)) => {
                let name = name.trim();
                let target = target.trim();
                if target.starts_with("not found") {
                    LibraryReference::new(binary, name, soname_version(name), false)
                } else {
                    let path = strip_load_address(target);
                    if path.is_empty() {
                        // `name => (0x...)`: resolved by the loader itself (vdso)
                        continue;
                    }
                    LibraryReference::new(binary, path, soname_version(name), true)
                }
            }
            None => {
                let path = strip_load_address(line);
                if !path.starts_with('/') {
                    // linux-vdso.so.1, "statically linked", "not a dynamic executable"
                    continue;
                }
                LibraryReference::new(binary, path, soname_version(basename(path)), true)
            }
        };
        references.push(reference);
    }
    references
}

fn strip_load_address(text: &str) -> &str {
    match text.find(" (0x") {
        Some(pos) => text[..pos].trim(),
        None => text.trim_end_matches(')').trim(),
    }
}

/// Parse `otool -L` output for `inspected`.
///
/// Header lines (the inspected file itself, one per architecture) are skipped.
/// A dylib lists its own install name first; that entry is not a dependency
/// and is dropped when its basename matches the inspected file's.
pub fn parse_otool_output(inspected: &Path, output: &str) -> Vec<LibraryReference> {
    let own_name = inspected
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut references: Vec<LibraryReference> = Vec::new();
    let mut first_in_section = true;
    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if !line.starts_with(char::is_whitespace) {
            first_in_section = true;
            continue;
        }

        let line = line.trim();
        let (path, details) = match line.find(" (") {
            Some(pos) => (line[..pos].trim(), &line[pos..]),
            None => (line, ""),
        };
        let is_self = first_in_section && basename(path) == own_name;
        first_in_section = false;
        if is_self || references.iter().any(|r| r.referenced_path == path) {
            continue;
        }

        let version = details
            .split("current version")
            .nth(1)
            .map(|v| v.trim().trim_end_matches(')').trim().to_string())
            .filter(|v| !v.is_empty());
        references.push(LibraryReference::new(inspected, path, version, true));
    }
    references
}

/// Install name of a dylib from `otool -D` output.
pub fn parse_otool_id(output: &str) -> Option<String> {
    output
        .lines()
        .skip(1)
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

/// `LC_RPATH` entries from `otool -l` output.
pub fn parse_otool_rpaths(output: &str) -> Vec<String> {
    let mut rpaths = Vec::new();
    let mut in_rpath = false;
    for line in output.lines() {
        let line = line.trim();
        if line.starts_with("cmd ") {
            in_rpath = line == "cmd LC_RPATH";
        } else if in_rpath {
            if let Some(rest) = line.strip_prefix("path ") {
                let path = match rest.find(" (offset") {
                    Some(pos) => &rest[..pos],
                    None => rest,
                };
                rpaths.push(path.trim().to_string());
                in_rpath = false;
            }
        }
    }
    rpaths
}

/// Read and patch binary linkage.
pub trait LinkageTool {
    /// Libraries `binary` links against.
    fn references(&self, binary: &Path) -> Result<Vec<LibraryReference>>;

    /// Run-time search path entries (`RUNPATH`/`RPATH`, `LC_RPATH`).
    fn rpaths(&self, binary: &Path) -> Result<Vec<String>>;

    /// Own install name (macOS dylibs only).
    fn install_id(&self, binary: &Path) -> Result<Option<String>>;

    /// Replace the whole runpath (ELF).
    fn set_runpath(&self, binary: &Path, runpath: &str) -> Result<()>;

    fn add_rpath(&self, binary: &Path, rpath: &str) -> Result<()>;

    fn change_reference(&self, binary: &Path, old: &str, new: &str) -> Result<()>;

    fn set_install_id(&self, binary: &Path, id: &str) -> Result<()>;
}

/// [`LinkageTool`] backed by ldd/patchelf on Linux and otool/install_name_tool
/// on macOS.
pub struct SystemTools {
    platform: Platform,
}

impl SystemTools {
    pub fn new(platform: &Platform) -> Self {
        Self {
            platform: platform.clone(),
        }
    }

    fn is_macos(&self) -> bool {
        self.platform == Platform::Macos
    }

    fn output(program: &str, args: &[&str], binary: &Path) -> Result<String> {
        let result = Cmd::new(program)
            .args(args)
            .arg_path(binary)
            .error_msg(format!("{} failed on {}", program, binary.display()))
            .run()?;
        Ok(result.stdout)
    }

    fn patch(program: &str, args: &[&str], binary: &Path) -> Result<()> {
        tracing::debug!("{} {} {}", program, args.join(" "), binary.display());
        Self::output(program, args, binary).map(|_| ())
    }
}

impl LinkageTool for SystemTools {
    fn references(&self, binary: &Path) -> Result<Vec<LibraryReference>> {
        if self.is_macos() {
            let output = Self::output("otool", &["-L"], binary)?;
            Ok(parse_otool_output(binary, &output))
        } else {
            // ldd exits non-zero for static executables; that just means "no references".
            let result = Cmd::new("ldd").arg_path(binary).allow_fail().run()?;
            Ok(parse_ldd_output(binary, &result.stdout))
        }
    }

    fn rpaths(&self, binary: &Path) -> Result<Vec<String>> {
        if self.is_macos() {
            let output = Self::output("otool", &["-l"], binary)?;
            Ok(parse_otool_rpaths(&output))
        } else {
            let output = Self::output("patchelf", &["--print-rpath"], binary)?;
            Ok(output
                .trim()
                .split(':')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect())
        }
    }

    fn install_id(&self, binary: &Path) -> Result<Option<String>> {
        if !self.is_macos() {
            return Ok(None);
        }
        let output = Self::output("otool", &["-D"], binary)?;
        Ok(parse_otool_id(&output))
    }

    fn set_runpath(&self, binary: &Path, runpath: &str) -> Result<()> {
        Self::patch("patchelf", &["--set-rpath", runpath], binary)
    }

    fn add_rpath(&self, binary: &Path, rpath: &str) -> Result<()> {
        Self::patch("install_name_tool", &["-add_rpath", rpath], binary)
    }

    fn change_reference(&self, binary: &Path, old: &str, new: &str) -> Result<()> {
        Self::patch("install_name_tool", &["-change", old, new], binary)
    }

    fn set_install_id(&self, binary: &Path, id: &str) -> Result<()> {
        Self::patch("install_name_tool", &["-id", id], binary)
    }
}
