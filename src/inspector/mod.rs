//! Binary inspection: find executables and dynamic libraries in an installed
//! tree, list what they link against, classify it, and make it relocatable.

pub mod autocorrect;
pub mod classify;
pub mod linkage;
pub mod permissions;

pub use autocorrect::{LibAutoCorrect, Rewrite};
pub use classify::{ClassifyContext, LibType};
pub use linkage::{LibraryReference, LinkageTool, SystemTools};
pub use permissions::WritableGuard;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use crate::target::Platform;

/// ELF, Mach-O (both endians, 32/64 bit) and fat Mach-O headers.
const BINARY_MAGIC: &[[u8; 4]] = &[
    [0x7f, b'E', b'L', b'F'],
    [0xfe, 0xed, 0xfa, 0xce],
    [0xfe, 0xed, 0xfa, 0xcf],
    [0xce, 0xfa, 0xed, 0xfe],
    [0xcf, 0xfa, 0xed, 0xfe],
    [0xca, 0xfe, 0xba, 0xbe],
];

/// Whether a file name looks like a dynamic library (`.so`, `.so.N.M`, `.dylib`).
pub fn is_library_name(name: &str) -> bool {
    if name.ends_with(".dylib") {
        return true;
    }
    name.match_indices(".so").any(|(pos, _)| {
        let rest = &name[pos + 3..];
        match rest.strip_prefix('.') {
            Some(version) => version
                .split('.')
                .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit())),
            None => rest.is_empty(),
        }
    })
}

fn has_binary_magic(path: &Path) -> bool {
    let mut header = [0u8; 4];
    match File::open(path).and_then(|mut f| f.read_exact(&mut header)) {
        Ok(()) => BINARY_MAGIC.contains(&header),
        Err(_) => false,
    }
}

/// Regular files that are dynamic libraries or executables, sorted by path.
///
/// Candidates are picked by name (`.so[.N...]`, `.dylib`) or execute bit and
/// confirmed by their header, so scripts are never passed to linkage tools.
pub fn binary_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        let executable = entry
            .metadata()
            .map(|m| m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false);
        if (executable || is_library_name(&name)) && has_binary_magic(entry.path()) {
            found.push(entry.path().to_path_buf());
        }
    }
    Ok(found)
}

/// Path to `to` relative to the directory `from_dir`. Both must be absolute
/// (or both relative to the same base).
pub fn relative_path(from_dir: &Path, to: &Path) -> PathBuf {
    let from: Vec<Component> = from_dir.components().collect();
    let target: Vec<Component> = to.components().collect();
    let common = from
        .iter()
        .zip(target.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut rel = PathBuf::new();
    for _ in common..from.len() {
        rel.push("..");
    }
    for part in &target[common..] {
        rel.push(part.as_os_str());
    }
    rel
}

/// Linkage of one binary.
#[derive(Debug, Clone, Serialize)]
pub struct SoInfo {
    /// Path relative to the inspected root.
    pub path: PathBuf,
    pub references: Vec<LibraryReference>,
    /// Set when the binary couldn't be inspected.
    pub error: Option<String>,
}

impl SoInfo {
    pub fn problems<'a>(&'a self, platform: &'a Platform) -> impl Iterator<Item = &'a LibraryReference> {
        self.references.iter().filter(move |r| {
            r.classification
                .map_or(false, |class| class.is_problem(platform))
        })
    }
}

/// Classified linkage of every binary in a tree.
#[derive(Debug, Clone, Serialize)]
pub struct InspectionReport {
    pub root: PathBuf,
    pub platform: String,
    pub binaries: Vec<SoInfo>,
    #[serde(skip)]
    platform_kind: Platform,
}

impl InspectionReport {
    pub fn new(root: &Path, platform: &Platform, binaries: Vec<SoInfo>) -> Self {
        Self {
            root: root.to_path_buf(),
            platform: platform.to_string(),
            binaries,
            platform_kind: platform.clone(),
        }
    }

    /// Inspect every binary under `root`. A binary whose linkage can't be
    /// listed is recorded with its error, not skipped.
    pub fn scan(root: &Path, tool: &dyn LinkageTool, ctx: &ClassifyContext) -> Result<Self> {
        if !root.is_dir() {
            bail!("{} is not a directory", root.display());
        }
        let mut binaries = Vec::new();
        for path in binary_files(root)? {
            let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
            let info = match tool.references(&path) {
                Ok(mut references) => {
                    ctx.classify_all(&mut references);
                    SoInfo {
                        path: relative,
                        references,
                        error: None,
                    }
                }
                Err(err) => SoInfo {
                    path: relative,
                    references: Vec::new(),
                    error: Some(format!("{:#}", err)),
                },
            };
            binaries.push(info);
        }
        Ok(Self::new(root, ctx.platform(), binaries))
    }

    /// Portable iff at least one binary was inspected, none failed, and no
    /// reference is a problem on this platform (`system` is only one on Linux).
    pub fn is_valid(&self) -> bool {
        !self.binaries.is_empty()
            && self.binaries.iter().all(|b| b.error.is_none())
            && self
                .binaries
                .iter()
                .all(|b| b.problems(&self.platform_kind).next().is_none())
    }

    /// Problematic references grouped by library path.
    pub fn problems(&self) -> BTreeMap<String, (LibType, Vec<PathBuf>)> {
        let mut problems: BTreeMap<String, (LibType, Vec<PathBuf>)> = BTreeMap::new();
        for binary in &self.binaries {
            for reference in binary.problems(&self.platform_kind) {
                let class = reference.classification.unwrap_or(LibType::OtherPackage);
                problems
                    .entry(reference.referenced_path.clone())
                    .or_insert_with(|| (class, Vec::new()))
                    .1
                    .push(binary.path.clone());
            }
        }
        problems
    }

    /// Count of references per class, over all binaries.
    pub fn counts(&self) -> BTreeMap<LibType, usize> {
        let mut counts = BTreeMap::new();
        for reference in self.binaries.iter().flat_map(|b| &b.references) {
            if let Some(class) = reference.classification {
                *counts.entry(class).or_insert(0) += 1;
            }
        }
        counts
    }

    /// One-line summary, also used in module logs.
    pub fn summary(&self) -> String {
        let counts: Vec<String> = self
            .counts()
            .iter()
            .map(|(class, n)| format!("{} {}", n, class))
            .collect();
        format!(
            "{} binaries, references: {}",
            self.binaries.len(),
            if counts.is_empty() {
                "none".to_string()
            } else {
                counts.join(", ")
            }
        )
    }

    pub fn print(&self, verbose: bool) {
        println!("=== Inspection of {} ({}) ===\n", self.root.display(), self.platform);

        for binary in &self.binaries {
            let problems: Vec<&LibraryReference> = binary.problems(&self.platform_kind).collect();
            let icon = if binary.error.is_some() || !problems.is_empty() {
                "✗"
            } else {
                "✓"
            };
            if let Some(error) = &binary.error {
                println!("  {} {}: {}", icon, binary.path.display(), error);
                continue;
            }
            if !verbose && problems.is_empty() {
                continue;
            }
            println!("  {} {}", icon, binary.path.display());
            for reference in &binary.references {
                let class = reference.classification;
                let flagged = class.map_or(false, |c| c.is_problem(&self.platform_kind));
                if !verbose && !flagged {
                    continue;
                }
                let version = reference
                    .resolved_version
                    .as_deref()
                    .map(|v| format!(" ({})", v))
                    .unwrap_or_default();
                println!(
                    "      {} [{}] {}{}",
                    if flagged { "⚠" } else { "○" },
                    class.map(|c| c.to_string()).unwrap_or_else(|| "?".to_string()),
                    reference.referenced_path,
                    version
                );
            }
        }

        println!();
        println!("Summary: {}", self.summary());
        if self.is_valid() {
            println!("         portable");
        } else {
            let problems = self.problems();
            println!("         NOT portable, {} problematic libraries", problems.len());
            for (path, (class, users)) in &problems {
                println!("           {} [{}] used by {} binaries", path, class, users.len());
            }
        }
    }
}

/// Root of the installation a python executable (or folder) belongs to.
///
/// Accepts a folder, a path to an executable, or a bare name looked up on
/// PATH (`python3`).
pub fn find_install_root(python: &str) -> Result<PathBuf> {
    let given = Path::new(python);
    let path = if given.components().count() == 1 && !given.exists() {
        which::which(python).with_context(|| format!("'{}' not found on PATH", python))?
    } else {
        given.to_path_buf()
    };

    let path = fs::canonicalize(&path)
        .with_context(|| format!("Failed to resolve {}", path.display()))?;
    if path.is_dir() {
        return Ok(path);
    }

    match path.parent() {
        Some(bin) if bin.file_name().map_or(false, |n| n == "bin") => match bin.parent() {
            Some(root) => Ok(root.to_path_buf()),
            None => Ok(bin.to_path_buf()),
        },
        Some(dir) => Ok(dir.to_path_buf()),
        None => bail!("Can't determine installation folder of {}", path.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(path: &str, class: LibType) -> LibraryReference {
        let mut r = linkage::parse_ldd_output(
            Path::new("bin/python3.9"),
            &format!("\tlibx.so.1 => {} (0x0)\n", path),
        )
        .remove(0);
        r.classification = Some(class);
        r
    }

    fn report(platform: &Platform, refs: Vec<LibraryReference>) -> InspectionReport {
        InspectionReport::new(
            Path::new("/tmp/root"),
            platform,
            vec![SoInfo {
                path: PathBuf::from("bin/python3.9"),
                references: refs,
                error: None,
            }],
        )
    }

    #[test]
    fn test_library_names() {
        assert!(is_library_name("_ssl.cpython-39-x86_64-linux-gnu.so"));
        assert!(is_library_name("libpython3.9.so.1.0"));
        assert!(is_library_name("libpython3.9.dylib"));
        assert!(!is_library_name("python3.9-config"));
        assert!(!is_library_name("libfoo.so.txt"));
    }

    #[test]
    fn test_relative_path() {
        assert_eq!(
            relative_path(Path::new("/r/bin"), Path::new("/r/lib")),
            PathBuf::from("../lib")
        );
        assert_eq!(
            relative_path(Path::new("/r/lib/python3.9/lib-dynload"), Path::new("/r/lib")),
            PathBuf::from("../..")
        );
        assert_eq!(relative_path(Path::new("/r/lib"), Path::new("/r/lib")), PathBuf::new());
    }

    #[test]
    fn test_binary_files_checks_header() {
        let temp = tempfile::tempdir().unwrap();
        let bin = temp.path().join("bin");
        fs::create_dir_all(&bin).unwrap();
        fs::write(bin.join("python3.9"), b"\x7fELF\x02\x01").unwrap();
        fs::write(bin.join("pip3"), "#!/bin/sh\n").unwrap();
        for name in ["python3.9", "pip3"] {
            fs::set_permissions(bin.join(name), fs::Permissions::from_mode(0o755)).unwrap();
        }
        fs::write(temp.path().join("libz.so.1"), b"\xcf\xfa\xed\xfe").unwrap();
        fs::write(temp.path().join("README"), b"\x7fELF").unwrap();

        let found = binary_files(temp.path()).unwrap();
        assert_eq!(found, vec![bin.join("python3.9"), temp.path().join("libz.so.1")]);
    }

    #[test]
    fn test_system_reference_validity_depends_on_platform() {
        let refs = vec![
            reference("/lib/x86_64-linux-gnu/libc.so.6", LibType::Base),
            reference("/usr/lib/libncursesw.so.6", LibType::System),
        ];
        assert!(!report(&Platform::Linux, refs.clone()).is_valid());
        assert!(report(&Platform::Macos, refs).is_valid());
    }

    #[test]
    fn test_empty_or_failed_scan_is_invalid() {
        let empty = InspectionReport::new(Path::new("/tmp/root"), &Platform::Linux, Vec::new());
        assert!(!empty.is_valid());

        let mut failed = report(&Platform::Macos, Vec::new());
        failed.binaries[0].error = Some("otool failed".to_string());
        assert!(!failed.is_valid());
    }

    #[test]
    fn test_problems_grouped_by_library() {
        let refs = vec![
            reference("/opt/brew/lib/libintl.8.dylib", LibType::OtherPackage),
            reference("libtinfo.so.5", LibType::Missing),
        ];
        let report = report(&Platform::Macos, refs);
        let problems = report.problems();
        assert_eq!(problems.len(), 2);
        assert_eq!(problems["libtinfo.so.5"].0, LibType::Missing);
    }

    #[test]
    fn test_find_install_root() {
        let temp = tempfile::tempdir().unwrap();
        let bin = temp.path().join("bin");
        fs::create_dir_all(&bin).unwrap();
        fs::write(bin.join("python3"), "").unwrap();
        let root = fs::canonicalize(temp.path()).unwrap();
        assert_eq!(
            find_install_root(bin.join("python3").to_str().unwrap()).unwrap(),
            root
        );
        assert_eq!(find_install_root(temp.path().to_str().unwrap()).unwrap(), root);
    }
}
