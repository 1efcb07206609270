//! LibAutoCorrect: make installed binaries relocatable.
//!
//! Any runpath entry or library reference that points at the build-time
//! prefix is rewritten relative to the referencing binary:
//!
//! - Linux: runpath entries become `$ORIGIN/<relative dir>` (patchelf).
//! - macOS: references become `@rpath/<basename>`, with an
//!   `@loader_path/<relative dir>` rpath added so they resolve, and a dylib's
//!   own install name becomes `@rpath/<basename>` (install_name_tool).
//!
//! Work is split into [`LibAutoCorrect::plan`] and [`LibAutoCorrect::apply`].
//! A corrected tree plans zero rewrites.

use anyhow::Result;
use std::fmt;
use std::path::{Path, PathBuf};

use super::linkage::LinkageTool;
use super::permissions::WritableGuard;
use super::{binary_files, relative_path};
use crate::process::LogFile;
use crate::target::Platform;

/// One patch to apply to one binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rewrite {
    SetRunpath {
        binary: PathBuf,
        old: Vec<String>,
        new: String,
    },
    AddRpath {
        binary: PathBuf,
        rpath: String,
    },
    ChangeReference {
        binary: PathBuf,
        old: String,
        new: String,
    },
    SetInstallId {
        binary: PathBuf,
        id: String,
    },
}

impl Rewrite {
    pub fn binary(&self) -> &Path {
        match self {
            Rewrite::SetRunpath { binary, .. }
            | Rewrite::AddRpath { binary, .. }
            | Rewrite::ChangeReference { binary, .. }
            | Rewrite::SetInstallId { binary, .. } => binary,
        }
    }
}

impl fmt::Display for Rewrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rewrite::SetRunpath { binary, old, new } => write!(
                f,
                "{}: runpath {} -> {}",
                binary.display(),
                old.join(":"),
                new
            ),
            Rewrite::AddRpath { binary, rpath } => {
                write!(f, "{}: add rpath {}", binary.display(), rpath)
            }
            Rewrite::ChangeReference { binary, old, new } => {
                write!(f, "{}: {} -> {}", binary.display(), old, new)
            }
            Rewrite::SetInstallId { binary, id } => {
                write!(f, "{}: id {}", binary.display(), id)
            }
        }
    }
}

/// Post-build corrector for one installed tree.
pub struct LibAutoCorrect<'a> {
    tool: &'a dyn LinkageTool,
    platform: Platform,
    /// Installed tree on disk.
    root: PathBuf,
    /// Prefix the binaries were configured with.
    prefix: String,
    /// Build-only folders (deps prefix) whose runpath entries are dropped.
    dropped: Vec<PathBuf>,
}

impl<'a> LibAutoCorrect<'a> {
    pub fn new(tool: &'a dyn LinkageTool, platform: &Platform, root: &Path, prefix: &str) -> Self {
        Self {
            tool,
            platform: platform.clone(),
            root: root.to_path_buf(),
            prefix: prefix.trim_end_matches('/').to_string(),
            dropped: Vec::new(),
        }
    }

    pub fn dropping(mut self, path: &Path) -> Self {
        self.dropped.push(path.to_path_buf());
        self
    }

    /// Where a build-time path lives in the installed tree, if it points there.
    fn map_into_tree(&self, path: &str) -> Option<PathBuf> {
        if !self.prefix.is_empty() {
            if path == self.prefix {
                return Some(self.root.clone());
            }
            if let Some(rest) = path.strip_prefix(&format!("{}/", self.prefix)) {
                return Some(self.root.join(rest));
            }
        }
        let candidate = Path::new(path);
        if candidate.is_absolute() && candidate.starts_with(&self.root) {
            return Some(candidate.to_path_buf());
        }
        None
    }

    fn is_dropped(&self, path: &str) -> bool {
        let path = Path::new(path);
        self.dropped.iter().any(|d| path.starts_with(d))
    }

    /// Every rewrite needed to make the tree relocatable.
    pub fn plan(&self) -> Result<Vec<Rewrite>> {
        let mut rewrites = Vec::new();
        for binary in binary_files(&self.root)? {
            match self.platform {
                Platform::Macos => self.plan_macos(&binary, &mut rewrites)?,
                _ => self.plan_linux(&binary, &mut rewrites)?,
            }
        }
        Ok(rewrites)
    }

    fn plan_linux(&self, binary: &Path, rewrites: &mut Vec<Rewrite>) -> Result<()> {
        let old = self.tool.rpaths(binary)?;
        let origin = binary.parent().unwrap_or(&self.root);

        let mut entries: Vec<String> = Vec::new();
        for entry in &old {
            if self.is_dropped(entry) {
                continue;
            }
            let entry = match self.map_into_tree(entry) {
                Some(target) => origin_relative(origin, &target),
                None => entry.clone(),
            };
            if !entries.contains(&entry) {
                entries.push(entry);
            }
        }

        if entries != old {
            rewrites.push(Rewrite::SetRunpath {
                binary: binary.to_path_buf(),
                old,
                new: entries.join(":"),
            });
        }
        Ok(())
    }

    fn plan_macos(&self, binary: &Path, rewrites: &mut Vec<Rewrite>) -> Result<()> {
        let origin = binary.parent().unwrap_or(&self.root);
        let mut rpaths = self.tool.rpaths(binary)?;

        if let Some(id) = self.tool.install_id(binary)? {
            if self.map_into_tree(&id).is_some() {
                rewrites.push(Rewrite::SetInstallId {
                    binary: binary.to_path_buf(),
                    id: format!("@rpath/{}", basename(&id)),
                });
            }
        }

        for reference in self.tool.references(binary)? {
            let target = match self.map_into_tree(&reference.referenced_path) {
                Some(target) => target,
                None => continue,
            };
            let target_dir = target.parent().unwrap_or(&self.root);
            let rpath = loader_relative(origin, target_dir);
            if !rpaths.contains(&rpath) {
                rewrites.push(Rewrite::AddRpath {
                    binary: binary.to_path_buf(),
                    rpath: rpath.clone(),
                });
                rpaths.push(rpath);
            }
            rewrites.push(Rewrite::ChangeReference {
                binary: binary.to_path_buf(),
                new: format!("@rpath/{}", reference.basename()),
                old: reference.referenced_path,
            });
        }
        Ok(())
    }

    /// Apply planned rewrites. Read-only binaries are made writable for the
    /// duration of their patch only.
    pub fn apply(&self, rewrites: &[Rewrite], log: Option<&LogFile>) -> Result<usize> {
        for rewrite in rewrites {
            if let Some(log) = log {
                log.line(format!("autocorrect {}", rewrite));
            }
            let _guard = WritableGuard::new(rewrite.binary())?;
            match rewrite {
                Rewrite::SetRunpath { binary, new, .. } => self.tool.set_runpath(binary, new)?,
                Rewrite::AddRpath { binary, rpath } => self.tool.add_rpath(binary, rpath)?,
                Rewrite::ChangeReference { binary, old, new } => {
                    self.tool.change_reference(binary, old, new)?
                }
                Rewrite::SetInstallId { binary, id } => self.tool.set_install_id(binary, id)?,
            }
        }
        Ok(rewrites.len())
    }

    /// Plan and apply. Returns the number of rewrites performed.
    pub fn run(&self, log: Option<&LogFile>) -> Result<usize> {
        let rewrites = self.plan()?;
        self.apply(&rewrites, log)
    }
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn origin_relative(from_dir: &Path, to: &Path) -> String {
    let rel = relative_path(from_dir, to);
    if rel.as_os_str().is_empty() {
        "$ORIGIN".to_string()
    } else {
        format!("$ORIGIN/{}", rel.display())
    }
}

fn loader_relative(from_dir: &Path, to: &Path) -> String {
    let rel = relative_path(from_dir, to);
    if rel.as_os_str().is_empty() {
        "@loader_path".to_string()
    } else {
        format!("@loader_path/{}", rel.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspector::linkage::{parse_otool_output, LibraryReference};
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    /// In-memory linkage tables, keyed by binary path.
    #[derive(Default)]
    struct FakeTools {
        rpaths: RefCell<HashMap<PathBuf, Vec<String>>>,
        refs: RefCell<HashMap<PathBuf, Vec<String>>>,
        ids: RefCell<HashMap<PathBuf, String>>,
        /// Mode each binary had while being patched.
        modes: RefCell<Vec<u32>>,
    }

    impl FakeTools {
        fn record_mode(&self, binary: &Path) {
            let mode = fs::metadata(binary).unwrap().permissions().mode();
            self.modes.borrow_mut().push(mode & 0o777);
        }
    }

    impl LinkageTool for FakeTools {
        fn references(&self, binary: &Path) -> Result<Vec<LibraryReference>> {
            let refs = self.refs.borrow().get(binary).cloned().unwrap_or_default();
            let listing: String = refs
                .iter()
                .map(|r| format!("\t{} (compatibility version 1.0.0, current version 1.0.0)\n", r))
                .collect();
            Ok(parse_otool_output(binary, &format!("{}:\n{}", binary.display(), listing)))
        }

        fn rpaths(&self, binary: &Path) -> Result<Vec<String>> {
            Ok(self.rpaths.borrow().get(binary).cloned().unwrap_or_default())
        }

        fn install_id(&self, binary: &Path) -> Result<Option<String>> {
            Ok(self.ids.borrow().get(binary).cloned())
        }

        fn set_runpath(&self, binary: &Path, runpath: &str) -> Result<()> {
            self.record_mode(binary);
            let entries = runpath.split(':').filter(|s| !s.is_empty()).map(str::to_string);
            self.rpaths
                .borrow_mut()
                .insert(binary.to_path_buf(), entries.collect());
            Ok(())
        }

        fn add_rpath(&self, binary: &Path, rpath: &str) -> Result<()> {
            self.record_mode(binary);
            self.rpaths
                .borrow_mut()
                .entry(binary.to_path_buf())
                .or_default()
                .push(rpath.to_string());
            Ok(())
        }

        fn change_reference(&self, binary: &Path, old: &str, new: &str) -> Result<()> {
            self.record_mode(binary);
            if let Some(refs) = self.refs.borrow_mut().get_mut(binary) {
                for r in refs.iter_mut().filter(|r| r.as_str() == old) {
                    *r = new.to_string();
                }
            }
            Ok(())
        }

        fn set_install_id(&self, binary: &Path, id: &str) -> Result<()> {
            self.record_mode(binary);
            self.ids.borrow_mut().insert(binary.to_path_buf(), id.to_string());
            Ok(())
        }
    }

    fn write_binary(path: &Path, mode: u32) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"\x7fELF\x02\x01\x01\0fake").unwrap();
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).unwrap();
    }

    #[test]
    fn test_linux_runpath_rewrite_is_idempotent() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("root/ppp-marker/3.9.7");
        let python = root.join("bin/python3.9");
        let ext = root.join("lib/python3.9/lib-dynload/_ssl.so");
        write_binary(&python, 0o755);
        write_binary(&ext, 0o444);

        let tools = FakeTools::default();
        tools.rpaths.borrow_mut().insert(
            python.clone(),
            vec!["/ppp-marker/3.9.7/lib".to_string(), "/build/deps/lib".to_string()],
        );
        tools
            .rpaths
            .borrow_mut()
            .insert(ext.clone(), vec!["/ppp-marker/3.9.7/lib".to_string()]);

        let corrector = LibAutoCorrect::new(&tools, &Platform::Linux, &root, "/ppp-marker/3.9.7")
            .dropping(Path::new("/build/deps"));
        assert_eq!(corrector.run(None).unwrap(), 2);

        assert_eq!(tools.rpaths.borrow()[&python], vec!["$ORIGIN/../lib"]);
        assert_eq!(tools.rpaths.borrow()[&ext], vec!["$ORIGIN/../.."]);

        // Read-only extension was writable while patched, then restored.
        assert!(tools.modes.borrow().iter().all(|m| m & 0o200 != 0));
        assert_eq!(fs::metadata(&ext).unwrap().permissions().mode() & 0o777, 0o444);

        assert!(corrector.plan().unwrap().is_empty());
    }

    #[test]
    fn test_macos_references_use_rpath() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("root/ppp-marker/3.9.7");
        let python = root.join("bin/python3.9");
        let libpython = root.join("lib/libpython3.9.dylib");
        write_binary(&python, 0o755);
        write_binary(&libpython, 0o644);

        let tools = FakeTools::default();
        tools.refs.borrow_mut().insert(
            python.clone(),
            vec![
                "/ppp-marker/3.9.7/lib/libpython3.9.dylib".to_string(),
                "/usr/lib/libSystem.B.dylib".to_string(),
            ],
        );
        tools.refs.borrow_mut().insert(
            libpython.clone(),
            vec![
                "/ppp-marker/3.9.7/lib/libpython3.9.dylib".to_string(),
                "/usr/lib/libSystem.B.dylib".to_string(),
            ],
        );
        tools.ids.borrow_mut().insert(
            libpython.clone(),
            "/ppp-marker/3.9.7/lib/libpython3.9.dylib".to_string(),
        );

        let corrector = LibAutoCorrect::new(&tools, &Platform::Macos, &root, "/ppp-marker/3.9.7");
        let plan = corrector.plan().unwrap();
        assert!(plan.contains(&Rewrite::AddRpath {
            binary: python.clone(),
            rpath: "@loader_path/../lib".to_string(),
        }));
        assert!(plan.contains(&Rewrite::ChangeReference {
            binary: python.clone(),
            old: "/ppp-marker/3.9.7/lib/libpython3.9.dylib".to_string(),
            new: "@rpath/libpython3.9.dylib".to_string(),
        }));
        assert!(plan.contains(&Rewrite::SetInstallId {
            binary: libpython.clone(),
            id: "@rpath/libpython3.9.dylib".to_string(),
        }));

        corrector.apply(&plan, None).unwrap();
        assert!(corrector.plan().unwrap().is_empty());
    }

    #[test]
    fn test_foreign_paths_untouched() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("apps/python3.9.7");
        let python = root.join("bin/python3.9");
        write_binary(&python, 0o755);

        let tools = FakeTools::default();
        tools
            .rpaths
            .borrow_mut()
            .insert(python.clone(), vec!["$ORIGIN/../lib".to_string(), "/opt/lib".to_string()]);

        let corrector = LibAutoCorrect::new(&tools, &Platform::Linux, &root, "/apps/python3.9.7");
        assert!(corrector.plan().unwrap().is_empty());
    }
}
