//! Symlink reconciliation.

use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::inspector::relative_path;

/// Convenience links created in `bin/` when missing: `(link, target)`.
const CONVENIENCE_LINKS: &[(&str, &str)] = &[("python", "python3"), ("pip", "pip3")];

/// Make absolute links into the installed tree relative, then add the
/// `python`/`pip` convenience links. Returns the number of links written.
///
/// A link is "into the tree" when it points under `root` or under `prefix`
/// (the location the tree was configured for).
pub fn reconcile(root: &Path, prefix: &str) -> Result<usize> {
    let prefix = prefix.trim_end_matches('/');
    let mut written = 0;

    let links: Vec<PathBuf> = WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path_is_symlink())
        .map(|e| e.into_path())
        .collect();

    for link in links {
        let target = fs::read_link(&link)
            .with_context(|| format!("Failed to read link {}", link.display()))?;
        if !target.is_absolute() {
            continue;
        }

        let in_tree = if target.starts_with(root) {
            target.clone()
        } else if let Ok(rest) = target.strip_prefix(prefix) {
            if prefix.is_empty() {
                continue;
            }
            root.join(rest)
        } else {
            continue;
        };

        let parent = link.parent().unwrap_or(root);
        let relative = relative_path(parent, &in_tree);
        tracing::debug!("Relinking {} -> {}", link.display(), relative.display());
        replace_link(&link, &relative)?;
        written += 1;
    }

    let bin = root.join("bin");
    for (name, target) in CONVENIENCE_LINKS {
        let link = bin.join(name);
        if bin.join(target).exists() && fs::symlink_metadata(&link).is_err() {
            symlink(target, &link)
                .with_context(|| format!("Failed to create {}", link.display()))?;
            written += 1;
        }
    }

    Ok(written)
}

fn replace_link(link: &Path, target: &Path) -> Result<()> {
    fs::remove_file(link).with_context(|| format!("Failed to remove {}", link.display()))?;
    symlink(target, link).with_context(|| format!("Failed to create {}", link.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolute_links_become_relative() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("root/ppp-marker/3.9.7");
        let bin = root.join("bin");
        fs::create_dir_all(&bin).unwrap();
        fs::create_dir_all(root.join("lib")).unwrap();
        fs::write(bin.join("python3.9"), "").unwrap();
        fs::write(root.join("lib/libpython3.9.a"), "").unwrap();
        symlink("python3.9", bin.join("python3")).unwrap();
        symlink("/ppp-marker/3.9.7/bin/python3.9", bin.join("python3.9-abs")).unwrap();
        symlink(root.join("lib/libpython3.9.a"), bin.join("libpython-link")).unwrap();
        symlink("/usr/bin/env", bin.join("env")).unwrap();

        let written = reconcile(&root, "/ppp-marker/3.9.7").unwrap();

        assert_eq!(fs::read_link(bin.join("python3.9-abs")).unwrap(), PathBuf::from("python3.9"));
        assert_eq!(
            fs::read_link(bin.join("libpython-link")).unwrap(),
            PathBuf::from("../lib/libpython3.9.a")
        );
        assert_eq!(fs::read_link(bin.join("env")).unwrap(), PathBuf::from("/usr/bin/env"));
        assert_eq!(fs::read_link(bin.join("python")).unwrap(), PathBuf::from("python3"));
        assert!(fs::symlink_metadata(bin.join("pip")).is_err());
        assert_eq!(written, 3);
    }
}
