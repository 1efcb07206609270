//! Relocatable `#!` lines for scripts in `bin/`.
//!
//! A shebang must be an absolute path, so a script pointing at the build
//! prefix is given a `/bin/sh` stanza that re-executes it with the
//! interpreter next to it. The second line is valid in both sh and Python:
//!
//! ```text
//! #!/bin/sh
//! "exec" "$(dirname $0)/python3.9" "$0" "$@"
//! ```

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Replacement header for a script whose interpreter is `interpreter`
/// (a file name in the same folder).
pub fn relocatable_header(interpreter: &str) -> String {
    format!(
        "#!/bin/sh\n\"exec\" \"$(dirname $0)/{}\" \"$0\" \"$@\"\n",
        interpreter
    )
}

/// New contents for `content` if its shebang points under `prefix`.
pub fn rewrite(content: &[u8], prefix: &str) -> Option<Vec<u8>> {
    if !content.starts_with(b"#!") {
        return None;
    }
    let end = content.iter().position(|b| *b == b'\n').unwrap_or(content.len());
    let first = std::str::from_utf8(&content[2..end]).ok()?.trim();
    let interpreter = first.split_whitespace().next()?;

    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() || !interpreter.starts_with(&format!("{}/", prefix)) {
        return None;
    }
    let name = interpreter.rsplit('/').next()?;

    let mut out = relocatable_header(name).into_bytes();
    if end < content.len() {
        out.extend_from_slice(&content[end + 1..]);
    }
    Some(out)
}

/// Rewrite every script directly in `bin` whose shebang points under `prefix`.
/// Returns the number of rewritten scripts.
pub fn rewrite_scripts(bin: &Path, prefix: &str) -> Result<usize> {
    if !bin.is_dir() {
        return Ok(0);
    }
    let mut rewritten = 0;
    for entry in fs::read_dir(bin).with_context(|| format!("Failed to list {}", bin.display()))? {
        let path = entry?.path();
        let meta = fs::symlink_metadata(&path)?;
        if !meta.is_file() {
            continue;
        }
        let content =
            fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;
        if let Some(updated) = rewrite(&content, prefix) {
            tracing::debug!("Rewriting shebang of {}", path.display());
            fs::write(&path, updated)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            rewritten += 1;
        }
    }
    Ok(rewritten)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrites_prefix_shebang() {
        let script = b"#!/ppp-marker/3.9.7/bin/python3.9\n# -*- coding: utf-8 -*-\nimport sys\n";
        let out = rewrite(script, "/ppp-marker/3.9.7").unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "#!/bin/sh\n\"exec\" \"$(dirname $0)/python3.9\" \"$0\" \"$@\"\n# -*- coding: utf-8 -*-\nimport sys\n"
        );
    }

    #[test]
    fn test_other_shebangs_untouched() {
        assert!(rewrite(b"#!/usr/bin/env python3\n", "/ppp-marker/3.9.7").is_none());
        assert!(rewrite(b"\x7fELF\x02", "/ppp-marker/3.9.7").is_none());
        assert!(rewrite(b"#!/ppp-marker/3.9.70/bin/python\n", "/ppp-marker/3.9.7").is_none());
    }

    #[test]
    fn test_rewrite_scripts_in_folder() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("pip3"), "#!/ppp-marker/3.9.7/bin/python3.9\nimport pip\n").unwrap();
        fs::write(temp.path().join("2to3"), "#!/usr/bin/env python\n").unwrap();
        assert_eq!(rewrite_scripts(temp.path(), "/ppp-marker/3.9.7").unwrap(), 1);
        let pip = fs::read_to_string(temp.path().join("pip3")).unwrap();
        assert!(pip.starts_with("#!/bin/sh\n\"exec\""));
        assert!(pip.ends_with("import pip\n"));
    }
}
