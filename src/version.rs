//! Python version descriptors (`cpython:3.9.7` or just `3.9.7`).

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::fmt;

/// Families this tool knows how to build.
pub const SUPPORTED_FAMILIES: &[&str] = &["cpython"];

/// Oldest minor version the build recipes are known to work with.
const MIN_VERSION: (u32, u32) = (3, 6);

/// A `major.minor.patch` release number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub fn parse(text: &str) -> Result<Self> {
        let parts: Vec<&str> = text.split('.').collect();
        if parts.len() != 3 {
            bail!("Invalid version '{}', expected <major>.<minor>.<patch>", text);
        }
        let number = |part: &str| -> Result<u32> {
            part.parse::<u32>()
                .with_context(|| format!("Invalid version '{}': '{}' is not a number", text, part))
        };
        Ok(Self {
            major: number(parts[0])?,
            minor: number(parts[1])?,
            patch: number(parts[2])?,
        })
    }

    /// `major.minor`, as used in `python3.9` and `lib/python3.9`.
    pub fn mm(&self) -> String {
        format!("{}.{}", self.major, self.minor)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Validated family + version requested by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PythonSpec {
    pub family: String,
    pub version: Version,
}

impl PythonSpec {
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let (family, version) = match text.split_once(':') {
            Some((family, version)) => (family.trim(), version.trim()),
            None => ("cpython", text),
        };

        if !SUPPORTED_FAMILIES.contains(&family) {
            bail!(
                "Python family '{}' is not supported (supported: {})",
                family,
                SUPPORTED_FAMILIES.join(", ")
            );
        }

        let version = Version::parse(version)?;
        if (version.major, version.minor) < MIN_VERSION {
            bail!(
                "Python {} is too old, minimum supported is {}.{}",
                version,
                MIN_VERSION.0,
                MIN_VERSION.1
            );
        }

        Ok(Self {
            family: family.to_string(),
            version,
        })
    }

    /// Expand `{family}` and `{version}` placeholders.
    pub fn expand(&self, template: &str) -> String {
        template
            .replace("{family}", &self.family)
            .replace("{version}", &self.version.to_string())
    }
}

impl fmt::Display for PythonSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.family, self.version)
    }
}

/// python.org folder listing of every CPython release.
pub const PYTHON_FTP_INDEX: &str = "https://www.python.org/ftp/python/";

/// Latest patch release of every supported minor version found in a
/// python.org FTP index page, newest first.
pub fn latest_releases(index_html: &str) -> Vec<Version> {
    let re = match regex::Regex::new(r#"href="(\d+\.\d+\.\d+)/""#) {
        Ok(re) => re,
        Err(_) => return Vec::new(),
    };

    let mut latest: BTreeMap<(u32, u32), Version> = BTreeMap::new();
    for caps in re.captures_iter(index_html) {
        let version = match Version::parse(&caps[1]) {
            Ok(v) => v,
            Err(_) => continue,
        };
        if (version.major, version.minor) < MIN_VERSION {
            continue;
        }
        let slot = latest.entry((version.major, version.minor)).or_insert(version);
        if version > *slot {
            *slot = version;
        }
    }
    latest.into_values().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_version() {
        let spec = PythonSpec::parse("3.9.7").unwrap();
        assert_eq!(spec.family, "cpython");
        assert_eq!(spec.version.to_string(), "3.9.7");
        assert_eq!(spec.version.mm(), "3.9");
    }

    #[test]
    fn test_parse_with_family() {
        let spec = PythonSpec::parse("cpython:3.11.4").unwrap();
        assert_eq!(spec.to_string(), "cpython:3.11.4");
    }

    #[test]
    fn test_rejects_bad_specs() {
        assert!(PythonSpec::parse("3.9").is_err());
        assert!(PythonSpec::parse("3.x.1").is_err());
        assert!(PythonSpec::parse("pypy:3.9.7").is_err());
        assert!(PythonSpec::parse("2.7.18").is_err());
    }

    #[test]
    fn test_expand_template() {
        let spec = PythonSpec::parse("3.9.7").unwrap();
        assert_eq!(spec.expand("/apps/python{version}"), "/apps/python3.9.7");
        assert_eq!(spec.expand("{family}-{version}"), "cpython-3.9.7");
    }

    #[test]
    fn test_version_ordering() {
        assert!(Version::parse("3.10.0").unwrap() > Version::parse("3.9.18").unwrap());
    }

    #[test]
    fn test_latest_releases() {
        let html = r#"<a href="2.7.18/">2.7.18/</a>
<a href="3.9.6/">3.9.6/</a> <a href="3.9.17/">3.9.17/</a>
<a href="3.10.0/">3.10.0/</a> <a href="3.9.7/">3.9.7/</a>
<a href="doc/">doc/</a>"#;
        let releases: Vec<String> = latest_releases(html).iter().map(|v| v.to_string()).collect();
        assert_eq!(releases, vec!["3.10.0", "3.9.17"]);
    }
}
