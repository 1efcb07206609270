//! Layered YAML configuration.
//!
//! Sources are consulted most-specific first: for a key `k` every user source
//! is asked for `<platform>-<arch>.k`, then `<platform>.k`, then `k`, and only
//! then does the same chain run against the built-in defaults.

use anyhow::{bail, Context, Result};
use serde_yaml::Value;
use std::fs;
use std::path::{Path, PathBuf};

use crate::target::TargetSystem;

/// Environment variable naming a config file to use when `--config` is absent.
pub const CONFIG_ENV: &str = "PORTABLE_PYTHON_CONFIG";

/// File name looked up in the current directory and the user config dir.
pub const CONFIG_FILENAME: &str = "portable-python.yml";

/// Built-in defaults, always the last source consulted.
pub const DEFAULT_CONFIG: &str = r#"
folders:
  build: build
  dist: dist

cpython-shared: false
cpython-optimizations: false
cpython-clean:
  - __phello__
  - __pycache__
  - idle_test
  - test
  - tests
  - "*.exe"

linux:
  allowed-system-libs: ""

macos:
  allowed-system-libs: "^/usr/lib/lib(c\\+\\+|objc|ncurses|panel|z|bz2|sqlite3|edit|ffi)\\b"
  macos-deployment-target: "10.14"
"#;

/// One parsed YAML document and where it came from.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub origin: String,
    root: Value,
}

impl ConfigSource {
    pub fn from_yaml(origin: impl Into<String>, text: &str) -> Result<Self> {
        let origin = origin.into();
        let root: Value = serde_yaml::from_str(text)
            .with_context(|| format!("Failed to parse config {}", origin))?;
        let root = match root {
            Value::Null => Value::Mapping(Default::default()),
            Value::Mapping(_) => root,
            _ => bail!("Config {} must be a YAML mapping", origin),
        };
        Ok(Self { origin, root })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_yaml(path.display().to_string(), &text)
    }

    fn lookup(&self, scope: Option<&str>, key: &str) -> Option<&Value> {
        let mut node = &self.root;
        if let Some(scope) = scope {
            node = node.get(scope)?;
        }
        for part in key.split('.') {
            node = node.get(part)?;
        }
        if node.is_null() {
            None
        } else {
            Some(node)
        }
    }
}

/// Configuration for one build session.
#[derive(Debug, Clone)]
pub struct Config {
    sources: Vec<ConfigSource>,
    defaults: ConfigSource,
    scopes: Vec<String>,
}

impl Config {
    /// Load user config files followed by the built-in defaults.
    ///
    /// Explicit paths must exist. Without them, `PORTABLE_PYTHON_CONFIG` is
    /// honored, then `./portable-python.yml` and the user config dir copy are
    /// picked up if present.
    pub fn load(explicit: &[PathBuf]) -> Result<Self> {
        let mut paths: Vec<PathBuf> = explicit.to_vec();

        if paths.is_empty() {
            if let Ok(path) = std::env::var(CONFIG_ENV) {
                paths.push(PathBuf::from(path));
            } else {
                let mut candidates = vec![PathBuf::from(CONFIG_FILENAME)];
                if let Some(dir) = dirs::config_dir() {
                    candidates.push(dir.join(CONFIG_FILENAME));
                }
                paths.extend(candidates.into_iter().filter(|p| p.is_file()));
            }
        }

        let mut sources = Vec::new();
        for path in &paths {
            if !path.is_file() {
                bail!("Config file not found: {}", path.display());
            }
            sources.push(ConfigSource::from_file(path)?);
        }

        Self::from_sources(sources)
    }

    /// Build from already-parsed sources (highest priority first).
    pub fn from_sources(sources: Vec<ConfigSource>) -> Result<Self> {
        Ok(Self {
            sources,
            defaults: ConfigSource::from_yaml("<built-in>", DEFAULT_CONFIG)?,
            scopes: Vec::new(),
        })
    }

    /// Defaults only.
    pub fn builtin() -> Result<Self> {
        Self::from_sources(Vec::new())
    }

    /// Scope lookups to a target: `<platform>-<arch>` then `<platform>`.
    pub fn with_target(mut self, target: &TargetSystem) -> Self {
        self.scopes = vec![target.scope(), target.platform.name().to_string()];
        self
    }

    /// Most specific value for a dotted key.
    pub fn get_value(&self, key: &str) -> Option<&Value> {
        for stage in [&self.sources[..], std::slice::from_ref(&self.defaults)] {
            for scope in &self.scopes {
                if let Some(value) = stage.iter().find_map(|s| s.lookup(Some(scope), key)) {
                    return Some(value);
                }
            }
            if let Some(value) = stage.iter().find_map(|s| s.lookup(None, key)) {
                return Some(value);
            }
        }
        None
    }

    /// Scalar value rendered as a string. Empty strings count as unset.
    pub fn get_str(&self, key: &str) -> Option<String> {
        let text = match self.get_value(key)? {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => return None,
        };
        let text = text.trim().to_string();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    /// List value; a plain string is split on commas and whitespace.
    pub fn get_list(&self, key: &str) -> Vec<String> {
        match self.get_value(key) {
            Some(Value::Sequence(items)) => items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect(),
            Some(Value::String(s)) => s
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn get_bool(&self, key: &str) -> bool {
        match self.get_value(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => matches!(s.trim(), "true" | "yes" | "on" | "1"),
            _ => false,
        }
    }

    /// Print configuration sources and the effective folder settings.
    pub fn print(&self) {
        println!("Configuration:");
        for source in &self.sources {
            println!("  source: {}", source.origin);
        }
        println!("  source: {}", self.defaults.origin);
        for key in ["folders.build", "folders.dist", "cpython-modules", "allowed-system-libs"] {
            println!(
                "  {}: {}",
                key,
                self.get_str(key).unwrap_or_else(|| "(unset)".to_string())
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(user: &str) -> Config {
        let source = ConfigSource::from_yaml("test", user).unwrap();
        Config::from_sources(vec![source]).unwrap()
    }

    #[test]
    fn test_defaults_apply_without_sources() {
        let config = Config::builtin().unwrap();
        assert_eq!(config.get_str("folders.build").as_deref(), Some("build"));
        assert!(config.get_list("cpython-clean").contains(&"__pycache__".to_string()));
    }

    #[test]
    fn test_specific_scope_wins() {
        let config = config(
            "cpython-configure: --global\n\
             linux:\n  cpython-configure: --linux\n\
             linux-x86_64:\n  cpython-configure: --linux-x86\n",
        );
        let target = TargetSystem::from_spec(Some("linux-x86_64")).unwrap();
        let scoped = config.clone().with_target(&target);
        assert_eq!(scoped.get_str("cpython-configure").as_deref(), Some("--linux-x86"));

        let arm = TargetSystem::from_spec(Some("linux-aarch64")).unwrap();
        let scoped = config.clone().with_target(&arm);
        assert_eq!(scoped.get_str("cpython-configure").as_deref(), Some("--linux"));

        let mac = TargetSystem::from_spec(Some("macos-arm64")).unwrap();
        let scoped = config.with_target(&mac);
        assert_eq!(scoped.get_str("cpython-configure").as_deref(), Some("--global"));
    }

    #[test]
    fn test_user_global_beats_builtin_platform() {
        let config = config("allowed-system-libs: libexpat\n");
        let target = TargetSystem::from_spec(Some("macos-arm64")).unwrap();
        let config = config.with_target(&target);
        assert_eq!(config.get_str("allowed-system-libs").as_deref(), Some("libexpat"));
    }

    #[test]
    fn test_builtin_platform_scope() {
        let target = TargetSystem::from_spec(Some("macos-x86_64")).unwrap();
        let config = Config::builtin().unwrap().with_target(&target);
        assert_eq!(config.get_str("macos-deployment-target").as_deref(), Some("10.14"));
    }

    #[test]
    fn test_list_from_string() {
        let config = config("cpython-configure: --with-a, --with-b --with-c\n");
        assert_eq!(
            config.get_list("cpython-configure"),
            vec!["--with-a", "--with-b", "--with-c"]
        );
    }

    #[test]
    fn test_bool_values() {
        let config = config("cpython-shared: yes\n");
        assert!(config.get_bool("cpython-shared"));
        assert!(!config.get_bool("cpython-optimizations"));
    }

    #[test]
    fn test_rejects_non_mapping() {
        assert!(ConfigSource::from_yaml("bad", "- a\n- b\n").is_err());
    }
}
