//! Target platform description.
//!
//! A `TargetSystem` is the `platform-arch` tuple the build is aimed at. It is
//! resolved once per session and never mutated afterwards; every downstream
//! decision (telltale lookup, configure flags, linkage tooling) reads it.

use anyhow::Result;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::process::Cmd;

/// Operating system family of a target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Platform {
    Linux,
    Macos,
    /// Anything else. Kept by name so errors can say what was asked for.
    Other(String),
}

impl Platform {
    /// Parse a platform name as used on the command line.
    pub fn parse(name: &str) -> Self {
        match name {
            "linux" => Platform::Linux,
            "macos" | "darwin" => Platform::Macos,
            other => Platform::Other(other.to_string()),
        }
    }

    /// Name used in config scopes and artifact names.
    pub fn name(&self) -> &str {
        match self {
            Platform::Linux => "linux",
            Platform::Macos => "macos",
            Platform::Other(name) => name,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The platform/architecture the build targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSystem {
    pub platform: Platform,
    pub architecture: String,
    sys_include: PathBuf,
}

impl TargetSystem {
    /// Resolve a target from an optional `platform-arch` string.
    ///
    /// Missing parts default to the running host.
    pub fn from_spec(spec: Option<&str>) -> Result<Self> {
        let (platform, architecture) = match spec.map(str::trim) {
            None | Some("") => (host_platform(), host_architecture()),
            Some(spec) => {
                let (platform, arch) = spec.split_once('-').unwrap_or((spec, ""));
                let platform = match platform.trim() {
                    "" => host_platform(),
                    name => Platform::parse(name),
                };
                let arch = match arch.trim() {
                    "" => host_architecture(),
                    arch => arch.to_string(),
                };
                (platform, arch)
            }
        };

        let sys_include = default_sys_include(&platform);
        Ok(Self {
            platform,
            architecture,
            sys_include,
        })
    }

    /// Host target.
    pub fn host() -> Self {
        let platform = host_platform();
        let sys_include = default_sys_include(&platform);
        Self {
            platform,
            architecture: host_architecture(),
            sys_include,
        }
    }

    /// Replace the include root used for telltale checks.
    pub fn with_sys_include(mut self, path: impl Into<PathBuf>) -> Self {
        self.sys_include = path.into();
        self
    }

    pub fn is_linux(&self) -> bool {
        self.platform == Platform::Linux
    }

    pub fn is_macos(&self) -> bool {
        self.platform == Platform::Macos
    }

    /// Root of the system headers, used to format telltale paths.
    pub fn sys_include(&self) -> &Path {
        &self.sys_include
    }

    /// Config scope for this exact target, e.g. `linux-x86_64`.
    pub fn scope(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TargetSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.platform, self.architecture)
    }
}

fn host_platform() -> Platform {
    Platform::parse(std::env::consts::OS)
}

fn host_architecture() -> String {
    match std::env::consts::ARCH {
        "aarch64" if cfg!(target_os = "macos") => "arm64".to_string(),
        arch => arch.to_string(),
    }
}

/// On macOS headers live inside the active SDK, not under /usr/include.
fn default_sys_include(platform: &Platform) -> PathBuf {
    if *platform == Platform::Macos && cfg!(target_os = "macos") {
        if let Ok(result) = Cmd::new("xcrun").arg("--show-sdk-path").allow_fail().run() {
            let sdk = result.stdout_trimmed();
            if result.success() && !sdk.is_empty() {
                return Path::new(sdk).join("usr/include");
            }
        }
    }
    PathBuf::from("/usr/include")
}
