//! Build session: folder layout, target, selected modules and the compile loop.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::PathBuf;

use crate::checksum;
use crate::clean::{self, DEFAULT_CLEAN};
use crate::config::Config;
use crate::folders::Folders;
use crate::module::cpython::CPYTHON;
use crate::module::{ModuleBuilder, Registry};
use crate::process::Cmd;
use crate::target::{Platform, TargetSystem};
use crate::timing::Timer;
use crate::version::PythonSpec;

/// State shared by every module of one invocation.
///
/// Passed explicitly to every recipe hook; nothing reads it from ambient state.
#[derive(Debug)]
pub struct BuildSession {
    pub python: PythonSpec,
    pub target: TargetSystem,
    pub folders: Folders,
    pub config: Config,
    /// Record commands in module logs instead of running them.
    pub dryrun: bool,
    /// Reuse module folders left by a previous, partial build.
    pub x_debug: bool,
    /// Names of the modules being built, submodules included.
    active: Vec<&'static str>,
}

impl BuildSession {
    /// Whether `name` is part of this build.
    pub fn is_active(&self, name: &str) -> bool {
        self.active.iter().any(|n| *n == name)
    }

    pub fn active(&self) -> &[&'static str] {
        &self.active
    }
}

/// Options of the `build` command.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// `3.9.7` or `cpython:3.9.7`.
    pub python: String,
    /// Module selection CSV. Falls back to config `cpython-modules`.
    pub modules: Option<String>,
    /// `platform-arch`, defaults to the host.
    pub target: Option<String>,
    /// Fixed install prefix; `{version}` and `{family}` are expanded.
    pub prefix: Option<String>,
    /// Folders to clean first, defaults to `build,logs`.
    pub clean: Option<String>,
    pub x_debug: bool,
    pub dryrun: bool,
    /// Folder relative `folders.*` settings are resolved against.
    pub base_dir: PathBuf,
}

/// A prepared build: session plus the ordered builders.
pub struct BuildSetup {
    pub session: BuildSession,
    builders: Vec<ModuleBuilder>,
    clean: Vec<String>,
}

impl BuildSetup {
    /// Prepare a build against the built-in module catalog.
    pub fn new(options: &BuildOptions, config: Config) -> Result<Self> {
        let target = TargetSystem::from_spec(options.target.as_deref())?;
        Self::for_target(options, config, target)
    }

    /// Prepare a build for an already-resolved target.
    pub fn for_target(options: &BuildOptions, config: Config, target: TargetSystem) -> Result<Self> {
        let registry = Registry::catalog()?;
        Self::with_registry(options, config, target, &registry)
    }

    /// Prepare a build selecting modules from `registry`. CPython is appended
    /// after the selected modules.
    pub fn with_registry(
        options: &BuildOptions,
        config: Config,
        target: TargetSystem,
        registry: &Registry,
    ) -> Result<Self> {
        let python = PythonSpec::parse(&options.python)?;

        if let Platform::Other(name) = &target.platform {
            bail!(
                "Platform '{}' is not supported (supported: linux, macos)",
                name
            );
        }

        let config = config.with_target(&target);

        let clean = if options.x_debug {
            Vec::new()
        } else {
            clean::parse_clean_list(options.clean.as_deref().unwrap_or(DEFAULT_CLEAN))?
        };

        let folders = Folders::new(&options.base_dir, &config, &python, options.prefix.as_deref());

        let requested = options
            .modules
            .clone()
            .or_else(|| config.get_str("cpython-modules"));
        let selection = registry.select(&target, requested.as_deref())?;

        let mut builders = selection.builders();
        builders.push(ModuleBuilder::new(&CPYTHON, true));

        let session = BuildSession {
            python,
            target,
            folders,
            config,
            dryrun: options.dryrun,
            x_debug: options.x_debug,
            active: builders.iter().map(|b| b.name()).collect(),
        };

        for builder in &mut builders {
            builder.attach(&session);
        }

        Ok(Self {
            session,
            builders,
            clean,
        })
    }

    pub fn builders(&self) -> &[ModuleBuilder] {
        &self.builders
    }

    /// Compile every module in order, then package the installation.
    ///
    /// Returns the tarball path. The first failing module aborts the build,
    /// unless it is a best-effort module nobody explicitly asked for.
    pub fn compile(&mut self) -> Result<PathBuf> {
        let session = &self.session;
        println!(
            "Building {} for {} ({})",
            session.python,
            session.target,
            if session.folders.is_portable() {
                "portable".to_string()
            } else {
                format!("prefix {}", session.folders.build_prefix)
            }
        );
        println!(
            "Modules: {}",
            self.builders
                .iter()
                .map(|b| format!("{} {}", b.name(), b.version()))
                .collect::<Vec<_>>()
                .join(", ")
        );
        if session.dryrun {
            println!("Dry run: commands are only written to the logs");
        }

        if !self.clean.is_empty() && !session.dryrun {
            clean::clean_folders(&session.folders, &self.clean)?;
        }

        let timer = Timer::start("Total");
        let mut failed_groups: Vec<&'static str> = Vec::new();
        let mut seq = 0;
        for index in 0..self.builders.len() {
            let builder = &mut self.builders[index];
            let group = builder.group();
            if failed_groups.contains(&group) {
                println!("  [SKIP] {}: {} already failed", builder.name(), group);
                continue;
            }

            seq += 1;
            if let Err(err) = builder.compile(&self.session, seq) {
                if !builder.is_best_effort() {
                    return Err(err);
                }
                eprintln!("  [WARN] {:#}", err);
                eprintln!("  [WARN] {} is optional, continuing without it", group);
                failed_groups.push(group);

                // Later modules (CPython) must not be configured against any part of it
                let dropped: Vec<&'static str> = self
                    .builders
                    .iter()
                    .filter(|b| b.group() == group)
                    .map(|b| b.name())
                    .collect();
                self.session.active.retain(|n| !dropped.contains(n));
            }
        }

        let tarball = self.package()?;
        timer.finish();
        Ok(tarball)
    }

    /// Tar the installed prefix into the dist folder, with a sha256 sidecar.
    fn package(&self) -> Result<PathBuf> {
        let session = &self.session;
        let tarball = session.folders.tarball(&session.python, &session.target);

        if session.dryrun {
            println!("\nWould create {}", tarball.display());
            return Ok(tarball);
        }

        let install = session.folders.install_dir();
        let (parent, name) = match (install.parent(), install.file_name()) {
            (Some(parent), Some(name)) => (parent, name),
            _ => bail!("Invalid install folder {}", install.display()),
        };
        if !install.is_dir() {
            bail!("Nothing installed in {}", install.display());
        }

        fs::create_dir_all(&session.folders.dist).with_context(|| {
            format!("Failed to create {}", session.folders.dist.display())
        })?;

        println!("\nPackaging {}...", tarball.display());
        Cmd::new("tar")
            .arg("-czf")
            .arg_path(&tarball)
            .arg("-C")
            .arg_path(parent)
            .arg(name.to_string_lossy())
            .error_msg(format!("Failed to create {}", tarball.display()))
            .run()?;

        let sidecar = checksum::write_sidecar(&tarball)?;
        println!("  Created {}", tarball.display());
        println!("  Checksum {}", sidecar.display());
        Ok(tarball)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(python: &str) -> BuildOptions {
        BuildOptions {
            python: python.to_string(),
            modules: Some("none".to_string()),
            target: Some("linux-x86_64".to_string()),
            base_dir: PathBuf::from("/work"),
            ..Default::default()
        }
    }

    #[test]
    fn test_cpython_is_last_and_explicit() {
        let mut opts = options("3.10.4");
        opts.modules = Some("none,zlib,bzip2".to_string());
        let setup = BuildSetup::new(&opts, Config::builtin().unwrap()).unwrap();
        let names: Vec<&str> = setup.builders().iter().map(|b| b.name()).collect();
        assert_eq!(names, vec!["zlib", "bzip2", "cpython"]);
        assert_eq!(setup.builders()[2].version(), "3.10.4");
        assert!(setup.session.is_active("zlib"));
        assert!(!setup.session.is_active("openssl"));
    }

    #[test]
    fn test_unsupported_platform_rejected() {
        let mut opts = options("3.9.7");
        opts.target = Some("windows-x86_64".to_string());
        let err = BuildSetup::new(&opts, Config::builtin().unwrap())
            .err()
            .unwrap();
        assert!(err.to_string().contains("'windows' is not supported"));
    }

    #[test]
    fn test_invalid_version_rejected() {
        assert!(BuildSetup::new(&options("3.9"), Config::builtin().unwrap()).is_err());
        assert!(BuildSetup::new(&options("pypy:3.9.7"), Config::builtin().unwrap()).is_err());
    }

    #[test]
    fn test_x_debug_cleans_nothing() {
        let mut opts = options("3.9.7");
        opts.x_debug = true;
        opts.clean = Some("build,deps".to_string());
        let setup = BuildSetup::new(&opts, Config::builtin().unwrap()).unwrap();
        assert!(setup.clean.is_empty());
    }

    #[test]
    fn test_version_override_from_config() {
        let source =
            crate::config::ConfigSource::from_yaml("test", "zlib-version: 1.2.13\n").unwrap();
        let config = Config::from_sources(vec![source]).unwrap();
        let mut opts = options("3.9.7");
        opts.modules = Some("none,zlib".to_string());
        let setup = BuildSetup::new(&opts, config).unwrap();
        assert_eq!(setup.builders()[0].version(), "1.2.13");
        assert!(setup.builders()[0].url().ends_with("zlib-1.2.13.tar.gz"));
    }
}
