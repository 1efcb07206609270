//! Module recipes and their compile lifecycle.
//!
//! A *recipe* ([`ModuleRecipe`]) is static knowledge about one buildable
//! dependency: where to download it, how to tell the system already has it,
//! and how to compile it. A *builder* ([`ModuleBuilder`]) is one selected
//! recipe attached to a build session, driven through:
//!
//! ```text
//! unstarted -> unpacking -> environment-prepared -> compiling -> finalized
//!                                                          \-> succeeded | failed
//! ```
//!
//! Recipes expose optional hooks with sensible defaults (configure args,
//! environment contributions, per-platform compile), so a concrete recipe only
//! overrides what differs from `./configure && make && make install`.

pub mod catalog;
pub mod cpython;
pub mod environment;
pub mod registry;

pub use environment::{EnvContribution, Environment, DEFAULT_ENV};
pub use registry::{Registry, SelectedModule, Selection};

use anyhow::{bail, Result};
use std::fmt;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::download;
use crate::process::{Cmd, LogFile};
use crate::session::BuildSession;
use crate::target::{Platform, TargetSystem};
use crate::timing::Timer;

/// Static build recipe data.
#[derive(Clone, Copy)]
pub struct ModuleDescriptor {
    /// Unique module name, also used for log and folder names.
    pub name: &'static str,
    /// Download URL, `{version}` is substituted.
    pub url_template: &'static str,
    pub version: &'static str,
    /// Paths whose existence means the system already provides the module.
    /// `{include}` expands to the target's system include root.
    pub telltales: &'static [&'static str],
    pub configure_program: &'static str,
    /// Extra configure arguments, after `--prefix=<deps>`.
    pub configure_args: &'static [&'static str],
    /// Platforms the module is needed on. Empty means all.
    pub platforms: &'static [&'static str],
    /// Modules built in its place, in order (e.g. tkinter -> tcl, tk, tix).
    pub submodules: &'static [&'static dyn ModuleRecipe],
}

impl ModuleDescriptor {
    /// Base for struct-update syntax in the catalog.
    pub const BASE: ModuleDescriptor = ModuleDescriptor {
        name: "",
        url_template: "",
        version: "",
        telltales: &[],
        configure_program: "./configure",
        configure_args: &[],
        platforms: &[],
        submodules: &[],
    };
}

/// Outcome of auto-detection for a module nobody explicitly asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoUse {
    /// Build it: the system has no usable equivalent.
    Needed { reason: String },
    /// Don't build it: a system equivalent exists (or it isn't needed here).
    Skip {
        reason: String,
        found: Option<PathBuf>,
    },
    /// No telltale declared, only built when requested.
    OnDemand,
    /// Can't be built on this target at all.
    Disqualified { reason: String },
}

impl AutoUse {
    pub fn is_needed(&self) -> bool {
        matches!(self, AutoUse::Needed { .. })
    }

    pub fn is_disqualified(&self) -> bool {
        matches!(self, AutoUse::Disqualified { .. })
    }
}

impl fmt::Display for AutoUse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AutoUse::Needed { reason } => write!(f, "build: {}", reason),
            AutoUse::Skip {
                reason,
                found: Some(path),
            } => write!(f, "skip: {} ({})", reason, path.display()),
            AutoUse::Skip { reason, found: None } => write!(f, "skip: {}", reason),
            AutoUse::OnDemand => f.write_str("on demand only"),
            AutoUse::Disqualified { reason } => write!(f, "can't build: {}", reason),
        }
    }
}

/// Expand a telltale pattern for `target`.
pub fn format_telltale(pattern: &str, target: &TargetSystem) -> PathBuf {
    PathBuf::from(pattern.replace("{include}", &target.sys_include().to_string_lossy()))
}

/// Auto-detection from a descriptor's platforms and telltales.
pub fn auto_use_from_descriptor(descriptor: &ModuleDescriptor, target: &TargetSystem) -> AutoUse {
    if !descriptor.platforms.is_empty() && !descriptor.platforms.contains(&target.platform.name())
    {
        return AutoUse::Skip {
            reason: format!("not needed on {}", target.platform),
            found: None,
        };
    }

    if descriptor.telltales.is_empty() {
        return AutoUse::OnDemand;
    }

    for pattern in descriptor.telltales {
        let path = format_telltale(pattern, target);
        if path.exists() {
            return AutoUse::Skip {
                reason: "system equivalent already present".to_string(),
                found: Some(path),
            };
        }
    }

    AutoUse::Needed {
        reason: "needed, no system equivalent".to_string(),
    }
}

/// One buildable module. Every hook except `descriptor` has a default.
pub trait ModuleRecipe: Sync {
    fn descriptor(&self) -> &ModuleDescriptor;

    fn name(&self) -> &'static str {
        self.descriptor().name
    }

    /// Version to build: `<name>-version` from config, else the catalog's.
    fn resolve_version(&self, session: &BuildSession) -> String {
        session
            .config
            .get_str(&format!("{}-version", self.name()))
            .unwrap_or_else(|| self.descriptor().version.to_string())
    }

    fn url(&self, version: &str) -> String {
        self.descriptor().url_template.replace("{version}", version)
    }

    fn auto_use_with_reason(&self, target: &TargetSystem) -> AutoUse {
        auto_use_from_descriptor(self.descriptor(), target)
    }

    /// Failures are warnings (not fatal) when the module was only auto-selected.
    fn best_effort(&self) -> bool {
        false
    }

    fn environment(&self) -> Vec<EnvContribution> {
        DEFAULT_ENV.to_vec()
    }

    fn configure_args(&self, ctx: &ModuleContext) -> Vec<String> {
        let mut args = vec![format!("--prefix={}", ctx.deps().display())];
        args.extend(self.descriptor().configure_args.iter().map(|a| a.to_string()));
        args
    }

    /// Dispatch to the platform's compile routine.
    fn compile(&self, ctx: &ModuleContext) -> Result<()> {
        match &ctx.session.target.platform {
            Platform::Linux => self.compile_linux(ctx),
            Platform::Macos => self.compile_darwin(ctx),
            Platform::Other(name) => bail!(
                "Can't compile {}: platform '{}' is not supported",
                self.name(),
                name
            ),
        }
    }

    fn compile_linux(&self, ctx: &ModuleContext) -> Result<()> {
        ctx.run(self.descriptor().configure_program, self.configure_args(ctx))?;
        ctx.make(None::<&str>)?;
        ctx.run("make", ["install"])
    }

    fn compile_darwin(&self, ctx: &ModuleContext) -> Result<()> {
        self.compile_linux(ctx)
    }

    /// Always runs last, even when compilation was skipped by `--x-debug`.
    fn finalize(&self, ctx: &ModuleContext) -> Result<()> {
        ctx.fix_lib_permissions()
    }
}

/// Everything a recipe hook needs while one module compiles.
pub struct ModuleContext<'a> {
    pub session: &'a BuildSession,
    pub name: &'static str,
    pub version: String,
    pub src_dir: PathBuf,
    env: Vec<(String, String)>,
    log: LogFile,
}

impl<'a> ModuleContext<'a> {
    pub fn deps(&self) -> &Path {
        &self.session.folders.deps
    }

    pub fn log(&self) -> &LogFile {
        &self.log
    }

    /// Exported value of an environment variable for this module.
    pub fn env_value(&self, var: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(name, _)| name == var)
            .map(|(_, value)| value.as_str())
    }

    /// A command preconfigured with this module's environment and folder.
    ///
    /// `./program` is resolved against the module's source folder.
    pub fn cmd(&self, program: &str) -> Cmd {
        let program = match program.strip_prefix("./") {
            Some(relative) => self.src_dir.join(relative).display().to_string(),
            None => program.to_string(),
        };
        Cmd::new(program)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .dir(&self.src_dir)
            .dryrun(self.session.dryrun)
    }

    /// Run a toolchain step, output captured in the module log.
    pub fn run<I, S>(&self, program: &str, args: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.cmd(program)
            .args(args)
            .error_msg(format!("{}: '{}' failed", self.name, program))
            .run_logged(&self.log)
    }

    /// `make -jN <args>`.
    pub fn make<I, S>(&self, args: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let jobs = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        self.cmd("make")
            .arg(format!("-j{}", jobs))
            .args(args)
            .error_msg(format!("{}: 'make' failed", self.name))
            .run_logged(&self.log)
    }

    /// Give static/shared libraries in the deps prefix an owner-write bit;
    /// some projects install them read-only, which breaks later strip/patch.
    pub fn fix_lib_permissions(&self) -> Result<()> {
        let lib = self.deps().join("lib");
        if self.session.dryrun || !lib.is_dir() {
            return Ok(());
        }
        for entry in fs::read_dir(&lib)? {
            let path = entry?.path();
            let meta = fs::symlink_metadata(&path)?;
            if !meta.is_file() || !is_library_name(&path) {
                continue;
            }
            let mode = meta.permissions().mode();
            if mode & 0o200 == 0 {
                self.log
                    .line(format!("chmod u+w {}", path.display()));
                fs::set_permissions(&path, fs::Permissions::from_mode(mode | 0o644))?;
            }
        }
        Ok(())
    }
}

fn is_library_name(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.starts_with("lib")
        && (name.ends_with(".a") || name.contains(".so") || name.ends_with(".dylib"))
}

/// Where a builder is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Unstarted,
    Unpacking,
    EnvironmentPrepared,
    Compiling,
    Finalized,
    Succeeded,
    Failed,
}

/// A selected recipe attached to a session.
pub struct ModuleBuilder {
    recipe: &'static dyn ModuleRecipe,
    explicit: bool,
    /// Selected module this builder came from (its own name unless it is
    /// part of a group like tkinter).
    group: &'static str,
    version: String,
    src_dir: PathBuf,
    state: ModuleState,
    log_path: Option<PathBuf>,
}

impl ModuleBuilder {
    pub fn new(recipe: &'static dyn ModuleRecipe, explicit: bool) -> Self {
        Self {
            recipe,
            explicit,
            group: recipe.name(),
            version: recipe.descriptor().version.to_string(),
            src_dir: PathBuf::new(),
            state: ModuleState::Unstarted,
            log_path: None,
        }
    }

    /// Mark this builder as one part of the group `group`.
    pub fn in_group(mut self, group: &'static str) -> Self {
        self.group = group;
        self
    }

    pub fn group(&self) -> &'static str {
        self.group
    }

    /// Bind version and folders from the session.
    pub fn attach(&mut self, session: &BuildSession) {
        self.version = self.recipe.resolve_version(session);
        self.src_dir = session.folders.component(self.name());
    }

    pub fn name(&self) -> &'static str {
        self.recipe.name()
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn url(&self) -> String {
        self.recipe.url(&self.version)
    }

    pub fn state(&self) -> ModuleState {
        self.state
    }

    pub fn explicit(&self) -> bool {
        self.explicit
    }

    pub fn src_dir(&self) -> &Path {
        &self.src_dir
    }

    /// Log file of the last compile, if one was started.
    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    /// A failure only warns: best-effort recipe that nobody asked for.
    pub fn is_best_effort(&self) -> bool {
        self.recipe.best_effort() && !self.explicit
    }

    /// Compile this module. `seq` numbers the log file (`01-zlib.log`).
    pub fn compile(&mut self, session: &BuildSession, seq: usize) -> Result<()> {
        let name = self.name();
        let log_path = session.folders.logs.join(format!("{:02}-{}.log", seq, name));
        self.log_path = Some(log_path.clone());

        let log = LogFile::create(&log_path)?;
        log.line(format!(
            "Building {} {} for {}",
            name, self.version, session.target
        ));
        println!("\n[{:02}] {} {}", seq, name, self.version);
        let timer = Timer::start(name);

        let env = Environment::collect(session, &self.recipe.environment());
        let ctx = ModuleContext {
            session,
            name,
            version: self.version.clone(),
            src_dir: self.src_dir.clone(),
            env: env.rendered(),
            log,
        };

        let result = self.run_lifecycle(&ctx);
        match result {
            Ok(()) => {
                self.state = ModuleState::Succeeded;
                ctx.log.line("Build succeeded");
                drop(ctx);
                timer.finish();
                Ok(())
            }
            Err(err) => {
                self.state = ModuleState::Failed;
                ctx.log.line(format!("ERROR: {:#}", err));
                ctx.log.flush();
                drop(ctx);
                Err(err.context(format!(
                    "Module '{}' failed, see log {}",
                    name,
                    log_path.display()
                )))
            }
        }
    }

    fn run_lifecycle(&mut self, ctx: &ModuleContext) -> Result<()> {
        let session = ctx.session;

        if session.x_debug && self.src_dir.is_dir() {
            ctx.log.line(format!(
                "x-debug: reusing previous build in {}",
                self.src_dir.display()
            ));
            println!("  [SKIP] x-debug: {} already built", self.name());
        } else {
            self.state = ModuleState::Unpacking;
            self.unpack(ctx)?;

            self.state = ModuleState::EnvironmentPrepared;
            for (var, value) in &ctx.env {
                ctx.log.line(format!("env {}={}", var, value));
            }

            self.state = ModuleState::Compiling;
            self.recipe.compile(ctx)?;
        }

        self.state = ModuleState::Finalized;
        self.recipe.finalize(ctx)
    }

    fn unpack(&self, ctx: &ModuleContext) -> Result<()> {
        let url = self.url();
        if ctx.session.dryrun {
            ctx.log.line(format!("would download: {}", url));
            ctx.log
                .line(format!("would unpack into: {}", self.src_dir.display()));
            return Ok(());
        }

        let archive = download::download(&url, &ctx.session.folders.downloads)?;
        ctx.log.line(format!(
            "Unpacking {} into {}",
            archive.display(),
            self.src_dir.display()
        ));
        download::decompress(&archive, &self.src_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static DESC: ModuleDescriptor = ModuleDescriptor {
        name: "demo",
        telltales: &["{include}/demo.h", "{include}/demo/demo.h"],
        ..ModuleDescriptor::BASE
    };

    fn target_with_include(include: &Path) -> TargetSystem {
        TargetSystem::from_spec(Some("linux-x86_64"))
            .unwrap()
            .with_sys_include(include)
    }

    #[test]
    fn test_needed_when_no_telltale_exists() {
        let temp = tempfile::tempdir().unwrap();
        let target = target_with_include(temp.path());
        let decision = auto_use_from_descriptor(&DESC, &target);
        assert!(decision.is_needed());
    }

    #[test]
    fn test_skip_reports_found_path() {
        let temp = tempfile::tempdir().unwrap();
        fs::create_dir_all(temp.path().join("demo")).unwrap();
        fs::write(temp.path().join("demo/demo.h"), "").unwrap();
        let target = target_with_include(temp.path());

        match auto_use_from_descriptor(&DESC, &target) {
            AutoUse::Skip { found, .. } => {
                assert_eq!(found, Some(temp.path().join("demo/demo.h")))
            }
            other => panic!("expected skip, got {:?}", other),
        }
    }

    #[test]
    fn test_no_telltale_means_on_demand() {
        let bare = ModuleDescriptor {
            name: "bare",
            ..ModuleDescriptor::BASE
        };
        let target = TargetSystem::from_spec(Some("linux-x86_64")).unwrap();
        assert_eq!(auto_use_from_descriptor(&bare, &target), AutoUse::OnDemand);
    }

    #[test]
    fn test_platform_restriction() {
        let linux_only = ModuleDescriptor {
            name: "linux-only",
            telltales: &["{include}/nope.h"],
            platforms: &["linux"],
            ..ModuleDescriptor::BASE
        };
        let target = TargetSystem::from_spec(Some("macos-arm64")).unwrap();
        assert!(matches!(
            auto_use_from_descriptor(&linux_only, &target),
            AutoUse::Skip { found: None, .. }
        ));
    }

    #[test]
    fn test_library_names() {
        assert!(is_library_name(Path::new("/deps/lib/libz.a")));
        assert!(is_library_name(Path::new("/deps/lib/libffi.so.8.1.0")));
        assert!(is_library_name(Path::new("/deps/lib/libssl.dylib")));
        assert!(!is_library_name(Path::new("/deps/lib/pkgconfig")));
    }
}
