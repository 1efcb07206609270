//! Portability corrections applied to the installed CPython tree.
//!
//! Runs as the CPython finalize hook, in order: prune, symlinks, shebangs,
//! linkage autocorrect, and a classification report. Portability problems are
//! reported, not fatal.

pub mod prune;
pub mod shebang;
pub mod symlinks;

use anyhow::{bail, Context, Result};

use crate::inspector::{ClassifyContext, InspectionReport, LibAutoCorrect, SystemTools};
use crate::module::ModuleContext;
use crate::target::Platform;

/// Make the staged install relocatable and report what it still depends on.
pub fn finalize_install(ctx: &ModuleContext) -> Result<()> {
    let session = ctx.session;
    let folders = &session.folders;
    let platform = &session.target.platform;
    let install = folders.install_dir();
    let log = ctx.log();

    if session.dryrun {
        log.line(format!("would finalize {}", install.display()));
        return Ok(());
    }
    if !install.is_dir() {
        bail!("CPython was not installed in {}", install.display());
    }
    if *platform == Platform::Linux {
        which::which("patchelf").context("patchelf is required to make the build relocatable")?;
    }

    let stdlib = install
        .join("lib")
        .join(format!("python{}", session.python.version.mm()));
    let pruned = prune::prune(&stdlib, &session.config.get_list("cpython-clean"))?;
    log.line(format!("Pruned {} entries from {}", pruned, stdlib.display()));

    let links = symlinks::reconcile(&install, &folders.build_prefix)?;
    log.line(format!("Wrote {} symlinks", links));

    if folders.is_portable() {
        let scripts = shebang::rewrite_scripts(&install.join("bin"), &folders.build_prefix)?;
        log.line(format!("Rewrote {} shebangs", scripts));
    }

    let tools = SystemTools::new(platform);
    let corrector = LibAutoCorrect::new(&tools, platform, &install, &folders.build_prefix)
        .dropping(&folders.deps);
    let rewrites = corrector.run(Some(log))?;
    println!("  Corrected {} linkage entries", rewrites);

    let allowed = session.config.get_str("allowed-system-libs");
    let classify = ClassifyContext::new(platform, &install, allowed.as_deref())?
        .with_prefix(&folders.build_prefix);
    let report = InspectionReport::scan(&install, &tools, &classify)?;
    log.line(report.summary());

    if report.is_valid() {
        println!("  ✓ portable ({})", report.summary());
    } else {
        println!("  [WARN] Installation is not portable ({})", report.summary());
        for (path, (class, users)) in report.problems() {
            let line = format!("    [{}] {} used by {} binaries", class, path, users.len());
            log.line(&line);
            println!("{}", line);
        }
    }
    Ok(())
}
