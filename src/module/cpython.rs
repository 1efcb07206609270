//! The interpreter itself. Always selected, always built last.

use anyhow::Result;

use super::catalog::TCL;
use super::{EnvContribution, ModuleContext, ModuleDescriptor, ModuleRecipe, DEFAULT_ENV};
use crate::postbuild;
use crate::session::BuildSession;

pub struct Cpython;

pub static CPYTHON: Cpython = Cpython;

static CPYTHON_DESC: ModuleDescriptor = ModuleDescriptor {
    name: "cpython",
    url_template: "https://www.python.org/ftp/python/{version}/Python-{version}.tar.xz",
    ..ModuleDescriptor::BASE
};

/// A shared libpython must be findable while the test suite and ensurepip run
/// from the staged install; the corrector turns this into `$ORIGIN` later.
fn shared_rpath(session: &BuildSession) -> Vec<String> {
    if session.target.is_linux() && session.config.get_bool("cpython-shared") {
        vec![format!("-Wl,-rpath,{}/lib", session.folders.build_prefix)]
    } else {
        Vec::new()
    }
}

impl ModuleRecipe for Cpython {
    fn descriptor(&self) -> &ModuleDescriptor {
        &CPYTHON_DESC
    }

    fn resolve_version(&self, session: &BuildSession) -> String {
        session.python.version.to_string()
    }

    fn environment(&self) -> Vec<EnvContribution> {
        let mut env = DEFAULT_ENV.to_vec();
        env.push(EnvContribution::new("LDFLAGS", shared_rpath));
        env
    }

    fn configure_args(&self, ctx: &ModuleContext) -> Vec<String> {
        let session = ctx.session;
        let config = &session.config;
        let deps = ctx.deps();

        let mut args = vec![
            format!("--prefix={}", session.folders.build_prefix),
            "--with-ensurepip=upgrade".to_string(),
        ];

        if config.get_bool("cpython-optimizations") {
            args.push("--enable-optimizations".to_string());
            if session.target.is_linux() {
                args.push("--with-lto".to_string());
            }
        }

        if config.get_bool("cpython-shared") {
            args.push("--enable-shared".to_string());
        } else {
            args.push("--disable-shared".to_string());
        }

        if session.is_active("openssl") {
            args.push(format!("--with-openssl={}", deps.display()));
        }

        if session.is_active("gdbm") {
            args.push("--with-dbmliborder=gdbm:ndbm".to_string());
        }

        if session.is_active("tcl") && session.is_active("tk") {
            let tcl_version = TCL.resolve_version(session);
            let mm: Vec<&str> = tcl_version.split('.').take(2).collect();
            let mm = mm.join(".");
            args.push(format!(
                "--with-tcltk-includes=-I{}",
                deps.join("include").display()
            ));
            args.push(format!(
                "--with-tcltk-libs=-L{} -ltcl{} -ltk{}",
                deps.join("lib").display(),
                mm,
                mm
            ));
        }

        args.extend(config.get_list("cpython-configure"));
        args
    }

    fn compile_linux(&self, ctx: &ModuleContext) -> Result<()> {
        ctx.run(CPYTHON_DESC.configure_program, self.configure_args(ctx))?;
        ctx.make(None::<&str>)?;
        ctx.run(
            "make",
            [
                "install".to_string(),
                format!("DESTDIR={}", ctx.session.folders.destdir.display()),
            ],
        )
    }

    fn finalize(&self, ctx: &ModuleContext) -> Result<()> {
        postbuild::finalize_install(ctx)
    }
}
