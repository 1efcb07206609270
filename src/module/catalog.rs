//! The static module catalog.
//!
//! Registration order is build order: every library lands in the deps prefix
//! before anything that links against it, and CPython (not registered here)
//! always builds last.

use anyhow::Result;

use super::{AutoUse, ModuleContext, ModuleDescriptor, ModuleRecipe, Registry};
use crate::target::TargetSystem;

/// Register every known module, in build order.
pub fn register(registry: &mut Registry) -> Result<()> {
    registry.register(&OPENSSL)?;
    registry.register(&ZLIB)?;
    registry.register(&BZIP2)?;
    registry.register(&XZ)?;
    registry.register(&NCURSES)?;
    registry.register(&READLINE)?;
    registry.register(&GDBM)?;
    registry.register(&SQLITE)?;
    registry.register(&LIBFFI)?;
    registry.register(&TKINTER)?;
    Ok(())
}

/// A recipe that needs nothing beyond its descriptor.
pub struct Recipe(pub ModuleDescriptor);

impl ModuleRecipe for Recipe {
    fn descriptor(&self) -> &ModuleDescriptor {
        &self.0
    }
}

pub static ZLIB: Recipe = Recipe(ModuleDescriptor {
    name: "zlib",
    url_template: "https://zlib.net/fossils/zlib-{version}.tar.gz",
    version: "1.3.1",
    telltales: &["{include}/zlib.h"],
    configure_args: &["--static"],
    ..ModuleDescriptor::BASE
});

pub static XZ: Recipe = Recipe(ModuleDescriptor {
    name: "xz",
    url_template: "https://tukaani.org/xz/xz-{version}.tar.gz",
    version: "5.4.6",
    telltales: &["{include}/lzma.h"],
    configure_args: &[
        "--enable-shared=no",
        "--enable-static=yes",
        "--disable-doc",
        "--disable-xz",
        "--disable-xzdec",
        "--disable-lzmadec",
        "--disable-lzmainfo",
        "--disable-scripts",
    ],
    ..ModuleDescriptor::BASE
});

pub static NCURSES: Recipe = Recipe(ModuleDescriptor {
    name: "ncurses",
    url_template: "https://ftp.gnu.org/pub/gnu/ncurses/ncurses-{version}.tar.gz",
    version: "6.4",
    telltales: &["{include}/ncurses.h", "{include}/ncursesw/ncurses.h"],
    configure_args: &[
        "--disable-shared",
        "--enable-static",
        "--without-ada",
        "--disable-db-install",
        "--without-manpages",
        "--without-progs",
        "--without-tests",
        "--enable-widec",
    ],
    ..ModuleDescriptor::BASE
});

pub static READLINE: Recipe = Recipe(ModuleDescriptor {
    name: "readline",
    url_template: "https://ftp.gnu.org/gnu/readline/readline-{version}.tar.gz",
    version: "8.2",
    telltales: &["{include}/readline/readline.h"],
    configure_args: &["--disable-shared", "--with-curses"],
    ..ModuleDescriptor::BASE
});

pub static GDBM: Recipe = Recipe(ModuleDescriptor {
    name: "gdbm",
    url_template: "https://ftp.gnu.org/gnu/gdbm/gdbm-{version}.tar.gz",
    version: "1.23",
    telltales: &["{include}/gdbm.h"],
    configure_args: &[
        "--enable-libgdbm-compat",
        "--without-readline",
        "--disable-shared",
    ],
    ..ModuleDescriptor::BASE
});

pub static SQLITE: Recipe = Recipe(ModuleDescriptor {
    name: "sqlite",
    url_template: "https://www.sqlite.org/2024/sqlite-autoconf-{version}.tar.gz",
    version: "3450100",
    telltales: &["{include}/sqlite3.h"],
    configure_args: &["--disable-shared", "--enable-static"],
    ..ModuleDescriptor::BASE
});

pub static LIBFFI: Recipe = Recipe(ModuleDescriptor {
    name: "libffi",
    url_template: "https://github.com/libffi/libffi/releases/download/v{version}/libffi-{version}.tar.gz",
    version: "3.4.6",
    telltales: &["{include}/ffi.h", "{include}/ffi/ffi.h"],
    configure_args: &[
        "--disable-shared",
        "--enable-static",
        "--disable-multi-os-directory",
    ],
    // macOS ships a usable libffi in its SDK.
    platforms: &["linux"],
    ..ModuleDescriptor::BASE
});

/// OpenSSL has its own `config` script and an install target that skips docs.
pub struct OpenSsl;

pub static OPENSSL: OpenSsl = OpenSsl;

static OPENSSL_DESC: ModuleDescriptor = ModuleDescriptor {
    name: "openssl",
    url_template: "https://www.openssl.org/source/openssl-{version}.tar.gz",
    version: "1.1.1w",
    telltales: &["{include}/openssl/ssl.h"],
    configure_program: "./config",
    configure_args: &["no-shared", "no-idea", "no-tests"],
    ..ModuleDescriptor::BASE
};

impl ModuleRecipe for OpenSsl {
    fn descriptor(&self) -> &ModuleDescriptor {
        &OPENSSL_DESC
    }

    fn configure_args(&self, ctx: &ModuleContext) -> Vec<String> {
        let deps = ctx.deps();
        let mut args = vec![
            format!("--prefix={}", deps.display()),
            format!("--openssldir={}", deps.join("ssl").display()),
            "--libdir=lib".to_string(),
        ];
        args.extend(OPENSSL_DESC.configure_args.iter().map(|a| a.to_string()));
        args
    }

    fn compile_linux(&self, ctx: &ModuleContext) -> Result<()> {
        ctx.run(OPENSSL_DESC.configure_program, self.configure_args(ctx))?;
        ctx.make(["depend"])?;
        ctx.make(["all"])?;
        ctx.run("make", ["install_sw"])
    }
}

/// bzip2 ships a plain Makefile, no configure step.
pub struct Bzip2;

pub static BZIP2: Bzip2 = Bzip2;

static BZIP2_DESC: ModuleDescriptor = ModuleDescriptor {
    name: "bzip2",
    url_template: "https://sourceware.org/pub/bzip2/bzip2-{version}.tar.gz",
    version: "1.0.8",
    telltales: &["{include}/bzlib.h"],
    ..ModuleDescriptor::BASE
};

impl ModuleRecipe for Bzip2 {
    fn descriptor(&self) -> &ModuleDescriptor {
        &BZIP2_DESC
    }

    fn compile_linux(&self, ctx: &ModuleContext) -> Result<()> {
        let cflags = ctx.env_value("CFLAGS").unwrap_or_default();
        ctx.run(
            "make",
            [
                "install".to_string(),
                format!("PREFIX={}", ctx.deps().display()),
                format!("CFLAGS={} -O2 -g -D_FILE_OFFSET_BITS=64", cflags)
                    .trim()
                    .to_string(),
            ],
        )
    }
}

/// One of the Tcl/Tk/Tix builds behind `tkinter`. All of them are best-effort.
pub struct TclTkPart {
    desc: ModuleDescriptor,
    /// Earlier parts this one is configured against (`--with-tcl=<deps>/lib`).
    with: &'static [&'static str],
}

impl ModuleRecipe for TclTkPart {
    fn descriptor(&self) -> &ModuleDescriptor {
        &self.desc
    }

    fn best_effort(&self) -> bool {
        true
    }

    fn configure_args(&self, ctx: &ModuleContext) -> Vec<String> {
        let lib = ctx.deps().join("lib");
        let mut args = vec![format!("--prefix={}", ctx.deps().display())];
        args.extend(self.desc.configure_args.iter().map(|a| a.to_string()));
        for part in self.with {
            args.push(format!("--with-{}={}", part, lib.display()));
        }
        if self.desc.name == "tk" && ctx.session.target.is_macos() {
            args.push("--enable-aqua=yes".to_string());
        }
        args
    }
}

pub static TCL: TclTkPart = TclTkPart {
    desc: ModuleDescriptor {
        name: "tcl",
        url_template: "https://prdownloads.sourceforge.net/tcl/tcl{version}-src.tar.gz",
        version: "8.6.13",
        configure_program: "./unix/configure",
        configure_args: &["--enable-shared=no", "--enable-threads"],
        ..ModuleDescriptor::BASE
    },
    with: &[],
};

pub static TK: TclTkPart = TclTkPart {
    desc: ModuleDescriptor {
        name: "tk",
        url_template: "https://prdownloads.sourceforge.net/tcl/tk{version}-src.tar.gz",
        version: "8.6.13",
        configure_program: "./unix/configure",
        configure_args: &["--enable-shared=no", "--enable-threads"],
        ..ModuleDescriptor::BASE
    },
    with: &["tcl"],
};

pub static TIX: TclTkPart = TclTkPart {
    desc: ModuleDescriptor {
        name: "tix",
        url_template: "https://github.com/python/cpython-source-deps/archive/tix-{version}.tar.gz",
        version: "8.4.3.6",
        configure_args: &["--enable-shared=no"],
        ..ModuleDescriptor::BASE
    },
    with: &["tcl", "tk"],
};

/// The `tkinter` group: selecting it builds tcl, tk and tix in that order.
pub struct Tkinter;

pub static TKINTER: Tkinter = Tkinter;

static TKINTER_DESC: ModuleDescriptor = ModuleDescriptor {
    name: "tkinter",
    telltales: &["{include}/tk.h", "{include}/tk/tk.h"],
    submodules: &[&TCL, &TK, &TIX],
    ..ModuleDescriptor::BASE
};

/// Header Tk needs on Linux; without it the group can't build at all.
const X11_TELLTALE: &str = "{include}/X11/Xlib.h";

impl ModuleRecipe for Tkinter {
    fn descriptor(&self) -> &ModuleDescriptor {
        &TKINTER_DESC
    }

    fn best_effort(&self) -> bool {
        true
    }

    fn auto_use_with_reason(&self, target: &TargetSystem) -> AutoUse {
        if target.is_linux() && !super::format_telltale(X11_TELLTALE, target).exists() {
            return AutoUse::Disqualified {
                reason: "X11 headers not found".to_string(),
            };
        }
        super::auto_use_from_descriptor(&TKINTER_DESC, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    fn linux(include: &Path) -> TargetSystem {
        TargetSystem::from_spec(Some("linux-x86_64"))
            .unwrap()
            .with_sys_include(include)
    }

    #[test]
    fn test_catalog_order() {
        let registry = Registry::catalog().unwrap();
        assert_eq!(
            registry.names(),
            vec![
                "openssl", "zlib", "bzip2", "xz", "ncurses", "readline", "gdbm", "sqlite",
                "libffi", "tkinter"
            ]
        );
    }

    #[test]
    fn test_every_module_has_a_source() {
        let registry = Registry::catalog().unwrap();
        for recipe in registry.iter() {
            let parts = recipe.descriptor().submodules;
            if parts.is_empty() {
                assert!(recipe.url("1.0").starts_with("https://"), "{}", recipe.name());
            } else {
                for part in parts {
                    assert!(part.url("1.0").contains("1.0"), "{}", part.name());
                }
            }
        }
    }

    #[test]
    fn test_tkinter_needs_x11_on_linux() {
        let temp = tempfile::tempdir().unwrap();
        assert!(TKINTER
            .auto_use_with_reason(&linux(temp.path()))
            .is_disqualified());

        fs::create_dir_all(temp.path().join("X11")).unwrap();
        fs::write(temp.path().join("X11/Xlib.h"), "").unwrap();
        assert!(TKINTER.auto_use_with_reason(&linux(temp.path())).is_needed());

        fs::write(temp.path().join("tk.h"), "").unwrap();
        assert!(matches!(
            TKINTER.auto_use_with_reason(&linux(temp.path())),
            AutoUse::Skip { found: Some(_), .. }
        ));
    }

    #[test]
    fn test_libffi_linux_only() {
        let temp = tempfile::tempdir().unwrap();
        let macos = TargetSystem::from_spec(Some("macos-arm64"))
            .unwrap()
            .with_sys_include(temp.path());
        assert!(!LIBFFI.auto_use_with_reason(&macos).is_needed());
        assert!(LIBFFI.auto_use_with_reason(&linux(temp.path())).is_needed());
    }

    #[test]
    fn test_tcltk_parts_are_best_effort() {
        for part in TKINTER_DESC.submodules {
            assert!(part.best_effort());
        }
        assert!(!ZLIB.best_effort());
    }
}
