//! portable-python - build portable, relocatable CPython binaries.
//!
//! Compiles the C libraries CPython needs (only those the system lacks, by
//! default), then CPython itself, and packages a tree that runs from any
//! location.

mod commands;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

use portable_python::config::Config;
use portable_python::session::BuildOptions;

#[derive(Parser)]
#[command(name = "portable-python")]
#[command(about = "Build portable, relocatable CPython binaries", version)]
#[command(
    after_help = "QUICK START:\n  portable-python scan                 What would be built on this system\n  portable-python build 3.11.4         Build a portable CPython 3.11.4\n  portable-python inspect ./python     Check an installation for portability"
)]
struct Cli {
    /// Config file to use (repeatable, first one wins)
    #[arg(long, global = true)]
    config: Vec<PathBuf>,

    /// More diagnostic output (-v debug, -vv trace)
    #[arg(short = 'v', action = ArgAction::Count, global = true)]
    debug: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a portable CPython
    Build {
        /// Version to build, e.g. 3.11.4 or cpython:3.11.4
        python: String,

        /// Modules to build: "none", "all", or a CSV of name, +name, -name
        #[arg(short, long)]
        modules: Option<String>,

        /// Target as platform-arch (default: this host)
        #[arg(short, long)]
        target: Option<String>,

        /// Fixed install prefix ({version} and {family} are expanded).
        /// Without it the build is relocatable.
        #[arg(long)]
        prefix: Option<String>,

        /// Folders to clean before building (build,deps,downloads,logs)
        #[arg(long)]
        clean: Option<String>,

        /// Reuse modules already built by a previous run
        #[arg(long = "x-debug")]
        x_debug: bool,

        /// Only log the commands that would run
        #[arg(long)]
        dryrun: bool,
    },

    /// Show which modules would be built on a target, and why
    Scan {
        /// Target as platform-arch (default: this host)
        #[arg(short, long)]
        target: Option<String>,
    },

    /// Report the linkage of an installed python
    Inspect {
        /// Python executable, installation folder, or name on PATH
        python: String,

        /// Emit the report as JSON
        #[arg(long)]
        json: bool,

        /// List every reference, not only problems
        #[arg(long)]
        verbose: bool,
    },

    /// Show the latest release of each supported version
    List {
        #[arg(default_value = "cpython")]
        family: String,
    },
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("portable_python={}", level)));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn main() -> Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.debug);

    let config = Config::load(&cli.config)?;
    if cli.debug > 0 {
        config.print();
    }

    match cli.command {
        Commands::Build {
            python,
            modules,
            target,
            prefix,
            clean,
            x_debug,
            dryrun,
        } => {
            let base_dir = std::env::current_dir().context("Failed to get current directory")?;
            let options = BuildOptions {
                python,
                modules,
                target,
                prefix,
                clean,
                x_debug,
                dryrun,
                base_dir,
            };
            commands::cmd_build(&options, config)?;
        }

        Commands::Scan { target } => {
            commands::cmd_scan(target.as_deref(), &config)?;
        }

        Commands::Inspect {
            python,
            json,
            verbose,
        } => {
            commands::cmd_inspect(&python, json, verbose, &config)?;
        }

        Commands::List { family } => {
            commands::cmd_list(&family)?;
        }
    }

    Ok(())
}
