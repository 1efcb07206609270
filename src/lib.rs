//! Portable Python builder.
//!
//! Compiles CPython and the C libraries it depends on into a self-contained,
//! relocatable installation:
//! - auto-detects which libraries the target system lacks
//! - builds them one by one into a shared deps prefix, each with its own log
//! - builds CPython against them and stages the install
//! - rewrites linkage, symlinks and shebangs so the tree can be moved anywhere
//!
//! The binary (`src/main.rs`) is a thin CLI over this library.

pub mod checksum;
pub mod clean;
pub mod config;
pub mod download;
pub mod folders;
pub mod inspector;
pub mod module;
pub mod postbuild;
pub mod process;
pub mod session;
pub mod target;
pub mod timing;
pub mod version;
