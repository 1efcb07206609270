//! CLI command handlers.
//!
//! - `build` - Compile modules and CPython, package the result
//! - `scan` - Show which modules would be auto-selected, and why
//! - `inspect` - Classify the linkage of an existing installation
//! - `list` - Show the latest release of each supported version

pub mod build;
pub mod inspect;
pub mod list;
pub mod scan;

pub use build::cmd_build;
pub use inspect::cmd_inspect;
pub use list::cmd_list;
pub use scan::cmd_scan;
