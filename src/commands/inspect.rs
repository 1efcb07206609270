//! Inspect command - linkage report of an installed python.

use anyhow::Result;

use portable_python::config::Config;
use portable_python::inspector::{self, ClassifyContext, InspectionReport, SystemTools};
use portable_python::target::TargetSystem;

/// Execute the inspect command.
pub fn cmd_inspect(python: &str, json: bool, verbose: bool, config: &Config) -> Result<()> {
    let target = TargetSystem::host();
    let config = config.clone().with_target(&target);
    let root = inspector::find_install_root(python)?;

    let allowed = config.get_str("allowed-system-libs");
    let ctx = ClassifyContext::new(&target.platform, &root, allowed.as_deref())?;
    let tools = SystemTools::new(&target.platform);
    let report = InspectionReport::scan(&root, &tools, &ctx)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        report.print(verbose);
    }
    Ok(())
}
