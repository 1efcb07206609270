//! Scan command - auto-detection report for every known module.

use anyhow::Result;

use portable_python::config::Config;
use portable_python::module::{AutoUse, Registry};
use portable_python::target::TargetSystem;

/// Execute the scan command.
pub fn cmd_scan(target: Option<&str>, config: &Config) -> Result<()> {
    let target = TargetSystem::from_spec(target)?;
    let config = config.clone().with_target(&target);
    let registry = Registry::catalog()?;

    println!("=== Module scan for {} ===", target);
    println!("System headers: {}\n", target.sys_include().display());

    for (name, decision) in registry.decisions(&target) {
        let icon = match decision {
            AutoUse::Needed { .. } => "✓",
            AutoUse::Skip { .. } => "○",
            AutoUse::OnDemand => "·",
            AutoUse::Disqualified { .. } => "✗",
        };
        println!("  {} {:<10} {}", icon, name, decision);
    }

    if let Some(modules) = config.get_str("cpython-modules") {
        println!("\nConfigured selection (cpython-modules): {}", modules);
    }
    let selection = registry.select(&target, config.get_str("cpython-modules").as_deref())?;
    let names = selection.names();
    println!(
        "\nWould build: {}",
        if names.is_empty() {
            "cpython".to_string()
        } else {
            format!("{}, cpython", names.join(", "))
        }
    );
    Ok(())
}
