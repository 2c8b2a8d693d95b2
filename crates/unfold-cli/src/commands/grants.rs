//! Grants command implementation.
//!
//! Shows what the cross-account resolver attached to the execution role.

use std::path::Path;

use anyhow::Result;
use console::style;

use unfold_infra::{GrantTiming, ResolutionReport};

use super::common::assemble;

/// Execute the grants command.
pub fn execute(config: Option<&Path>, format: &str) -> Result<()> {
    let assembly = assemble(config)?;

    match format {
        "json" => {
            let json = serde_json::to_string_pretty(&assembly.report)
                .map_err(|e| anyhow::anyhow!("JSON serialization failed: {e}"))?;
            println!("{json}");
        }
        "table" => print_report(&assembly.report),
        other => anyhow::bail!("Unknown format: '{other}'. Available: table, json"),
    }

    Ok(())
}

fn print_report(report: &ResolutionReport) {
    match &report.role {
        Some(role) => println!("{} {}", style("Execution role:").bold(), style(role).cyan()),
        None => println!(
            "{} {}",
            style("Execution role:").bold(),
            style("not found").yellow()
        ),
    }
    println!();

    if report.grants.is_empty() {
        println!("  No cross-account registries referenced.");
    } else {
        println!("  {:<32} {:<56} {:<10}", "Repository", "Policy", "Timing");
        println!("  {}", "-".repeat(100));
        for grant in &report.grants {
            let timing = match grant.timing {
                GrantTiming::Deferred => "deferred",
                GrantTiming::Immediate => "immediate",
            };
            println!(
                "  {:<32} {:<56} {:<10}",
                grant.repository, grant.policy_name, timing
            );
        }
    }

    if !report.unresolved.is_empty() {
        println!();
        println!(
            "{} {}",
            style("Unresolved:").yellow().bold(),
            report.unresolved.join(", ")
        );
    }
}
