//! Synth command implementation.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use console::style;

use unfold_infra::OutputFormat;

use super::common::assemble;

/// Execute the synth command.
pub fn execute(config: Option<&Path>, output: Option<&Path>, format: &str) -> Result<()> {
    let format: OutputFormat = format.parse()?;

    eprintln!(
        "{} Synthesizing {}",
        style("→").cyan().bold(),
        style(config.map_or("default configuration".into(), |p| p.display().to_string())).green()
    );

    let assembly = assemble(config)?;
    let rendered = assembly.template.render(format)?;

    eprintln!(
        "  {} resources, {} workflow branches, {} cross-account grants",
        assembly.template.resources.len(),
        assembly.topology.state_machine.branch_count(),
        assembly.report.grants.len()
    );
    if !assembly.report.is_complete() {
        eprintln!(
            "  {} no execution role for: {}",
            style("!").yellow().bold(),
            assembly.report.unresolved.join(", ")
        );
    }

    match output {
        Some(path) => {
            fs::write(path, rendered)
                .with_context(|| format!("Failed to write template: {}", path.display()))?;
            eprintln!("{} Template written", style("✓").green().bold());
            eprintln!("  Output: {}", style(path.display()).green());
        }
        None => println!("{rendered}"),
    }

    Ok(())
}
