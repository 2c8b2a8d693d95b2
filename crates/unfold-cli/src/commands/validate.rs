//! Validate command implementation.

use std::path::Path;

use anyhow::Result;
use console::style;

use unfold_infra::App;

use super::common::load_config;

/// Execute the validate command.
pub fn execute(config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    let app = App::new(config);
    let topology = app.build()?;
    let config = app.config();

    println!("{} Configuration is valid", style("✓").green().bold());
    println!("  Stack:    {}", style(&config.stack.name).cyan());
    println!(
        "  Target:   {} / {}",
        config.stack.account, config.stack.region
    );
    println!("  Bucket:   {}", config.stack.bucket_name);
    println!(
        "  Jobs:     {} definitions, {} workflow branches",
        topology.tree.job_definitions().count(),
        topology.state_machine.branch_count()
    );
    println!(
        "  Registry: {}",
        style(config.image_asset_account()).dim()
    );

    Ok(())
}
