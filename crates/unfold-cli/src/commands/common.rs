//! Shared helpers for CLI commands.

use std::path::Path;

use anyhow::{Context, Result};

use unfold_infra::{Assembly, App, DeployConfig};

/// Load configuration from an optional file, `.env` and `UNFOLD_*` variables.
pub fn load_config(path: Option<&Path>) -> Result<DeployConfig> {
    if let Some(path) = path {
        if !path.exists() {
            anyhow::bail!("File not found: {}", path.display());
        }
    }
    DeployConfig::load(path).with_context(|| match path {
        Some(path) => format!("Failed to load configuration from {}", path.display()),
        None => "Failed to load configuration".to_string(),
    })
}

/// Run the full pipeline for a configuration file.
pub fn assemble(path: Option<&Path>) -> Result<Assembly> {
    let config = load_config(path)?;
    let assembly = App::new(config).synth()?;
    Ok(assembly)
}
