//! Unfold Command-Line Interface
//!
//! Synthesizes the batch infrastructure for the molecular unfolding sweep
//! and reports which cross-account registries the execution role may pull
//! from.

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use console::style;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{grants, synth, validate, version};

/// Unfold - batch infrastructure for quantum molecular unfolding
#[derive(Parser)]
#[command(name = "unfold")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synthesize the provisioning template
    Synth {
        /// Configuration file (YAML)
        #[arg(short, long, env = "UNFOLD_CONFIG")]
        config: Option<PathBuf>,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format (json, yaml)
        #[arg(short, long, default_value = "json")]
        format: String,
    },

    /// Show the pull policies granted to the execution role
    Grants {
        /// Configuration file (YAML)
        #[arg(short, long, env = "UNFOLD_CONFIG")]
        config: Option<PathBuf>,

        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Validate a configuration without synthesizing
    Validate {
        /// Configuration file (YAML)
        #[arg(short, long, env = "UNFOLD_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Show version information
    Version,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Execute command
    let result = match cli.command {
        Commands::Synth {
            config,
            output,
            format,
        } => synth::execute(config.as_deref(), output.as_deref(), &format),

        Commands::Grants { config, format } => grants::execute(config.as_deref(), &format),

        Commands::Validate { config } => validate::execute(config.as_deref()),

        Commands::Version => {
            version::execute();
            Ok(())
        }
    };

    // Handle errors
    if let Err(e) = result {
        eprintln!("{} {:#}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }

    Ok(())
}
