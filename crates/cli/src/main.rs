//! UPS Guard operator CLI
//!
//! Inspects the persisted shutdown history, reads UPS units and previews
//! which VMs a deployment shutdown would touch. Never changes power state.

mod commands;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use upsguard_lib::config::DEFAULT_CONFIG_PATH;
use upsguard_lib::GuardConfig;

/// UPS Guard operator CLI
#[derive(Parser)]
#[command(name = "upsguard-ctl")]
#[command(author, version, about = "Operator CLI for UPS Guard", long_about = None)]
pub struct Cli {
    /// Configuration file (can also be set via UPSGUARD_CONFIG_FILE env var)
    #[arg(long, short, env = "UPSGUARD_CONFIG_FILE", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the shutdown history of every deployment
    Status {
        /// Read this state file instead of the configured one
        #[arg(long)]
        state_file: Option<PathBuf>,
    },

    /// Read the UPS and report what the daemon would decide
    Ups {
        /// Only read this deployment's UPS
        #[arg(long, short)]
        deployment: Option<String>,
    },

    /// List powered-on VMs and the order they would be shut down in
    Plan {
        /// Deployment name
        deployment: String,
    },

    /// Check the configuration file
    Validate,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Status { state_file } => {
            let path = match state_file {
                Some(path) => path,
                None => load_config(&cli.config)?.general.state_file,
            };
            commands::status::show(&path, cli.format)
        }
        Commands::Ups { deployment } => {
            let config = load_config(&cli.config)?;
            commands::ups::run(&config, deployment.as_deref(), cli.format).await
        }
        Commands::Plan { deployment } => {
            let config = load_config(&cli.config)?;
            commands::plan::run(&config, &deployment, cli.format).await
        }
        Commands::Validate => commands::validate::run(&cli.config, cli.format),
    }
}

fn load_config(path: &Path) -> Result<GuardConfig> {
    GuardConfig::load(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}
