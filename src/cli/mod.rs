//! # Command Line Interface
//!
//! `flowgate reconcile` runs one reconciliation pass over a manifest
//! snapshot; `flowgate config show` prints the effective configuration.

pub mod output;
pub mod reconcile;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::AppConfig;
use crate::observability::{init_observability, log_config_info};
use output::{print_output, OutputFormat};

#[derive(Parser)]
#[command(name = "flowgate")]
#[command(about = "Gateway API control plane reconciliation engine")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (YAML or TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build configuration and statuses from a manifest snapshot
    Reconcile {
        /// Multi-document YAML file with the cluster objects
        #[arg(long)]
        snapshot: PathBuf,

        /// Write requested certificate bundles to the secrets directory
        #[arg(long)]
        write_secrets: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
        output: OutputFormat,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration after file and environment overrides
    Show {
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Yaml)]
        output: OutputFormat,
    },
}

/// Run CLI commands
pub async fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if cli.verbose {
        config.observability.log_level = "debug".to_string();
    }
    init_observability(&config.observability);

    match cli.command {
        Commands::Reconcile {
            snapshot,
            write_secrets,
            output,
        } => {
            log_config_info(&config);
            let resources = reconcile::load_snapshot(&snapshot)?;
            let report = reconcile::reconcile(&config, resources, write_secrets).await?;
            print_output(&report, output)?;
        }
        Commands::Config {
            command: ConfigCommands::Show { output },
        } => {
            print_output(&config, output)?;
        }
    }

    Ok(())
}
