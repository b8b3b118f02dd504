//! temperctl - operator client for the temperd snapshot server
//!
//! Fetches the metrics document and renders GPUs, chassis sensors and the
//! inference service as tables or JSON.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{ai, chassis, gpus, status};

const DEFAULT_URL: &str = "http://localhost:3001";

/// temperd operator CLI
#[derive(Parser)]
#[command(name = "temperctl")]
#[command(author, version, about = "CLI for the Temper thermal control daemon", long_about = None)]
pub struct Cli {
    /// Snapshot server URL (can also be set via TEMPER_URL env var)
    #[arg(long, env = "TEMPER_URL")]
    pub url: Option<String>,

    /// Shared secret for the snapshot server
    #[arg(long, env = "TEMPER_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Output format
    #[arg(long, short)]
    pub format: Option<output::OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Overview of host, GPUs, chassis and inference service
    Status,

    /// Per-GPU thermal and power state
    Gpus {
        /// Show one GPU in detail
        #[arg(long, short)]
        index: Option<u32>,
    },

    /// Chassis sensors read through the BMC
    Chassis,

    /// Inference service state and slots
    Ai,

    /// Print the raw metrics document
    Raw,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Command line and environment win over the config file
    let file = config::Config::load()?;
    let url = cli
        .url
        .or(file.url)
        .unwrap_or_else(|| DEFAULT_URL.to_string());
    let token = cli.token.or(file.token).filter(|t| !t.is_empty());
    let format = cli
        .format
        .or_else(|| file.format.as_deref().and_then(output::OutputFormat::from_name))
        .unwrap_or_default();

    let client = client::SnapshotClient::new(&url, token)?;

    match cli.command {
        Commands::Status => status::show_status(&client, format).await?,
        Commands::Gpus { index } => gpus::show_gpus(&client, index, format).await?,
        Commands::Chassis => chassis::show_chassis(&client, format).await?,
        Commands::Ai => ai::show_ai(&client, format).await?,
        Commands::Raw => status::show_raw(&client).await?,
    }

    Ok(())
}
