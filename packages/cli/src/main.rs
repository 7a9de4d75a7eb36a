#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for CRM place-name geocoding.
//!
//! Uses `indicatif-log-bridge` (via [`crm_geocode_cli_utils::init_logger`])
//! to route `log` output through `indicatif::MultiProgress` so that log
//! lines and progress bars never fight for the terminal.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use crm_geocode_config::Config;

#[derive(Parser)]
#[command(
    name = "crm_geocode",
    about = "Resolve free-text CRM place names to municipality coordinates"
)]
struct Cli {
    /// Settings file (overrides `CRM_GEOCODE_CONFIG` and the built-in defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the normalized form of each argument
    Normalize {
        /// Raw place or province names
        #[arg(required = true)]
        text: Vec<String>,
    },
    /// Resolve one place name and print the match result
    Resolve {
        /// Place name as typed in the CRM
        #[arg(long)]
        place: String,
        /// Province name or code as typed in the CRM
        #[arg(long)]
        province: Option<String>,
    },
    /// Geocode a batch of CRM records and write the exports
    Geocode {
        /// Read records from this CSV file
        #[arg(long, conflicts_with = "connector", required_unless_present = "connector")]
        input: Option<PathBuf>,
        /// Fetch records through the BI connector
        #[arg(long)]
        connector: bool,
    },
    /// Load the reference gazetteer and print its statistics
    Gazetteer,
    /// Download CRM records through the BI connector into a CSV file
    Fetch {
        /// Destination CSV file
        #[arg(long)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = crm_geocode_cli_utils::init_logger();
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    let session = commands::Session::new(&config)?;

    match cli.command {
        Commands::Normalize { text } => commands::normalize(&session, &text)?,
        Commands::Resolve { place, province } => {
            commands::resolve(&config, &session, &place, province.as_deref())?;
        }
        Commands::Geocode { input, connector } => {
            let source = commands::record_source(&config, input, connector)?;
            commands::geocode(&config, &session, source.as_ref(), &multi).await?;
        }
        Commands::Gazetteer => commands::gazetteer(&session)?,
        Commands::Fetch { output } => commands::fetch(&config, &output).await?,
    }

    Ok(())
}
