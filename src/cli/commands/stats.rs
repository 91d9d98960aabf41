//! Stats command implementation
//!
//! Prints the row counts of the configured tables as JSON.

use super::{open_store, EXIT_CONFIGURATION, EXIT_FATAL, EXIT_SUCCESS};
use crate::config::load_config;
use crate::core::stats::collect_statistics;
use clap::Args;

/// Arguments for the stats command
#[derive(Args, Debug)]
pub struct StatsArgs {}

impl StatsArgs {
    /// Execute the stats command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        let config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load configuration: {e}");
                return Ok(EXIT_CONFIGURATION);
            }
        };

        let mut store = match open_store(&config).await {
            Ok(store) => store,
            Err(code) => return Ok(code),
        };

        match collect_statistics(&mut store, &config.schemas.omop, &config.etl.tables).await {
            Ok(statistics) => {
                println!("{}", statistics.to_json()?);
                Ok(EXIT_SUCCESS)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to collect statistics");
                eprintln!("Failed to collect statistics: {e}");
                Ok(EXIT_FATAL)
            }
        }
    }
}
