//! ETL command implementation
//!
//! This module implements the `etl` command: it plans the selected tables,
//! runs their jobs in order and prints the final statistics.

use super::{open_store, EXIT_CONFIGURATION, EXIT_FATAL, EXIT_SUCCESS};
use crate::config::load_config;
use crate::core::runner::EtlRunner;
use clap::Args;

/// Arguments for the etl command
#[derive(Args, Debug)]
pub struct EtlArgs {
    /// Tables to ingest, in order (comma-separated); overrides `etl.tables`
    #[arg(long, value_delimiter = ',')]
    pub tables: Vec<String>,

    /// Dry run mode - read and transform without writing
    #[arg(long)]
    pub dry_run: bool,
}

impl EtlArgs {
    /// Execute the etl command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        tracing::info!("Starting etl command");

        let mut config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load configuration");
                eprintln!("Failed to load configuration: {e}");
                return Ok(EXIT_CONFIGURATION);
            }
        };

        if self.dry_run {
            tracing::info!("Enabling dry-run mode from CLI");
            config.application.dry_run = true;
        }

        let tables: Vec<String> = self
            .tables
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        let runner = EtlRunner::new(config.clone());
        let selected = runner.selected_tables(Some(tables.as_slice()));
        if let Err(e) = runner.plan(&selected) {
            tracing::error!(error = %e, "Invalid job selection");
            eprintln!("{e}");
            return Ok(EXIT_CONFIGURATION);
        }

        println!("OMOP tables to be executed: {}", selected.join(", "));
        if config.application.dry_run {
            println!("DRY RUN MODE - No data will be written to the database");
        }
        println!();

        let mut store = match open_store(&config).await {
            Ok(store) => store,
            Err(code) => return Ok(code),
        };

        let report = match runner.run(&mut store, Some(selected.as_slice())).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(error = %e, "ETL failed");
                eprintln!("ETL failed: {e}");
                return Ok(if e.is_configuration() {
                    EXIT_CONFIGURATION
                } else {
                    EXIT_FATAL
                });
            }
        };

        println!("ETL Summary:");
        for job in &report.summary.jobs {
            println!(
                "  {}: {} ingested, {} excluded ({:.2}s)",
                job.name,
                job.rows_ingested,
                job.rows_excluded,
                job.duration.as_secs_f64()
            );
        }
        println!("  Duration: {:.2}s", report.summary.duration.as_secs_f64());
        println!();
        println!("{}", report.statistics.to_json()?);

        Ok(EXIT_SUCCESS)
    }
}
