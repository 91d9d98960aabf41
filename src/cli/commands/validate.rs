//! Validate config command implementation
//!
//! This module implements the `validate-config` command: the configuration
//! file is loaded and validated, then every configured table is resolved
//! into a job so mapping errors surface without touching the database.

use super::{EXIT_CONFIGURATION, EXIT_SUCCESS};
use crate::config::{load_config, redact_connection_string};
use crate::core::runner::EtlRunner;
use clap::Args;

/// Arguments for the validate-config command
#[derive(Args, Debug)]
pub struct ValidateArgs {}

impl ValidateArgs {
    /// Execute the validate-config command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        tracing::info!(config_path = %config_path, "Validating configuration");

        println!("Validating configuration file: {config_path}");
        println!();

        let config = match load_config(config_path) {
            Ok(c) => {
                println!("Configuration file loaded successfully");
                c
            }
            Err(e) => {
                println!("Failed to load configuration file");
                println!("   Error: {e}");
                return Ok(EXIT_CONFIGURATION);
            }
        };

        let runner = EtlRunner::new(config.clone());
        if let Err(e) = runner.plan(&config.etl.tables) {
            println!("Job definitions are invalid");
            println!("   Error: {e}");
            return Ok(EXIT_CONFIGURATION);
        }

        println!("Configuration is valid");
        println!();
        println!("Configuration Summary:");
        println!("  Log Level: {}", config.application.log_level);
        println!("  Dry Run: {}", config.application.dry_run);
        println!(
            "  PostgreSQL Connection: {}",
            redact_connection_string(&config.database.connection_string)
        );
        println!("  Max Connections: {}", config.database.max_connections);
        println!("  OMOP Schema: {}", config.schemas.omop);
        println!(
            "  Source Schemas: {}, {}, {}",
            config.schemas.preop, config.schemas.intraop, config.schemas.postop
        );
        println!("  Batch Size: {}", config.processing.batch_size);
        println!("  Concept Precedence: {:?}", config.processing.concept_precedence);
        println!("  Tables: {}", config.etl.tables.join(", "));
        println!("  Script Jobs: {}", config.scripts.len());
        println!();
        Ok(EXIT_SUCCESS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn config_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_valid_config() {
        let file = config_file("[database]\nconnection_string = \"postgresql://etl@localhost/cdm\"\n");
        let code = ValidateArgs {}
            .execute(file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(code, EXIT_SUCCESS);
    }

    #[tokio::test]
    async fn test_table_without_job() {
        let file = config_file(
            "[database]\nconnection_string = \"postgresql://etl@localhost/cdm\"\n\n[etl]\ntables = [\"visit_occurrence\"]\n",
        );
        let code = ValidateArgs {}
            .execute(file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(code, EXIT_CONFIGURATION);
    }
}
