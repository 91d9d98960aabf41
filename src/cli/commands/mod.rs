//! CLI command implementations
//!
//! Every command returns its process exit code:
//! 0 success, 2 configuration error, 4 connection error, 5 fatal job error.

pub mod etl;
pub mod stats;
pub mod validate;

use crate::adapters::postgresql::{PostgresClient, PostgresStore};
use crate::config::EtlConfig;

/// Exit code of a successful command
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code of an invalid configuration or job definition
pub const EXIT_CONFIGURATION: i32 = 2;
/// Exit code when the database cannot be reached
pub const EXIT_CONNECTION: i32 = 4;
/// Exit code of a job failure
pub const EXIT_FATAL: i32 = 5;

/// Opens the single session a command works on
///
/// Prints the failure and returns the exit code to use on error.
pub(crate) async fn open_store(config: &EtlConfig) -> Result<PostgresStore, i32> {
    let client = match PostgresClient::new(config.database.clone()) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "Invalid database configuration");
            eprintln!("Invalid database configuration: {e}");
            return Err(EXIT_CONFIGURATION);
        }
    };
    match PostgresStore::connect(&client).await {
        Ok(store) => {
            tracing::info!(target = %client.connection_string_safe(), "Connected to PostgreSQL");
            Ok(store)
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            eprintln!("Failed to connect to {}: {e}", client.connection_string_safe());
            Err(EXIT_CONNECTION)
        }
    }
}
