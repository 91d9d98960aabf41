//! Configuration management.
//!
//! TOML configuration with `${VAR}` environment substitution, `PERIOP_*`
//! overrides, defaults for optional settings and validation on load.
//!
//! # Configuration Structure
//!
//! - [`ApplicationConfig`] - log level, dry run
//! - [`PostgreSQLConfig`] - connection string, pool and statement timeout
//! - [`SchemaConfig`] - CDM and source schema names
//! - [`ProcessingConfig`] - page size, key base, concept precedence
//! - [`VocabularyConfig`] - source vocabularies per concept domain
//! - [`TableSelectionConfig`] - entities to ingest, in order
//! - [`ScriptConfig`] - entities populated by SQL scripts
//! - [`LoggingConfig`] - file logging
//!
//! # Example Configuration
//!
//! ```toml
//! [database]
//! connection_string = "${PERIOP_DATABASE_URL}"
//!
//! [schemas]
//! omop = "omop"
//! preop = "preop"
//! intraop = "intraop"
//! postop = "postop"
//!
//! [processing]
//! batch_size = 10000
//!
//! [etl]
//! tables = ["visit_occurrence", "condition_occurrence", "observation", "measurement"]
//!
//! [[scripts]]
//! target = "visit_occurrence"
//! files = ["visit_occurrence/insert.sql"]
//! base_path = "sql"
//! ```

pub mod loader;
pub mod schema;
pub mod secret;

pub use loader::{load_config, parse_config};
pub use schema::{
    ApplicationConfig, EtlConfig, LoggingConfig, PostgreSQLConfig, ProcessingConfig,
    SchemaConfig, ScriptConfig, TableSelectionConfig, VocabularyConfig, DEFAULT_TABLES,
};
pub use secret::{redact_connection_string, secret_string, SecretString, SecretValue};
