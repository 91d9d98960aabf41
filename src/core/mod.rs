//! Core ETL engine
//!
//! # Modules
//!
//! - [`cursor`] - windowed pagination over a source relation
//! - [`concept`] - source code to concept id lookups
//! - [`linkage`] - source patient identifier to `person_id`
//! - [`keys`] - surrogate key allocation and run counters
//! - [`transform`] - row and EAV transformers and their mapping rules
//! - [`load`] - append and staged-merge loading
//! - [`job`] - the job state machine and its summaries
//! - [`entities`] - built-in jobs for the CDM entities
//! - [`scripts`] - entities populated by SQL scripts
//! - [`stats`] - final row counts
//! - [`runner`] - ordered execution of a whole run
//!
//! # Job Workflow
//!
//! 1. **Initialize**: truncate the target, create scratch objects, build lookups
//! 2. **Process**: for every source, count, then fetch, transform and load
//!    window by window
//! 3. **Finalize**: drop scratch objects and report the summary
//!
//! # Example
//!
//! ```rust,no_run
//! use periop_omop::adapters::postgresql::{PostgresClient, PostgresStore};
//! use periop_omop::config::load_config;
//! use periop_omop::core::runner::EtlRunner;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("periop-omop.toml")?;
//! let client = PostgresClient::new(config.database.clone())?;
//! let mut store = PostgresStore::connect(&client).await?;
//!
//! let runner = EtlRunner::new(config);
//! let report = runner.run(&mut store, None).await?;
//!
//! println!("Ingested: {}", report.summary.total_ingested());
//! println!("{}", report.statistics.to_json()?);
//! # Ok(())
//! # }
//! ```

pub mod concept;
pub mod cursor;
pub mod entities;
pub mod job;
pub mod keys;
pub mod linkage;
pub mod load;
pub mod runner;
pub mod scripts;
pub mod stats;
pub mod transform;
