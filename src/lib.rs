// Periop-OMOP - Perioperative to OMOP CDM ETL Tool
// Copyright (c) 2025 Periop-OMOP Contributors
// Licensed under the MIT License

//! # Periop-OMOP - Perioperative to OMOP CDM ETL
//!
//! Periop-OMOP reads perioperative source tables (pre-operative assessments,
//! intra-operative vitals, post-operative labs and discharges) from
//! PostgreSQL and loads them into OMOP Common Data Model tables.
//!
//! ## Overview
//!
//! - **Extracting** source relations window by window with a stable ordering
//! - **Transforming** rows 1:1 or exploding wide rows into one record per
//!   attribute, resolving patients and concept ids on the way
//! - **Loading** by bulk append, or by staging into a scratch table and
//!   merging with visit resolution
//! - **Scripting** entities that are defined as SQL files
//!
//! ## Architecture
//!
//! - [`cli`] - Command-line interface and argument parsing
//! - [`core`] - ETL engine (cursor, transformers, loader, jobs, runner)
//! - [`adapters`] - Relational store trait, PostgreSQL and in-memory stores
//! - [`domain`] - Identifiers, values, rows and errors
//! - [`config`] - Configuration management
//! - [`logging`] - Structured logging
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use periop_omop::adapters::postgresql::{PostgresClient, PostgresStore};
//! use periop_omop::config::load_config;
//! use periop_omop::core::runner::EtlRunner;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = load_config("periop-omop.toml")?;
//!     let client = PostgresClient::new(config.database.clone())?;
//!     let mut store = PostgresStore::connect(&client).await?;
//!
//!     let report = EtlRunner::new(config).run(&mut store, None).await?;
//!     println!("Ingested {} rows", report.summary.total_ingested());
//!     Ok(())
//! }
//! ```
//!
//! ## Testing Without PostgreSQL
//!
//! [`adapters::memory::MemoryStore`] evaluates the same typed queries and
//! statements in memory, staged merges included:
//!
//! ```rust,no_run
//! use periop_omop::adapters::memory::MemoryStore;
//! use periop_omop::core::job::{EtlJob, JobSettings};
//!
//! # async fn example(spec: periop_omop::core::job::JobSpec, settings: JobSettings)
//! #     -> periop_omop::domain::Result<()> {
//! let mut store = MemoryStore::new();
//! let mut job = EtlJob::new(spec, settings)?;
//! let summary = job.execute(&mut store).await?;
//! println!("{} rows", summary.rows_ingested);
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Every fallible operation returns [`domain::Result`] with an
//! [`domain::EtlError`]; store failures keep the originating message.

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod logging;
