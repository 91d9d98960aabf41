//! CLI interface and argument parsing
//!
//! This module provides the command-line interface for periop-omop using clap.

pub mod commands;

use clap::{Parser, Subcommand};

/// Periop-OMOP - Perioperative to OMOP CDM ETL Tool
#[derive(Parser, Debug)]
#[command(name = "periop-omop")]
#[command(version, about, long_about = None)]
#[command(author = "Periop-OMOP Contributors")]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "periop-omop.toml", env = "PERIOP_CONFIG")]
    pub config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "PERIOP_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the ETL for the configured (or selected) tables
    Etl(commands::etl::EtlArgs),

    /// Print row counts of the configured tables as JSON
    Stats(commands::stats::StatsArgs),

    /// Validate configuration file and job definitions
    ValidateConfig(commands::validate::ValidateArgs),
}
