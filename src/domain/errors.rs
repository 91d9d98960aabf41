//! Domain error types
//!
//! This module defines the error hierarchy for periop-omop.
//! Errors are domain-specific and don't expose third-party driver types.

use thiserror::Error;

/// Main error type
///
/// This is the primary error type used throughout the application.
/// Store failures are wrapped in [`StoreError`] so the originating message is
/// preserved when a job fails.
#[derive(Debug, Error)]
pub enum EtlError {
    /// Configuration-related errors (missing mapping, env value, invalid job spec)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Relational store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Transformation errors (malformed source cell for a declared type)
    #[error("Transform error: {0}")]
    Transform(String),

    /// Loader errors (staged merge produced no rows, etc.)
    #[error("Load error: {0}")]
    Load(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// SQL script job errors
    #[error("Script error: {0}")]
    Script(String),

    /// Job state machine misuse
    #[error("Job state error: {0}")]
    State(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// Generic errors with context
    #[error("{0}")]
    Other(String),
}

/// Relational store errors
///
/// Raised by [`crate::adapters::store::RelationalStore`] implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to connect or to obtain a pooled connection
    #[error("Failed to connect to store: {0}")]
    ConnectionFailed(String),

    /// A read query failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// A statement failed
    #[error("Statement failed: {0}")]
    StatementFailed(String),

    /// A bulk append failed (constraint violation, type mismatch)
    #[error("Insert into {table} failed: {message}")]
    InsertFailed { table: String, message: String },

    /// Unit-of-work boundary failure
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// A returned cell could not be decoded into the declared column type
    #[error("Failed to decode column '{column}': {message}")]
    Decode { column: String, message: String },

    /// The relation does not exist
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    /// The store cannot evaluate this query shape
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

impl EtlError {
    /// Whether this error was raised before any row could be processed
    pub fn is_configuration(&self) -> bool {
        matches!(self, EtlError::Configuration(_) | EtlError::Validation(_))
    }

    /// Whether this error originates from store connectivity
    pub fn is_connection(&self) -> bool {
        matches!(self, EtlError::Store(StoreError::ConnectionFailed(_)))
    }
}

impl From<std::io::Error> for EtlError {
    fn from(err: std::io::Error) -> Self {
        EtlError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for EtlError {
    fn from(err: serde_json::Error) -> Self {
        EtlError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for EtlError {
    fn from(err: toml::de::Error) -> Self {
        EtlError::Configuration(format!("TOML parse error: {err}"))
    }
}
