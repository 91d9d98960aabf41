//! Logging and observability
//!
//! Structured logging through `tracing`, with a console layer and an
//! optional rotating JSON file layer.
//!
//! # Example
//!
//! ```no_run
//! use periop_omop::logging::init_logging;
//! use periop_omop::config::LoggingConfig;
//!
//! let config = LoggingConfig::default();
//! let _guard = init_logging("info", &config).expect("Failed to initialize logging");
//!
//! tracing::info!(target_table = "omop.measurement", "Job started");
//! ```

pub mod structured;

pub use structured::{init_logging, LoggingGuard};

/// Log the start of an ETL job
///
/// # Example
///
/// ```no_run
/// use periop_omop::log_job_start;
///
/// log_job_start!("omop.measurement", 9);
/// ```
#[macro_export]
macro_rules! log_job_start {
    ($target:expr, $sources:expr) => {
        tracing::info!(
            target_table = %$target,
            sources = $sources,
            "Starting job"
        );
    };
}

/// Log the completion of an ETL job
///
/// # Example
///
/// ```no_run
/// use periop_omop::log_job_complete;
/// use std::time::Duration;
///
/// log_job_complete!("omop.measurement", 1200u64, 3u64, Duration::from_secs(4));
/// ```
#[macro_export]
macro_rules! log_job_complete {
    ($target:expr, $ingested:expr, $excluded:expr, $duration:expr) => {
        tracing::info!(
            target_table = %$target,
            rows_ingested = $ingested,
            rows_excluded = $excluded,
            duration_ms = $duration.as_millis() as u64,
            "Job completed"
        );
    };
}

/// Log one processed window
///
/// # Example
///
/// ```no_run
/// use periop_omop::log_window_processed;
///
/// log_window_processed!("preop.lab", 2000u64, 1000u64, 1000usize, 1000usize, 10500u64);
/// ```
#[macro_export]
macro_rules! log_window_processed {
    ($source:expr, $offset:expr, $limit:expr, $fetched:expr, $emitted:expr, $total:expr) => {
        tracing::debug!(
            source = %$source,
            offset = $offset,
            limit = $limit,
            fetched = $fetched,
            emitted = $emitted,
            total = $total,
            "Window processed"
        );
    };
}

/// Log an error with context
///
/// # Example
///
/// ```no_run
/// use periop_omop::log_error_with_context;
/// use periop_omop::domain::EtlError;
///
/// let error = EtlError::Configuration("Invalid config".to_string());
/// log_error_with_context!(&error, "Failed to load configuration");
/// ```
#[macro_export]
macro_rules! log_error_with_context {
    ($error:expr, $context:expr) => {
        tracing::error!(
            error = %$error,
            context = $context,
            "Error occurred"
        );
    };
}
