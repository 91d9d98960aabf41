//! Job and run summaries
//!
//! This module defines the structures reported after each job and after a
//! whole ETL run.

use crate::domain::TableName;
use std::time::Duration;

/// Summary of one job
#[derive(Debug, Clone)]
pub struct JobSummary {
    /// Entity name
    pub name: String,

    /// Target table
    pub target: TableName,

    /// Source rows read
    pub rows_fetched: u64,

    /// Rows written to the target
    pub rows_ingested: u64,

    /// Source rows dropped because their subject did not join
    pub rows_excluded: u64,

    /// Windows processed across all sources
    pub windows: u64,

    /// Wall time of the job
    pub duration: Duration,

    /// Whether writes were skipped
    pub dry_run: bool,
}

impl JobSummary {
    /// Create an empty summary for `target`
    pub fn new(name: impl Into<String>, target: TableName) -> Self {
        Self {
            name: name.into(),
            target,
            rows_fetched: 0,
            rows_ingested: 0,
            rows_excluded: 0,
            windows: 0,
            duration: Duration::from_secs(0),
            dry_run: false,
        }
    }

    /// Set the duration
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Log the summary
    pub fn log_summary(&self) {
        crate::log_job_complete!(
            self.target,
            self.rows_ingested,
            self.rows_excluded,
            self.duration
        );
        if self.dry_run {
            tracing::info!(
                target_table = %self.target,
                rows_fetched = self.rows_fetched,
                "DRY RUN: No rows were written"
            );
        }
    }
}

/// Summary of a whole ETL run
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Completed jobs, in execution order
    pub jobs: Vec<JobSummary>,

    /// Wall time of the run
    pub duration: Duration,
}

impl RunSummary {
    /// Rows written across all jobs
    pub fn total_ingested(&self) -> u64 {
        self.jobs.iter().map(|j| j.rows_ingested).sum()
    }

    /// Rows excluded across all jobs
    pub fn total_excluded(&self) -> u64 {
        self.jobs.iter().map(|j| j.rows_excluded).sum()
    }

    /// The summary of the job named `name`
    pub fn job(&self, name: &str) -> Option<&JobSummary> {
        self.jobs.iter().find(|j| j.name == name)
    }

    /// Log the summary
    pub fn log_summary(&self) {
        tracing::info!(
            jobs = self.jobs.len(),
            rows_ingested = self.total_ingested(),
            rows_excluded = self.total_excluded(),
            duration_secs = self.duration.as_secs_f64(),
            "ETL run completed"
        );
    }
}
