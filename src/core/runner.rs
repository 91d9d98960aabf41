//! ETL runner - orchestrates a whole run
//!
//! Resolves the requested entities into jobs (built-in mappings or
//! configured SQL scripts), runs them one after another against a single
//! store session and collects the final statistics.

use crate::adapters::store::RelationalStore;
use crate::config::EtlConfig;
use crate::core::entities::builtin_job;
use crate::core::job::{EtlJob, JobSettings, JobSummary, RunSummary};
use crate::core::scripts::ScriptJob;
use crate::core::stats::{collect_statistics, FinalStatistics};
use crate::domain::{EtlError, Result};
use std::time::Instant;

/// One planned job
pub enum PlannedJob {
    Mapped(Box<EtlJob>),
    Script(ScriptJob),
}

impl PlannedJob {
    async fn execute(&mut self, store: &mut dyn RelationalStore) -> Result<JobSummary> {
        match self {
            PlannedJob::Mapped(job) => job.execute(store).await,
            PlannedJob::Script(job) => job.execute(store).await,
        }
    }
}

/// Outcome of a completed run
#[derive(Debug, Clone)]
pub struct EtlReport {
    pub summary: RunSummary,
    pub statistics: FinalStatistics,
}

/// Runs the configured entities in order
pub struct EtlRunner {
    config: EtlConfig,
    settings: JobSettings,
}

impl EtlRunner {
    /// Creates a runner with a fresh scratch suffix
    pub fn new(config: EtlConfig) -> Self {
        let settings = JobSettings::from_config(&config, JobSettings::random_run_tag());
        Self { config, settings }
    }

    pub fn settings(&self) -> &JobSettings {
        &self.settings
    }

    /// Entities to run: `tables` when given, else the configured list
    pub fn selected_tables(&self, tables: Option<&[String]>) -> Vec<String> {
        match tables {
            Some(tables) if !tables.is_empty() => tables.to_vec(),
            _ => self.config.etl.tables.clone(),
        }
    }

    /// Resolves every entity into a job without touching the store
    ///
    /// A configured script takes precedence over a built-in mapping of the
    /// same entity.
    ///
    /// # Errors
    ///
    /// Returns [`EtlError::Configuration`] for an entity that has neither a
    /// script nor a built-in mapping, or whose job spec is invalid.
    pub fn plan(&self, tables: &[String]) -> Result<Vec<PlannedJob>> {
        tables
            .iter()
            .map(|table| {
                if let Some(script) = self.config.script_for(table) {
                    return Ok(PlannedJob::Script(ScriptJob::new(
                        script,
                        &self.config.schemas,
                        self.settings.dry_run,
                    )?));
                }
                match builtin_job(table, &self.config.schemas)? {
                    Some(spec) => Ok(PlannedJob::Mapped(Box::new(EtlJob::new(
                        spec,
                        self.settings.clone(),
                    )?))),
                    None => Err(EtlError::Configuration(format!(
                        "no job is defined for table '{table}'"
                    ))),
                }
            })
            .collect()
    }

    /// Runs the selected entities and collects their statistics
    ///
    /// Jobs run strictly in order; the first failure aborts the run.
    pub async fn run(
        &self,
        store: &mut dyn RelationalStore,
        tables: Option<&[String]>,
    ) -> Result<EtlReport> {
        let started = Instant::now();
        let tables = self.selected_tables(tables);
        let mut jobs = self.plan(&tables)?;

        tracing::info!(
            tables = %tables.join(","),
            run_tag = %self.settings.run_tag,
            dry_run = self.settings.dry_run,
            "Starting ETL run"
        );

        let mut summary = RunSummary::default();
        for (table, job) in tables.iter().zip(jobs.iter_mut()) {
            tracing::info!(table = %table, "Begin execution");
            let job_summary = job.execute(store).await?;
            summary.jobs.push(job_summary);
        }
        summary.duration = started.elapsed();
        summary.log_summary();

        let statistics = collect_statistics(store, &self.settings.omop_schema, &tables)
            .await?
            .with_timings(&summary);
        Ok(EtlReport {
            summary,
            statistics,
        })
    }
}
