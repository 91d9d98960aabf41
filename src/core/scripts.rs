//! SQL script jobs
//!
//! Entities without a declarative mapping are populated by SQL files. A
//! [`ScriptJob`] drops the configured views, truncates its target and runs
//! every file after placeholder substitution, all in one unit of work.

use crate::adapters::store::{RelationalStore, Statement};
use crate::config::{SchemaConfig, ScriptConfig};
use crate::core::job::JobSummary;
use crate::domain::{EtlError, Result, TableName};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Instant;

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{([A-Z][A-Z0-9_]*_SCHEMA)\}").expect("placeholder regex is valid")
    })
}

/// Replaces `{OMOP_SCHEMA}`-style placeholders with configured schema names
///
/// # Errors
///
/// Returns [`EtlError::Configuration`] naming the first placeholder that has
/// no configured value.
pub fn substitute_placeholders(sql: &str, schemas: &SchemaConfig) -> Result<String> {
    let values = schemas.placeholders();
    let mut missing = None;
    let substituted = placeholder_pattern().replace_all(sql, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        match values.iter().find(|(key, _)| *key == name) {
            Some((_, value)) => (*value).to_string(),
            None => {
                missing.get_or_insert_with(|| name.to_string());
                caps[0].to_string()
            }
        }
    });
    match missing {
        Some(name) => Err(EtlError::Configuration(format!(
            "unresolved placeholder {{{name}}} in script"
        ))),
        None => Ok(substituted.into_owned()),
    }
}

/// One entity populated by SQL files
#[derive(Debug, Clone)]
pub struct ScriptJob {
    target: TableName,
    views: Vec<TableName>,
    files: Vec<PathBuf>,
    schemas: SchemaConfig,
    dry_run: bool,
}

impl ScriptJob {
    /// Builds the job for one `[[scripts]]` entry
    pub fn new(config: &ScriptConfig, schemas: &SchemaConfig, dry_run: bool) -> Result<Self> {
        let qualify = |name: &str| {
            TableName::qualified(&schemas.omop, name).map_err(EtlError::Configuration)
        };
        Ok(Self {
            target: qualify(&config.target)?,
            views: config
                .drop_views
                .iter()
                .map(|v| qualify(v))
                .collect::<Result<_>>()?,
            files: config.resolved_files(),
            schemas: schemas.clone(),
            dry_run,
        })
    }

    pub fn target(&self) -> &TableName {
        &self.target
    }

    /// Reads and substitutes every script before anything is executed
    fn load_scripts(&self) -> Result<Vec<(PathBuf, String)>> {
        self.files
            .iter()
            .map(|path| {
                let sql = read_script(path)?;
                let sql = substitute_placeholders(&sql, &self.schemas)
                    .map_err(|e| EtlError::Configuration(format!("{}: {e}", path.display())))?;
                Ok((path.clone(), sql))
            })
            .collect()
    }

    /// Runs the job
    ///
    /// # Errors
    ///
    /// Returns [`EtlError::Configuration`] for an unreadable script or an
    /// unresolved placeholder, [`EtlError::Script`] when a script fails in
    /// the store. Nothing is committed on failure.
    pub async fn execute(&self, store: &mut dyn RelationalStore) -> Result<JobSummary> {
        let started = Instant::now();
        let name = self.target.table().to_string();
        crate::log_job_start!(self.target, self.files.len());

        let scripts = self.load_scripts()?;
        if self.dry_run {
            for (path, _) in &scripts {
                tracing::info!(script = %path.display(), "DRY RUN: Would run script");
            }
            let mut summary = JobSummary::new(name, self.target.clone());
            summary.dry_run = true;
            return Ok(summary.with_duration(started.elapsed()));
        }

        store.begin().await?;
        let outcome = self.run_scripts(store, &scripts).await;
        match outcome {
            Ok(()) => store.commit().await?,
            Err(e) => {
                if let Err(rollback) = store.rollback().await {
                    tracing::warn!(error = %rollback, "Rollback failed");
                }
                return Err(e);
            }
        }

        let summary = JobSummary::new(name, self.target.clone()).with_duration(started.elapsed());
        summary.log_summary();
        Ok(summary)
    }

    async fn run_scripts(
        &self,
        store: &mut dyn RelationalStore,
        scripts: &[(PathBuf, String)],
    ) -> Result<()> {
        for view in &self.views {
            store.run_statement(&Statement::DropView(view.clone())).await?;
        }
        store
            .run_statement(&Statement::Truncate(self.target.clone()))
            .await?;

        for (path, sql) in scripts {
            tracing::debug!(script = %path.display(), "Running script");
            store
                .run_statement(&Statement::Raw(sql.clone()))
                .await
                .map_err(|e| EtlError::Script(format!("{}: {e}", path.display())))?;
        }
        Ok(())
    }
}

fn read_script(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        EtlError::Configuration(format!("cannot read script {}: {e}", path.display()))
    })
}
