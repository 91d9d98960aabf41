//! Job orchestration
//!
//! An [`EtlJob`] drives one [`JobSpec`] through its lifecycle:
//!
//! ```text
//! Idle ──initialize──▶ Initialized ──process──▶ Processing ──finalize──▶ Finalized
//!                          │                         │
//!                          └──────────▶ Failed ◀─────┘
//! ```
//!
//! - **initialize** truncates the target and creates the scratch table in one
//!   unit of work, then builds the concept lookups and the subject and visit
//!   indexes the sources link against.
//! - **process** walks every source in order: cursor, fetch, transform, load.
//!   Each window's load runs in its own unit of work and is rolled back if it
//!   fails; the first error fails the job and skips the remaining sources.
//! - **finalize** drops scratch objects and reports the [`JobSummary`].
//!
//! [`EtlJob::execute`] runs all three and, on failure, still rolls back and
//! drops scratch objects before returning the original error.

pub mod spec;
pub mod summary;

pub use spec::{JobSpec, SourceDescriptor};
pub use summary::{JobSummary, RunSummary};

use crate::adapters::store::RelationalStore;
use crate::config::EtlConfig;
use crate::core::concept::{ConceptDomain, ConceptLookup, ConceptLookups};
use crate::core::cursor::{AdvancePolicy, BatchCursor};
use crate::core::keys::RunCounters;
use crate::core::linkage::{SubjectIndex, VisitIndex};
use crate::core::load::Loader;
use crate::core::transform::{ConceptPrecedence, TransformContext, TransformStrategy};
use crate::domain::{EtlError, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Initialized,
    Processing,
    Finalized,
    Failed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Idle => "idle",
            JobState::Initialized => "initialized",
            JobState::Processing => "processing",
            JobState::Finalized => "finalized",
            JobState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Run-wide settings every job shares
#[derive(Debug, Clone)]
pub struct JobSettings {
    /// Schema of the target, `person`, `concept` and `source_to_concept_map`
    pub omop_schema: String,
    /// Default page size
    pub batch_size: u64,
    /// First surrogate key of every job
    pub key_base: i64,
    pub precedence: ConceptPrecedence,
    /// Source vocabularies per concept domain
    pub vocabularies: BTreeMap<ConceptDomain, Vec<String>>,
    /// Read and transform without writing
    pub dry_run: bool,
    /// Suffix of scratch table names
    pub run_tag: String,
}

impl JobSettings {
    /// Settings for one run of `config`
    pub fn from_config(config: &EtlConfig, run_tag: impl Into<String>) -> Self {
        let vocabularies = BTreeMap::from([
            (ConceptDomain::Condition, config.vocabularies.condition.clone()),
            (ConceptDomain::Measurement, config.vocabularies.measurement.clone()),
            (ConceptDomain::Observation, config.vocabularies.observation.clone()),
        ]);
        Self {
            omop_schema: config.schemas.omop.clone(),
            batch_size: config.processing.batch_size,
            key_base: config.processing.key_base,
            precedence: config.processing.concept_precedence,
            vocabularies,
            dry_run: config.application.dry_run,
            run_tag: run_tag.into(),
        }
    }

    /// A random scratch suffix
    pub fn random_run_tag() -> String {
        let mut tag = uuid::Uuid::new_v4().simple().to_string();
        tag.truncate(8);
        tag
    }

    fn vocabularies_for(&self, domain: ConceptDomain) -> &[String] {
        self.vocabularies
            .get(&domain)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// State owned by a job between initialize and finalize
struct RunContext {
    lookups: ConceptLookups,
    subjects: SubjectIndex,
    visits: Option<VisitIndex>,
    counters: RunCounters,
}

/// One ETL job
pub struct EtlJob {
    spec: JobSpec,
    settings: JobSettings,
    loader: Loader,
    state: JobState,
    run: Option<RunContext>,
    started: Option<Instant>,
}

impl EtlJob {
    /// Creates a job after validating its spec
    ///
    /// # Errors
    ///
    /// Returns [`EtlError::Configuration`] if the spec is invalid.
    pub fn new(spec: JobSpec, settings: JobSettings) -> Result<Self> {
        spec.validate()?;
        let loader = Loader::new(
            spec.target.clone(),
            spec.columns.clone(),
            spec.load.clone(),
            &settings.run_tag,
            settings.dry_run,
        )?;
        Ok(Self {
            spec,
            settings,
            loader,
            state: JobState::Idle,
            run: None,
            started: None,
        })
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn spec(&self) -> &JobSpec {
        &self.spec
    }

    pub fn loader(&self) -> &Loader {
        &self.loader
    }

    /// Runs initialize, process and finalize
    ///
    /// On failure the open unit of work is rolled back and scratch objects
    /// are dropped; a cleanup error is logged and the original error returned.
    pub async fn execute(&mut self, store: &mut dyn RelationalStore) -> Result<JobSummary> {
        let outcome = match self.initialize(store).await {
            Ok(()) => self.process(store).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(()) => self.finalize(store).await,
            Err(e) => {
                crate::log_error_with_context!(&e, self.spec.name.as_str());
                self.abort(store).await;
                Err(e)
            }
        }
    }

    /// Truncates the target, creates scratch objects and builds lookups
    pub async fn initialize(&mut self, store: &mut dyn RelationalStore) -> Result<()> {
        self.expect_state(JobState::Idle, "initialize")?;
        self.started = Some(Instant::now());
        crate::log_job_start!(self.spec.target, self.spec.sources.len());

        match self.build_run_context(store).await {
            Ok(run) => {
                self.run = Some(run);
                self.state = JobState::Initialized;
                Ok(())
            }
            Err(e) => {
                self.state = JobState::Failed;
                Err(e)
            }
        }
    }

    async fn build_run_context(&self, store: &mut dyn RelationalStore) -> Result<RunContext> {
        store.begin().await?;
        let prepared = self.loader.prepare(store).await;
        finish_unit_of_work(store, prepared).await?;

        let mut lookups = ConceptLookups::new();
        for domain in self.spec.domains() {
            let lookup = ConceptLookup::build(
                store,
                &self.settings.omop_schema,
                domain,
                self.settings.vocabularies_for(domain),
                self.settings.batch_size,
            )
            .await?;
            lookups.insert(lookup);
        }

        let subjects = if self.spec.needs_subjects() {
            SubjectIndex::build(store, &self.settings.omop_schema, self.settings.batch_size).await?
        } else {
            SubjectIndex::default()
        };

        let visits = if self.spec.needs_visits() {
            Some(VisitIndex::build(store, &self.settings.omop_schema, self.settings.batch_size).await?)
        } else {
            None
        };

        Ok(RunContext {
            lookups,
            subjects,
            visits,
            counters: RunCounters::new(self.settings.key_base),
        })
    }

    /// Processes every source to exhaustion
    pub async fn process(&mut self, store: &mut dyn RelationalStore) -> Result<()> {
        self.expect_state(JobState::Initialized, "process")?;
        self.state = JobState::Processing;

        let spec = &self.spec;
        let settings = &self.settings;
        let loader = &self.loader;
        let Some(run) = self.run.as_mut() else {
            self.state = JobState::Failed;
            return Err(EtlError::State("job has no run context".to_string()));
        };

        for source in &spec.sources {
            let Some(strategy) = spec.strategy(&source.id) else {
                self.state = JobState::Failed;
                return Err(EtlError::Configuration(format!(
                    "no transform strategy for source '{}'",
                    source.id
                )));
            };
            let step = SourceStep {
                spec,
                settings,
                loader,
                source,
                strategy,
            };
            if let Err(e) = step.run(store, run).await {
                tracing::error!(
                    target_table = %spec.target,
                    source = %source.id,
                    error = %e,
                    "Source failed, skipping remaining sources"
                );
                self.state = JobState::Failed;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Drops scratch objects and reports the summary
    pub async fn finalize(&mut self, store: &mut dyn RelationalStore) -> Result<JobSummary> {
        self.expect_state(JobState::Processing, "finalize")?;

        if let Err(e) = self.loader.cleanup(store).await {
            self.state = JobState::Failed;
            return Err(e);
        }

        let summary = self.summary();
        self.run = None;
        self.state = JobState::Finalized;
        summary.log_summary();
        Ok(summary)
    }

    /// Releases the store after a failure; errors are logged, not returned
    pub async fn abort(&mut self, store: &mut dyn RelationalStore) {
        if let Err(e) = store.rollback().await {
            tracing::warn!(target_table = %self.spec.target, error = %e, "Rollback failed");
        }
        if let Err(e) = self.loader.cleanup(store).await {
            tracing::warn!(
                target_table = %self.spec.target,
                error = %e,
                "Cleanup after failure failed"
            );
        }
        self.run = None;
        self.state = JobState::Failed;
    }

    fn summary(&self) -> JobSummary {
        let mut summary = JobSummary::new(self.spec.name.clone(), self.spec.target.clone());
        if let Some(run) = &self.run {
            summary.rows_fetched = run.counters.rows_fetched;
            summary.rows_ingested = run.counters.rows_emitted;
            summary.rows_excluded = run.counters.rows_excluded;
            summary.windows = run.counters.windows;
        }
        summary.dry_run = self.settings.dry_run;
        summary.with_duration(self.started.map(|s| s.elapsed()).unwrap_or_default())
    }

    fn expect_state(&self, expected: JobState, operation: &str) -> Result<()> {
        if self.state != expected {
            return Err(EtlError::State(format!(
                "cannot {operation} job '{}' in state {}",
                self.spec.name, self.state
            )));
        }
        Ok(())
    }
}

/// Commits on success, rolls back on failure
async fn finish_unit_of_work<T>(store: &mut dyn RelationalStore, outcome: Result<T>) -> Result<T> {
    match outcome {
        Ok(value) => {
            store.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = store.rollback().await {
                tracing::warn!(error = %rollback, "Rollback failed");
            }
            Err(e)
        }
    }
}

/// One source of a job being processed
struct SourceStep<'a> {
    spec: &'a JobSpec,
    settings: &'a JobSettings,
    loader: &'a Loader,
    source: &'a SourceDescriptor,
    strategy: &'a TransformStrategy,
}

impl SourceStep<'_> {
    async fn run(&self, store: &mut dyn RelationalStore, run: &mut RunContext) -> Result<()> {
        let page_size = self.source.page_size.unwrap_or(self.settings.batch_size);
        let cursor = BatchCursor::open(store, &self.source.query, page_size).await?;
        let total = cursor.total();
        tracing::info!(
            target_table = %self.spec.target,
            source = %self.source.id,
            total,
            page_size,
            "Processing source"
        );

        let mut emitted_total = 0u64;
        for window in cursor {
            let batch = store.fetch_window(&self.source.query, window).await?;
            let fetched = batch.len();

            let mut ctx =
                TransformContext::new(&run.lookups, &run.subjects, self.settings.precedence);
            if let Some(visits) = &run.visits {
                ctx = ctx.with_visits(visits);
            }
            let transformed =
                self.strategy
                    .transform(batch, &ctx, &mut run.counters.keys, &self.spec.key_column)?;
            if self.spec.advance == AdvancePolicy::FixedPage {
                run.counters
                    .keys
                    .skip(page_size.saturating_sub(transformed.len() as u64));
            }

            store.begin().await?;
            let loaded = self.loader.load(store, &transformed).await;
            let written = finish_unit_of_work(store, loaded).await?;

            emitted_total += written;
            run.counters.rows_fetched += fetched as u64;
            run.counters.rows_emitted += written;
            run.counters.rows_excluded += transformed.excluded;
            run.counters.windows += 1;
            crate::log_window_processed!(
                self.source.id,
                window.offset,
                window.limit,
                fetched,
                transformed.len(),
                emitted_total
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryStore;
    use crate::adapters::store::SourceQuery;
    use crate::core::load::LoadMode;
    use crate::core::transform::{FieldRule, RowMapping};
    use crate::domain::{ColumnDef, ColumnType, Row, TableName, Value};

    fn settings() -> JobSettings {
        JobSettings {
            omop_schema: "omop".to_string(),
            batch_size: 2,
            key_base: 1,
            precedence: ConceptPrecedence::default(),
            vocabularies: BTreeMap::new(),
            dry_run: false,
            run_tag: "test".to_string(),
        }
    }

    fn spec(advance: AdvancePolicy) -> JobSpec {
        let query = SourceQuery::new(
            TableName::new("src.items").unwrap(),
            vec![
                ColumnDef::new("id", ColumnType::Integer),
                ColumnDef::new("name", ColumnType::Text),
            ],
        )
        .keyed_by(["id"]);
        let source = SourceDescriptor::new(query).unwrap();
        let strategy = TransformStrategy::Row(
            RowMapping::new().field("item_name", FieldRule::Column("name".to_string())),
        );
        JobSpec {
            name: "item".to_string(),
            target: TableName::new("omop.item").unwrap(),
            key_column: "item_id".to_string(),
            columns: vec![
                ColumnDef::new("item_id", ColumnType::Integer),
                ColumnDef::new("item_name", ColumnType::Text),
            ],
            advance,
            load: LoadMode::Append,
            strategies: BTreeMap::from([(source.id.clone(), strategy)]),
            sources: vec![source],
        }
    }

    async fn store(items: usize) -> MemoryStore {
        let store = MemoryStore::new();
        store
            .create_table(
                "src.items",
                vec![
                    ColumnDef::new("id", ColumnType::Integer),
                    ColumnDef::new("name", ColumnType::Text),
                ],
            )
            .await
            .unwrap();
        store
            .insert_rows(
                "src.items",
                (1..=items as i64)
                    .map(|i| Row::new().with("id", i).with("name", format!("item {i}")))
                    .collect(),
            )
            .await
            .unwrap();
        store
            .create_table(
                "omop.item",
                vec![
                    ColumnDef::new("item_id", ColumnType::Integer),
                    ColumnDef::new("item_name", ColumnType::Text),
                ],
            )
            .await
            .unwrap();
        store
    }

    fn keys(rows: &[Row]) -> Vec<i64> {
        rows.iter().filter_map(|r| r.get("item_id").as_i64()).collect()
    }

    #[tokio::test]
    async fn test_execute_walks_every_window() {
        let mut store = store(5).await;
        let mut job = EtlJob::new(spec(AdvancePolicy::EmittedRowCount), settings()).unwrap();

        let summary = job.execute(&mut store).await.unwrap();
        assert_eq!(job.state(), JobState::Finalized);
        assert_eq!(summary.rows_ingested, 5);
        assert_eq!(summary.windows, 3);
        assert_eq!(keys(&store.rows("omop.item").await), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_fixed_page_keys_are_page_aligned() {
        let mut store = store(3).await;
        let mut spec = spec(AdvancePolicy::FixedPage);
        let strategy = spec.strategies.values().next().cloned().unwrap();
        let again = spec.sources[0]
            .clone()
            .with_id(crate::domain::SourceId::new("items_again").unwrap());
        spec.strategies.insert(again.id.clone(), strategy);
        spec.sources.push(again);
        let mut job = EtlJob::new(spec, settings()).unwrap();

        job.execute(&mut store).await.unwrap();
        // the short second window of each source still reserves a full page
        assert_eq!(
            keys(&store.rows("omop.item").await),
            vec![1, 2, 3, 5, 6, 7]
        );
    }

    #[tokio::test]
    async fn test_state_machine_rejects_out_of_order_calls() {
        let mut store = store(1).await;
        let mut job = EtlJob::new(spec(AdvancePolicy::EmittedRowCount), settings()).unwrap();

        assert!(matches!(job.process(&mut store).await, Err(EtlError::State(_))));
        job.initialize(&mut store).await.unwrap();
        assert_eq!(job.state(), JobState::Initialized);
        assert!(matches!(job.initialize(&mut store).await, Err(EtlError::State(_))));
        job.process(&mut store).await.unwrap();
        assert_eq!(job.state(), JobState::Processing);
        job.finalize(&mut store).await.unwrap();
        assert_eq!(job.state(), JobState::Finalized);
    }

    #[tokio::test]
    async fn test_failed_window_is_rolled_back() {
        let mut store = store(3).await;
        store.fail_writes_to("omop.item").await.unwrap();
        let mut job = EtlJob::new(spec(AdvancePolicy::EmittedRowCount), settings()).unwrap();

        let err = job.execute(&mut store).await.unwrap_err();
        assert!(err.to_string().contains("injected write failure"));
        assert_eq!(job.state(), JobState::Failed);
        assert!(!store.in_transaction().await);
    }

    #[tokio::test]
    async fn test_missing_source_fails_initialized_job() {
        let mut store = store(0).await;
        let mut spec = spec(AdvancePolicy::EmittedRowCount);
        spec.sources[0].query.relation = TableName::new("src.missing").unwrap();
        let strategy = spec.strategies.values().next().cloned().unwrap();
        spec.strategies.clear();
        spec.sources[0].id = crate::domain::SourceId::new("src.missing").unwrap();
        spec.strategies.insert(spec.sources[0].id.clone(), strategy);

        let mut job = EtlJob::new(spec, settings()).unwrap();
        let err = job.execute(&mut store).await.unwrap_err();
        assert!(matches!(err, EtlError::Store(_)));
        assert_eq!(job.state(), JobState::Failed);
    }

    #[tokio::test]
    async fn test_dry_run_leaves_target_untouched() {
        let mut store = store(3).await;
        store
            .insert_rows(
                "omop.item",
                vec![Row::new().with("item_id", 99i64).with("item_name", Value::from("kept"))],
            )
            .await
            .unwrap();
        let mut settings = settings();
        settings.dry_run = true;
        let mut job = EtlJob::new(spec(AdvancePolicy::EmittedRowCount), settings).unwrap();

        let summary = job.execute(&mut store).await.unwrap();
        assert!(summary.dry_run);
        assert_eq!(summary.rows_ingested, 3);
        assert_eq!(keys(&store.rows("omop.item").await), vec![99]);
    }
}
