//! Loading transformed batches into target tables
//!
//! The [`Loader`] writes one [`TransformedBatch`] per call. In
//! [`LoadMode::Append`] records go straight into the target. In
//! [`LoadMode::StageThenMerge`] they are written to a run-scoped scratch table
//! first and moved into the target by one set-based insert that resolves
//! provisional linkage keys against already-populated tables.
//!
//! Records are coerced into the declared target column types before they
//! reach the store, so a malformed cell fails the job as a transform error
//! instead of as an opaque store rejection.

use crate::adapters::store::{LinkJoin, MergeSpec, RelationalStore, Statement};
use crate::core::transform::TransformedBatch;
use crate::domain::{ColumnDef, EtlError, Result, Row, TableName};

/// How a job writes its records
#[derive(Debug, Clone, PartialEq)]
pub enum LoadMode {
    /// Bulk-append into the target
    Append,
    /// Stage into a scratch table, then merge with link resolution
    StageThenMerge {
        /// Provisional key columns carried only by the scratch table
        keys: Vec<ColumnDef>,
        links: Vec<LinkJoin>,
    },
}

impl LoadMode {
    pub fn is_staged(&self) -> bool {
        matches!(self, LoadMode::StageThenMerge { .. })
    }

    /// Target columns filled by link resolution rather than by records
    pub fn linked_columns(&self) -> Vec<&str> {
        match self {
            LoadMode::Append => Vec::new(),
            LoadMode::StageThenMerge { links, .. } => {
                links.iter().map(|l| l.target_column.as_str()).collect()
            }
        }
    }
}

/// Scratch table name for `target` in one run
pub fn scratch_name(target: &TableName, run_tag: &str) -> Result<TableName> {
    let schema = target.schema().unwrap_or("public");
    TableName::qualified(schema, &format!("tmp_{}_{}", target.table(), run_tag))
        .map_err(EtlError::Configuration)
}

/// Writes a job's batches into its target
#[derive(Debug, Clone)]
pub struct Loader {
    target: TableName,
    columns: Vec<ColumnDef>,
    mode: LoadMode,
    scratch: Option<TableName>,
    dry_run: bool,
}

impl Loader {
    /// Creates a loader for `target`
    ///
    /// `columns` are the target columns records carry; link target columns
    /// of a staged load are excluded from them.
    pub fn new(
        target: TableName,
        columns: Vec<ColumnDef>,
        mode: LoadMode,
        run_tag: &str,
        dry_run: bool,
    ) -> Result<Self> {
        let scratch = match mode {
            LoadMode::Append => None,
            LoadMode::StageThenMerge { .. } => Some(scratch_name(&target, run_tag)?),
        };
        let linked = mode.linked_columns();
        let columns = columns
            .into_iter()
            .filter(|c| !linked.contains(&c.name.as_str()))
            .collect();
        Ok(Self {
            target,
            columns,
            mode,
            scratch,
            dry_run,
        })
    }

    pub fn target(&self) -> &TableName {
        &self.target
    }

    pub fn scratch(&self) -> Option<&TableName> {
        self.scratch.as_ref()
    }

    /// Truncates the target and creates the scratch table
    pub async fn prepare(&self, store: &mut dyn RelationalStore) -> Result<()> {
        if self.dry_run {
            tracing::info!(target_table = %self.target, "DRY RUN: Would truncate target");
            return Ok(());
        }

        store
            .run_statement(&Statement::Truncate(self.target.clone()))
            .await?;

        if let (Some(scratch), LoadMode::StageThenMerge { keys, .. }) = (&self.scratch, &self.mode) {
            let columns = self.columns.iter().chain(keys).cloned().collect();
            store
                .run_statement(&Statement::CreateScratch {
                    name: scratch.clone(),
                    columns,
                })
                .await?;
            tracing::debug!(scratch = %scratch, "Scratch table created");
        }
        Ok(())
    }

    /// Writes one batch; returns the number of rows that reached the target
    pub async fn load(&self, store: &mut dyn RelationalStore, batch: &TransformedBatch) -> Result<u64> {
        if batch.is_empty() {
            return Ok(0);
        }
        if self.dry_run {
            return Ok(batch.len() as u64);
        }

        match &self.mode {
            LoadMode::Append => self.append(store, &batch.records).await,
            LoadMode::StageThenMerge { keys, links } => {
                self.stage_then_merge(store, &batch.records, keys, links).await
            }
        }
    }

    /// Bulk-appends records into the target
    pub async fn append(&self, store: &mut dyn RelationalStore, records: &[Row]) -> Result<u64> {
        let rows = coerce_records(records, &self.columns)?;
        let names = column_names(&self.columns);
        store.bulk_append(&self.target, &names, &rows).await
    }

    /// Stages records, merges them into the target and empties the scratch table
    ///
    /// # Errors
    ///
    /// Returns [`EtlError::Load`] if the merge inserts no rows although
    /// records were staged.
    pub async fn stage_then_merge(
        &self,
        store: &mut dyn RelationalStore,
        records: &[Row],
        keys: &[ColumnDef],
        links: &[LinkJoin],
    ) -> Result<u64> {
        let scratch = self.scratch.as_ref().ok_or_else(|| {
            EtlError::Load(format!("no scratch table prepared for {}", self.target))
        })?;

        let staged_columns: Vec<ColumnDef> = self.columns.iter().chain(keys).cloned().collect();
        let rows = coerce_records(records, &staged_columns)?;
        let staged = store
            .bulk_append(scratch, &column_names(&staged_columns), &rows)
            .await?;

        let spec = MergeSpec {
            scratch: scratch.clone(),
            target: self.target.clone(),
            columns: column_names(&self.columns),
            links: links.to_vec(),
        };
        let inserted = store.run_statement(&Statement::MergeStaged(spec)).await?;
        if inserted == 0 && staged > 0 {
            return Err(EtlError::Load(format!(
                "merge from {scratch} into {} inserted no rows ({staged} staged)",
                self.target
            )));
        }

        store.run_statement(&Statement::Truncate(scratch.clone())).await?;
        Ok(inserted)
    }

    /// Drops the scratch table, if any
    pub async fn cleanup(&self, store: &mut dyn RelationalStore) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }
        if let Some(scratch) = &self.scratch {
            store
                .run_statement(&Statement::DropTable(scratch.clone()))
                .await?;
            tracing::debug!(scratch = %scratch, "Scratch table dropped");
        }
        Ok(())
    }
}

fn column_names(columns: &[ColumnDef]) -> Vec<String> {
    columns.iter().map(|c| c.name.clone()).collect()
}

fn coerce_records(records: &[Row], columns: &[ColumnDef]) -> Result<Vec<Row>> {
    records
        .iter()
        .map(|record| {
            let mut row = Row::new();
            for column in columns {
                let value = record.get(&column.name);
                let coerced = value.coerce(column.ty).ok_or_else(|| {
                    EtlError::Transform(format!(
                        "value '{value}' for column '{}' is not a valid {}",
                        column.name,
                        column.ty.sql_type()
                    ))
                })?;
                row.set(column.name.clone(), coerced);
            }
            Ok(row)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryStore;
    use crate::adapters::store::KeyExpr;
    use crate::domain::{ColumnType, Value};

    fn target_columns() -> Vec<ColumnDef> {
        vec![
            ColumnDef::new("measurement_id", ColumnType::Integer),
            ColumnDef::new("value_as_number", ColumnType::Float),
            ColumnDef::new("visit_occurrence_id", ColumnType::Integer),
        ]
    }

    fn staged_mode(required: bool) -> LoadMode {
        LoadMode::StageThenMerge {
            keys: vec![ColumnDef::new("session_id", ColumnType::Integer)],
            links: vec![LinkJoin {
                reference: TableName::new("omop.visit_occurrence").unwrap(),
                scratch_key: "session_id".to_string(),
                reference_key: KeyExpr::Quotient {
                    column: "visit_occurrence_id".to_string(),
                    divisor: 100,
                },
                reference_value: "visit_occurrence_id".to_string(),
                target_column: "visit_occurrence_id".to_string(),
                rank_by: vec!["visit_occurrence_id".to_string()],
                required,
            }],
        }
    }

    async fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.create_table("omop.measurement", target_columns()).await.unwrap();
        store
            .create_table(
                "omop.visit_occurrence",
                vec![ColumnDef::new("visit_occurrence_id", ColumnType::Integer)],
            )
            .await
            .unwrap();
        store
            .insert_rows(
                "omop.visit_occurrence",
                vec![Row::new().with("visit_occurrence_id", 4201i64)],
            )
            .await
            .unwrap();
        store
    }

    fn batch() -> TransformedBatch {
        TransformedBatch {
            records: vec![
                Row::new()
                    .with("measurement_id", 1i64)
                    .with("value_as_number", 12.5)
                    .with("session_id", 42i64),
                Row::new()
                    .with("measurement_id", 2i64)
                    .with("value_as_number", 3i64)
                    .with("session_id", 99i64),
            ],
            excluded: 0,
        }
    }

    #[test]
    fn test_scratch_name() {
        let target = TableName::new("omop.measurement").unwrap();
        assert_eq!(
            scratch_name(&target, "ab12").unwrap().as_str(),
            "omop.tmp_measurement_ab12"
        );
    }

    #[tokio::test]
    async fn test_append() {
        let mut store = store().await;
        let target = TableName::new("omop.measurement").unwrap();
        let loader = Loader::new(target, target_columns(), LoadMode::Append, "t1", false).unwrap();

        loader.prepare(&mut store).await.unwrap();
        let written = loader.load(&mut store, &batch()).await.unwrap();
        assert_eq!(written, 2);

        let rows = store.rows("omop.measurement").await;
        assert_eq!(rows[1].get("value_as_number"), &Value::Float(3.0));
        assert!(rows[0].get("visit_occurrence_id").is_null());
    }

    #[tokio::test]
    async fn test_stage_then_merge_resolves_visits() {
        let mut store = store().await;
        let target = TableName::new("omop.measurement").unwrap();
        let loader = Loader::new(target, target_columns(), staged_mode(false), "t2", false).unwrap();

        loader.prepare(&mut store).await.unwrap();
        assert!(store.has_table("omop.tmp_measurement_t2").await);

        let written = loader.load(&mut store, &batch()).await.unwrap();
        assert_eq!(written, 2);
        assert!(store.rows("omop.tmp_measurement_t2").await.is_empty());

        let rows = store.rows("omop.measurement").await;
        assert_eq!(rows[0].get("visit_occurrence_id"), &Value::Integer(4201));
        assert!(rows[1].get("visit_occurrence_id").is_null());
        assert!(!rows[0].contains("session_id"));

        loader.cleanup(&mut store).await.unwrap();
        assert!(!store.has_table("omop.tmp_measurement_t2").await);
    }

    #[tokio::test]
    async fn test_empty_merge_is_load_error() {
        let mut store = store().await;
        let target = TableName::new("omop.measurement").unwrap();
        let loader = Loader::new(target, target_columns(), staged_mode(true), "t3", false).unwrap();
        loader.prepare(&mut store).await.unwrap();

        let batch = TransformedBatch {
            records: vec![Row::new().with("measurement_id", 5i64).with("session_id", 7i64)],
            excluded: 0,
        };
        let err = loader.load(&mut store, &batch).await.unwrap_err();
        assert!(matches!(err, EtlError::Load(_)));
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let mut store = store().await;
        let target = TableName::new("omop.measurement").unwrap();
        let loader = Loader::new(target, target_columns(), staged_mode(false), "t4", true).unwrap();

        loader.prepare(&mut store).await.unwrap();
        assert_eq!(loader.load(&mut store, &batch()).await.unwrap(), 2);
        loader.cleanup(&mut store).await.unwrap();

        assert!(store.rows("omop.measurement").await.is_empty());
        assert!(!store.has_table("omop.tmp_measurement_t4").await);
    }

    #[tokio::test]
    async fn test_bad_cell_is_transform_error() {
        let mut store = store().await;
        let target = TableName::new("omop.measurement").unwrap();
        let loader = Loader::new(target, target_columns(), LoadMode::Append, "t5", false).unwrap();

        let batch = TransformedBatch {
            records: vec![Row::new().with("measurement_id", 1i64).with("value_as_number", "high")],
            excluded: 0,
        };
        let err = loader.load(&mut store, &batch).await.unwrap_err();
        assert!(matches!(err, EtlError::Transform(_)));
    }
}
