//! In-memory relational store
//!
//! [`MemoryStore`] keeps typed tables in memory and evaluates queries,
//! filters and staged merges natively, so the whole engine can run without
//! PostgreSQL. Raw SQL scripts are recorded, not executed.
//!
//! The store is a cheap handle around shared state: clone it, hand one
//! clone to a job and inspect tables through the other.
//!
//! # Examples
//!
//! ```rust
//! use periop_omop::adapters::memory::MemoryStore;
//! use periop_omop::domain::{ColumnDef, ColumnType, Row};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MemoryStore::new();
//! store
//!     .create_table("omop.person", vec![
//!         ColumnDef::new("person_id", ColumnType::Integer),
//!         ColumnDef::new("person_source_value", ColumnType::Text),
//!     ])
//!     .await?;
//! store
//!     .insert_rows("omop.person", vec![
//!         Row::new().with("person_id", 1i64).with("person_source_value", "A1"),
//!     ])
//!     .await?;
//! assert_eq!(store.rows("omop.person").await.len(), 1);
//! # Ok(())
//! # }
//! ```

mod eval;

use crate::adapters::store::{RelationalStore, SourceQuery, Statement};
use crate::core::cursor::Window;
use crate::domain::{ColumnDef, EtlError, Result, Row, StoreError, TableName};
use async_trait::async_trait;
use eval::Tables;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

/// One in-memory relation
#[derive(Debug, Clone, Default)]
pub(crate) struct MemoryTable {
    columns: Vec<ColumnDef>,
    rows: Vec<Row>,
}

impl MemoryTable {
    fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }
}

#[derive(Debug, Default)]
struct Inner {
    tables: Tables,
    snapshot: Option<Tables>,
    journal: Vec<String>,
    scripts: Vec<String>,
    failing_tables: HashSet<TableName>,
}

/// In-memory [`RelationalStore`] for tests and dry runs
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

fn table_name(name: &str) -> Result<TableName> {
    TableName::new(name).map_err(EtlError::Validation)
}

impl MemoryStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates (or replaces) a table
    pub async fn create_table(&self, name: &str, columns: Vec<ColumnDef>) -> Result<()> {
        let name = table_name(name)?;
        let mut inner = self.inner.lock().await;
        inner.tables.insert(
            name,
            MemoryTable {
                columns,
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    /// Appends seed rows, coercing cells into the declared column types
    pub async fn insert_rows(&self, name: &str, rows: Vec<Row>) -> Result<()> {
        let name = table_name(name)?;
        let mut inner = self.inner.lock().await;
        let table = inner
            .tables
            .get_mut(&name)
            .ok_or_else(|| StoreError::UnknownTable(name.to_string()))?;
        for row in rows {
            let columns: Vec<String> = row.columns().map(str::to_string).collect();
            let coerced = eval::coerce_row(&row, &columns, &table.columns, &name)?;
            table.rows.push(coerced);
        }
        Ok(())
    }

    /// Snapshot of a table's rows (empty when the table does not exist)
    pub async fn rows(&self, name: &str) -> Vec<Row> {
        let Ok(name) = table_name(name) else {
            return Vec::new();
        };
        let inner = self.inner.lock().await;
        inner
            .tables
            .get(&name)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Whether a table exists
    pub async fn has_table(&self, name: &str) -> bool {
        match table_name(name) {
            Ok(name) => self.inner.lock().await.tables.contains_key(&name),
            Err(_) => false,
        }
    }

    /// Names of all tables, sorted
    pub async fn table_names(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        let mut names: Vec<String> = inner.tables.keys().map(ToString::to_string).collect();
        names.sort();
        names
    }

    /// Every store call, in order
    pub async fn journal(&self) -> Vec<String> {
        self.inner.lock().await.journal.clone()
    }

    /// Raw SQL received through [`Statement::Raw`]
    pub async fn scripts(&self) -> Vec<String> {
        self.inner.lock().await.scripts.clone()
    }

    /// Whether a unit of work is open
    pub async fn in_transaction(&self) -> bool {
        self.inner.lock().await.snapshot.is_some()
    }

    /// Makes every append or merge into `name` fail
    pub async fn fail_writes_to(&self, name: &str) -> Result<()> {
        let name = table_name(name)?;
        self.inner.lock().await.failing_tables.insert(name);
        Ok(())
    }
}

impl Inner {
    fn check_writable(&self, table: &TableName) -> std::result::Result<(), StoreError> {
        if self.failing_tables.contains(table) {
            return Err(StoreError::InsertFailed {
                table: table.to_string(),
                message: "injected write failure".to_string(),
            });
        }
        Ok(())
    }

    fn filtered(&self, query: &SourceQuery) -> std::result::Result<Vec<Row>, StoreError> {
        let table = eval::table(&self.tables, &query.relation)?;
        eval::require_columns(
            table,
            &query.relation,
            query
                .columns
                .iter()
                .map(|c| c.name.as_str())
                .chain(query.filter.columns())
                .chain(query.order_by.iter().map(String::as_str)),
        )?;

        let mut rows = Vec::new();
        for row in &table.rows {
            if eval::matches(&query.filter, row, &self.tables)? {
                rows.push(row.clone());
            }
        }
        Ok(rows)
    }
}

#[async_trait]
impl RelationalStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn count(&mut self, query: &SourceQuery) -> Result<u64> {
        let inner = self.inner.lock().await;
        Ok(inner.filtered(query)?.len() as u64)
    }

    async fn fetch_window(&mut self, query: &SourceQuery, window: Window) -> Result<Vec<Row>> {
        let mut inner = self.inner.lock().await;
        let mut rows = inner.filtered(query)?;
        if !query.order_by.is_empty() {
            rows.sort_by(|a, b| eval::compare_by(a, b, &query.order_by));
        }

        let mut page = Vec::new();
        for row in rows
            .into_iter()
            .skip(usize::try_from(window.offset).unwrap_or(usize::MAX))
            .take(usize::try_from(window.limit).unwrap_or(usize::MAX))
        {
            let mut projected = Row::new();
            for column in &query.columns {
                let value = row.get(&column.name);
                let decoded = value.coerce(column.ty).ok_or_else(|| StoreError::Decode {
                    column: column.name.clone(),
                    message: format!("cannot read {value} as {}", column.ty.sql_type()),
                })?;
                projected.set(column.name.clone(), decoded);
            }
            page.push(projected);
        }

        inner.journal.push(format!(
            "fetch {} {} -> {}",
            query.relation,
            window,
            page.len()
        ));
        Ok(page)
    }

    async fn bulk_append(
        &mut self,
        table: &TableName,
        columns: &[String],
        rows: &[Row],
    ) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        inner.check_writable(table)?;

        let schema = eval::table(&inner.tables, table)?.columns.clone();
        let coerced = rows
            .iter()
            .map(|row| eval::coerce_row(row, columns, &schema, table))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let written = coerced.len() as u64;
        if let Some(target) = inner.tables.get_mut(table) {
            target.rows.extend(coerced);
        }
        inner.journal.push(format!("append {table} {written}"));
        Ok(written)
    }

    async fn run_statement(&mut self, statement: &Statement) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        inner.journal.push(statement.to_string());

        let affected = match statement {
            Statement::Truncate(t) => {
                let table = inner
                    .tables
                    .get_mut(t)
                    .ok_or_else(|| StoreError::UnknownTable(t.to_string()))?;
                let removed = table.rows.len() as u64;
                table.rows.clear();
                removed
            }
            Statement::CreateScratch { name, columns } => {
                inner
                    .tables
                    .entry(name.clone())
                    .or_insert_with(|| MemoryTable {
                        columns: columns.clone(),
                        rows: Vec::new(),
                    });
                0
            }
            Statement::DropTable(t) | Statement::DropView(t) => {
                inner.tables.remove(t);
                0
            }
            Statement::MergeStaged(spec) => {
                inner.check_writable(&spec.target)?;
                let merged = eval::merge_rows(spec, &inner.tables)?;
                let columns: Vec<String> = spec
                    .target_columns()
                    .into_iter()
                    .map(str::to_string)
                    .collect();
                let schema = eval::table(&inner.tables, &spec.target)?.columns.clone();
                let coerced = merged
                    .iter()
                    .map(|row| eval::coerce_row(row, &columns, &schema, &spec.target))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                let inserted = coerced.len() as u64;
                if let Some(target) = inner.tables.get_mut(&spec.target) {
                    target.rows.extend(coerced);
                }
                inserted
            }
            Statement::Raw(sql) => {
                inner.scripts.push(sql.clone());
                0
            }
        };
        Ok(affected)
    }

    async fn begin(&mut self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.snapshot.is_some() {
            return Err(StoreError::Transaction("a unit of work is already open".to_string()).into());
        }
        inner.snapshot = Some(inner.tables.clone());
        inner.journal.push("begin".to_string());
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.snapshot.take().is_none() {
            return Err(StoreError::Transaction("no unit of work is open".to_string()).into());
        }
        inner.journal.push("commit".to_string());
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(snapshot) = inner.snapshot.take() {
            inner.tables = snapshot;
            inner.journal.push("rollback".to_string());
        }
        Ok(())
    }
}
