//! Relational store abstraction
//!
//! The ETL engine talks to its database only through [`RelationalStore`]:
//! count and page through a typed query, bulk-append rows, run typed
//! statements and bracket work in a unit of work. Implementations keep one
//! session for their lifetime so `begin`/`commit` apply to the statements in
//! between.

pub mod query;
pub mod statement;

pub use query::{Filter, Params, SourceQuery};
pub use statement::{KeyExpr, LinkJoin, MergeSpec, Statement};

use crate::core::cursor::Window;
use crate::domain::{Result, Row, TableName};
use async_trait::async_trait;

/// Narrow interface to the relational store
#[async_trait]
pub trait RelationalStore: Send {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Number of rows `query` selects
    ///
    /// # Errors
    ///
    /// Returns a store error if the relation is missing or the query fails.
    async fn count(&mut self, query: &SourceQuery) -> Result<u64>;

    /// One ordered window of `query`, decoded into the declared column types
    ///
    /// # Errors
    ///
    /// Returns a store error if the query fails or a cell cannot be decoded.
    async fn fetch_window(&mut self, query: &SourceQuery, window: Window) -> Result<Vec<Row>>;

    /// Appends `rows` to `table`, projecting each row onto `columns`
    ///
    /// Returns the number of rows written. Never updates existing rows.
    async fn bulk_append(&mut self, table: &TableName, columns: &[String], rows: &[Row])
        -> Result<u64>;

    /// Runs a typed statement, returning the affected row count where known
    async fn run_statement(&mut self, statement: &Statement) -> Result<u64>;

    /// Opens a unit of work
    async fn begin(&mut self) -> Result<()>;

    /// Commits the open unit of work
    async fn commit(&mut self) -> Result<()>;

    /// Rolls back the open unit of work; a no-op when none is open
    async fn rollback(&mut self) -> Result<()>;
}
