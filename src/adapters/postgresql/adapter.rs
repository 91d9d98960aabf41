//! PostgreSQL adapter implementing [`RelationalStore`]
//!
//! One [`PostgresStore`] holds one pooled session for its lifetime, so the
//! `BEGIN`/`COMMIT` issued by a job bracket exactly that job's statements.

use crate::adapters::postgresql::client::{describe, PostgresClient};
use crate::adapters::store::{Params, RelationalStore, SourceQuery, Statement};
use crate::core::cursor::Window;
use crate::domain::{ColumnDef, ColumnType, EtlError, Result, Row, StoreError, TableName, Value};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use deadpool_postgres::Object;
use tokio_postgres::types::ToSql;

/// Upper bound on rows per `INSERT ... VALUES` statement
pub const INSERT_CHUNK_ROWS: usize = 1000;

/// Bind parameters the wire protocol accepts per statement
const MAX_BIND_PARAMS: usize = u16::MAX as usize;

type SqlParam = Box<dyn ToSql + Sync + Send>;

/// PostgreSQL implementation of [`RelationalStore`]
pub struct PostgresStore {
    session: Object,
    in_transaction: bool,
}

impl PostgresStore {
    /// Opens a store on a fresh pooled session
    pub async fn connect(client: &PostgresClient) -> Result<Self> {
        Ok(Self {
            session: client.session().await?,
            in_transaction: false,
        })
    }

    async fn execute_sql(&self, sql: &str) -> Result<u64> {
        tracing::trace!(sql = %sql, "Executing statement");
        self.session
            .execute(sql, &[])
            .await
            .map_err(|e| StoreError::StatementFailed(describe(&e)).into())
    }
}

fn decode_cell(row: &tokio_postgres::Row, column: &ColumnDef) -> Result<Value> {
    let decode_err = |e: tokio_postgres::Error| StoreError::Decode {
        column: column.name.clone(),
        message: e.to_string(),
    };
    let name = column.name.as_str();
    let value: Value = match column.ty {
        ColumnType::Integer => row.try_get::<_, Option<i64>>(name).map_err(decode_err)?.into(),
        ColumnType::Float => row.try_get::<_, Option<f64>>(name).map_err(decode_err)?.into(),
        ColumnType::Text => row.try_get::<_, Option<String>>(name).map_err(decode_err)?.into(),
        ColumnType::Date => row
            .try_get::<_, Option<NaiveDate>>(name)
            .map_err(decode_err)?
            .into(),
        ColumnType::DateTime => row
            .try_get::<_, Option<NaiveDateTime>>(name)
            .map_err(decode_err)?
            .into(),
    };
    Ok(value)
}

/// Rows per `INSERT` chunk so one statement stays within the parameter limit
pub(crate) fn chunk_rows(column_count: usize) -> usize {
    (MAX_BIND_PARAMS / column_count.max(1)).clamp(1, INSERT_CHUNK_ROWS)
}

/// Renders one parameterized `INSERT ... VALUES` statement for a chunk of rows
pub(crate) fn insert_statement(
    table: &TableName,
    columns: &[String],
    rows: &[Row],
) -> (String, Params) {
    let mut params = Params::new();
    let values = rows
        .iter()
        .map(|row| {
            let cells = row
                .values_for(columns)
                .map(|value| params.bind(value))
                .collect::<Vec<_>>()
                .join(", ");
            format!("({cells})")
        })
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO {table} ({}) VALUES {values}",
        columns.join(", ")
    );
    (sql, params)
}

/// Converts one bound value into its driver representation
///
/// PostgreSQL text cannot hold NUL; such values are an error.
fn encode(value: &Value) -> std::result::Result<SqlParam, String> {
    let param: SqlParam = match value {
        Value::Null => Box::new(Option::<String>::None),
        Value::Integer(i) => Box::new(*i),
        Value::Float(f) => Box::new(*f),
        Value::Text(s) if s.contains('\0') => {
            return Err(format!("text value {s:?} contains a NUL byte"));
        }
        Value::Text(s) => Box::new(s.clone()),
        Value::Date(d) => Box::new(*d),
        Value::DateTime(dt) => Box::new(*dt),
    };
    Ok(param)
}

fn encode_all(params: &Params) -> std::result::Result<Vec<SqlParam>, String> {
    params.values().iter().map(encode).collect()
}

fn as_refs(params: &[SqlParam]) -> Vec<&(dyn ToSql + Sync)> {
    params
        .iter()
        .map(|p| p.as_ref() as &(dyn ToSql + Sync))
        .collect()
}

#[async_trait]
impl RelationalStore for PostgresStore {
    fn name(&self) -> &str {
        "postgresql"
    }

    async fn count(&mut self, query: &SourceQuery) -> Result<u64> {
        query.validate()?;
        let (sql, params) = query.count_sql();
        let params = encode_all(&params).map_err(StoreError::QueryFailed)?;
        let row = self
            .session
            .query_one(&sql, &as_refs(&params))
            .await
            .map_err(|e| StoreError::QueryFailed(describe(&e)))?;
        let count: i64 = row.try_get(0).map_err(|e| StoreError::Decode {
            column: "count".to_string(),
            message: e.to_string(),
        })?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn fetch_window(&mut self, query: &SourceQuery, window: Window) -> Result<Vec<Row>> {
        query.validate()?;
        if query.columns.is_empty() {
            return Err(EtlError::Validation(format!(
                "query on {} projects no columns",
                query.relation
            )));
        }
        let (sql, params) = query.window_sql(window);
        tracing::trace!(sql = %sql, params = params.len(), "Fetching window");
        let params = encode_all(&params).map_err(StoreError::QueryFailed)?;

        let rows = self
            .session
            .query(&sql, &as_refs(&params))
            .await
            .map_err(|e| StoreError::QueryFailed(describe(&e)))?;

        rows.iter()
            .map(|pg_row| {
                let mut row = Row::new();
                for column in &query.columns {
                    row.set(column.name.clone(), decode_cell(pg_row, column)?);
                }
                Ok(row)
            })
            .collect()
    }

    async fn bulk_append(
        &mut self,
        table: &TableName,
        columns: &[String],
        rows: &[Row],
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        if columns.is_empty() {
            return Err(EtlError::Validation(format!(
                "append to {table} names no columns"
            )));
        }
        let insert_failed = |message: String| StoreError::InsertFailed {
            table: table.to_string(),
            message,
        };

        let mut written = 0;
        for chunk in rows.chunks(chunk_rows(columns.len())) {
            let (sql, params) = insert_statement(table, columns, chunk);
            let params = encode_all(&params).map_err(insert_failed)?;
            written += self
                .session
                .execute(&sql, &as_refs(&params))
                .await
                .map_err(|e| insert_failed(describe(&e)))?;
        }
        Ok(written)
    }

    async fn run_statement(&mut self, statement: &Statement) -> Result<u64> {
        tracing::debug!(statement = %statement, "Running statement");
        match statement {
            Statement::Raw(sql) => {
                self.session
                    .batch_execute(sql)
                    .await
                    .map_err(|e| StoreError::StatementFailed(describe(&e)))?;
                Ok(0)
            }
            Statement::MergeStaged(spec) => {
                spec.validate()?;
                self.execute_sql(&statement.to_sql()).await
            }
            other => self.execute_sql(&other.to_sql()).await,
        }
    }

    async fn begin(&mut self) -> Result<()> {
        if self.in_transaction {
            return Err(StoreError::Transaction("a unit of work is already open".to_string()).into());
        }
        self.session
            .batch_execute("BEGIN")
            .await
            .map_err(|e| StoreError::Transaction(describe(&e)))?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(StoreError::Transaction("no unit of work is open".to_string()).into());
        }
        self.in_transaction = false;
        self.session
            .batch_execute("COMMIT")
            .await
            .map_err(|e| StoreError::Transaction(describe(&e)).into())
    }

    async fn rollback(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Ok(());
        }
        self.in_transaction = false;
        self.session
            .batch_execute("ROLLBACK")
            .await
            .map_err(|e| StoreError::Transaction(describe(&e)).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_statement_binds_every_value() {
        let table = TableName::new("omop.measurement").unwrap();
        let columns = vec!["measurement_id".to_string(), "value_source_value".to_string()];
        let rows = vec![
            Row::new()
                .with("measurement_id", 1i64)
                .with("value_source_value", "O'Brien"),
            Row::new().with("measurement_id", 2i64),
        ];
        let (sql, params) = insert_statement(&table, &columns, &rows);
        assert_eq!(
            sql,
            "INSERT INTO omop.measurement (measurement_id, value_source_value) \
             VALUES ($1::BIGINT, $2::TEXT), ($3::BIGINT, NULL)"
        );
        assert_eq!(
            params.values(),
            [Value::Integer(1), Value::from("O'Brien"), Value::Integer(2)]
        );
    }

    #[test]
    fn test_nul_byte_in_text_is_refused() {
        let table = TableName::new("omop.observation").unwrap();
        let columns = vec!["value_as_string".to_string()];
        let rows = vec![Row::new().with("value_as_string", "a\0b")];
        let (_, params) = insert_statement(&table, &columns, &rows);

        assert_eq!(params.values(), [Value::from("a\0b")]);
        let err = encode_all(&params).err().unwrap();
        assert!(err.contains("NUL"));
    }

    #[test]
    fn test_encode_accepts_every_kind() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let values = [
            Value::Integer(1),
            Value::Float(2.5),
            Value::from("text"),
            Value::Date(d),
            Value::DateTime(d.and_hms_opt(3, 4, 5).unwrap()),
        ];
        for value in &values {
            assert!(encode(value).is_ok(), "{value:?}");
        }
    }

    #[test]
    fn test_chunk_rows_respects_parameter_limit() {
        assert_eq!(chunk_rows(10), INSERT_CHUNK_ROWS);
        assert_eq!(chunk_rows(100), 655);
        assert!(chunk_rows(100) * 100 <= MAX_BIND_PARAMS);
        assert_eq!(chunk_rows(0), INSERT_CHUNK_ROWS);
        assert_eq!(chunk_rows(100_000), 1);
    }
}
