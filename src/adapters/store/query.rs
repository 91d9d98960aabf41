//! Typed read queries against the relational store
//!
//! A [`SourceQuery`] names a relation, the columns to project with their
//! semantic types, an optional [`Filter`] and a stable ordering. PostgreSQL
//! renders it to SQL with filter values bound as `$n` [`Params`]; the
//! in-memory store evaluates it directly.

use crate::core::cursor::Window;
use crate::domain::ids::validate_identifier;
use crate::domain::{ColumnDef, ColumnType, EtlError, Result, TableName, Value};

/// Values bound to the `$n` placeholders of one rendered statement
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Params(Vec<Value>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `value` and returns its placeholder, cast to the value's type
    ///
    /// Null renders as a bare `NULL` so it takes the type of its context.
    pub fn bind(&mut self, value: &Value) -> String {
        match value.column_type() {
            None => "NULL".to_string(),
            Some(ty) => {
                self.0.push(value.clone());
                format!("${}::{}", self.0.len(), ty.sql_type())
            }
        }
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Row predicate
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Filter {
    /// Every row
    #[default]
    All,
    /// `column IS NOT NULL`
    NotNull(String),
    /// At least one of the columns is not null
    AnyNotNull(Vec<String>),
    /// `column = value`
    Eq(String, Value),
    /// `column IN (values)`
    In(String, Vec<Value>),
    /// `column IN (SELECT key FROM relation WHERE filter)`
    SemiJoin {
        column: String,
        relation: TableName,
        key: String,
        filter: Box<Filter>,
    },
    /// Conjunction
    And(Vec<Filter>),
}

impl Filter {
    /// Conjunction of `self` and `other`, flattening `All`
    pub fn and(self, other: Filter) -> Filter {
        match (self, other) {
            (Filter::All, f) | (f, Filter::All) => f,
            (Filter::And(mut left), Filter::And(right)) => {
                left.extend(right);
                Filter::And(left)
            }
            (Filter::And(mut left), f) => {
                left.push(f);
                Filter::And(left)
            }
            (f, other) => Filter::And(vec![f, other]),
        }
    }

    /// Columns of the filtered relation this predicate reads
    pub fn columns(&self) -> Vec<&str> {
        match self {
            Filter::All => Vec::new(),
            Filter::NotNull(c) | Filter::Eq(c, _) | Filter::In(c, _) => vec![c.as_str()],
            Filter::AnyNotNull(cs) => cs.iter().map(String::as_str).collect(),
            Filter::SemiJoin { column, .. } => vec![column.as_str()],
            Filter::And(fs) => fs.iter().flat_map(Filter::columns).collect(),
        }
    }

    /// Renders the predicate as a SQL boolean expression, binding its values
    pub fn to_sql(&self, params: &mut Params) -> String {
        match self {
            Filter::All => "TRUE".to_string(),
            Filter::NotNull(c) => format!("{c} IS NOT NULL"),
            Filter::AnyNotNull(cs) if cs.is_empty() => "FALSE".to_string(),
            Filter::AnyNotNull(cs) => format!("COALESCE({}) IS NOT NULL", cast_all_text(cs)),
            Filter::Eq(c, v) if v.is_null() => format!("{c} IS NULL"),
            Filter::Eq(c, v) => format!("{c} = {}", params.bind(v)),
            Filter::In(_, vs) if vs.is_empty() => "FALSE".to_string(),
            Filter::In(c, vs) => format!(
                "{c} IN ({})",
                vs.iter()
                    .map(|v| params.bind(v))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Filter::SemiJoin {
                column,
                relation,
                key,
                filter,
            } => format!(
                "{column} IN (SELECT {key} FROM {relation} WHERE {})",
                filter.to_sql(params)
            ),
            Filter::And(fs) if fs.is_empty() => "TRUE".to_string(),
            Filter::And(fs) => fs
                .iter()
                .map(|f| format!("({})", f.to_sql(params)))
                .collect::<Vec<_>>()
                .join(" AND "),
        }
    }

    fn validate(&self) -> Result<()> {
        for column in self.columns() {
            validate_identifier(column).map_err(EtlError::Validation)?;
        }
        if let Filter::SemiJoin { key, filter, .. } = self {
            validate_identifier(key).map_err(EtlError::Validation)?;
            filter.validate()?;
        }
        if let Filter::And(fs) = self {
            for f in fs {
                f.validate()?;
            }
        }
        Ok(())
    }
}

fn cast_all_text(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| format!("NULLIF(CAST({c} AS TEXT), '')"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// A typed, ordered projection of one relation
///
/// Paging with `LIMIT`/`OFFSET` only partitions a relation deterministically
/// when the ordering is total. Order either by a declared unique key
/// ([`SourceQuery::keyed_by`]) or by every projected column.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceQuery {
    pub relation: TableName,
    pub columns: Vec<ColumnDef>,
    pub filter: Filter,
    pub order_by: Vec<String>,
    /// `order_by` names a unique key of the relation
    pub unique_order: bool,
}

impl SourceQuery {
    /// Creates an unfiltered, unordered query
    pub fn new(relation: TableName, columns: Vec<ColumnDef>) -> Self {
        Self {
            relation,
            columns,
            filter: Filter::All,
            order_by: Vec::new(),
            unique_order: false,
        }
    }

    /// Adds a predicate
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = std::mem::take(&mut self.filter).and(filter);
        self
    }

    /// Sets the ordering columns
    pub fn ordered_by<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.order_by = columns.into_iter().map(Into::into).collect();
        self.unique_order = false;
        self
    }

    /// Orders by columns that uniquely identify a row
    pub fn keyed_by<I, S>(self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut query = self.ordered_by(columns);
        query.unique_order = !query.order_by.is_empty();
        query
    }

    /// Whether every window boundary falls at the same row on each read
    ///
    /// Rows equal on every projected column are interchangeable, so ordering
    /// by all of them is total for paging purposes.
    pub fn has_total_order(&self) -> bool {
        self.unique_order
            || (!self.columns.is_empty()
                && self
                    .columns
                    .iter()
                    .all(|c| self.order_by.contains(&c.name)))
    }

    /// Declared type of a projected column
    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.columns.iter().find(|c| c.name == name).map(|c| c.ty)
    }

    /// Checks every referenced name is a plain identifier
    pub fn validate(&self) -> Result<()> {
        for column in &self.columns {
            validate_identifier(&column.name).map_err(EtlError::Validation)?;
        }
        for column in &self.order_by {
            validate_identifier(column).map_err(EtlError::Validation)?;
        }
        self.filter.validate()
    }

    /// `SELECT COUNT(*)` over the filtered relation
    pub fn count_sql(&self) -> (String, Params) {
        let mut params = Params::new();
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {}",
            self.relation,
            self.filter.to_sql(&mut params)
        );
        (sql, params)
    }

    /// Typed projection of one window
    pub fn window_sql(&self, window: Window) -> (String, Params) {
        let mut params = Params::new();
        let projection = self
            .columns
            .iter()
            .map(|c| format!("CAST({0} AS {1}) AS {0}", c.name, c.ty.sql_type()))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!(
            "SELECT {projection} FROM {} WHERE {}",
            self.relation,
            self.filter.to_sql(&mut params)
        );
        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by.join(", "));
        }
        sql.push_str(&format!(" LIMIT {} OFFSET {}", window.limit, window.offset));
        (sql, params)
    }
}
