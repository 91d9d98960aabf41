//! Typed statements: truncation, scratch lifecycle, staged merges, scripts

use crate::domain::ids::validate_identifier;
use crate::domain::{ColumnDef, EtlError, Result, TableName};
use std::fmt;

/// Expression over a reference table producing the join key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyExpr {
    /// The column value
    Column(String),
    /// Integer quotient of the column by `divisor`
    Quotient { column: String, divisor: i64 },
}

impl KeyExpr {
    pub fn column(&self) -> &str {
        match self {
            KeyExpr::Column(c) | KeyExpr::Quotient { column: c, .. } => c,
        }
    }

    fn to_sql(&self) -> String {
        match self {
            KeyExpr::Column(c) => c.clone(),
            KeyExpr::Quotient { column, divisor } => format!("({column} / {divisor})"),
        }
    }
}

/// One "pick first match" join resolving a provisional key into a foreign key
///
/// Reference rows are partitioned by `reference_key`; within a partition the
/// row ranked first by `rank_by` supplies `reference_value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkJoin {
    /// Already-populated table holding the final keys
    pub reference: TableName,
    /// Provisional key column in the scratch table
    pub scratch_key: String,
    /// Key expression over the reference table
    pub reference_key: KeyExpr,
    /// Reference column copied into the target
    pub reference_value: String,
    /// Target column receiving the resolved value
    pub target_column: String,
    /// Tie-break ordering inside one key partition
    pub rank_by: Vec<String>,
    /// Drop scratch rows with no match instead of writing NULL
    pub required: bool,
}

/// Set-based insert from a scratch table into its target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeSpec {
    pub scratch: TableName,
    pub target: TableName,
    /// Columns copied unchanged from scratch to target
    pub columns: Vec<String>,
    pub links: Vec<LinkJoin>,
}

impl MergeSpec {
    /// Target column list: copied columns then link targets
    pub fn target_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .map(String::as_str)
            .chain(self.links.iter().map(|l| l.target_column.as_str()))
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        for column in &self.columns {
            validate_identifier(column).map_err(EtlError::Validation)?;
        }
        for link in &self.links {
            for name in [
                link.scratch_key.as_str(),
                link.reference_key.column(),
                link.reference_value.as_str(),
                link.target_column.as_str(),
            ]
            .into_iter()
            .chain(link.rank_by.iter().map(String::as_str))
            {
                validate_identifier(name).map_err(EtlError::Validation)?;
            }
            if let KeyExpr::Quotient { divisor, .. } = link.reference_key {
                if divisor == 0 {
                    return Err(EtlError::Validation(format!(
                        "link on {} divides by zero",
                        link.reference
                    )));
                }
            }
            if self.columns.contains(&link.target_column) {
                return Err(EtlError::Validation(format!(
                    "column '{}' is both copied and resolved",
                    link.target_column
                )));
            }
        }
        Ok(())
    }

    /// Renders the merge as one `INSERT ... SELECT`
    pub fn to_sql(&self) -> String {
        let mut select: Vec<String> = self.columns.iter().map(|c| format!("s.{c}")).collect();
        let mut joins = String::new();

        for (i, link) in self.links.iter().enumerate() {
            let alias = format!("l{i}");
            select.push(format!("{alias}.link_value"));

            let key = link.reference_key.to_sql();
            let rank = if link.rank_by.is_empty() {
                link.reference_value.clone()
            } else {
                link.rank_by.join(", ")
            };
            let kind = if link.required { "INNER" } else { "LEFT" };
            joins.push_str(&format!(
                " {kind} JOIN (SELECT link_key, link_value FROM (SELECT {key} AS link_key, \
                 {value} AS link_value, ROW_NUMBER() OVER (PARTITION BY {key} ORDER BY {rank}) AS rn \
                 FROM {reference}) ranked WHERE rn = 1) AS {alias} ON s.{scratch_key} = {alias}.link_key",
                value = link.reference_value,
                reference = link.reference,
                scratch_key = link.scratch_key,
            ));
        }

        format!(
            "INSERT INTO {} ({}) SELECT {} FROM {} AS s{}",
            self.target,
            self.target_columns().join(", "),
            select.join(", "),
            self.scratch,
            joins
        )
    }
}

/// Statement executed through [`super::RelationalStore::run_statement`]
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Truncate(TableName),
    CreateScratch {
        name: TableName,
        columns: Vec<ColumnDef>,
    },
    DropTable(TableName),
    DropView(TableName),
    MergeStaged(MergeSpec),
    /// Opaque SQL text, possibly several statements
    Raw(String),
}

impl Statement {
    /// Renders the statement as PostgreSQL
    pub fn to_sql(&self) -> String {
        match self {
            Statement::Truncate(t) => format!("TRUNCATE TABLE {t}"),
            Statement::CreateScratch { name, columns } => format!(
                "CREATE UNLOGGED TABLE IF NOT EXISTS {name} ({})",
                columns
                    .iter()
                    .map(|c| format!("{} {}", c.name, c.ty.sql_type()))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Statement::DropTable(t) => format!("DROP TABLE IF EXISTS {t}"),
            Statement::DropView(v) => format!("DROP VIEW IF EXISTS {v} CASCADE"),
            Statement::MergeStaged(spec) => spec.to_sql(),
            Statement::Raw(sql) => sql.clone(),
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Truncate(t) => write!(f, "truncate {t}"),
            Statement::CreateScratch { name, .. } => write!(f, "create scratch {name}"),
            Statement::DropTable(t) => write!(f, "drop table {t}"),
            Statement::DropView(v) => write!(f, "drop view {v}"),
            Statement::MergeStaged(spec) => write!(f, "merge {} into {}", spec.scratch, spec.target),
            Statement::Raw(sql) => write!(f, "script ({} bytes)", sql.len()),
        }
    }
}
