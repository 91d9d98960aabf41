//! Native evaluation of filters, orderings and staged merges

use crate::adapters::store::{Filter, KeyExpr, LinkJoin, MergeSpec};
use crate::domain::{ColumnDef, Row, StoreError, TableName, Value};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use super::MemoryTable;

pub(super) type Tables = HashMap<TableName, MemoryTable>;

pub(super) fn table<'a>(tables: &'a Tables, name: &TableName) -> Result<&'a MemoryTable, StoreError> {
    tables
        .get(name)
        .ok_or_else(|| StoreError::UnknownTable(name.to_string()))
}

/// Fails like PostgreSQL would when a referenced column is missing
pub(super) fn require_columns<'a>(
    table: &MemoryTable,
    name: &TableName,
    columns: impl IntoIterator<Item = &'a str>,
) -> Result<(), StoreError> {
    for column in columns {
        if !table.has_column(column) {
            return Err(StoreError::QueryFailed(format!(
                "column \"{column}\" of relation \"{name}\" does not exist"
            )));
        }
    }
    Ok(())
}

/// Evaluates `filter` against one row of a relation
pub(super) fn matches(filter: &Filter, row: &Row, tables: &Tables) -> Result<bool, StoreError> {
    Ok(match filter {
        Filter::All => true,
        Filter::NotNull(c) => !row.get(c).is_null(),
        Filter::AnyNotNull(cs) => cs.iter().any(|c| {
            let v = row.get(c);
            !v.is_null() && *v != Value::Text(String::new())
        }),
        Filter::Eq(c, v) => equals(row.get(c), v),
        Filter::In(c, vs) => vs.iter().any(|v| !v.is_null() && equals(row.get(c), v)),
        Filter::SemiJoin {
            column,
            relation,
            key,
            filter,
        } => {
            let keys = semi_join_keys(relation, key, filter, tables)?;
            row.get(column)
                .join_key()
                .is_some_and(|k| keys.contains(&k))
        }
        Filter::And(fs) => {
            for f in fs {
                if !matches(f, row, tables)? {
                    return Ok(false);
                }
            }
            true
        }
    })
}

fn equals(cell: &Value, expected: &Value) -> bool {
    if expected.is_null() {
        return cell.is_null();
    }
    !cell.is_null() && cell.compare(expected) == Ordering::Equal
}

fn semi_join_keys(
    relation: &TableName,
    key: &str,
    filter: &Filter,
    tables: &Tables,
) -> Result<HashSet<String>, StoreError> {
    let reference = table(tables, relation)?;
    require_columns(reference, relation, std::iter::once(key).chain(filter.columns()))?;
    let mut keys = HashSet::new();
    for row in &reference.rows {
        if matches(filter, row, tables)? {
            if let Some(k) = row.get(key).join_key() {
                keys.insert(k);
            }
        }
    }
    Ok(keys)
}

/// Lexicographic comparison over `columns`, nulls last
pub(super) fn compare_by(a: &Row, b: &Row, columns: &[String]) -> Ordering {
    columns
        .iter()
        .map(|c| a.get(c).compare(b.get(c)))
        .find(|o| *o != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

/// Coerces every cell of `row` named in `columns` into the column's type
pub(super) fn coerce_row(
    row: &Row,
    columns: &[String],
    schema: &[ColumnDef],
    table: &TableName,
) -> Result<Row, StoreError> {
    let mut out = Row::new();
    for name in columns {
        let def = schema
            .iter()
            .find(|c| &c.name == name)
            .ok_or_else(|| StoreError::InsertFailed {
                table: table.to_string(),
                message: format!("column \"{name}\" does not exist"),
            })?;
        let value = row.get(name);
        let coerced = value.coerce(def.ty).ok_or_else(|| StoreError::InsertFailed {
            table: table.to_string(),
            message: format!(
                "invalid input for column \"{name}\" of type {}: {value}",
                def.ty.sql_type()
            ),
        })?;
        out.set(name.clone(), coerced);
    }
    Ok(out)
}

fn link_key(expr: &KeyExpr, row: &Row) -> Option<String> {
    match expr {
        KeyExpr::Column(c) => row.get(c).join_key(),
        KeyExpr::Quotient { column, divisor } => row
            .get(column)
            .as_i64()
            .map(|v| (v / divisor).to_string()),
    }
}

/// First-ranked reference value per key
fn link_index(link: &LinkJoin, tables: &Tables) -> Result<HashMap<String, Value>, StoreError> {
    let reference = table(tables, &link.reference)?;
    require_columns(
        reference,
        &link.reference,
        [link.reference_key.column(), link.reference_value.as_str()]
            .into_iter()
            .chain(link.rank_by.iter().map(String::as_str)),
    )?;

    let rank_by = if link.rank_by.is_empty() {
        vec![link.reference_value.clone()]
    } else {
        link.rank_by.clone()
    };

    let mut best: HashMap<String, &Row> = HashMap::new();
    for row in &reference.rows {
        let Some(key) = link_key(&link.reference_key, row) else {
            continue;
        };
        let replace = best
            .get(&key)
            .map_or(true, |current| compare_by(row, current, &rank_by) == Ordering::Less);
        if replace {
            best.insert(key, row);
        }
    }

    Ok(best
        .into_iter()
        .map(|(k, row)| (k, row.get(&link.reference_value).clone()))
        .collect())
}

/// Resolves every link for the scratch rows and returns the target rows
pub(super) fn merge_rows(spec: &MergeSpec, tables: &Tables) -> Result<Vec<Row>, StoreError> {
    let scratch = table(tables, &spec.scratch)?;
    require_columns(
        scratch,
        &spec.scratch,
        spec.columns
            .iter()
            .map(String::as_str)
            .chain(spec.links.iter().map(|l| l.scratch_key.as_str())),
    )?;

    let indexes = spec
        .links
        .iter()
        .map(|link| link_index(link, tables))
        .collect::<Result<Vec<_>, _>>()?;

    let mut merged = Vec::with_capacity(scratch.rows.len());
    'rows: for row in &scratch.rows {
        let mut out = Row::new();
        for column in &spec.columns {
            out.set(column.clone(), row.get(column).clone());
        }
        for (link, index) in spec.links.iter().zip(&indexes) {
            let resolved = row
                .get(&link.scratch_key)
                .join_key()
                .and_then(|k| index.get(&k).cloned());
            match resolved {
                Some(v) => out.set(link.target_column.clone(), v),
                None if link.required => continue 'rows,
                None => out.set(link.target_column.clone(), Value::Null),
            }
        }
        merged.push(out);
    }
    Ok(merged)
}
