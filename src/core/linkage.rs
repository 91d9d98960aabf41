//! Subject and visit linkage
//!
//! Source rows identify patients by their case number and surgical sessions
//! by their session id; target rows need the `person_id` already assigned in
//! `person` and the `visit_occurrence_id` already assigned in
//! `visit_occurrence`. The [`SubjectIndex`] and [`VisitIndex`] are read once
//! per job and answer those joins in memory.

use crate::adapters::store::{Filter, RelationalStore, SourceQuery};
use crate::core::cursor::BatchCursor;
use crate::domain::{ColumnDef, ColumnType, EtlError, Result, TableName, Value};
use chrono::NaiveDate;
use std::collections::HashMap;

/// Visit keys encode the session id: `visit_occurrence_id / 100 = session_id`
pub const VISIT_KEY_DIVISOR: i64 = 100;

/// `person_source_value` to `person_id`
#[derive(Debug, Clone, Default)]
pub struct SubjectIndex {
    persons: HashMap<String, i64>,
}

impl SubjectIndex {
    /// Builds an index from `(source value, person id)` pairs; the first
    /// pair for a source value wins
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, i64)>,
        S: AsRef<str>,
    {
        let mut persons = HashMap::new();
        for (source, person_id) in pairs {
            let key = source.as_ref().trim();
            if !key.is_empty() {
                persons.entry(key.to_string()).or_insert(person_id);
            }
        }
        Self { persons }
    }

    /// Reads `<omop>.person` window by window
    ///
    /// # Errors
    ///
    /// Returns a store error if `person` cannot be read.
    pub async fn build(
        store: &mut dyn RelationalStore,
        omop_schema: &str,
        page_size: u64,
    ) -> Result<Self> {
        let person = TableName::qualified(omop_schema, "person").map_err(EtlError::Configuration)?;
        let query = SourceQuery::new(
            person,
            vec![
                ColumnDef::new("person_id", ColumnType::Integer),
                ColumnDef::new("person_source_value", ColumnType::Text),
            ],
        )
        .with_filter(Filter::NotNull("person_source_value".to_string()))
        .keyed_by(["person_id"]);

        let cursor = BatchCursor::open(store, &query, page_size).await?;
        let mut pairs = Vec::with_capacity(usize::try_from(cursor.total()).unwrap_or(0));
        for window in cursor {
            for row in store.fetch_window(&query, window).await? {
                if let (Some(source), Some(id)) = (
                    row.get("person_source_value").as_text(),
                    row.get("person_id").as_i64(),
                ) {
                    pairs.push((source, id));
                }
            }
        }

        let index = Self::from_pairs(pairs);
        tracing::info!(persons = index.len(), "Subject index built");
        Ok(index)
    }

    /// `person_id` of the subject identified by `source`
    pub fn person_id(&self, source: &Value) -> Option<i64> {
        let key = source.as_text()?;
        self.persons.get(&key).copied()
    }

    pub fn len(&self) -> usize {
        self.persons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.persons.is_empty()
    }
}

/// Session id to the first visit recorded for it
///
/// A session may own several visits; the one with the earliest
/// `visit_start_date` wins, then the lowest `visit_occurrence_id`. Visits
/// without a start date rank last.
#[derive(Debug, Clone, Default)]
pub struct VisitIndex {
    visits: HashMap<i64, (Option<NaiveDate>, i64)>,
}

impl VisitIndex {
    /// Builds an index from `(visit_occurrence_id, visit_start_date)` pairs
    pub fn from_visits<I>(visits: I) -> Self
    where
        I: IntoIterator<Item = (i64, Option<NaiveDate>)>,
    {
        let mut index: HashMap<i64, (Option<NaiveDate>, i64)> = HashMap::new();
        for (visit_id, start) in visits {
            let session = visit_id / VISIT_KEY_DIVISOR;
            let candidate = (start, visit_id);
            index
                .entry(session)
                .and_modify(|best| {
                    if rank(candidate) < rank(*best) {
                        *best = candidate;
                    }
                })
                .or_insert(candidate);
        }
        Self { visits: index }
    }

    /// Reads `<omop>.visit_occurrence` window by window
    ///
    /// # Errors
    ///
    /// Returns a store error if `visit_occurrence` cannot be read.
    pub async fn build(
        store: &mut dyn RelationalStore,
        omop_schema: &str,
        page_size: u64,
    ) -> Result<Self> {
        let visit_occurrence =
            TableName::qualified(omop_schema, "visit_occurrence").map_err(EtlError::Configuration)?;
        let query = SourceQuery::new(
            visit_occurrence,
            vec![
                ColumnDef::new("visit_occurrence_id", ColumnType::Integer),
                ColumnDef::new("visit_start_date", ColumnType::Date),
            ],
        )
        .with_filter(Filter::NotNull("visit_occurrence_id".to_string()))
        .keyed_by(["visit_occurrence_id"]);

        let cursor = BatchCursor::open(store, &query, page_size).await?;
        let mut visits = Vec::with_capacity(usize::try_from(cursor.total()).unwrap_or(0));
        for window in cursor {
            for row in store.fetch_window(&query, window).await? {
                if let Some(id) = row.get("visit_occurrence_id").as_i64() {
                    visits.push((id, row.get("visit_start_date").as_date()));
                }
            }
        }

        let index = Self::from_visits(visits);
        tracing::info!(sessions = index.len(), "Visit index built");
        Ok(index)
    }

    /// `visit_occurrence_id` of the first visit of `session`
    pub fn visit_id(&self, session: &Value) -> Option<i64> {
        let session = session.as_i64()?;
        self.visits.get(&session).map(|(_, visit_id)| *visit_id)
    }

    pub fn len(&self) -> usize {
        self.visits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visits.is_empty()
    }
}

fn rank((start, visit_id): (Option<NaiveDate>, i64)) -> (bool, Option<NaiveDate>, i64) {
    (start.is_none(), start, visit_id)
}
