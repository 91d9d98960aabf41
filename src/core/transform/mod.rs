//! Data transformation logic
//!
//! This module turns a window of source rows into target-shaped records.
//! Two strategies are supported, chosen per source:
//!
//! - **Row**: one source row becomes exactly one record ([`row`])
//! - **Eav**: one wide source row becomes one record per non-null attribute ([`eav`])
//!
//! Both strategies drop rows whose subject does not join to `person` or whose
//! session does not join to `visit_occurrence` before any key is taken. They
//! resolve concept ids through the job's lookups and take surrogate keys from
//! the job's allocator in emission order.

pub mod eav;
pub mod mapping;
pub mod row;

pub use mapping::{
    AttributeMapping, AttributeRule, CodeSource, ConceptRule, FieldRule, LabelSource, Linkage,
    LookupRule, RowMapping,
};

use crate::adapters::store::SourceQuery;
use crate::core::concept::{ConceptDomain, ConceptLookups};
use crate::core::keys::SurrogateKeyAllocator;
use crate::core::linkage::{SubjectIndex, VisitIndex};
use crate::domain::{Result, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

/// Which concept source wins when a rule has both a constant and a lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConceptPrecedence {
    /// The constant wins; the lookup is consulted only without one
    #[default]
    HardcodedFirst,
    /// The lookup wins when it hits; otherwise the constant
    LookupFirst,
}

impl FromStr for ConceptPrecedence {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hardcoded_first" => Ok(Self::HardcodedFirst),
            "lookup_first" => Ok(Self::LookupFirst),
            _ => Err(format!(
                "Invalid concept precedence '{s}'. Must be one of: hardcoded_first, lookup_first"
            )),
        }
    }
}

/// Rows of one window, in source order
pub type RawBatch = Vec<Row>;

/// Records produced from one window
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformedBatch {
    /// Target-shaped records, keys increasing in order
    pub records: Vec<Row>,
    /// Source rows dropped because their subject or visit did not join
    pub excluded: u64,
}

impl TransformedBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Read-only state shared by every transformation of a job
#[derive(Debug, Clone, Copy)]
pub struct TransformContext<'a> {
    pub lookups: &'a ConceptLookups,
    pub subjects: &'a SubjectIndex,
    /// Without an index no visit joins
    pub visits: Option<&'a VisitIndex>,
    pub precedence: ConceptPrecedence,
}

impl<'a> TransformContext<'a> {
    pub fn new(
        lookups: &'a ConceptLookups,
        subjects: &'a SubjectIndex,
        precedence: ConceptPrecedence,
    ) -> Self {
        Self {
            lookups,
            subjects,
            visits: None,
            precedence,
        }
    }

    pub fn with_visits(mut self, visits: &'a VisitIndex) -> Self {
        self.visits = Some(visits);
        self
    }
}

/// Transformation applied to the rows of one source
#[derive(Debug, Clone, PartialEq)]
pub enum TransformStrategy {
    Row(RowMapping),
    Eav(AttributeMapping),
}

impl TransformStrategy {
    /// Transforms one window, writing keys into `key_column`
    ///
    /// # Errors
    ///
    /// Returns [`crate::domain::EtlError::Transform`] if a cell cannot be
    /// read as the type a rule needs.
    pub fn transform(
        &self,
        batch: RawBatch,
        ctx: &TransformContext<'_>,
        keys: &mut SurrogateKeyAllocator,
        key_column: &str,
    ) -> Result<TransformedBatch> {
        match self {
            TransformStrategy::Row(mapping) => row::transform(mapping, batch, ctx, keys, key_column),
            TransformStrategy::Eav(mapping) => eav::transform(mapping, batch, ctx, keys, key_column),
        }
    }

    /// Whether one source row can produce more than one record
    pub fn fans_out(&self) -> bool {
        matches!(self, TransformStrategy::Eav(_))
    }

    /// Whether the strategy joins rows to `person`
    pub fn needs_subjects(&self) -> bool {
        self.linkage().subject_column.is_some()
    }

    /// Whether the strategy joins rows to `visit_occurrence`
    pub fn needs_visits(&self) -> bool {
        self.linkage().visit_column.is_some()
    }

    pub fn linkage(&self) -> &Linkage {
        match self {
            TransformStrategy::Row(m) => &m.linkage,
            TransformStrategy::Eav(m) => &m.linkage,
        }
    }

    /// Concept domains the strategy looks codes up in
    pub fn domains(&self) -> BTreeSet<ConceptDomain> {
        match self {
            TransformStrategy::Row(m) => m.domains(),
            TransformStrategy::Eav(m) => m.domains(),
        }
    }

    pub fn validate(&self, query: &SourceQuery, target_columns: &[String]) -> Result<()> {
        match self {
            TransformStrategy::Row(m) => m.validate(query, target_columns),
            TransformStrategy::Eav(m) => m.validate(query, target_columns),
        }
    }
}

/// A source row with its resolved linkage
pub(crate) struct LinkedRow {
    pub row: Row,
    pub person_id: Option<i64>,
    pub visit_id: Option<i64>,
}

/// Splits a window into rows that satisfy every join and the excluded count
pub(crate) fn link_rows(
    batch: RawBatch,
    linkage: &Linkage,
    ctx: &TransformContext<'_>,
) -> (Vec<LinkedRow>, u64) {
    let mut linked = Vec::with_capacity(batch.len());
    let mut excluded = 0;
    for row in batch {
        let person_id = match linkage.subject_column.as_deref() {
            None => None,
            Some(column) => match ctx.subjects.person_id(row.get(column)) {
                Some(id) => Some(id),
                None => {
                    tracing::debug!(
                        subject = %row.get(column),
                        "Excluding row without a matching person"
                    );
                    excluded += 1;
                    continue;
                }
            },
        };
        let visit_id = match linkage.visit_column.as_deref() {
            None => None,
            Some(column) => match ctx.visits.and_then(|v| v.visit_id(row.get(column))) {
                Some(id) => Some(id),
                None => {
                    tracing::debug!(
                        session = %row.get(column),
                        "Excluding row without a matching visit"
                    );
                    excluded += 1;
                    continue;
                }
            },
        };
        linked.push(LinkedRow {
            row,
            person_id,
            visit_id,
        });
    }
    (linked, excluded)
}
