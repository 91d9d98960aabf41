//! Concept resolution
//!
//! A [`ConceptLookup`] maps normalized source codes to standardized concept
//! ids for one concept domain. It is built fresh at every job start from
//! `source_to_concept_map`, restricted to the configured source vocabularies
//! and to concepts of the lookup's domain, and discarded when the job ends.
//!
//! Resolution never fails: a code with no mapping resolves to
//! [`ConceptId::UNMAPPED`].

use crate::adapters::store::{Filter, RelationalStore, SourceQuery};
use crate::core::cursor::BatchCursor;
use crate::domain::{ColumnDef, ColumnType, ConceptId, EtlError, Result, TableName, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// OMOP concept domain a lookup is restricted to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConceptDomain {
    Condition,
    Measurement,
    Observation,
}

impl ConceptDomain {
    /// `concept.domain_id` value of this domain
    pub fn domain_id(self) -> &'static str {
        match self {
            ConceptDomain::Condition => "Condition",
            ConceptDomain::Measurement => "Measurement",
            ConceptDomain::Observation => "Observation",
        }
    }
}

impl fmt::Display for ConceptDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.domain_id())
    }
}

impl FromStr for ConceptDomain {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "condition" => Ok(ConceptDomain::Condition),
            "measurement" => Ok(ConceptDomain::Measurement),
            "observation" => Ok(ConceptDomain::Observation),
            _ => Err(format!(
                "Invalid concept domain '{s}'. Must be one of: condition, measurement, observation"
            )),
        }
    }
}

/// Trims and case-folds a source code
pub fn normalize_code(code: &str) -> String {
    code.trim().to_lowercase()
}

/// Source code to concept id table for one domain
#[derive(Debug, Clone)]
pub struct ConceptLookup {
    domain: ConceptDomain,
    entries: HashMap<String, ConceptId>,
}

impl ConceptLookup {
    /// Builds a lookup from `(code, concept)` pairs; the first pair for a
    /// normalized code wins and blank codes are ignored
    pub fn from_entries<I, S>(domain: ConceptDomain, entries: I) -> Self
    where
        I: IntoIterator<Item = (S, ConceptId)>,
        S: AsRef<str>,
    {
        let mut map = HashMap::new();
        for (code, concept) in entries {
            let key = normalize_code(code.as_ref());
            if !key.is_empty() {
                map.entry(key).or_insert(concept);
            }
        }
        Self {
            domain,
            entries: map,
        }
    }

    /// Reads the mapping table window by window and builds the lookup
    ///
    /// Rows are ordered by `(source_code, target_concept_id)`, so when a code
    /// maps to several concepts the smallest concept id wins.
    ///
    /// # Errors
    ///
    /// Returns a store error if the mapping or concept table cannot be read.
    pub async fn build(
        store: &mut dyn RelationalStore,
        omop_schema: &str,
        domain: ConceptDomain,
        vocabularies: &[String],
        page_size: u64,
    ) -> Result<Self> {
        let query = mapping_query(omop_schema, domain, vocabularies)?;
        let cursor = BatchCursor::open(store, &query, page_size).await?;
        let total = cursor.total();

        let mut pairs = Vec::new();
        for window in cursor {
            for row in store.fetch_window(&query, window).await? {
                let (Some(code), Some(concept)) = (
                    row.get("source_code").as_text(),
                    row.get("target_concept_id").as_i64(),
                ) else {
                    continue;
                };
                pairs.push((code, ConceptId::new(concept)));
            }
        }

        let lookup = Self::from_entries(domain, pairs);
        tracing::info!(
            domain = %domain,
            mapping_rows = total,
            codes = lookup.len(),
            "Concept lookup built"
        );
        Ok(lookup)
    }

    /// The concept mapped to `code`, if any
    pub fn get(&self, code: &str) -> Option<ConceptId> {
        self.entries.get(&normalize_code(code)).copied()
    }

    /// The concept mapped to `code`, or [`ConceptId::UNMAPPED`]
    pub fn resolve(&self, code: &str) -> ConceptId {
        self.get(code).unwrap_or(ConceptId::UNMAPPED)
    }

    pub fn domain(&self) -> ConceptDomain {
        self.domain
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn mapping_query(
    omop_schema: &str,
    domain: ConceptDomain,
    vocabularies: &[String],
) -> Result<SourceQuery> {
    let mapping =
        TableName::qualified(omop_schema, "source_to_concept_map").map_err(EtlError::Configuration)?;
    let concept = TableName::qualified(omop_schema, "concept").map_err(EtlError::Configuration)?;

    let vocabularies = vocabularies
        .iter()
        .map(|v| Value::from(v.as_str()))
        .collect();

    Ok(SourceQuery::new(
        mapping,
        vec![
            ColumnDef::new("source_code", ColumnType::Text),
            ColumnDef::new("target_concept_id", ColumnType::Integer),
        ],
    )
    .with_filter(Filter::In("source_vocabulary_id".to_string(), vocabularies))
    .with_filter(Filter::SemiJoin {
        column: "target_concept_id".to_string(),
        relation: concept,
        key: "concept_id".to_string(),
        filter: Box::new(Filter::Eq(
            "domain_id".to_string(),
            Value::from(domain.domain_id()),
        )),
    })
    .ordered_by(["source_code", "target_concept_id"]))
}

/// The lookups built for one job, keyed by domain
#[derive(Debug, Clone, Default)]
pub struct ConceptLookups {
    lookups: HashMap<ConceptDomain, ConceptLookup>,
}

impl ConceptLookups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) the lookup of its domain
    pub fn insert(&mut self, lookup: ConceptLookup) {
        self.lookups.insert(lookup.domain(), lookup);
    }

    /// The concept mapped to `code` in `domain`; `None` when the domain has
    /// no lookup or the code is unmapped
    pub fn get(&self, domain: ConceptDomain, code: &str) -> Option<ConceptId> {
        self.lookups.get(&domain).and_then(|l| l.get(code))
    }

    pub fn contains(&self, domain: ConceptDomain) -> bool {
        self.lookups.contains_key(&domain)
    }
}
