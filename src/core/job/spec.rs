//! Job specifications
//!
//! A [`JobSpec`] is the static description of one target entity's ETL job:
//! target columns, key column, advance policy, load mode, the ordered source
//! descriptors and one [`TransformStrategy`] per source id. Specs are checked
//! exhaustively by [`JobSpec::validate`] before any row is read.

use crate::adapters::store::SourceQuery;
use crate::core::concept::ConceptDomain;
use crate::core::cursor::AdvancePolicy;
use crate::core::load::LoadMode;
use crate::core::transform::TransformStrategy;
use crate::domain::ids::validate_identifier;
use crate::domain::{ColumnDef, ColumnType, EtlError, Result, SourceId, TableName};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// One source relation feeding a job
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDescriptor {
    pub id: SourceId,
    /// Typed, filtered, ordered projection of the source relation
    pub query: SourceQuery,
    /// Page size overriding the run's batch size
    pub page_size: Option<u64>,
}

impl SourceDescriptor {
    /// A descriptor identified by its relation name
    pub fn new(query: SourceQuery) -> Result<Self> {
        let id = SourceId::new(query.relation.as_str()).map_err(EtlError::Configuration)?;
        Ok(Self {
            id,
            query,
            page_size: None,
        })
    }

    pub fn with_id(mut self, id: SourceId) -> Self {
        self.id = id;
        self
    }

    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = Some(page_size);
        self
    }
}

/// Static description of one ETL job
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    /// Entity name used for selection (`measurement`)
    pub name: String,
    pub target: TableName,
    /// Integer column receiving surrogate keys
    pub key_column: String,
    /// Every target column the job writes
    pub columns: Vec<ColumnDef>,
    pub advance: AdvancePolicy,
    pub load: LoadMode,
    /// Sources in processing order
    pub sources: Vec<SourceDescriptor>,
    pub strategies: BTreeMap<SourceId, TransformStrategy>,
}

impl JobSpec {
    /// The strategy registered for `id`
    pub fn strategy(&self, id: &SourceId) -> Option<&TransformStrategy> {
        self.strategies.get(id)
    }

    /// Concept domains any strategy looks codes up in
    pub fn domains(&self) -> BTreeSet<ConceptDomain> {
        self.strategies
            .values()
            .flat_map(TransformStrategy::domains)
            .collect()
    }

    /// Whether any strategy joins rows to `person`
    pub fn needs_subjects(&self) -> bool {
        self.strategies.values().any(TransformStrategy::needs_subjects)
    }

    /// Whether any strategy joins rows to `visit_occurrence`
    pub fn needs_visits(&self) -> bool {
        self.strategies.values().any(TransformStrategy::needs_visits)
    }

    /// Columns a transformed record may carry: target columns other than
    /// the key and the link-resolved columns, plus staging keys
    pub fn record_columns(&self) -> Vec<String> {
        let linked = self.load.linked_columns();
        let mut columns: Vec<String> = self
            .columns
            .iter()
            .map(|c| c.name.clone())
            .filter(|c| *c != self.key_column && !linked.contains(&c.as_str()))
            .collect();
        if let LoadMode::StageThenMerge { keys, .. } = &self.load {
            columns.extend(keys.iter().map(|k| k.name.clone()));
        }
        columns
    }

    /// Validates the spec
    ///
    /// # Errors
    ///
    /// Returns [`EtlError::Configuration`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        let err = |msg: String| EtlError::Configuration(format!("job '{}': {msg}", self.name));

        if self.name.trim().is_empty() {
            return Err(EtlError::Configuration("job name cannot be empty".to_string()));
        }

        let mut names = HashSet::new();
        for column in &self.columns {
            validate_identifier(&column.name).map_err(err)?;
            if !names.insert(column.name.as_str()) {
                return Err(err(format!("column '{}' is declared twice", column.name)));
            }
        }
        match self.columns.iter().find(|c| c.name == self.key_column) {
            Some(c) if c.ty == ColumnType::Integer => {}
            Some(_) => return Err(err(format!("key column '{}' must be an integer", self.key_column))),
            None => return Err(err(format!("key column '{}' is not a target column", self.key_column))),
        }

        self.validate_load(&names).map_err(err)?;

        if self.sources.is_empty() {
            return Err(err("no sources configured".to_string()));
        }

        let record_columns = self.record_columns();
        let mut ids = HashSet::new();
        for source in &self.sources {
            if !ids.insert(&source.id) {
                return Err(err(format!("source '{}' is configured twice", source.id)));
            }
            if source.page_size == Some(0) {
                return Err(err(format!("source '{}' has a zero page size", source.id)));
            }
            source.query.validate()?;
            if source.query.columns.is_empty() {
                return Err(err(format!("source '{}' reads no columns", source.id)));
            }
            if !source.query.has_total_order() {
                return Err(err(format!(
                    "source '{}' must be ordered by a unique key or by every projected column",
                    source.id
                )));
            }

            let strategy = self
                .strategy(&source.id)
                .ok_or_else(|| err(format!("no transform strategy for source '{}'", source.id)))?;
            if strategy.fans_out() && self.advance != AdvancePolicy::EmittedRowCount {
                return Err(err(format!(
                    "source '{}' fans out and requires the emitted_row_count advance policy",
                    source.id
                )));
            }
            strategy
                .validate(&source.query, &record_columns)
                .map_err(|e| err(format!("source '{}': {e}", source.id)))?;
        }

        if let Some(orphan) = self.strategies.keys().find(|id| !ids.contains(id)) {
            return Err(err(format!("strategy registered for unknown source '{orphan}'")));
        }
        Ok(())
    }

    fn validate_load(&self, columns: &HashSet<&str>) -> std::result::Result<(), String> {
        let LoadMode::StageThenMerge { keys, links } = &self.load else {
            return Ok(());
        };
        for key in keys {
            validate_identifier(&key.name)?;
            if columns.contains(key.name.as_str()) {
                return Err(format!("staging key '{}' is also a target column", key.name));
            }
        }
        for link in links {
            if !columns.contains(link.target_column.as_str()) {
                return Err(format!("link target '{}' is not a target column", link.target_column));
            }
            if link.target_column == self.key_column {
                return Err("the key column cannot be link-resolved".to_string());
            }
            if !keys.iter().any(|k| k.name == link.scratch_key) {
                return Err(format!("link key '{}' is not a staging key", link.scratch_key));
            }
            // the merge runs after keys are taken, so a dropped record leaves a gap
            if link.required && self.advance == AdvancePolicy::EmittedRowCount {
                return Err(format!(
                    "link on '{}' cannot be required under the emitted_row_count advance policy",
                    link.target_column
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::store::{KeyExpr, LinkJoin};
    use crate::core::transform::{AttributeMapping, AttributeRule, FieldRule, RowMapping};

    fn query() -> SourceQuery {
        SourceQuery::new(
            TableName::new("preop.char").unwrap(),
            vec![
                ColumnDef::new("id", ColumnType::Integer),
                ColumnDef::new("height", ColumnType::Float),
            ],
        )
        .keyed_by(["id"])
    }

    fn spec(strategy: TransformStrategy, advance: AdvancePolicy) -> JobSpec {
        let source = SourceDescriptor::new(query()).unwrap();
        JobSpec {
            name: "measurement".to_string(),
            target: TableName::new("omop.measurement").unwrap(),
            key_column: "measurement_id".to_string(),
            columns: vec![
                ColumnDef::new("measurement_id", ColumnType::Integer),
                ColumnDef::new("value_as_number", ColumnType::Float),
            ],
            advance,
            load: LoadMode::Append,
            strategies: BTreeMap::from([(source.id.clone(), strategy)]),
            sources: vec![source],
        }
    }

    fn eav() -> TransformStrategy {
        TransformStrategy::Eav(
            AttributeMapping::new()
                .field("value_as_number", FieldRule::AttributeNumber)
                .attribute(AttributeRule::new("height")),
        )
    }

    #[test]
    fn test_valid_spec() {
        assert!(spec(eav(), AdvancePolicy::EmittedRowCount).validate().is_ok());
    }

    #[test]
    fn test_fan_out_requires_emitted_row_count() {
        let err = spec(eav(), AdvancePolicy::FixedPage).validate().unwrap_err();
        assert!(err.to_string().contains("emitted_row_count"));
    }

    #[test]
    fn test_registry_must_be_exhaustive() {
        let mut missing = spec(eav(), AdvancePolicy::EmittedRowCount);
        missing.strategies.clear();
        assert!(missing.validate().is_err());

        let mut orphan = spec(eav(), AdvancePolicy::EmittedRowCount);
        orphan
            .strategies
            .insert(SourceId::new("preop.lab").unwrap(), eav());
        assert!(orphan.validate().is_err());
    }

    #[test]
    fn test_key_column_cannot_be_mapped() {
        let row = TransformStrategy::Row(
            RowMapping::new().field("measurement_id", FieldRule::Column("id".to_string())),
        );
        assert!(spec(row, AdvancePolicy::FixedPage).validate().is_err());
    }

    #[test]
    fn test_unordered_source_is_rejected() {
        let mut bad = spec(eav(), AdvancePolicy::EmittedRowCount);
        bad.sources[0].query = query().ordered_by(["height"]);
        let err = bad.validate().unwrap_err();
        assert!(err.to_string().contains("unique key"));

        bad.sources[0].query = query().ordered_by(["height", "id"]);
        assert!(bad.validate().is_ok());
    }

    #[test]
    fn test_required_link_needs_fixed_page() {
        let mut staged = spec(eav(), AdvancePolicy::EmittedRowCount);
        staged
            .columns
            .push(ColumnDef::new("visit_occurrence_id", ColumnType::Integer));
        let link = LinkJoin {
            reference: TableName::new("omop.visit_occurrence").unwrap(),
            scratch_key: "session_id".to_string(),
            reference_key: KeyExpr::Column("visit_occurrence_id".to_string()),
            reference_value: "visit_occurrence_id".to_string(),
            target_column: "visit_occurrence_id".to_string(),
            rank_by: vec!["visit_occurrence_id".to_string()],
            required: true,
        };
        staged.load = LoadMode::StageThenMerge {
            keys: vec![ColumnDef::new("session_id", ColumnType::Integer)],
            links: vec![link.clone()],
        };
        let err = staged.validate().unwrap_err();
        assert!(err.to_string().contains("cannot be required"));

        staged.load = LoadMode::StageThenMerge {
            keys: vec![ColumnDef::new("session_id", ColumnType::Integer)],
            links: vec![LinkJoin {
                required: false,
                ..link
            }],
        };
        assert!(staged.validate().is_ok());
    }

    #[test]
    fn test_key_column_must_exist() {
        let mut bad = spec(eav(), AdvancePolicy::EmittedRowCount);
        bad.key_column = "observation_id".to_string();
        assert!(bad.validate().is_err());
    }
}
