//! `condition_occurrence` from discharge diagnoses
//!
//! One record per `postop.discharge` row. The concept comes from the
//! diagnosis code through the Condition lookup.

use super::{columns, table, EHR_TYPE_CONCEPT};
use crate::adapters::store::{Filter, SourceQuery};
use crate::config::SchemaConfig;
use crate::core::concept::ConceptDomain;
use crate::core::cursor::AdvancePolicy;
use crate::core::job::{JobSpec, SourceDescriptor};
use crate::core::load::LoadMode;
use crate::core::transform::{CodeSource, ConceptRule, FieldRule, RowMapping, TransformStrategy};
use crate::domain::{ColumnType, Result, Value};
use std::collections::BTreeMap;

/// "Primary diagnosis"
const CONDITION_STATUS_CONCEPT: i64 = 32896;

pub fn job(schemas: &SchemaConfig) -> Result<JobSpec> {
    let query = SourceQuery::new(
        table(&schemas.postop, "discharge")?,
        columns(&[
            ("anon_case_no", ColumnType::Text),
            ("id", ColumnType::Integer),
            ("diagnosis_date", ColumnType::DateTime),
            ("diagnosis_code", ColumnType::Text),
            ("session_id", ColumnType::Integer),
        ]),
    )
    .with_filter(Filter::NotNull("diagnosis_code".to_string()))
    .keyed_by(["id"]);

    let mapping = RowMapping::new()
        .subject("anon_case_no")
        .field("person_id", FieldRule::Person)
        .field(
            "condition_concept_id",
            FieldRule::Concept(ConceptRule::lookup(
                ConceptDomain::Condition,
                CodeSource::Column("diagnosis_code".to_string()),
            )),
        )
        .field("condition_start_date", FieldRule::DateOf("diagnosis_date".to_string()))
        .field("condition_start_datetime", FieldRule::Column("diagnosis_date".to_string()))
        .field(
            "condition_type_concept_id",
            FieldRule::Constant(Value::Integer(EHR_TYPE_CONCEPT)),
        )
        .field(
            "condition_status_concept_id",
            FieldRule::Constant(Value::Integer(CONDITION_STATUS_CONCEPT)),
        )
        .field("condition_source_value", FieldRule::Column("diagnosis_code".to_string()));

    let source = SourceDescriptor::new(query)?;
    Ok(JobSpec {
        name: "condition_occurrence".to_string(),
        target: table(&schemas.omop, "condition_occurrence")?,
        key_column: "condition_occurrence_id".to_string(),
        columns: columns(&[
            ("condition_occurrence_id", ColumnType::Integer),
            ("person_id", ColumnType::Integer),
            ("condition_concept_id", ColumnType::Integer),
            ("condition_start_date", ColumnType::Date),
            ("condition_start_datetime", ColumnType::DateTime),
            ("condition_end_date", ColumnType::Date),
            ("condition_end_datetime", ColumnType::DateTime),
            ("condition_type_concept_id", ColumnType::Integer),
            ("condition_status_concept_id", ColumnType::Integer),
            ("condition_source_value", ColumnType::Text),
        ]),
        advance: AdvancePolicy::FixedPage,
        load: LoadMode::Append,
        strategies: BTreeMap::from([(source.id.clone(), TransformStrategy::Row(mapping))]),
        sources: vec![source],
    })
}
