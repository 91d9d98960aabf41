//! `observation` from free-text history and status answers
//!
//! Each listed column becomes one record whose concept is looked up by the
//! column name in the Observation vocabulary. Rows with no answer at all are
//! filtered out at the source.

use super::{columns, table, EHR_TYPE_CONCEPT, SESSION_KEY};
use crate::adapters::store::{Filter, SourceQuery};
use crate::config::SchemaConfig;
use crate::core::concept::ConceptDomain;
use crate::core::cursor::AdvancePolicy;
use crate::core::job::{JobSpec, SourceDescriptor};
use crate::core::load::LoadMode;
use crate::core::transform::{
    AttributeMapping, AttributeRule, CodeSource, ConceptRule, FieldRule, TransformStrategy,
};
use crate::domain::ColumnType::{DateTime, Integer, Text};
use crate::domain::{ColumnType, Result, Value};
use std::collections::BTreeMap;

/// Source table, event date column and answer columns
type AnswerSource = (&'static str, &'static str, &'static str, &'static [&'static str]);

const ANSWER_SOURCES: [AnswerSource; 6] = [
    (
        "preop",
        "riskindex",
        "session_startdate",
        &[
            "h_o_ihd",
            "h_o_chf",
            "h_o_cva",
            "dm_on_insulin",
            "hypertension",
            "history_of_osa",
            "loud_snoring",
            "daytime_tiredness",
            "apnoea",
            "cpap_use",
        ],
    ),
    (
        "preop",
        "others",
        "session_startdate",
        &[
            "forget_prescribed_medications",
            "continence",
            "no_of_prior_hospital_admissions",
            "inhalation_burns",
            "tbsa",
        ],
    ),
    (
        "preop",
        "char",
        "session_startdate",
        &[
            "smoking_history",
            "pregnancy_gender",
            "alcohol_consumption",
            "presence_of_malignancy",
        ],
    ),
    ("postop", "discharge", "diagnosis_date", &["days_postop"]),
    (
        "postop",
        "info",
        "session_startdate",
        &["satisfaction_at_analgesia_removal"],
    ),
    ("postop", "icu", "session_startdate", &["resuscitation_status"]),
];

fn schema_for<'a>(schemas: &'a SchemaConfig, phase: &str) -> &'a str {
    match phase {
        "preop" => schemas.preop.as_str(),
        "intraop" => schemas.intraop.as_str(),
        _ => schemas.postop.as_str(),
    }
}

fn answers(
    schemas: &SchemaConfig,
    (phase, relation, event, answers): AnswerSource,
) -> Result<(SourceQuery, AttributeMapping)> {
    let mut defs = vec![
        ("anon_case_no", Text),
        ("id", Integer),
        ("session_id", Integer),
        (event, DateTime),
    ];
    defs.extend(answers.iter().map(|a| (*a, Text)));

    let query = SourceQuery::new(table(schema_for(schemas, phase), relation)?, columns(&defs))
        .with_filter(Filter::AnyNotNull(answers.iter().map(|a| a.to_string()).collect()))
        .keyed_by(["id"]);

    let mapping = AttributeMapping::new()
        .subject("anon_case_no")
        .visit(SESSION_KEY)
        .event(event)
        .field("person_id", FieldRule::Person)
        .field("observation_concept_id", FieldRule::AttributeConcept)
        .field("observation_date", FieldRule::EventDate)
        .field("observation_datetime", FieldRule::EventDateTime)
        .field(
            "observation_type_concept_id",
            FieldRule::Constant(Value::Integer(EHR_TYPE_CONCEPT)),
        )
        .field("value_as_string", FieldRule::AttributeText)
        .field("observation_source_value", FieldRule::AttributeLabel)
        .field("visit_occurrence_id", FieldRule::Visit);
    let mapping = answers.iter().fold(mapping, |mapping, answer| {
        mapping.attribute(
            AttributeRule::new(*answer)
                .concept(ConceptRule::lookup(ConceptDomain::Observation, CodeSource::Label)),
        )
    });
    Ok((query, mapping))
}

pub fn job(schemas: &SchemaConfig) -> Result<JobSpec> {
    let mut sources = Vec::with_capacity(ANSWER_SOURCES.len());
    let mut strategies = BTreeMap::new();
    for answer_source in ANSWER_SOURCES {
        let (query, mapping) = answers(schemas, answer_source)?;
        let source = SourceDescriptor::new(query)?;
        strategies.insert(source.id.clone(), TransformStrategy::Eav(mapping));
        sources.push(source);
    }

    Ok(JobSpec {
        name: "observation".to_string(),
        target: table(&schemas.omop, "observation")?,
        key_column: "observation_id".to_string(),
        columns: columns(&[
            ("observation_id", Integer),
            ("person_id", Integer),
            ("observation_concept_id", Integer),
            ("observation_date", ColumnType::Date),
            ("observation_datetime", DateTime),
            ("observation_type_concept_id", Integer),
            ("value_as_string", Text),
            ("observation_source_value", Text),
            ("visit_occurrence_id", Integer),
        ]),
        advance: AdvancePolicy::EmittedRowCount,
        load: LoadMode::Append,
        sources,
        strategies,
    })
}
