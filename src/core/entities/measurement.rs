//! `measurement` from vitals, labs and scores
//!
//! Every source is exploded attribute by attribute. Vital-sign columns of
//! `preop.char` carry fixed LOINC concepts; lab-style sources name the test
//! in a label column that is looked up in the Measurement vocabulary.
//! Results that are not numeric keep their text in `value_source_value`.

use super::{columns, table, EHR_TYPE_CONCEPT, SESSION_KEY};
use crate::adapters::store::SourceQuery;
use crate::config::SchemaConfig;
use crate::core::concept::ConceptDomain;
use crate::core::cursor::AdvancePolicy;
use crate::core::job::{JobSpec, SourceDescriptor};
use crate::core::load::LoadMode;
use crate::core::transform::{
    AttributeMapping, AttributeRule, CodeSource, ConceptRule, FieldRule, TransformStrategy,
};
use crate::domain::{ColumnType, Result, Value};
use std::collections::BTreeMap;

use crate::domain::ColumnType::{DateTime, Float, Integer, Text};

/// LOINC concepts of the `preop.char` vital signs
const VITAL_SIGNS: [(&str, i64); 9] = [
    ("height", 3036277),
    ("weight", 3025315),
    ("bmi", 3038553),
    ("systolic_bp", 3004249),
    ("diastolic_bp", 3012888),
    ("heart_rate", 3027018),
    ("o2_saturation", 40762499),
    ("temperature", 3020891),
    ("pain_score", 43055141),
];

fn by_label() -> ConceptRule {
    ConceptRule::lookup(ConceptDomain::Measurement, CodeSource::Label)
}

/// Fields shared by every source; `session` links rows to their visit
fn base_mapping(session: bool) -> AttributeMapping {
    let mapping = AttributeMapping::new()
        .subject("anon_case_no")
        .field("person_id", FieldRule::Person)
        .field("measurement_concept_id", FieldRule::AttributeConcept)
        .field("measurement_date", FieldRule::EventDate)
        .field("measurement_datetime", FieldRule::EventDateTime)
        .field(
            "measurement_type_concept_id",
            FieldRule::Constant(Value::Integer(EHR_TYPE_CONCEPT)),
        )
        .field("value_as_number", FieldRule::AttributeNumber)
        .field("value_source_value", FieldRule::AttributeText)
        .field("measurement_source_value", FieldRule::AttributeLabel);
    if session {
        mapping
            .visit(SESSION_KEY)
            .field("visit_occurrence_id", FieldRule::Visit)
    } else {
        mapping
    }
}

fn preop_lab(schemas: &SchemaConfig) -> Result<(SourceQuery, AttributeMapping)> {
    let query = SourceQuery::new(
        table(&schemas.preop, "lab")?,
        columns(&[
            ("anon_case_no", Text),
            ("id", Integer),
            ("session_id", Integer),
            ("preop_lab_test_description", Text),
            ("preop_lab_result_value", Text),
            ("preop_lab_collection_datetime", DateTime),
        ]),
    )
    .keyed_by(["id"]);
    let mapping = base_mapping(true).attribute(
        AttributeRule::new("preop_lab_result_value")
            .label_column("preop_lab_test_description")
            .concept(by_label())
            .at("preop_lab_collection_datetime"),
    );
    Ok((query, mapping))
}

fn preop_char(schemas: &SchemaConfig) -> Result<(SourceQuery, AttributeMapping)> {
    let mut defs = vec![
        ("anon_case_no", Text),
        ("id", Integer),
        ("session_id", Integer),
        ("session_startdate", DateTime),
    ];
    defs.extend(VITAL_SIGNS.iter().map(|(column, _)| (*column, Float)));
    defs.push(("o2_supplementaries", Text));

    let query = SourceQuery::new(table(&schemas.preop, "char")?, columns(&defs)).keyed_by(["id"]);
    let mut mapping = base_mapping(true).event("session_startdate");
    for (column, concept) in VITAL_SIGNS {
        mapping = mapping.attribute(
            AttributeRule::new(column).concept(
                ConceptRule::constant(concept).or_lookup(ConceptDomain::Measurement, CodeSource::Label),
            ),
        );
    }
    mapping = mapping.attribute(AttributeRule::new("o2_supplementaries").concept(by_label()));
    Ok((query, mapping))
}

fn intraop_aimsvitals(schemas: &SchemaConfig) -> Result<(SourceQuery, AttributeMapping)> {
    let query = SourceQuery::new(
        table(&schemas.intraop, "aimsvitals")?,
        columns(&[
            ("anon_case_no", Text),
            ("id", Integer),
            ("session_id", Integer),
            ("vitalcode", Text),
            ("vital_num_value", Float),
            ("vitaldt", DateTime),
        ]),
    )
    .keyed_by(["id"]);
    let mapping = base_mapping(true).attribute(
        AttributeRule::new("vital_num_value")
            .label_column("vitalcode")
            .concept(by_label())
            .at("vitaldt"),
    );
    Ok((query, mapping))
}

fn intraop_operation(schemas: &SchemaConfig) -> Result<(SourceQuery, AttributeMapping)> {
    let query = SourceQuery::new(
        table(&schemas.intraop, "operation")?,
        columns(&[
            ("anon_case_no", Text),
            ("vital_code", Text),
            ("vital_signs_result", Float),
            ("vital_signs_taken_datetime", DateTime),
        ]),
    )
    // no surrogate key; every projected column takes part in the order
    .ordered_by([
        "anon_case_no",
        "vital_signs_taken_datetime",
        "vital_code",
        "vital_signs_result",
    ]);
    let mapping = base_mapping(false).attribute(
        AttributeRule::new("vital_signs_result")
            .label_column("vital_code")
            .concept(by_label())
            .at("vital_signs_taken_datetime"),
    );
    Ok((query, mapping))
}

fn postop_lab(schemas: &SchemaConfig) -> Result<(SourceQuery, AttributeMapping)> {
    let query = SourceQuery::new(
        table(&schemas.postop, "lab")?,
        columns(&[
            ("anon_case_no", Text),
            ("id", Integer),
            ("session_id", Integer),
            ("postop_lab_collection_datetime_max", DateTime),
            ("postop_lab_collection_datetime_min", DateTime),
            ("postop_lab_test_desc", Text),
            ("postop_result_value_max", Float),
            ("postop_result_value_min", Float),
        ]),
    )
    .keyed_by(["id"]);
    let mapping = base_mapping(true)
        .attribute(
            AttributeRule::new("postop_result_value_max")
                .label_column("postop_lab_test_desc")
                .concept(by_label())
                .at("postop_lab_collection_datetime_max"),
        )
        .attribute(
            AttributeRule::new("postop_result_value_min")
                .label_column("postop_lab_test_desc")
                .concept(by_label())
                .at("postop_lab_collection_datetime_min"),
        );
    Ok((query, mapping))
}

fn postop_labsall(schemas: &SchemaConfig) -> Result<(SourceQuery, AttributeMapping)> {
    let query = SourceQuery::new(
        table(&schemas.postop, "labsall")?,
        columns(&[
            ("anon_case_no", Text),
            ("id", Integer),
            ("session_id", Integer),
            ("gen_lab_lab_test_code", Text),
            ("gen_lab_result_value", Text),
            ("gen_lab_specimen_collection_date", DateTime),
        ]),
    )
    .keyed_by(["id"]);
    let mapping = base_mapping(true).attribute(
        AttributeRule::new("gen_lab_result_value")
            .label_column("gen_lab_lab_test_code")
            .concept(by_label())
            .at("gen_lab_specimen_collection_date"),
    );
    Ok((query, mapping))
}

fn session_scores(
    relation: crate::domain::TableName,
    scores: &[(&'static str, ColumnType)],
) -> (SourceQuery, AttributeMapping) {
    let mut defs = vec![
        ("anon_case_no", Text),
        ("id", Integer),
        ("session_id", Integer),
        ("session_startdate", DateTime),
    ];
    defs.extend_from_slice(scores);
    let query = SourceQuery::new(relation, columns(&defs)).keyed_by(["id"]);
    let mapping = scores.iter().fold(
        base_mapping(true).event("session_startdate"),
        |mapping, (column, _)| mapping.attribute(AttributeRule::new(*column).concept(by_label())),
    );
    (query, mapping)
}

fn preop_others(schemas: &SchemaConfig) -> Result<(SourceQuery, AttributeMapping)> {
    Ok(session_scores(
        table(&schemas.preop, "others")?,
        &[
            ("asa_score_aims", Float),
            ("asa_score_eaf", Text),
            ("efs_total_score", Integer),
        ],
    ))
}

fn preop_riskindex(schemas: &SchemaConfig) -> Result<(SourceQuery, AttributeMapping)> {
    Ok(session_scores(
        table(&schemas.preop, "riskindex")?,
        &[
            ("asa_class", Text),
            ("cri_functional_status", Text),
            ("cardiac_risk_index", Float),
            ("cardiac_risk_class", Text),
            ("osa_risk_index", Text),
            ("act_risk", Text),
        ],
    ))
}

fn intraop_nurvitals(schemas: &SchemaConfig) -> Result<(SourceQuery, AttributeMapping)> {
    let query = SourceQuery::new(
        table(&schemas.intraop, "nurvitals")?,
        columns(&[
            ("anon_case_no", Text),
            ("id", Integer),
            ("authored_datetime", DateTime),
            ("document_item_desc", Text),
            ("value_text", Text),
        ]),
    )
    .keyed_by(["id"]);
    let mapping = base_mapping(false).attribute(
        AttributeRule::new("value_text")
            .label_column("document_item_desc")
            .concept(by_label())
            .at("authored_datetime"),
    );
    Ok((query, mapping))
}

pub fn job(schemas: &SchemaConfig) -> Result<JobSpec> {
    let parts = [
        preop_lab(schemas)?,
        preop_char(schemas)?,
        intraop_aimsvitals(schemas)?,
        intraop_operation(schemas)?,
        postop_lab(schemas)?,
        postop_labsall(schemas)?,
        preop_others(schemas)?,
        preop_riskindex(schemas)?,
        intraop_nurvitals(schemas)?,
    ];

    let mut sources = Vec::with_capacity(parts.len());
    let mut strategies = BTreeMap::new();
    for (query, mapping) in parts {
        let source = SourceDescriptor::new(query)?;
        strategies.insert(source.id.clone(), TransformStrategy::Eav(mapping));
        sources.push(source);
    }

    Ok(JobSpec {
        name: "measurement".to_string(),
        target: table(&schemas.omop, "measurement")?,
        key_column: "measurement_id".to_string(),
        columns: columns(&[
            ("measurement_id", Integer),
            ("person_id", Integer),
            ("measurement_concept_id", Integer),
            ("measurement_date", ColumnType::Date),
            ("measurement_datetime", DateTime),
            ("measurement_type_concept_id", Integer),
            ("value_as_number", Float),
            ("value_source_value", Text),
            ("measurement_source_value", Text),
            ("visit_occurrence_id", Integer),
        ]),
        advance: AdvancePolicy::EmittedRowCount,
        load: LoadMode::Append,
        sources,
        strategies,
    })
}
