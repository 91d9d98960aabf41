//! 1:1 row transformer

use super::mapping::{RecordScope, RowMapping};
use super::{link_rows, RawBatch, TransformContext, TransformedBatch};
use crate::core::keys::SurrogateKeyAllocator;
use crate::domain::{Result, Row, Value};

/// Maps every linked source row onto exactly one record
pub fn transform(
    mapping: &RowMapping,
    batch: RawBatch,
    ctx: &TransformContext<'_>,
    keys: &mut SurrogateKeyAllocator,
    key_column: &str,
) -> Result<TransformedBatch> {
    let (linked, excluded) = link_rows(batch, &mapping.linkage, ctx);

    let mut records = Vec::with_capacity(linked.len());
    for linked_row in &linked {
        let scope = RecordScope {
            row: &linked_row.row,
            person_id: linked_row.person_id,
            visit_id: linked_row.visit_id,
            attribute: None,
            label: None,
            event_column: None,
        };
        let mut record = Row::new();
        for (target, rule) in &mapping.fields {
            record.set(target.clone(), rule.evaluate(&scope, ctx)?);
        }
        records.push(record);
    }

    for (record, key) in records.iter_mut().zip(keys.next(linked.len())) {
        record.set(key_column, Value::Integer(key));
    }

    Ok(TransformedBatch { records, excluded })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::concept::{ConceptDomain, ConceptLookup, ConceptLookups};
    use crate::core::linkage::SubjectIndex;
    use crate::core::transform::{CodeSource, ConceptPrecedence, ConceptRule, FieldRule};
    use crate::domain::ConceptId;
    use chrono::NaiveDate;

    fn mapping() -> RowMapping {
        RowMapping::new()
            .subject("anon_case_no")
            .field("person_id", FieldRule::Person)
            .field(
                "condition_concept_id",
                FieldRule::Concept(ConceptRule::lookup(
                    ConceptDomain::Condition,
                    CodeSource::Column("diagnosis_code".to_string()),
                )),
            )
            .field(
                "condition_start_date",
                FieldRule::DateOf("diagnosis_date".to_string()),
            )
            .field(
                "condition_type_concept_id",
                FieldRule::Constant(Value::Integer(32879)),
            )
    }

    fn discharge(case: &str, code: &str) -> Row {
        Row::new()
            .with("anon_case_no", case)
            .with("diagnosis_code", code)
            .with(
                "diagnosis_date",
                NaiveDate::from_ymd_opt(2021, 3, 4)
                    .unwrap()
                    .and_hms_opt(10, 30, 0)
                    .unwrap(),
            )
    }

    #[test]
    fn test_one_record_per_linked_row() {
        let mut lookups = ConceptLookups::new();
        lookups.insert(ConceptLookup::from_entries(
            ConceptDomain::Condition,
            [("E11", ConceptId::new(201826))],
        ));
        let subjects = SubjectIndex::from_pairs([("A1", 1), ("A2", 2)]);
        let ctx = TransformContext::new(&lookups, &subjects, ConceptPrecedence::default());
        let mut keys = SurrogateKeyAllocator::new(1);

        let batch = vec![
            discharge("A1", "E11"),
            discharge("NOPE", "E11"),
            discharge("A2", "I10"),
        ];
        let out = transform(&mapping(), batch, &ctx, &mut keys, "condition_occurrence_id").unwrap();

        assert_eq!(out.excluded, 1);
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.records[0].get("condition_occurrence_id"), &Value::Integer(1));
        assert_eq!(out.records[1].get("condition_occurrence_id"), &Value::Integer(2));
        assert_eq!(out.records[0].get("condition_concept_id"), &Value::Integer(201826));
        assert_eq!(out.records[1].get("condition_concept_id"), &Value::Integer(0));
        assert_eq!(out.records[1].get("person_id"), &Value::Integer(2));
        assert_eq!(
            out.records[0].get("condition_start_date"),
            &Value::Date(NaiveDate::from_ymd_opt(2021, 3, 4).unwrap())
        );
        assert_eq!(keys.peek(), 3);
    }

    #[test]
    fn test_malformed_date_is_transform_error() {
        let lookups = ConceptLookups::new();
        let subjects = SubjectIndex::from_pairs([("A1", 1)]);
        let ctx = TransformContext::new(&lookups, &subjects, ConceptPrecedence::default());
        let mut keys = SurrogateKeyAllocator::new(1);

        let batch = vec![discharge("A1", "E11").with("diagnosis_date", "not a date")];
        let err = transform(&mapping(), batch, &ctx, &mut keys, "condition_occurrence_id").unwrap_err();
        assert!(err.to_string().contains("diagnosis_date"));
    }

    #[test]
    fn test_empty_window() {
        let lookups = ConceptLookups::new();
        let subjects = SubjectIndex::default();
        let ctx = TransformContext::new(&lookups, &subjects, ConceptPrecedence::default());
        let mut keys = SurrogateKeyAllocator::new(1);

        let out = transform(&mapping(), Vec::new(), &ctx, &mut keys, "id").unwrap();
        assert!(out.is_empty());
        assert_eq!(keys.peek(), 1);
    }
}
