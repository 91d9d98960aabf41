//! End-to-end runs of the built-in entities and script jobs
//!
//! The runner is driven from a parsed configuration against the in-memory
//! store, the same way the `etl` command drives it against PostgreSQL.

use chrono::NaiveDate;
use periop_omop::adapters::memory::MemoryStore;
use periop_omop::config::{parse_config, EtlConfig};
use periop_omop::core::runner::EtlRunner;
use periop_omop::domain::{ColumnDef, ColumnType, EtlError, Row, Value};
use std::fs;
use tempfile::TempDir;

fn config(extra: &str) -> EtlConfig {
    parse_config(&format!(
        r#"
[database]
connection_string = "postgresql://etl@localhost/cdm"

[processing]
batch_size = 2

{extra}
"#
    ))
    .unwrap()
}

fn diagnosed(id: i64, case_no: &str, code: Option<&str>) -> Row {
    let at = NaiveDate::from_ymd_opt(2024, 3, 1)
        .and_then(|d| d.and_hms_opt(12, 30, 0))
        .unwrap();
    let row = Row::new()
        .with("id", id)
        .with("anon_case_no", case_no)
        .with("diagnosis_date", at)
        .with("session_id", 40i64 + id);
    match code {
        Some(code) => row.with("diagnosis_code", code),
        None => row,
    }
}

async fn cdm() -> MemoryStore {
    let store = MemoryStore::new();
    let tables: [(&str, Vec<(&str, ColumnType)>); 5] = [
        (
            "omop.person",
            vec![
                ("person_id", ColumnType::Integer),
                ("person_source_value", ColumnType::Text),
            ],
        ),
        (
            "omop.concept",
            vec![("concept_id", ColumnType::Integer), ("domain_id", ColumnType::Text)],
        ),
        (
            "omop.source_to_concept_map",
            vec![
                ("source_code", ColumnType::Text),
                ("source_vocabulary_id", ColumnType::Text),
                ("target_concept_id", ColumnType::Integer),
            ],
        ),
        (
            "postop.discharge",
            vec![
                ("id", ColumnType::Integer),
                ("anon_case_no", ColumnType::Text),
                ("diagnosis_date", ColumnType::DateTime),
                ("diagnosis_code", ColumnType::Text),
                ("session_id", ColumnType::Integer),
            ],
        ),
        (
            "omop.condition_occurrence",
            vec![
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
            ],
        ),
    ];
    for (name, columns) in tables {
        store
            .create_table(
                name,
                columns
                    .into_iter()
                    .map(|(c, ty)| ColumnDef::new(c, ty))
                    .collect(),
            )
            .await
            .unwrap();
    }

    store
        .insert_rows(
            "omop.person",
            vec![
                Row::new().with("person_id", 1i64).with("person_source_value", "A"),
                Row::new().with("person_id", 2i64).with("person_source_value", "B"),
            ],
        )
        .await
        .unwrap();
    store
        .insert_rows(
            "omop.concept",
            vec![Row::new().with("concept_id", 201826i64).with("domain_id", "Condition")],
        )
        .await
        .unwrap();
    store
        .insert_rows(
            "omop.source_to_concept_map",
            vec![Row::new()
                .with("source_code", "E11.9")
                .with("source_vocabulary_id", "PASAR")
                .with("target_concept_id", 201826i64)],
        )
        .await
        .unwrap();
    store
        .insert_rows(
            "postop.discharge",
            vec![
                diagnosed(1, "A", Some("E11.9")),
                diagnosed(2, "Z", Some("E11.9")),
                diagnosed(3, "B", None),
                diagnosed(4, "B", Some("I10")),
            ],
        )
        .await
        .unwrap();
    store
}

#[tokio::test]
async fn test_condition_occurrence_end_to_end() {
    let mut store = cdm().await;
    let runner = EtlRunner::new(config(""));
    let tables = vec!["condition_occurrence".to_string()];

    let report = runner.run(&mut store, Some(tables.as_slice())).await.unwrap();

    let rows = store.rows("omop.condition_occurrence").await;
    assert_eq!(rows.len(), 2);

    // the unlinked subject still consumes its slot of the page
    assert_eq!(rows[0].get("condition_occurrence_id"), &Value::Integer(1));
    assert_eq!(rows[1].get("condition_occurrence_id"), &Value::Integer(3));

    assert_eq!(rows[0].get("person_id"), &Value::Integer(1));
    assert_eq!(rows[0].get("condition_concept_id"), &Value::Integer(201826));
    assert_eq!(
        rows[0].get("condition_start_date"),
        &Value::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
    );
    assert_eq!(rows[0].get("condition_type_concept_id"), &Value::Integer(32879));
    assert_eq!(rows[1].get("condition_concept_id"), &Value::Integer(0));
    assert_eq!(rows[1].get("condition_source_value"), &Value::from("I10"));

    let job = &report.summary.jobs[0];
    assert_eq!(job.rows_fetched, 3);
    assert_eq!(job.rows_excluded, 1);
    assert_eq!(job.rows_ingested, 2);

    let stats = &report.statistics;
    assert_eq!(stats.tables["condition_occurrence"].records_count, 2);
    assert!(stats.tables["condition_occurrence"]
        .time_taken
        .as_deref()
        .is_some_and(|t| t.ends_with('s')));
    assert_eq!(stats.total.records_count, 2);

    let json: serde_json::Value = serde_json::from_str(&stats.to_json().unwrap()).unwrap();
    assert_eq!(json["condition_occurrence"]["records_count"], 2);
    assert_eq!(json["total"]["records_count"], 2);
}

#[tokio::test]
async fn test_rerun_replaces_previous_load() {
    let mut store = cdm().await;
    let runner = EtlRunner::new(config(""));
    let tables = vec!["condition_occurrence".to_string()];

    runner.run(&mut store, Some(tables.as_slice())).await.unwrap();
    let first = store.rows("omop.condition_occurrence").await;
    runner.run(&mut store, Some(tables.as_slice())).await.unwrap();

    assert_eq!(store.rows("omop.condition_occurrence").await, first);
}

#[tokio::test]
async fn test_dry_run_counts_without_writing() {
    let mut store = cdm().await;
    let runner = EtlRunner::new(config("[application]\ndry_run = true"));
    let tables = vec!["condition_occurrence".to_string()];

    let report = runner.run(&mut store, Some(tables.as_slice())).await.unwrap();

    assert!(report.summary.jobs[0].dry_run);
    assert_eq!(report.summary.jobs[0].rows_ingested, 2);
    assert!(store.rows("omop.condition_occurrence").await.is_empty());
    assert_eq!(report.statistics.total.records_count, 0);
}

#[tokio::test]
async fn test_unknown_table_fails_before_touching_the_store() {
    let mut store = cdm().await;
    let runner = EtlRunner::new(config(""));
    let tables = vec!["condition_occurrence".to_string(), "specimen".to_string()];

    let err = runner
        .run(&mut store, Some(tables.as_slice()))
        .await
        .unwrap_err();

    assert!(matches!(err, EtlError::Configuration(_)));
    assert!(store.journal().await.is_empty());
}

#[tokio::test]
async fn test_script_job_runs_in_configured_order() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("view.sql"),
        "CREATE VIEW {OMOP_SCHEMA}.visit_source AS SELECT * FROM {INTRAOP_SCHEMA}.operation;",
    )
    .unwrap();
    fs::write(
        dir.path().join("insert.sql"),
        "INSERT INTO {OMOP_SCHEMA}.visit_occurrence SELECT * FROM {OMOP_SCHEMA}.visit_source;",
    )
    .unwrap();

    let mut store = cdm().await;
    store
        .create_table(
            "omop.visit_occurrence",
            vec![ColumnDef::new("visit_occurrence_id", ColumnType::Integer)],
        )
        .await
        .unwrap();
    store
        .insert_rows(
            "omop.visit_occurrence",
            vec![Row::new().with("visit_occurrence_id", 4201i64)],
        )
        .await
        .unwrap();

    let runner = EtlRunner::new(config(&format!(
        r#"
[[scripts]]
target = "visit_occurrence"
drop_views = ["visit_source"]
files = ["view.sql", "insert.sql"]
base_path = "{}"
"#,
        dir.path().display()
    )));
    let tables = vec!["visit_occurrence".to_string()];
    let report = runner.run(&mut store, Some(tables.as_slice())).await.unwrap();

    assert_eq!(
        store.scripts().await,
        vec![
            "CREATE VIEW omop.visit_source AS SELECT * FROM intraop.operation;".to_string(),
            "INSERT INTO omop.visit_occurrence SELECT * FROM omop.visit_source;".to_string(),
        ]
    );
    assert!(store.rows("omop.visit_occurrence").await.is_empty());
    assert_eq!(report.statistics.tables["visit_occurrence"].records_count, 0);
    assert!(!store.in_transaction().await);
}

#[tokio::test]
async fn test_unreadable_script_aborts_before_any_statement() {
    let mut store = cdm().await;
    let runner = EtlRunner::new(config(
        r#"
[[scripts]]
target = "condition_occurrence"
files = ["/nonexistent/periop-omop/condition.sql"]
"#,
    ));
    let tables = vec!["condition_occurrence".to_string()];

    let err = runner
        .run(&mut store, Some(tables.as_slice()))
        .await
        .unwrap_err();

    assert!(matches!(err, EtlError::Configuration(_)));
    assert!(store.journal().await.is_empty());
}
