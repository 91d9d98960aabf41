//! Final statistics
//!
//! Row counts of the ingested CDM tables, optionally joined with the time
//! each job took, rendered as JSON:
//!
//! ```json
//! {
//!   "measurement": { "records_count": 120, "time_taken": "1.204s" },
//!   "total": { "records_count": 120 }
//! }
//! ```

use crate::adapters::store::{RelationalStore, SourceQuery};
use crate::core::job::RunSummary;
use crate::domain::{EtlError, Result, TableName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Statistics of one table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStatistics {
    pub records_count: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_taken: Option<String>,
}

/// Statistics of every ingested table plus their total
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalStatistics {
    #[serde(flatten)]
    pub tables: BTreeMap<String, TableStatistics>,

    pub total: TableStatistics,
}

impl FinalStatistics {
    /// Attaches each job's duration to its table
    pub fn with_timings(mut self, run: &RunSummary) -> Self {
        for job in &run.jobs {
            if let Some(stats) = self.tables.get_mut(&job.name) {
                stats.time_taken = Some(format_duration(job.duration));
            }
        }
        self
    }

    /// Pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn format_duration(duration: Duration) -> String {
    format!("{:.3}s", duration.as_secs_f64())
}

/// Counts the rows of every table in `tables` under `omop_schema`
///
/// # Errors
///
/// Returns a store error if any table cannot be counted.
pub async fn collect_statistics(
    store: &mut dyn RelationalStore,
    omop_schema: &str,
    tables: &[String],
) -> Result<FinalStatistics> {
    let mut statistics = FinalStatistics::default();
    for table in tables {
        let relation =
            TableName::qualified(omop_schema, table).map_err(EtlError::Configuration)?;
        let records_count = store.count(&SourceQuery::new(relation, Vec::new())).await?;
        tracing::debug!(table = %table, records_count, "Counted table");

        statistics.total.records_count += records_count;
        statistics.tables.insert(
            table.clone(),
            TableStatistics {
                records_count,
                time_taken: None,
            },
        );
    }
    Ok(statistics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryStore;
    use crate::core::job::JobSummary;
    use crate::domain::{ColumnDef, ColumnType, Row};

    async fn store() -> MemoryStore {
        let store = MemoryStore::new();
        for (table, rows) in [("omop.measurement", 3i64), ("omop.observation", 2)] {
            store
                .create_table(table, vec![ColumnDef::new("id", ColumnType::Integer)])
                .await
                .unwrap();
            store
                .insert_rows(table, (0..rows).map(|i| Row::new().with("id", i)).collect())
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_collect_statistics_totals() {
        let mut store = store().await;
        let tables = vec!["observation".to_string(), "measurement".to_string()];

        let stats = collect_statistics(&mut store, "omop", &tables).await.unwrap();
        assert_eq!(stats.tables["measurement"].records_count, 3);
        assert_eq!(stats.tables["observation"].records_count, 2);
        assert_eq!(stats.total.records_count, 5);
    }

    #[tokio::test]
    async fn test_missing_table_fails() {
        let mut store = store().await;
        let tables = vec!["death".to_string()];
        assert!(collect_statistics(&mut store, "omop", &tables).await.is_err());
    }

    #[test]
    fn test_json_layout() {
        let mut stats = FinalStatistics::default();
        stats.tables.insert(
            "measurement".to_string(),
            TableStatistics {
                records_count: 3,
                time_taken: None,
            },
        );
        stats.total.records_count = 3;

        let target = TableName::new("omop.measurement").unwrap();
        let run = RunSummary {
            jobs: vec![JobSummary::new("measurement", target).with_duration(Duration::from_millis(1500))],
            duration: Duration::from_secs(2),
        };
        let json: serde_json::Value =
            serde_json::from_str(&stats.with_timings(&run).to_json().unwrap()).unwrap();

        assert_eq!(json["measurement"]["records_count"], 3);
        assert_eq!(json["measurement"]["time_taken"], "1.500s");
        assert_eq!(json["total"]["records_count"], 3);
        assert!(json["total"].get("time_taken").is_none());
    }
}
