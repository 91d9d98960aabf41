//! Built-in entity jobs
//!
//! Each submodule builds the [`JobSpec`] of one CDM entity from the
//! configured schema names. [`builtin_job`] is the registry the runner
//! consults before falling back to script jobs.

pub mod condition;
pub mod measurement;
pub mod observation;

use crate::config::SchemaConfig;
use crate::core::job::JobSpec;
use crate::domain::{ColumnDef, ColumnType, EtlError, Result, TableName};

/// Entities with a built-in job, in dependency order
pub const BUILTIN_ENTITIES: [&str; 3] = ["condition_occurrence", "observation", "measurement"];

/// Type concept shared by every built-in record ("EHR")
pub const EHR_TYPE_CONCEPT: i64 = 32879;

/// Source column joining a row to its visit
pub(crate) const SESSION_KEY: &str = "session_id";

/// The built-in job for `entity`, or `None` when there is none
///
/// # Errors
///
/// Returns [`EtlError::Configuration`] if the schema names produce an
/// invalid job.
pub fn builtin_job(entity: &str, schemas: &SchemaConfig) -> Result<Option<JobSpec>> {
    let spec = match entity {
        "condition_occurrence" => condition::job(schemas)?,
        "measurement" => measurement::job(schemas)?,
        "observation" => observation::job(schemas)?,
        _ => return Ok(None),
    };
    spec.validate()?;
    Ok(Some(spec))
}

/// Whether `entity` has a built-in job
pub fn is_builtin(entity: &str) -> bool {
    BUILTIN_ENTITIES.contains(&entity)
}

pub(crate) fn table(schema: &str, name: &str) -> Result<TableName> {
    TableName::qualified(schema, name).map_err(EtlError::Configuration)
}

pub(crate) fn columns(defs: &[(&str, ColumnType)]) -> Vec<ColumnDef> {
    defs.iter()
        .map(|(name, ty)| ColumnDef::new(*name, *ty))
        .collect()
}
