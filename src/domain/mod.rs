//! Domain types for periop-omop.
//!
//! # Overview
//!
//! The domain layer provides:
//! - **Validated identifiers** ([`TableName`], [`SourceId`], [`ConceptId`])
//! - **Cells and rows** ([`Value`], [`ColumnType`], [`Row`])
//! - **Error types** ([`EtlError`], [`StoreError`])
//! - **Result type alias** ([`Result`])
//!
//! Relation names are validated on construction because they are spliced
//! into generated SQL:
//!
//! ```rust
//! use periop_omop::domain::TableName;
//!
//! let target = TableName::new("omop.measurement").unwrap();
//! assert_eq!(target.table(), "measurement");
//! assert!(TableName::new("omop.measurement;--").is_err());
//! ```

pub mod errors;
pub mod ids;
pub mod result;
pub mod row;
pub mod value;

pub use errors::{EtlError, StoreError};
pub use ids::{ConceptId, SourceId, TableName};
pub use result::Result;
pub use row::Row;
pub use value::{ColumnDef, ColumnType, Value};
