//! Domain identifier types with validation
//!
//! Newtype wrappers for relation names, source descriptors and concept ids.
//! Relation and column names end up inside generated SQL, so they are
//! validated as plain identifiers on construction.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Checks that `name` is a plain SQL identifier (`[A-Za-z_][A-Za-z0-9_]*`)
pub fn validate_identifier(name: &str) -> Result<(), String> {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return Err(format!("Invalid identifier '{name}'")),
    }
    if chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(format!("Invalid identifier '{name}'"))
    }
}

/// Schema-qualified (or bare) table name
///
/// # Examples
///
/// ```
/// use periop_omop::domain::ids::TableName;
///
/// let table = TableName::new("preop.char").unwrap();
/// assert_eq!(table.schema(), Some("preop"));
/// assert_eq!(table.table(), "char");
/// assert!(TableName::new("preop.char; DROP TABLE x").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TableName(String);

impl TableName {
    /// Creates a validated table name (`table` or `schema.table`)
    pub fn new(name: impl Into<String>) -> Result<Self, String> {
        let name = name.into();
        let parts: Vec<&str> = name.split('.').collect();
        if parts.is_empty() || parts.len() > 2 {
            return Err(format!("Invalid table name '{name}'"));
        }
        for part in &parts {
            validate_identifier(part).map_err(|_| format!("Invalid table name '{name}'"))?;
        }
        Ok(Self(name))
    }

    /// Builds `schema.table` from its parts
    pub fn qualified(schema: &str, table: &str) -> Result<Self, String> {
        Self::new(format!("{schema}.{table}"))
    }

    /// Returns the schema part, if qualified
    pub fn schema(&self) -> Option<&str> {
        self.0.split_once('.').map(|(schema, _)| schema)
    }

    /// Returns the unqualified table part
    pub fn table(&self) -> &str {
        match self.0.split_once('.') {
            Some((_, table)) => table,
            None => &self.0,
        }
    }

    /// Returns the full name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TableName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for TableName {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TableName> for String {
    fn from(value: TableName) -> Self {
        value.0
    }
}

/// Identifier of a configured source descriptor
///
/// Usually the schema-qualified source table name (`preop.char`), but two
/// descriptors may read the same table with different filters, so the id is
/// kept distinct from [`TableName`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceId(String);

impl SourceId {
    /// Creates a new source id
    pub fn new(id: impl Into<String>) -> Result<Self, String> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err("Source id cannot be empty".to_string());
        }
        Ok(Self(id))
    }

    /// Returns the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SourceId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Standardized concept identifier
///
/// `ConceptId::UNMAPPED` (0) is the defined default for codes with no mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConceptId(i64);

impl ConceptId {
    /// "No matching concept"
    pub const UNMAPPED: ConceptId = ConceptId(0);

    /// Wraps a raw concept id
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw id
    pub const fn get(self) -> i64 {
        self.0
    }

    /// Whether this is the unmapped default
    pub fn is_unmapped(self) -> bool {
        self == Self::UNMAPPED
    }
}

impl fmt::Display for ConceptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ConceptId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("anon_case_no").is_ok());
        assert!(validate_identifier("_x1").is_ok());
        assert!(validate_identifier("1abc").is_err());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("a-b").is_err());
        assert!(validate_identifier("a b").is_err());
    }

    #[test]
    fn test_table_name_parts() {
        let table = TableName::new("omop.measurement").unwrap();
        assert_eq!(table.schema(), Some("omop"));
        assert_eq!(table.table(), "measurement");

        let bare = TableName::new("person").unwrap();
        assert_eq!(bare.schema(), None);
        assert_eq!(bare.table(), "person");
    }

    #[test]
    fn test_table_name_rejects_injection() {
        assert!(TableName::new("a.b.c").is_err());
        assert!(TableName::new("omop.x; drop").is_err());
        assert!(TableName::new("").is_err());
        assert!(TableName::new(".x").is_err());
    }

    #[test]
    fn test_table_name_qualified() {
        let table = TableName::qualified("postop", "discharge").unwrap();
        assert_eq!(table.as_str(), "postop.discharge");
    }

    #[test]
    fn test_table_name_deserialize_validates() {
        #[derive(Deserialize)]
        struct Holder {
            table: TableName,
        }

        let ok: Holder = toml::from_str("table = \"preop.lab\"").unwrap();
        assert_eq!(ok.table.table(), "lab");
        assert!(toml::from_str::<Holder>("table = \"pre op.lab\"").is_err());
    }

    #[test]
    fn test_source_id_empty() {
        assert!(SourceId::new("  ").is_err());
        assert_eq!(SourceId::new("preop.char").unwrap().as_str(), "preop.char");
    }

    #[test]
    fn test_concept_id_unmapped() {
        assert!(ConceptId::UNMAPPED.is_unmapped());
        assert!(!ConceptId::new(3036277).is_unmapped());
        assert_eq!(ConceptId::from(1001).get(), 1001);
    }
}
