//! Cell values and semantic column types
//!
//! Source rows and target records are sequences of [`Value`]s. Each source
//! column declares a [`ColumnType`]; stores decode cells into the matching
//! variant, and a value's own [`ColumnType`] decides how it is bound as a
//! statement parameter.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Semantic type of a source or target column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// 64-bit integer
    Integer,
    /// Double precision float
    Float,
    /// Free text
    Text,
    /// Calendar date
    Date,
    /// Timestamp without time zone
    DateTime,
}

impl ColumnType {
    /// PostgreSQL type used when casting a projected column
    pub fn sql_type(self) -> &'static str {
        match self {
            ColumnType::Integer => "BIGINT",
            ColumnType::Float => "DOUBLE PRECISION",
            ColumnType::Text => "TEXT",
            ColumnType::Date => "DATE",
            ColumnType::DateTime => "TIMESTAMP",
        }
    }
}

/// A named, typed column
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnDef {
    pub name: String,
    pub ty: ColumnType,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// A single cell
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl Value {
    /// Whether the cell is SQL NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Null, or text that is empty after trimming
    pub fn is_blank(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Integer view of the cell; text is parsed, integral floats are accepted
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Float(f) => integral(*f),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Numeric view of the cell; text is parsed, non-finite results are rejected
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) if f.is_finite() => Some(*f),
            Value::Text(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
            _ => None,
        }
    }

    /// Text view of the cell (None for null or blank text)
    pub fn as_text(&self) -> Option<String> {
        if self.is_blank() {
            return None;
        }
        match self {
            Value::Text(s) => Some(s.trim().to_string()),
            other => Some(other.to_string()),
        }
    }

    /// Date view of the cell (timestamps are truncated)
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            Value::DateTime(dt) => Some(dt.date()),
            Value::Text(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok(),
            _ => None,
        }
    }

    /// Timestamp view of the cell (dates map to midnight)
    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Value::DateTime(dt) => Some(*dt),
            Value::Date(d) => d.and_hms_opt(0, 0, 0),
            Value::Text(s) => NaiveDateTime::parse_from_str(s.trim(), DATETIME_FORMAT).ok(),
            _ => None,
        }
    }

    /// Normalized key used for equality joins (linkage and staged merges)
    ///
    /// Integral floats and numeric text compare equal to integers so that a
    /// `session_id` stored as text still joins against an integer key.
    pub fn join_key(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Integer(i) => Some(i.to_string()),
            Value::Float(f) => Some(match integral(*f) {
                Some(i) => i.to_string(),
                None => f.to_string(),
            }),
            Value::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    None
                } else if let Ok(i) = trimmed.parse::<i64>() {
                    Some(i.to_string())
                } else {
                    Some(trimmed.to_string())
                }
            }
            Value::Date(d) => Some(d.to_string()),
            Value::DateTime(dt) => Some(dt.to_string()),
        }
    }

    /// Coerces the cell into `ty`; incompatible cells become `None`
    pub fn coerce(&self, ty: ColumnType) -> Option<Value> {
        if self.is_null() {
            return Some(Value::Null);
        }
        match ty {
            ColumnType::Integer => self.as_i64().map(Value::Integer),
            ColumnType::Float => self.as_f64().map(Value::Float),
            ColumnType::Text => Some(Value::Text(match self {
                Value::Text(s) => s.clone(),
                other => other.to_string(),
            })),
            ColumnType::Date => self.as_date().map(Value::Date),
            ColumnType::DateTime => self.as_datetime().map(Value::DateTime),
        }
    }

    /// Semantic type of the cell, `None` for null
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Value::Null => None,
            Value::Integer(_) => Some(ColumnType::Integer),
            Value::Float(_) => Some(ColumnType::Float),
            Value::Text(_) => Some(ColumnType::Text),
            Value::Date(_) => Some(ColumnType::Date),
            Value::DateTime(_) => Some(ColumnType::DateTime),
        }
    }

    /// Total order used for `ORDER BY` evaluation; nulls sort last
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Greater,
            (_, Value::Null) => Ordering::Less,
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) if a.is_numeric() && b.is_numeric() => x.total_cmp(&y),
                _ => match (a.as_datetime(), b.as_datetime()) {
                    (Some(x), Some(y)) if a.is_temporal() && b.is_temporal() => x.cmp(&y),
                    _ => a.type_rank().cmp(&b.type_rank()),
                },
            },
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Float(_))
    }

    fn is_temporal(&self) -> bool {
        matches!(self, Value::Date(_) | Value::DateTime(_))
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Integer(_) | Value::Float(_) => 0,
            Value::Date(_) | Value::DateTime(_) => 1,
            Value::Text(_) => 2,
            Value::Null => 3,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::DateTime(dt) => write!(f, "{}", dt.format(DATETIME_FORMAT)),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Exact integer for an integral float that fits `i64`
fn integral(f: f64) -> Option<i64> {
    // -2^63 and 2^63 are exact in f64; i64::MAX is not
    const BOUND: f64 = 9_223_372_036_854_775_808.0;
    let fits = f.is_finite() && f.fract() == 0.0 && (-BOUND..BOUND).contains(&f);
    fits.then(|| f as i64)
}
