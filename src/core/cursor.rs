//! Windowed pagination over a source relation
//!
//! [`BatchCursor`] turns a row count and a page size into successive
//! [`Window`]s. The loop condition is `offset <= total`, so a source whose
//! size is an exact multiple of the page size (including an empty source)
//! ends with one empty window. Offsets always advance by the page size.

use crate::adapters::store::{RelationalStore, SourceQuery};
use crate::domain::{EtlError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One offset/limit page of a source relation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub offset: u64,
    pub limit: u64,
}

impl Window {
    /// Creates a window; `limit` must be positive
    pub fn new(offset: u64, limit: u64) -> Result<Self> {
        if limit == 0 {
            return Err(EtlError::Validation("window limit must be > 0".to_string()));
        }
        Ok(Self { offset, limit })
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.offset, self.limit)
    }
}

/// How a job's key counter advances after each window
///
/// Source offsets advance by the page size under both policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvancePolicy {
    /// Reserve a full page of keys per window; keys stay page-aligned
    FixedPage,
    /// Advance by exactly the records emitted; keys are gap-free
    EmittedRowCount,
}

impl FromStr for AdvancePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fixed_page" => Ok(AdvancePolicy::FixedPage),
            "emitted_row_count" => Ok(AdvancePolicy::EmittedRowCount),
            _ => Err(format!(
                "Invalid advance policy '{s}'. Must be one of: fixed_page, emitted_row_count"
            )),
        }
    }
}

/// Lazy, finite sequence of windows over `total` rows
#[derive(Debug, Clone)]
pub struct BatchCursor {
    total: u64,
    page_size: u64,
    next_offset: Option<u64>,
}

impl BatchCursor {
    /// Creates a cursor starting at offset 0
    ///
    /// # Errors
    ///
    /// Returns [`EtlError::Validation`] if `page_size` is zero.
    pub fn new(total: u64, page_size: u64) -> Result<Self> {
        if page_size == 0 {
            return Err(EtlError::Validation("page size must be > 0".to_string()));
        }
        Ok(Self {
            total,
            page_size,
            next_offset: Some(0),
        })
    }

    /// Counts the rows `query` selects and opens a cursor over them
    pub async fn open(
        store: &mut dyn RelationalStore,
        query: &SourceQuery,
        page_size: u64,
    ) -> Result<Self> {
        let total = store.count(query).await?;
        Self::new(total, page_size)
    }

    /// Row count the cursor was opened with
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Page size of every window
    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// A fresh cursor over the same range, starting at offset 0
    pub fn restart(&self) -> Self {
        Self {
            next_offset: Some(0),
            ..self.clone()
        }
    }
}

impl Iterator for BatchCursor {
    type Item = Window;

    fn next(&mut self) -> Option<Window> {
        let offset = self.next_offset?;
        if offset > self.total {
            self.next_offset = None;
            return None;
        }
        self.next_offset = offset.checked_add(self.page_size);
        Some(Window {
            offset,
            limit: self.page_size,
        })
    }
}

/// Windows covering `total` rows with pages of `page_size`
pub fn windows(total: u64, page_size: u64) -> Result<BatchCursor> {
    BatchCursor::new(total, page_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(total: u64, page: u64) -> Vec<(u64, u64)> {
        windows(total, page)
            .unwrap()
            .map(|w| (w.offset, w.limit))
            .collect()
    }

    #[test]
    fn test_partial_final_window() {
        assert_eq!(collect(5, 2), vec![(0, 2), (2, 2), (4, 2)]);
    }

    #[test]
    fn test_exact_multiple_ends_with_empty_window() {
        assert_eq!(collect(4, 2), vec![(0, 2), (2, 2), (4, 2)]);
    }

    #[test]
    fn test_empty_source_yields_one_window() {
        assert_eq!(collect(0, 3), vec![(0, 3)]);
    }

    #[test]
    fn test_zero_page_size_rejected() {
        assert!(windows(10, 0).is_err());
        assert!(Window::new(0, 0).is_err());
    }

    #[test]
    fn test_restart_begins_at_zero() {
        let mut cursor = windows(3, 1).unwrap();
        cursor.next();
        cursor.next();
        let fresh: Vec<Window> = cursor.restart().collect();
        assert_eq!(fresh.first().map(|w| w.offset), Some(0));
        assert_eq!(fresh.len(), 4);
    }

    #[test]
    fn test_offset_overflow_terminates() {
        let mut cursor = windows(u64::MAX, u64::MAX).unwrap();
        assert_eq!(cursor.next().map(|w| w.offset), Some(0));
        assert_eq!(cursor.next().map(|w| w.offset), Some(u64::MAX));
        assert_eq!(cursor.next(), None);
    }

    #[test]
    fn test_advance_policy_from_str() {
        assert_eq!(
            "fixed_page".parse::<AdvancePolicy>().unwrap(),
            AdvancePolicy::FixedPage
        );
        assert_eq!(
            "EMITTED_ROW_COUNT".parse::<AdvancePolicy>().unwrap(),
            AdvancePolicy::EmittedRowCount
        );
        assert!("by_rows".parse::<AdvancePolicy>().is_err());
    }

    #[test]
    fn test_window_display() {
        assert_eq!(Window::new(4, 2).unwrap().to_string(), "(4,2)");
    }
}
