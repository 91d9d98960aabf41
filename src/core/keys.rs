//! Surrogate key allocation
//!
//! One [`SurrogateKeyAllocator`] lives for the duration of a job and is
//! shared by every source feeding the job's target, so keys stay unique and
//! increasing across windows and across source tables.

use std::ops::Range;

/// Issues contiguous, increasing runs of surrogate keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurrogateKeyAllocator {
    base: i64,
    next: i64,
}

impl SurrogateKeyAllocator {
    /// Creates an allocator whose first key is `base`
    pub fn new(base: i64) -> Self {
        Self { base, next: base }
    }

    /// Reserves `n` keys and returns them as a half-open range
    ///
    /// `next(0)` returns an empty range and leaves the counter unchanged.
    ///
    /// ```rust
    /// use periop_omop::core::keys::SurrogateKeyAllocator;
    ///
    /// let mut keys = SurrogateKeyAllocator::new(1);
    /// assert_eq!(keys.next(3), 1..4);
    /// assert!(keys.next(0).is_empty());
    /// assert_eq!(keys.next(2), 4..6);
    /// ```
    pub fn next(&mut self, n: usize) -> Range<i64> {
        let start = self.next;
        self.next = start.saturating_add(i64::try_from(n).unwrap_or(i64::MAX));
        start..self.next
    }

    /// Advances the counter by `n` without issuing keys
    pub fn skip(&mut self, n: u64) {
        self.next = self
            .next
            .saturating_add(i64::try_from(n).unwrap_or(i64::MAX));
    }

    /// The key the next allocation starts at
    pub fn peek(&self) -> i64 {
        self.next
    }

    /// The first key this allocator issued
    pub fn base(&self) -> i64 {
        self.base
    }

    /// Number of keys consumed so far, including skipped ones
    pub fn consumed(&self) -> u64 {
        u64::try_from(self.next - self.base).unwrap_or(0)
    }
}

impl Default for SurrogateKeyAllocator {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Mutable counters of one job run
#[derive(Debug, Clone, Default)]
pub struct RunCounters {
    /// Next surrogate key
    pub keys: SurrogateKeyAllocator,

    /// Rows written to the target
    pub rows_emitted: u64,

    /// Source rows dropped because their subject did not join
    pub rows_excluded: u64,

    /// Source rows read
    pub rows_fetched: u64,

    /// Windows processed
    pub windows: u64,
}

impl RunCounters {
    /// Counters for a job whose keys start at `key_base`
    pub fn new(key_base: i64) -> Self {
        Self {
            keys: SurrogateKeyAllocator::new(key_base),
            ..Self::default()
        }
    }
}
