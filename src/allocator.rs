//! Per-(series, year, category) index allocation.

use crate::error::CatalogError;
use crate::instrument::Category;
use crate::store::CatalogStore;
use crate::ticker::YearCode;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Attempts before a persistently conflicting allocation is reported.
const MAX_CONFLICT_RETRIES: u32 = 64;
const CONFLICT_BACKOFF_MS: u64 = 2;

/// Counter key. The year is the two-digit code used in the ticker, so two
/// keys never map to the same ticker prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesKey {
    /// Series code.
    pub series_code: String,
    /// Two-digit year code.
    pub year: YearCode,
    /// Category.
    pub category: Category,
}

impl SeriesKey {
    /// Builds a key from a four-digit year.
    #[must_use]
    pub fn new(series_code: &str, year: u16, category: Category) -> Self {
        Self {
            series_code: series_code.to_string(),
            year: YearCode::from_year(year),
            category,
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.series_code, self.year, self.category)
    }
}

#[derive(Debug, Default)]
struct Slots {
    last: Vec<u64>,
    index: HashMap<SeriesKey, usize>,
}

/// In-process counter table: an arena of last-issued values plus a key index.
///
/// Only [`CounterTable::next`] mutates a counter; a counter never decreases,
/// so an index is never handed out twice.
#[derive(Debug, Default)]
pub struct CounterTable {
    slots: Mutex<Slots>,
}

impl CounterTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically increments and returns the counter for `key`, starting at 1.
    pub fn next(&self, key: &SeriesKey) -> u64 {
        let mut slots = self.slots.lock();
        let slot = match slots.index.get(key) {
            Some(&slot) => slot,
            None => {
                let slot = slots.last.len();
                slots.last.push(0);
                slots.index.insert(key.clone(), slot);
                slot
            }
        };
        slots.last[slot] += 1;
        slots.last[slot]
    }

    /// Last index issued for `key`, or 0.
    #[must_use]
    pub fn last_issued(&self, key: &SeriesKey) -> u64 {
        let slots = self.slots.lock();
        slots.index.get(key).map_or(0, |&slot| slots.last[slot])
    }

    /// Number of keys with at least one issued index.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().last.len()
    }

    /// Whether no index was ever issued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Funnels every allocation through the store's atomic counter and absorbs
/// [`CatalogError::AllocationConflict`] retries.
#[derive(Clone)]
pub struct TicketIndexAllocator {
    store: Arc<dyn CatalogStore>,
}

impl TicketIndexAllocator {
    /// Creates an allocator over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    /// Allocates the next index for `(series_code, year, category)`.
    ///
    /// # Errors
    /// Store failures. Conflicts are retried and only reported as a
    /// [`CatalogError::Store`] if they never clear.
    pub async fn allocate(
        &self,
        series_code: &str,
        year: u16,
        category: Category,
    ) -> Result<u64, CatalogError> {
        let key = SeriesKey::new(series_code, year, category);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.store.allocate_next_index(&key).await {
                Ok(index) => {
                    debug!(key = %key, index, "Allocated ticker index");
                    return Ok(index);
                }
                Err(CatalogError::AllocationConflict(_)) if attempt < MAX_CONFLICT_RETRIES => {
                    debug!(key = %key, attempt, "Allocation conflict, retrying");
                    tokio::time::sleep(Duration::from_millis(
                        CONFLICT_BACKOFF_MS * u64::from(attempt.min(10)),
                    ))
                    .await;
                }
                Err(CatalogError::AllocationConflict(msg)) => {
                    warn!(key = %key, attempt, "Allocation conflict did not clear");
                    return Err(CatalogError::Store(format!(
                        "allocation for {key} kept conflicting: {msg}"
                    )));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCatalogStore;
    use std::collections::HashSet;

    #[test]
    fn test_series_key_display() {
        let key = SeriesKey::new("BTMN", 1939, Category::Hero);
        assert_eq!(key.to_string(), "BTMN/39/HER");
    }

    #[test]
    fn test_counter_table_starts_at_one() {
        let table = CounterTable::new();
        let a = SeriesKey::new("BTMN", 1939, Category::Hero);
        let b = SeriesKey::new("BTMN", 1939, Category::Villain);
        assert_eq!(table.next(&a), 1);
        assert_eq!(table.next(&a), 2);
        assert_eq!(table.next(&b), 1);
        assert_eq!(table.last_issued(&a), 2);
        assert_eq!(table.last_issued(&SeriesKey::new("X", 2000, Category::Other)), 0);
        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn test_allocate_sequential() {
        let allocator = TicketIndexAllocator::new(Arc::new(MemoryCatalogStore::new()));
        for expected in 1..=5 {
            let index = allocator.allocate("SPDR", 1962, Category::Hero).await.unwrap();
            assert_eq!(index, expected);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_allocate_concurrent_no_duplicates() {
        let allocator = TicketIndexAllocator::new(Arc::new(MemoryCatalogStore::new()));
        let mut handles = Vec::new();
        for _ in 0..100 {
            let allocator = allocator.clone();
            handles.push(tokio::spawn(async move {
                allocator.allocate("BTMN", 1939, Category::Hero).await.unwrap()
            }));
        }
        let mut seen = HashSet::new();
        for handle in handles {
            assert!(seen.insert(handle.await.unwrap()));
        }
        assert_eq!(seen, (1..=100).collect::<HashSet<u64>>());
    }
}
