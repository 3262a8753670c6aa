//! Recently accessed columns, shared by every stream of a factory.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

/// LRU set of column paths whose chunks were read recently.
///
/// Feeds predictive prefetch: a stream that has not declared columns
/// speculatively fetches these columns in newly visited row groups.
pub struct ColumnAccessStore {
    recent: Mutex<LruCache<String, ()>>,
}

impl ColumnAccessStore {
    /// Create a store remembering at most `capacity` columns.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            recent: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Mark a column as used.
    pub fn record(&self, path: &str) {
        let mut recent = self.recent.lock();
        if recent.get(path).is_none() {
            recent.put(path.to_string(), ());
        }
    }

    /// Recently used columns, most recent first.
    pub fn recent(&self) -> Vec<String> {
        self.recent.lock().iter().map(|(path, _)| path.clone()).collect()
    }

    /// Whether `path` is currently remembered.
    pub fn contains(&self, path: &str) -> bool {
        self.recent.lock().contains(path)
    }

    /// Number of remembered columns.
    pub fn len(&self) -> usize {
        self.recent.lock().len()
    }

    /// Whether nothing is remembered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_order_and_capacity() {
        let store = ColumnAccessStore::new(2);
        store.record("a");
        store.record("b");
        store.record("a");
        store.record("c");

        assert_eq!(store.recent(), vec!["c".to_string(), "a".to_string()]);
        assert!(!store.contains("b"));
    }

    #[test]
    fn test_zero_capacity_keeps_one() {
        let store = ColumnAccessStore::new(0);
        store.record("x");
        store.record("y");
        assert_eq!(store.len(), 1);
    }
}
