//! Per-stream access history used to classify the read pattern.

use std::collections::VecDeque;

/// One logical read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccessEntry {
    /// First byte read.
    pub offset: u64,
    /// Bytes read.
    pub len: u64,
}

impl AccessEntry {
    /// One past the last byte read.
    pub fn end(&self) -> u64 {
        self.offset + self.len
    }
}

/// Observed access pattern of a stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReadPattern {
    /// Not enough history.
    #[default]
    Unknown,
    /// Reads continue where a recent read ended.
    Sequential,
    /// Reads continue none of the recent reads.
    Random,
}

/// Bounded rolling window of recent reads. Dropped with its stream.
#[derive(Clone, Debug)]
pub struct AccessRecord {
    entries: VecDeque<AccessEntry>,
    capacity: usize,
}

impl AccessRecord {
    /// Create a record holding at most `capacity` reads.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a read, dropping the oldest one when full.
    pub fn push(&mut self, entry: AccessEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Most recent read.
    pub fn last(&self) -> Option<&AccessEntry> {
        self.entries.back()
    }

    /// Number of reads held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no reads were recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Classify a read at `offset` against every read in the window.
    ///
    /// A read is sequential when it starts inside a recent read or at most
    /// `gap_threshold` bytes after one, so scans interleaved within the
    /// window stay sequential. Anything else is random.
    pub fn classify(&self, offset: u64, gap_threshold: u64) -> ReadPattern {
        if self.entries.is_empty() {
            return ReadPattern::Unknown;
        }
        let continues = self.entries.iter().rev().any(|entry| {
            offset >= entry.offset && offset <= entry.end().saturating_add(gap_threshold)
        });
        if continues {
            ReadPattern::Sequential
        } else {
            ReadPattern::Random
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(offset: u64, len: u64) -> AccessEntry {
        AccessEntry { offset, len }
    }

    #[test]
    fn test_window_is_bounded() {
        let mut record = AccessRecord::new(3);
        for i in 0..10 {
            record.push(entry(i * 10, 10));
        }
        assert_eq!(record.len(), 3);
        assert_eq!(record.last(), Some(&entry(90, 10)));
    }

    #[test]
    fn test_classification() {
        let mut record = AccessRecord::new(4);
        assert_eq!(record.classify(0, 0), ReadPattern::Unknown);

        record.push(entry(100, 50));
        assert_eq!(record.classify(150, 0), ReadPattern::Sequential);
        assert_eq!(record.classify(120, 0), ReadPattern::Sequential);
        assert_eq!(record.classify(151, 0), ReadPattern::Random);
        assert_eq!(record.classify(160, 10), ReadPattern::Sequential);
        assert_eq!(record.classify(99, 1000), ReadPattern::Random);
    }

    #[test]
    fn test_interleaved_scans_within_window() {
        let mut record = AccessRecord::new(4);
        record.push(entry(0, 100));
        record.push(entry(5000, 100));
        assert_eq!(record.classify(100, 0), ReadPattern::Sequential);
        assert_eq!(record.classify(5100, 0), ReadPattern::Sequential);
        assert_eq!(record.classify(2500, 0), ReadPattern::Random);

        // Once the first scan leaves the window it no longer counts.
        for i in 1..4 {
            record.push(entry(5000 + i * 100, 100));
        }
        assert_eq!(record.classify(100, 0), ReadPattern::Random);

        let mut narrow = AccessRecord::new(1);
        narrow.push(entry(0, 100));
        narrow.push(entry(5000, 100));
        assert_eq!(narrow.classify(100, 0), ReadPattern::Random);
    }
}
