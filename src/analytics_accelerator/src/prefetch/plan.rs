//! Prefetch plans produced by the planner and consumed by the block store.

use std::fmt;
use std::ops::Range;

/// Fetch priority. Immediate fetches block a caller; speculative ones do not.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Anticipatory fetch.
    Speculative,
    /// Fetch a caller is waiting on.
    Immediate,
}

impl Priority {
    /// Queue rank; lower ranks are dequeued first.
    pub(crate) fn rank(self) -> u8 {
        match self {
            Priority::Immediate => 0,
            Priority::Speculative => 1,
        }
    }
}

/// Identity of a logical stream, used to scope plan cancellation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub(crate) u64);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

/// One planned byte range.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedRange {
    /// Byte range to fetch. Readahead ranges are widened to the block grid;
    /// column ranges are fetched as they are.
    pub range: Range<u64>,
    /// Fetch priority.
    pub priority: Priority,
}

/// What produced a plan.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PlanKind {
    /// Nothing to prefetch.
    #[default]
    Empty,
    /// Forward readahead after sequential reads.
    Sequential,
    /// Exactly the declared columns of the row groups the prefetch mode covers.
    ColumnTargeted,
    /// Recently used columns of the row groups the prefetch mode covers.
    Predictive,
}

impl PlanKind {
    /// Whether the plan names exact column chunk bytes rather than a
    /// readahead window.
    pub fn is_exact(self) -> bool {
        matches!(self, PlanKind::ColumnTargeted | PlanKind::Predictive)
    }
}

/// Ordered set of ranges to fetch. Ephemeral: each plan supersedes the
/// speculative remainder of the previous plan for the same stream.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PrefetchPlan {
    kind: PlanKind,
    entries: Vec<PlannedRange>,
}

impl PrefetchPlan {
    /// A plan that fetches nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Plan `ranges` at one priority. Empty ranges are dropped.
    pub fn new(kind: PlanKind, ranges: Vec<Range<u64>>, priority: Priority) -> Self {
        let entries = ranges
            .into_iter()
            .filter(|range| range.start < range.end)
            .map(|range| PlannedRange { range, priority })
            .collect();
        Self { kind, entries }
    }

    /// Append `ranges` at `priority`. Empty ranges are dropped.
    pub fn with_ranges(mut self, ranges: Vec<Range<u64>>, priority: Priority) -> Self {
        self.entries.extend(
            ranges
                .into_iter()
                .filter(|range| range.start < range.end)
                .map(|range| PlannedRange { range, priority }),
        );
        self
    }

    /// Source of the plan.
    pub fn kind(&self) -> PlanKind {
        self.kind
    }

    /// Planned ranges in order.
    pub fn entries(&self) -> &[PlannedRange] {
        &self.entries
    }

    /// Whether the plan fetches nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ranges planned at `priority`.
    pub fn ranges(&self, priority: Priority) -> Vec<Range<u64>> {
        self.entries
            .iter()
            .filter(|entry| entry.priority == priority)
            .map(|entry| entry.range.clone())
            .collect()
    }
}
