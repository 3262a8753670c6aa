//! # Read-Pattern Planner
//!
//! Turns the reads of one stream into prefetch plans.
//!
//! ```text
//!                      footer parsed + columns declared?
//!                         │ yes                    │ no
//!                         ▼                        ▼
//!   immediate fetch of the declared       predictive columns enabled
//!   columns of the current row group      and recently used columns known?
//!                                            │ yes              │ no
//!                                            ▼                  ▼
//!                             speculative fetch of those   access pattern
//!                             columns in the row group     Sequential ─▶ readahead
//!                                                          Random/Unknown ─▶ nothing
//! ```
//!
//! Column plans cover the row group being read. In [`PrefetchMode::All`]
//! they also fetch the same columns of every later row group speculatively;
//! [`PrefetchMode::Off`] disables column plans altogether.
//!
//! Sequential readahead starts at `initial_readahead_blocks` and doubles on
//! every further sequential read up to `max_readahead_blocks`. A random read
//! or a seek resets it.

use std::ops::Range;
use std::sync::Arc;
use tracing::trace;

use super::access::{AccessEntry, AccessRecord, ReadPattern};
use super::column_store::ColumnAccessStore;
use super::plan::{PlanKind, PrefetchPlan, Priority};
use crate::config::{PlannerConfig, PrefetchMode};
use crate::footer::FooterMetadata;

/// Per-stream planner state.
pub struct ReadPlanner {
    config: PlannerConfig,
    block_size: u64,
    object_size: u64,
    record: AccessRecord,
    pattern: ReadPattern,
    readahead_blocks: u64,
    footer: Option<Arc<FooterMetadata>>,
    selected_columns: Vec<usize>,
    recent_columns: Option<Arc<ColumnAccessStore>>,
}

impl ReadPlanner {
    /// Create a planner for an object of `object_size` bytes cached in
    /// `block_size` blocks.
    pub fn new(
        config: PlannerConfig,
        block_size: u64,
        object_size: u64,
        recent_columns: Option<Arc<ColumnAccessStore>>,
    ) -> Self {
        let record = AccessRecord::new(config.access_window);
        Self {
            config,
            block_size: block_size.max(1),
            object_size,
            record,
            pattern: ReadPattern::Unknown,
            readahead_blocks: 0,
            footer: None,
            selected_columns: Vec::new(),
            recent_columns,
        }
    }

    /// Pattern of the most recent read.
    pub fn pattern(&self) -> ReadPattern {
        self.pattern
    }

    /// Current readahead window in blocks.
    pub fn readahead_blocks(&self) -> u64 {
        self.readahead_blocks
    }

    /// Declared column indices, sorted.
    pub fn selected_columns(&self) -> &[usize] {
        &self.selected_columns
    }

    /// Parsed footer in use, if any.
    pub fn footer(&self) -> Option<&Arc<FooterMetadata>> {
        self.footer.as_ref()
    }

    /// Enable footer-aware planning.
    pub fn set_footer(&mut self, footer: Arc<FooterMetadata>) {
        self.footer = Some(footer);
    }

    /// Record a read of `len` bytes at `offset` and plan what to fetch next.
    pub fn on_read(&mut self, offset: u64, len: u64) -> PrefetchPlan {
        let len = len.min(self.object_size.saturating_sub(offset));
        self.pattern = self
            .record
            .classify(offset, self.config.sequential_gap_threshold);
        self.record.push(AccessEntry { offset, len });

        self.readahead_blocks = match self.pattern {
            ReadPattern::Sequential if self.readahead_blocks == 0 => {
                self.config.initial_readahead_blocks
            }
            ReadPattern::Sequential => self
                .readahead_blocks
                .saturating_mul(2)
                .min(self.config.max_readahead_blocks),
            ReadPattern::Random | ReadPattern::Unknown => 0,
        };

        if let Some(plan) = self.column_plan(offset) {
            return plan;
        }
        if let Some(plan) = self.predictive_plan(offset) {
            return plan;
        }
        self.sequential_plan(offset + len)
    }

    /// Record a seek. Resets the readahead streak.
    pub fn on_seek(&mut self, offset: u64) -> PrefetchPlan {
        self.readahead_blocks = 0;
        self.column_plan(offset)
            .or_else(|| self.predictive_plan(offset))
            .unwrap_or_default()
    }

    /// Declare the columns the caller will read, planning for the row group
    /// at `offset`. Has no effect on planning without a parsed footer.
    pub fn on_column_select(&mut self, offset: u64, columns: &[usize]) -> PrefetchPlan {
        let mut columns = columns.to_vec();
        columns.sort_unstable();
        columns.dedup();
        self.selected_columns = columns;
        self.column_plan(offset).unwrap_or_default()
    }

    /// Chunks of `columns` in `row_group` at `priority`, plus the later row
    /// groups speculatively in [`PrefetchMode::All`].
    fn chunks_plan(
        &self,
        footer: &FooterMetadata,
        kind: PlanKind,
        row_group: usize,
        columns: &[usize],
        priority: Priority,
    ) -> PrefetchPlan {
        let plan = PrefetchPlan::new(kind, footer.chunk_ranges(row_group, columns), priority);
        if self.config.prefetch_mode != PrefetchMode::All {
            return plan;
        }
        let later = (row_group + 1..footer.row_groups().len())
            .flat_map(|later| footer.chunk_ranges(later, columns))
            .collect();
        plan.with_ranges(later, Priority::Speculative)
    }

    fn column_plan(&self, offset: u64) -> Option<PrefetchPlan> {
        if self.config.prefetch_mode == PrefetchMode::Off || self.selected_columns.is_empty() {
            return None;
        }
        let footer = self.footer.as_ref()?;
        let row_group = footer.row_group_containing(offset)?;
        trace!(
            row_group = row_group.index,
            columns = ?self.selected_columns,
            "column-targeted plan"
        );
        Some(self.chunks_plan(
            footer,
            PlanKind::ColumnTargeted,
            row_group.index,
            &self.selected_columns,
            Priority::Immediate,
        ))
    }

    fn predictive_plan(&self, offset: u64) -> Option<PrefetchPlan> {
        if self.config.prefetch_mode == PrefetchMode::Off
            || !self.config.predictive_column_prefetch
            || !self.selected_columns.is_empty()
        {
            return None;
        }
        let footer = self.footer.as_ref()?;
        let recent = self.recent_columns.as_ref()?.recent();
        let columns: Vec<usize> = recent
            .iter()
            .filter_map(|path| footer.column_index(path))
            .collect();
        if columns.is_empty() {
            return None;
        }
        let row_group = footer.row_group_containing(offset)?;
        Some(self.chunks_plan(
            footer,
            PlanKind::Predictive,
            row_group.index,
            &columns,
            Priority::Speculative,
        ))
    }

    fn sequential_plan(&self, read_end: u64) -> PrefetchPlan {
        if self.readahead_blocks == 0 {
            return PrefetchPlan::empty();
        }
        let start = read_end.div_ceil(self.block_size) * self.block_size;
        let end = start
            .saturating_add(self.readahead_blocks * self.block_size)
            .min(self.object_size);
        if start >= end {
            return PrefetchPlan::empty();
        }
        let range: Range<u64> = start..end;
        PrefetchPlan::new(PlanKind::Sequential, vec![range], Priority::Speculative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::footer::test_utils::{synthetic_object, SyntheticLayout};
    use crate::footer::{FooterParse, FooterParser};

    const BLOCK: u64 = 1024;

    fn planner(object_size: u64) -> ReadPlanner {
        ReadPlanner::new(PlannerConfig::default(), BLOCK, object_size, None)
    }

    fn layout() -> SyntheticLayout {
        SyntheticLayout {
            row_groups: 3,
            columns: 4,
            chunk_len: 1024,
            data_start: 1024,
            ..Default::default()
        }
    }

    fn footer() -> Arc<FooterMetadata> {
        let object = synthetic_object(&layout());
        match FooterParser::parse(&object, object.len() as u64).unwrap() {
            FooterParse::Complete(metadata) => Arc::new(metadata),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_sequential_readahead_ramps_up() {
        let mut planner = planner(100 * BLOCK);
        assert!(planner.on_read(0, BLOCK).is_empty());
        assert_eq!(planner.pattern(), ReadPattern::Unknown);

        let mut windows = Vec::new();
        for i in 1..7 {
            let plan = planner.on_read(i * BLOCK, BLOCK);
            assert_eq!(planner.pattern(), ReadPattern::Sequential);
            assert_eq!(plan.kind(), PlanKind::Sequential);
            let ranges = plan.ranges(Priority::Speculative);
            assert_eq!(ranges.len(), 1);
            assert_eq!(ranges[0].start, (i + 1) * BLOCK);
            windows.push((ranges[0].end - ranges[0].start) / BLOCK);
        }
        assert_eq!(windows, vec![1, 2, 4, 8, 8, 8]);
    }

    #[test]
    fn test_readahead_never_passes_object_end() {
        let size = 5 * BLOCK + 100;
        let mut planner = planner(size);
        let mut offset = 0;
        while offset < size {
            let plan = planner.on_read(offset, 700);
            for range in plan.ranges(Priority::Speculative) {
                assert!(range.end <= size);
                assert_eq!(range.start % BLOCK, 0);
            }
            offset += 700;
        }
    }

    #[test]
    fn test_backward_reads_are_random() {
        let mut planner = planner(100 * BLOCK);
        for i in (0..10).rev() {
            let plan = planner.on_read(i * 5 * BLOCK, 100);
            assert!(plan.is_empty());
        }
        assert_eq!(planner.pattern(), ReadPattern::Random);
        assert_eq!(planner.readahead_blocks(), 0);
    }

    #[test]
    fn test_gap_resets_streak() {
        let mut planner = planner(100 * BLOCK);
        planner.on_read(0, 100);
        planner.on_read(100, 100);
        planner.on_read(200, 100);
        assert_eq!(planner.readahead_blocks(), 2);

        assert!(planner.on_read(50 * BLOCK, 100).is_empty());
        assert_eq!(planner.pattern(), ReadPattern::Random);
        assert_eq!(planner.on_read(50 * BLOCK + 100, 100).ranges(Priority::Speculative).len(), 1);
        assert_eq!(planner.readahead_blocks(), 1);
    }

    #[test]
    fn test_seek_resets_readahead() {
        let mut planner = planner(100 * BLOCK);
        planner.on_read(0, 100);
        planner.on_read(100, 100);
        assert_eq!(planner.readahead_blocks(), 1);
        assert!(planner.on_seek(10 * BLOCK).is_empty());
        assert_eq!(planner.readahead_blocks(), 0);
    }

    #[test]
    fn test_column_plan_overrides_sequential() {
        let footer = footer();
        let mut planner = planner(footer.footer_range().end);
        planner.set_footer(footer);

        let plan = planner.on_column_select(0, &[3, 1, 3]);
        assert!(plan.is_empty(), "offset 0 is outside every row group");
        assert_eq!(planner.selected_columns(), &[1, 3]);

        planner.on_read(9216, 10);
        let plan = planner.on_read(9226, 10);
        assert_eq!(planner.pattern(), ReadPattern::Sequential);
        assert_eq!(plan.kind(), PlanKind::ColumnTargeted);
        assert_eq!(
            plan.ranges(Priority::Immediate),
            vec![10240..11264, 12288..13312]
        );
        assert!(plan.ranges(Priority::Speculative).is_empty());
    }

    #[test]
    fn test_column_selection_without_footer_is_noop() {
        let mut planner = planner(100 * BLOCK);
        assert!(planner.on_column_select(0, &[1, 3]).is_empty());
        planner.on_read(0, 100);
        let plan = planner.on_read(100, 100);
        assert_eq!(plan.kind(), PlanKind::Sequential);
    }

    #[test]
    fn test_predictive_plan_uses_recent_columns() {
        let footer = footer();
        let store = Arc::new(ColumnAccessStore::new(4));
        store.record("c2");
        store.record("unknown");

        let config = PlannerConfig::default().with_predictive_column_prefetch(true);
        let mut planner = ReadPlanner::new(config, BLOCK, footer.footer_range().end, Some(store));
        planner.set_footer(footer);

        let plan = planner.on_seek(5120);
        assert_eq!(plan.kind(), PlanKind::Predictive);
        assert_eq!(plan.ranges(Priority::Speculative), vec![7168..8192]);

        // Declared columns win over predictions.
        let plan = planner.on_column_select(5120, &[0]);
        assert_eq!(plan.kind(), PlanKind::ColumnTargeted);
        assert_eq!(plan.ranges(Priority::Immediate), vec![5120..6144]);
    }

    #[test]
    fn test_prefetch_modes() {
        let footer = footer();
        let size = footer.footer_range().end;

        let all = PlannerConfig::default().with_prefetch_mode(PrefetchMode::All);
        let mut planner = ReadPlanner::new(all, BLOCK, size, None);
        planner.set_footer(footer.clone());
        let plan = planner.on_column_select(1024, &[1]);
        assert_eq!(plan.kind(), PlanKind::ColumnTargeted);
        assert_eq!(plan.ranges(Priority::Immediate), vec![2048..3072]);
        assert_eq!(
            plan.ranges(Priority::Speculative),
            vec![6144..7168, 10240..11264]
        );

        // The last row group has nothing after it.
        let plan = planner.on_seek(9216);
        assert_eq!(plan.ranges(Priority::Immediate), vec![10240..11264]);
        assert!(plan.ranges(Priority::Speculative).is_empty());

        let off = PlannerConfig::default()
            .with_prefetch_mode(PrefetchMode::Off)
            .with_predictive_column_prefetch(true);
        let mut planner = ReadPlanner::new(off, BLOCK, size, None);
        planner.set_footer(footer);
        assert!(planner.on_column_select(1024, &[1]).is_empty());
        planner.on_read(1024, 100);
        let plan = planner.on_read(1124, 100);
        assert_eq!(plan.kind(), PlanKind::Sequential);
    }

    #[test]
    fn test_interleaved_scans_keep_readahead() {
        let mut planner = planner(100 * BLOCK);
        planner.on_read(0, 100);
        planner.on_read(100, 100);
        assert!(planner.on_read(40 * BLOCK, 100).is_empty());
        assert_eq!(planner.pattern(), ReadPattern::Random);

        // Back to the first scan, which is still in the window.
        let plan = planner.on_read(200, 100);
        assert_eq!(planner.pattern(), ReadPattern::Sequential);
        assert_eq!(plan.ranges(Priority::Speculative), vec![BLOCK..2 * BLOCK]);
    }
}
