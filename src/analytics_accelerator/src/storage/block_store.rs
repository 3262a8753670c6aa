//! # Block Store
//!
//! Per-object cache of non-overlapping byte-range blocks.
//!
//! ```text
//! object bytes:  [ 0 ][ 1 ][ 2 ]    [chunk]    [ 7 ][ 8 (short) ]
//!                 grid blocks        exact      grid blocks
//!                      │
//!  BTreeMap<start, Arc<Block>>, created Pending on first reference
//! ```
//!
//! A request first finds the gaps no block covers. `ensure` and
//! `read_range` widen each gap to the block grid, stopping at neighbouring
//! blocks; `ensure_exact` and `read_exact` keep the gap as requested, so a
//! column chunk is fetched without the bytes around it. Gaps are cut at grid
//! boundaries, so no block is longer than `block_size`.
//!
//! Claimable blocks a request touches are grouped into fetch jobs of
//! contiguous blocks (at most `max_coalesced_blocks` per job). A block that
//! is already InFlight is joined, never fetched twice. Readers pin blocks
//! under the same lock eviction takes, so eviction (LRU over Ready, unpinned
//! blocks) can never take bytes out from under a waiter.

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

use super::block::{Block, BlockPin, BlockState};
use super::ObjectHandle;
use crate::config::BlockStoreConfig;
use crate::error::{AcceleratorError, AcceleratorResult};
use crate::prefetch::{FetchJob, PrefetchScheduler, Priority, StreamId};

type BlockMap = BTreeMap<u64, Arc<Block>>;

/// Blocks overlapping `range`, in offset order.
fn overlapping(blocks: &BlockMap, range: &Range<u64>) -> Vec<Arc<Block>> {
    let straddling = blocks
        .range(..range.start)
        .next_back()
        .filter(|(_, block)| block.range().end > range.start);
    straddling
        .into_iter()
        .chain(blocks.range(range.start..range.end))
        .map(|(_, block)| Arc::clone(block))
        .collect()
}

/// Parts of `range` no block covers.
fn gaps(blocks: &BlockMap, range: &Range<u64>) -> Vec<Range<u64>> {
    let mut gaps = Vec::new();
    let mut cursor = range.start;
    for block in overlapping(blocks, range) {
        let covered = block.range();
        if covered.start > cursor {
            gaps.push(cursor..covered.start);
        }
        cursor = cursor.max(covered.end);
    }
    if cursor < range.end {
        gaps.push(cursor..range.end);
    }
    gaps
}

/// Blocks claimed by one request, grouped into fetch jobs.
#[derive(Default)]
struct Claimed {
    runs: Vec<(u64, Vec<Arc<Block>>)>,
    /// Queued jobs owning InFlight blocks an immediate request depends on.
    promote: Vec<u64>,
}

/// Snapshot of block store counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockStoreStats {
    /// Bytes held by Ready blocks.
    pub resident_bytes: u64,
    /// Configured memory budget.
    pub memory_budget_bytes: u64,
    /// Blocks ever referenced and still tracked.
    pub blocks: usize,
    /// Blocks currently Ready.
    pub ready_blocks: usize,
    /// Blocks currently InFlight.
    pub in_flight_blocks: usize,
    /// Blocks already Ready when a read needed them.
    pub hits: u64,
    /// Blocks claimed for fetching.
    pub misses: u64,
    /// Fetch jobs submitted.
    pub fetch_jobs: u64,
    /// Blocks evicted.
    pub evictions: u64,
}

impl BlockStoreStats {
    /// Fraction of needed blocks that were already cached.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Resident bytes as a fraction of the budget.
    pub fn utilization(&self) -> f64 {
        if self.memory_budget_bytes == 0 {
            0.0
        } else {
            self.resident_bytes as f64 / self.memory_budget_bytes as f64
        }
    }
}

/// Block cache for one object.
pub struct BlockStore {
    handle: ObjectHandle,
    config: BlockStoreConfig,
    /// Non-overlapping blocks keyed by start offset.
    blocks: Mutex<BlockMap>,
    scheduler: Arc<PrefetchScheduler>,
    used_bytes: AtomicU64,
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    fetch_jobs: AtomicU64,
    evictions: AtomicU64,
}

impl BlockStore {
    pub(crate) fn new(
        handle: ObjectHandle,
        config: BlockStoreConfig,
        scheduler: Arc<PrefetchScheduler>,
    ) -> Arc<Self> {
        Arc::new(Self {
            handle,
            config,
            blocks: Mutex::new(BTreeMap::new()),
            scheduler,
            used_bytes: AtomicU64::new(0),
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            fetch_jobs: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        })
    }

    /// Object this store caches.
    pub fn handle(&self) -> &ObjectHandle {
        &self.handle
    }

    /// Block size in bytes.
    pub fn block_size(&self) -> u64 {
        self.config.block_size
    }

    /// Number of grid blocks the object spans.
    pub fn block_count(&self) -> u64 {
        self.handle.size().div_ceil(self.config.block_size)
    }

    fn clamp(&self, range: Range<u64>) -> Range<u64> {
        let size = self.handle.size();
        let end = range.end.min(size);
        range.start.min(end)..end
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Widen an uncovered gap to the block grid without reaching into its
    /// neighbours.
    fn widen(&self, blocks: &BlockMap, gap: Range<u64>) -> Range<u64> {
        let block_size = self.config.block_size;
        let floor = blocks
            .range(..gap.start)
            .next_back()
            .map_or(0, |(_, block)| block.range().end);
        let ceiling = blocks
            .range(gap.end..)
            .next()
            .map_or(self.handle.size(), |(start, _)| *start);
        let start = (gap.start / block_size * block_size).max(floor);
        let end = gap
            .end
            .div_ceil(block_size)
            .saturating_mul(block_size)
            .min(ceiling);
        start..end
    }

    /// Cut `range` at grid boundaries.
    fn split_at_grid(&self, range: Range<u64>) -> Vec<Range<u64>> {
        let block_size = self.config.block_size;
        let mut pieces = Vec::new();
        let mut start = range.start;
        while start < range.end {
            let end = ((start / block_size + 1) * block_size).min(range.end);
            pieces.push(start..end);
            start = end;
        }
        pieces
    }

    /// Insert Pending blocks over the uncovered parts of `range` and return them.
    fn fill(&self, blocks: &mut BlockMap, range: &Range<u64>, exact: bool) -> Vec<Arc<Block>> {
        let mut created = Vec::new();
        for gap in gaps(blocks, range) {
            let gap = if exact { gap } else { self.widen(blocks, gap) };
            for piece in self.split_at_grid(gap) {
                let block = Arc::new(Block::new(piece));
                blocks.insert(block.range().start, Arc::clone(&block));
                created.push(block);
            }
        }
        created
    }

    /// Blocks covering `range`, in offset order. Uncovered parts get Pending
    /// grid blocks.
    pub fn get(&self, range: Range<u64>) -> Vec<Arc<Block>> {
        let range = self.clamp(range);
        if range.is_empty() {
            return Vec::new();
        }
        let mut blocks = self.blocks.lock();
        self.fill(&mut blocks, &range, false);
        overlapping(&blocks, &range)
    }

    /// Create missing blocks for `ranges`, claim every claimable block they
    /// touch and group the claims into runs. Blocks overlapping `pin` are
    /// pinned under the same lock.
    fn claim(
        &self,
        ranges: &[Range<u64>],
        exact: bool,
        priority: Priority,
        pin: Option<&Range<u64>>,
    ) -> (Claimed, Vec<BlockPin>) {
        let mut blocks = self.blocks.lock();
        let mut touched = BlockMap::new();
        for range in ranges.iter().map(|range| self.clamp(range.clone())) {
            if range.is_empty() {
                continue;
            }
            for block in overlapping(&blocks, &range) {
                touched.insert(block.range().start, block);
            }
            for block in self.fill(&mut blocks, &range, exact) {
                touched.insert(block.range().start, block);
            }
        }
        let pins: Vec<BlockPin> = pin
            .map(|range| overlapping(&blocks, range))
            .unwrap_or_default()
            .iter()
            .map(|block| block.pin())
            .collect();

        let mut claimed = Claimed::default();
        let mut current: Option<(u64, Vec<Arc<Block>>)> = None;
        for block in touched.into_values() {
            let extends = current.as_ref().is_some_and(|(_, run)| {
                run.len() < self.config.max_coalesced_blocks
                    && run.last().map(|last| last.range().end) == Some(block.range().start)
            });
            let job_id = match &current {
                Some((id, _)) if extends => *id,
                _ => self.scheduler.next_job_id(),
            };

            if block.try_claim(job_id) {
                match current.as_mut() {
                    Some((id, run)) if *id == job_id => run.push(block),
                    _ => {
                        if let Some(run) = current.replace((job_id, vec![block])) {
                            claimed.runs.push(run);
                        }
                    }
                }
                continue;
            }

            if let Some(run) = current.take() {
                claimed.runs.push(run);
            }
            if priority == Priority::Immediate {
                claimed.promote.extend(block.in_flight_job());
            }
        }
        claimed.runs.extend(current);
        (claimed, pins)
    }

    /// Promote what an immediate request waits on and submit the claimed runs.
    fn dispatch(
        self: &Arc<Self>,
        claimed: Claimed,
        priority: Priority,
        owner: Option<StreamId>,
    ) -> AcceleratorResult<usize> {
        for job_id in claimed.promote {
            self.scheduler.promote(job_id);
        }

        let mut submitted = 0;
        let mut runs = claimed.runs.into_iter();
        while let Some((job_id, blocks)) = runs.next() {
            self.misses
                .fetch_add(blocks.len() as u64, Ordering::Relaxed);
            let job = FetchJob {
                id: job_id,
                store: Arc::clone(self),
                blocks,
                priority,
                owner,
            };
            match self.scheduler.submit(job) {
                Ok(()) => {
                    submitted += 1;
                    self.fetch_jobs.fetch_add(1, Ordering::Relaxed);
                }
                Err(error) if priority == Priority::Speculative => {
                    debug!(
                        key = self.handle.key(),
                        error = %error,
                        "speculative fetch dropped"
                    );
                }
                Err(error) => {
                    for (job_id, blocks) in runs.by_ref() {
                        for block in blocks {
                            block.revert(job_id);
                        }
                    }
                    return Err(error);
                }
            }
        }
        Ok(submitted)
    }

    /// Make sure every byte of `ranges` is Ready or being fetched, widening
    /// uncovered parts to the block grid.
    ///
    /// Idempotent: Ready and InFlight blocks are left alone, except that an
    /// immediate request promotes a queued speculative job it depends on.
    /// Overlapping and adjacent ranges collapse into the minimal set of
    /// fetch jobs.
    ///
    /// Speculative jobs rejected by a full queue are dropped silently;
    /// immediate ones surface `CapacityExceeded`.
    ///
    /// Returns the number of fetch jobs submitted.
    pub fn ensure(
        self: &Arc<Self>,
        ranges: &[Range<u64>],
        priority: Priority,
        owner: Option<StreamId>,
    ) -> AcceleratorResult<usize> {
        let (claimed, _) = self.claim(ranges, false, priority, None);
        self.dispatch(claimed, priority, owner)
    }

    /// Like [`ensure`](Self::ensure), but uncovered parts are fetched exactly
    /// as requested instead of widened to the block grid.
    pub fn ensure_exact(
        self: &Arc<Self>,
        ranges: &[Range<u64>],
        priority: Priority,
        owner: Option<StreamId>,
    ) -> AcceleratorResult<usize> {
        let (claimed, _) = self.claim(ranges, true, priority, None);
        self.dispatch(claimed, priority, owner)
    }

    /// Wait for a pinned `block` to become Ready and return its bytes.
    ///
    /// A block that settles back in Pending (its job was cancelled) is
    /// claimed again at immediate priority.
    pub(crate) async fn await_ready(
        self: &Arc<Self>,
        block: &Arc<Block>,
        owner: Option<StreamId>,
    ) -> AcceleratorResult<Bytes> {
        loop {
            match block.settled().await? {
                BlockState::Ready(bytes) => return Ok(bytes),
                BlockState::Failed(error) => return Err(error),
                BlockState::Evicted => {
                    return Err(AcceleratorError::internal(format!(
                        "block {}-{} of '{}' evicted while awaited",
                        block.range().start,
                        block.range().end,
                        self.handle.key()
                    )));
                }
                BlockState::Pending => {
                    trace!(
                        key = self.handle.key(),
                        start = block.range().start,
                        "block cancelled, fetching again"
                    );
                    let job_id = self.scheduler.next_job_id();
                    if block.try_claim(job_id) {
                        let claimed = Claimed {
                            runs: vec![(job_id, vec![Arc::clone(block)])],
                            promote: Vec::new(),
                        };
                        self.dispatch(claimed, Priority::Immediate, owner)?;
                    }
                }
                BlockState::InFlight { .. } => {}
            }
        }
    }

    /// Read `range` (clamped to the object), fetching whatever is missing.
    ///
    /// Uncovered parts are widened to the block grid. Blocks are pinned for
    /// the duration of the read. A single-block read returns a zero-copy
    /// slice of the cached block.
    pub async fn read_range(
        self: &Arc<Self>,
        range: Range<u64>,
        owner: Option<StreamId>,
    ) -> AcceleratorResult<Bytes> {
        self.read(range, false, owner).await
    }

    /// Read `range`, fetching uncovered parts without widening them.
    pub async fn read_exact(
        self: &Arc<Self>,
        range: Range<u64>,
        owner: Option<StreamId>,
    ) -> AcceleratorResult<Bytes> {
        self.read(range, true, owner).await
    }

    async fn read(
        self: &Arc<Self>,
        range: Range<u64>,
        exact: bool,
        owner: Option<StreamId>,
    ) -> AcceleratorResult<Bytes> {
        let range = self.clamp(range);
        if range.is_empty() {
            return Ok(Bytes::new());
        }

        let (claimed, pins) =
            self.claim(&[range.clone()], exact, Priority::Immediate, Some(&range));
        let cached = pins
            .iter()
            .filter(|pin| pin.block().ready_bytes().is_some())
            .count();
        self.hits.fetch_add(cached as u64, Ordering::Relaxed);
        self.dispatch(claimed, Priority::Immediate, owner)?;

        let mut parts = Vec::with_capacity(pins.len());
        for pin in &pins {
            let block = pin.block();
            let bytes = self.await_ready(block, owner).await?;
            block.touch(self.tick());
            let block_start = block.range().start;
            let start = (range.start.max(block_start) - block_start) as usize;
            let end = (range.end.min(block.range().end) - block_start) as usize;
            parts.push(bytes.slice(start..end));
        }
        drop(pins);
        self.evict_if_needed();

        if parts.len() == 1 {
            return parts
                .pop()
                .ok_or_else(|| AcceleratorError::internal("missing block slice"));
        }
        let mut out = BytesMut::with_capacity((range.end - range.start) as usize);
        for part in parts {
            out.extend_from_slice(&part);
        }
        Ok(out.freeze())
    }

    /// Drop the queued speculative fetches of `owner`. Dispatched fetches
    /// run to completion.
    pub(crate) fn cancel_speculative(&self, owner: StreamId) -> usize {
        self.scheduler.cancel_speculative(owner)
    }

    /// Evict least recently accessed Ready, unpinned blocks until resident
    /// bytes fit the budget. Returns the number of blocks evicted.
    ///
    /// If every remaining block is pinned or in flight the budget stays
    /// overshot until a later call.
    pub fn evict_if_needed(&self) -> usize {
        let budget = self.config.memory_budget_bytes;
        if self.used_bytes.load(Ordering::Acquire) <= budget {
            return 0;
        }

        let mut blocks = self.blocks.lock();
        let mut candidates: Vec<Arc<Block>> = blocks
            .values()
            .filter(|block| block.waiters() == 0 && block.ready_bytes().is_some())
            .cloned()
            .collect();
        candidates.sort_by_key(|block| (block.last_access(), block.range().start));

        let mut evicted = 0;
        for block in candidates {
            if self.used_bytes.load(Ordering::Acquire) <= budget {
                break;
            }
            if let Some(freed) = block.evict() {
                self.used_bytes.fetch_sub(freed, Ordering::AcqRel);
                blocks.remove(&block.range().start);
                evicted += 1;
                trace!(
                    key = self.handle.key(),
                    start = block.range().start,
                    end = block.range().end,
                    "block evicted"
                );
            }
        }
        drop(blocks);

        let used = self.used_bytes.load(Ordering::Acquire);
        if used > budget {
            debug!(
                key = self.handle.key(),
                used,
                budget,
                "memory budget overshoot, remaining blocks are pinned"
            );
        }
        self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        evicted
    }

    /// Install the outcome of a fetch job and release its waiters.
    pub(crate) fn finish_job(&self, job: &FetchJob, result: AcceleratorResult<Bytes>) {
        let job_start = job.range().start;
        match result {
            Ok(data) => {
                let tick = self.tick();
                for block in &job.blocks {
                    let range = block.range();
                    let slice =
                        data.slice((range.start - job_start) as usize..(range.end - job_start) as usize);
                    block.touch(tick);
                    if block.complete(job.id, slice) {
                        self.used_bytes.fetch_add(block.len(), Ordering::AcqRel);
                    }
                }
                trace!(key = self.handle.key(), job = job.id, blocks = job.blocks.len(), "fetch job complete");
                self.evict_if_needed();
            }
            Err(error) => {
                debug!(key = self.handle.key(), job = job.id, error = %error, "fetch job failed");
                for block in &job.blocks {
                    block.fail(job.id, error.clone());
                }
            }
        }
    }

    /// Snapshot of the store's counters and block states.
    pub fn stats(&self) -> BlockStoreStats {
        let mut stats = BlockStoreStats {
            resident_bytes: self.used_bytes.load(Ordering::Acquire),
            memory_budget_bytes: self.config.memory_budget_bytes,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            fetch_jobs: self.fetch_jobs.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            ..Default::default()
        };
        let blocks = self.blocks.lock();
        stats.blocks = blocks.len();
        for block in blocks.values() {
            match block.state() {
                BlockState::Ready(_) => stats.ready_blocks += 1,
                BlockState::InFlight { .. } => stats.in_flight_blocks += 1,
                _ => {}
            }
        }
        stats
    }
}
