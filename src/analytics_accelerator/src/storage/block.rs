//! A single cached block and its state machine.
//!
//! ```text
//!            claim               complete
//! Pending ───────────▶ InFlight ───────────▶ Ready ──evict──▶ Evicted
//!    ▲                 │    │
//!    └──── revert ─────┘    └── fail ──▶ Failed
//!                                         │
//!                      claim (lazy retry) ┘
//! ```
//!
//! Evicted is terminal: the store drops the block and a later reference to
//! its bytes creates a new one.
//!
//! Every transition happens inside `watch::Sender::send_if_modified`, which
//! holds the channel's write lock, so two racing claimers cannot both win.
//! Waiters subscribe to the same channel and wake on every change.

use bytes::Bytes;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::{AcceleratorError, AcceleratorResult};

/// State of a block.
#[derive(Clone, Debug)]
pub enum BlockState {
    /// Referenced but not scheduled.
    Pending,
    /// Owned by the fetch job `job_id`, queued or on the wire.
    InFlight {
        /// Id of the owning fetch job.
        job_id: u64,
    },
    /// Fetched; bytes are immutable and exactly cover the block range.
    Ready(Bytes),
    /// Last fetch failed. Retried on next reference.
    Failed(AcceleratorError),
    /// Bytes were released under memory pressure.
    Evicted,
}

impl BlockState {
    /// Short name, used in logs and stats.
    pub fn name(&self) -> &'static str {
        match self {
            BlockState::Pending => "pending",
            BlockState::InFlight { .. } => "in_flight",
            BlockState::Ready(_) => "ready",
            BlockState::Failed(_) => "failed",
            BlockState::Evicted => "evicted",
        }
    }

    fn is_claimable(&self) -> bool {
        matches!(self, BlockState::Pending | BlockState::Failed(_))
    }
}

/// A contiguous byte range of one object, never longer than the block size.
///
/// Blocks created by reads and readahead sit on the block grid; blocks
/// created for exact ranges (column chunks, footer bytes) start and end
/// wherever the range does.
#[derive(Debug)]
pub struct Block {
    range: Range<u64>,
    state: watch::Sender<BlockState>,
    waiters: AtomicUsize,
    last_access: AtomicU64,
}

impl Block {
    pub(crate) fn new(range: Range<u64>) -> Self {
        let (state, _) = watch::channel(BlockState::Pending);
        Self {
            range,
            state,
            waiters: AtomicUsize::new(0),
            last_access: AtomicU64::new(0),
        }
    }

    /// Byte range covered by this block.
    pub fn range(&self) -> Range<u64> {
        self.range.clone()
    }

    /// Length of the block in bytes.
    pub fn len(&self) -> u64 {
        self.range.end - self.range.start
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> BlockState {
        BlockState::clone(&self.state.borrow())
    }

    /// Bytes of the block if it is Ready.
    pub fn ready_bytes(&self) -> Option<Bytes> {
        match &*self.state.borrow() {
            BlockState::Ready(bytes) => Some(bytes.clone()),
            _ => None,
        }
    }

    /// Number of callers currently pinning this block.
    pub fn waiters(&self) -> usize {
        self.waiters.load(Ordering::Acquire)
    }

    pub(crate) fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    pub(crate) fn touch(&self, tick: u64) {
        self.last_access.fetch_max(tick, Ordering::Relaxed);
    }

    /// Pin the block so eviction skips it until the guard drops.
    pub(crate) fn pin(self: &Arc<Self>) -> BlockPin {
        self.waiters.fetch_add(1, Ordering::AcqRel);
        BlockPin {
            block: Arc::clone(self),
        }
    }

    /// Move Pending or Failed to InFlight for `job_id`.
    ///
    /// Returns false if the block is InFlight, Ready or Evicted.
    pub(crate) fn try_claim(&self, job_id: u64) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_claimable() {
                *state = BlockState::InFlight { job_id };
                true
            } else {
                false
            }
        })
    }

    /// Job currently owning the block, if InFlight.
    pub(crate) fn in_flight_job(&self) -> Option<u64> {
        match &*self.state.borrow() {
            BlockState::InFlight { job_id } => Some(*job_id),
            _ => None,
        }
    }

    /// Install fetched bytes. Ignored unless the block is still owned by `job_id`.
    pub(crate) fn complete(&self, job_id: u64, bytes: Bytes) -> bool {
        debug_assert_eq!(bytes.len() as u64, self.len());
        self.transition_owned(job_id, BlockState::Ready(bytes))
    }

    /// Record a fetch failure. Ignored unless the block is still owned by `job_id`.
    pub(crate) fn fail(&self, job_id: u64, error: AcceleratorError) -> bool {
        self.transition_owned(job_id, BlockState::Failed(error))
    }

    /// Return a cancelled job's block to Pending.
    pub(crate) fn revert(&self, job_id: u64) -> bool {
        self.transition_owned(job_id, BlockState::Pending)
    }

    fn transition_owned(&self, job_id: u64, next: BlockState) -> bool {
        self.state.send_if_modified(|state| match *state {
            BlockState::InFlight { job_id: owner } if owner == job_id => {
                *state = next;
                true
            }
            _ => false,
        })
    }

    /// Drop the bytes of a Ready, unpinned block. Returns the bytes freed.
    pub(crate) fn evict(&self) -> Option<u64> {
        let mut freed = None;
        self.state.send_if_modified(|state| {
            if matches!(state, BlockState::Ready(_)) && self.waiters.load(Ordering::Acquire) == 0
            {
                *state = BlockState::Evicted;
                freed = Some(self.len());
                true
            } else {
                false
            }
        });
        freed
    }

    /// Wait until the block is not InFlight and return the state it settled in.
    ///
    /// The result is usually Ready or Failed. Pending means the owning job was
    /// cancelled and the caller has to claim the block again.
    pub(crate) async fn settled(&self) -> AcceleratorResult<BlockState> {
        let mut rx = self.state.subscribe();
        let state = rx
            .wait_for(|state| !matches!(state, BlockState::InFlight { .. }))
            .await
            .map_err(|_| AcceleratorError::internal("block state channel closed"))?;
        Ok(BlockState::clone(&state))
    }
}

/// Guard keeping a block pinned.
#[derive(Debug)]
pub(crate) struct BlockPin {
    block: Arc<Block>,
}

impl BlockPin {
    pub(crate) fn block(&self) -> &Arc<Block> {
        &self.block
    }
}

impl Drop for BlockPin {
    fn drop(&mut self) {
        self.block.waiters.fetch_sub(1, Ordering::AcqRel);
    }
}
