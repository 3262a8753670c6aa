//! # Prefetch Scheduler
//!
//! Dispatches block fetch jobs against the transport under a process-wide
//! and a per-object concurrency ceiling.
//!
//! ```text
//!  submit(job) ──▶ queue ordered by (priority, arrival)
//!                   │
//!                   │ pump: while global and per-object budget allow
//!                   ▼
//!              spawned task ──▶ fetch_range with retry/backoff
//!                   │
//!                   ▼
//!              BlockStore::finish_job ──▶ blocks Ready / Failed, waiters wake
//!                   │
//!                   └──▶ release budget, pump again
//! ```
//!
//! Immediate jobs are dequeued before speculative ones, FIFO within a
//! priority. A queued speculative job can be promoted when a reader starts
//! waiting on one of its blocks, or cancelled when its stream issues a new
//! plan. Dispatched jobs are never cancelled.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, trace};

use super::plan::{Priority, StreamId};
use super::retry::with_retry;
use crate::config::SchedulerConfig;
use crate::error::{AcceleratorError, AcceleratorResult};
use crate::storage::{Block, BlockStore};
use crate::transport::{ObjectClient, TransportError};

/// A contiguous run of claimed blocks fetched with one range request.
pub(crate) struct FetchJob {
    pub(crate) id: u64,
    pub(crate) store: Arc<BlockStore>,
    pub(crate) blocks: Vec<Arc<Block>>,
    pub(crate) priority: Priority,
    pub(crate) owner: Option<StreamId>,
}

impl FetchJob {
    /// Byte range covering every block of the job.
    pub(crate) fn range(&self) -> Range<u64> {
        match (self.blocks.first(), self.blocks.last()) {
            (Some(first), Some(last)) => first.range().start..last.range().end,
            _ => 0..0,
        }
    }

    /// Return the job's blocks to Pending.
    pub(crate) fn revert(&self) {
        for block in &self.blocks {
            block.revert(self.id);
        }
    }
}

/// Snapshot of scheduler counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Jobs handed to the transport.
    pub dispatched: u64,
    /// Dispatched jobs that were speculative at dispatch time.
    pub speculative_dispatched: u64,
    /// Retries after transient failures.
    pub retries: u64,
    /// Jobs that ended with a failure.
    pub failed: u64,
    /// Queued speculative jobs dropped by a newer plan or a closed stream.
    pub cancelled: u64,
    /// Jobs rejected because the queue was full.
    pub rejected: u64,
    /// Jobs currently on the wire.
    pub in_flight: usize,
    /// Jobs waiting for budget.
    pub queued: usize,
}

struct QueuedJob {
    job: FetchJob,
    seq: u64,
}

#[derive(Default)]
struct QueueState {
    queued: HashMap<u64, QueuedJob>,
    /// (priority rank, arrival sequence, job id)
    order: BTreeSet<(u8, u64, u64)>,
    next_seq: u64,
    in_flight: usize,
    in_flight_per_object: HashMap<String, usize>,
}

#[derive(Default)]
struct Counters {
    dispatched: AtomicU64,
    speculative_dispatched: AtomicU64,
    retries: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    rejected: AtomicU64,
}

/// Process-wide fetch scheduler shared by every object of a factory.
pub(crate) struct PrefetchScheduler {
    client: Arc<dyn ObjectClient>,
    config: SchedulerConfig,
    runtime: Handle,
    state: Mutex<QueueState>,
    next_job_id: AtomicU64,
    counters: Counters,
}

impl PrefetchScheduler {
    /// Create a scheduler bound to the current tokio runtime.
    pub(crate) fn new(
        client: Arc<dyn ObjectClient>,
        config: SchedulerConfig,
    ) -> AcceleratorResult<Arc<Self>> {
        let runtime = Handle::try_current().map_err(|e| {
            AcceleratorError::internal(format!("scheduler requires a tokio runtime: {}", e))
        })?;
        Ok(Arc::new(Self {
            client,
            config,
            runtime,
            state: Mutex::new(QueueState::default()),
            next_job_id: AtomicU64::new(1),
            counters: Counters::default(),
        }))
    }

    pub(crate) fn client(&self) -> &Arc<dyn ObjectClient> {
        &self.client
    }

    /// Allocate a job id for claiming blocks.
    pub(crate) fn next_job_id(&self) -> u64 {
        self.next_job_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Run a background task on the scheduler's runtime.
    pub(crate) fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.runtime.spawn(future);
    }

    /// Queue a job and dispatch whatever the budget allows.
    ///
    /// When the queue is at its hard bound the job's blocks are reverted to
    /// Pending and `CapacityExceeded` is returned.
    pub(crate) fn submit(self: &Arc<Self>, job: FetchJob) -> AcceleratorResult<()> {
        {
            let mut state = self.state.lock();
            let queued = state.queued.len();
            if queued >= self.config.max_queued_fetches {
                drop(state);
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                job.revert();
                return Err(AcceleratorError::CapacityExceeded {
                    queued,
                    limit: self.config.max_queued_fetches,
                });
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            trace!(
                job = job.id,
                key = job.store.handle().key(),
                start = job.range().start,
                end = job.range().end,
                priority = ?job.priority,
                "fetch job queued"
            );
            state.order.insert((job.priority.rank(), seq, job.id));
            state.queued.insert(job.id, QueuedJob { job, seq });
        }
        self.pump();
        Ok(())
    }

    /// Raise a queued speculative job to immediate priority.
    ///
    /// Returns false if the job is not queued (already dispatched or cancelled)
    /// or already immediate.
    pub(crate) fn promote(&self, job_id: u64) -> bool {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(queued) = state.queued.get_mut(&job_id) else {
            return false;
        };
        if queued.job.priority == Priority::Immediate {
            return false;
        }
        state
            .order
            .remove(&(Priority::Speculative.rank(), queued.seq, job_id));
        state
            .order
            .insert((Priority::Immediate.rank(), queued.seq, job_id));
        queued.job.priority = Priority::Immediate;
        trace!(job = job_id, "fetch job promoted");
        true
    }

    /// Drop every queued speculative job owned by `owner`.
    ///
    /// Their blocks go back to Pending; already dispatched jobs are left alone.
    pub(crate) fn cancel_speculative(&self, owner: StreamId) -> usize {
        let cancelled: Vec<FetchJob> = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let victims: Vec<(u8, u64, u64)> = state
                .order
                .iter()
                .filter(|(rank, _, id)| {
                    *rank == Priority::Speculative.rank()
                        && state
                            .queued
                            .get(id)
                            .is_some_and(|queued| queued.job.owner == Some(owner))
                })
                .copied()
                .collect();
            victims
                .into_iter()
                .filter_map(|entry| {
                    state.order.remove(&entry);
                    state.queued.remove(&entry.2).map(|queued| queued.job)
                })
                .collect()
        };

        for job in &cancelled {
            job.revert();
        }
        if !cancelled.is_empty() {
            debug!(
                stream = %owner,
                jobs = cancelled.len(),
                "cancelled superseded speculative fetches"
            );
            self.counters
                .cancelled
                .fetch_add(cancelled.len() as u64, Ordering::Relaxed);
        }
        cancelled.len()
    }

    /// Dispatch queued jobs while budget allows.
    fn pump(self: &Arc<Self>) {
        let ready = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let mut ready = Vec::new();
            while state.in_flight < self.config.max_concurrent_fetches {
                let per_object = &state.in_flight_per_object;
                let queued = &state.queued;
                let next = state
                    .order
                    .iter()
                    .find(|(_, _, id)| {
                        queued.get(id).is_some_and(|q| {
                            per_object
                                .get(q.job.store.handle().key())
                                .copied()
                                .unwrap_or(0)
                                < self.config.max_concurrent_fetches_per_object
                        })
                    })
                    .copied();
                let Some(entry) = next else {
                    break;
                };
                state.order.remove(&entry);
                let Some(queued) = state.queued.remove(&entry.2) else {
                    continue;
                };
                state.in_flight += 1;
                *state
                    .in_flight_per_object
                    .entry(queued.job.store.handle().key().to_string())
                    .or_default() += 1;
                ready.push(queued.job);
            }
            ready
        };

        for job in ready {
            self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
            if job.priority == Priority::Speculative {
                self.counters
                    .speculative_dispatched
                    .fetch_add(1, Ordering::Relaxed);
            }
            let scheduler = Arc::clone(self);
            self.runtime.spawn(async move {
                scheduler.run(job).await;
            });
        }
    }

    async fn run(self: Arc<Self>, job: FetchJob) {
        let range = job.range();
        let key = job.store.handle().key().to_string();
        trace!(job = job.id, key = %key, start = range.start, end = range.end, "fetch dispatched");

        let result = self.fetch(&key, range).await;
        if result.is_err() {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
        }
        job.store.finish_job(&job, result);

        {
            let mut state = self.state.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
            if let Some(count) = state.in_flight_per_object.get_mut(&key) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    state.in_flight_per_object.remove(&key);
                }
            }
        }
        self.pump();
    }

    /// Fetch one range, retrying transient failures. Short reads count as transient.
    async fn fetch(&self, key: &str, range: Range<u64>) -> AcceleratorResult<Bytes> {
        let expected = range.end - range.start;
        let (result, attempts) = with_retry(&self.config.retry, "fetch_range", key, || {
            let range = range.clone();
            async move {
                let bytes = self.client.fetch_range(key, range).await?;
                if bytes.len() as u64 != expected {
                    return Err(TransportError::ShortRead {
                        expected,
                        actual: bytes.len() as u64,
                    });
                }
                Ok(bytes)
            }
        })
        .await;

        if attempts > 1 {
            self.counters
                .retries
                .fetch_add(u64::from(attempts - 1), Ordering::Relaxed);
        }
        result.map_err(|e| AcceleratorError::from_transport(key, range, attempts, &e))
    }

    /// Snapshot of the counters.
    pub(crate) fn stats(&self) -> SchedulerStats {
        let (in_flight, queued) = {
            let state = self.state.lock();
            (state.in_flight, state.queued.len())
        };
        SchedulerStats {
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            speculative_dispatched: self.counters.speculative_dispatched.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            in_flight,
            queued,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BlockStoreConfig;
    use crate::storage::{BlockState, ObjectHandle};
    use crate::transport::mock_client::MockObjectClient;
    use std::time::Duration;

    const BLOCK: u64 = 100;
    const SIZE: u64 = 2000;

    fn serial() -> SchedulerConfig {
        SchedulerConfig::default()
            .with_max_concurrent_fetches(1)
            .with_max_concurrent_fetches_per_object(1)
    }

    fn setup(
        config: SchedulerConfig,
    ) -> (Arc<MockObjectClient>, Arc<PrefetchScheduler>, Arc<BlockStore>) {
        let data: Vec<u8> = (0..SIZE).map(|i| (i % 251) as u8).collect();
        let mock = Arc::new(
            MockObjectClient::builder()
                .with_object("k", data.clone())
                .with_object("j", data)
                .with_latency(Duration::from_millis(30))
                .build(),
        );
        let scheduler = PrefetchScheduler::new(mock.clone(), config).unwrap();
        let store = store_for(&scheduler, "k");
        (mock, scheduler, store)
    }

    fn store_for(scheduler: &Arc<PrefetchScheduler>, key: &str) -> Arc<BlockStore> {
        BlockStore::new(
            ObjectHandle::new(key, SIZE),
            BlockStoreConfig::default().with_block_size(BLOCK),
            scheduler.clone(),
        )
    }

    fn state_at(store: &BlockStore, offset: u64) -> BlockState {
        store.get(offset..offset + 1)[0].state()
    }

    #[tokio::test]
    async fn test_full_queue_drops_speculative_and_rejects_immediate() {
        let (_mock, scheduler, store) = setup(serial().with_max_queued_fetches(1));

        // The first job goes straight to the wire, the second waits.
        assert_eq!(store.ensure(&[0..BLOCK], Priority::Speculative, None).unwrap(), 1);
        assert_eq!(store.ensure(&[200..300], Priority::Speculative, None).unwrap(), 1);
        assert_eq!(scheduler.stats().queued, 1);

        assert_eq!(store.ensure(&[400..500], Priority::Speculative, None).unwrap(), 0);
        assert!(matches!(state_at(&store, 400), BlockState::Pending));

        let err = store
            .ensure(&[600..700], Priority::Immediate, None)
            .unwrap_err();
        assert_eq!(err, AcceleratorError::CapacityExceeded { queued: 1, limit: 1 });
        assert!(matches!(state_at(&store, 600), BlockState::Pending));

        let stats = scheduler.stats();
        assert_eq!(stats.rejected, 2);
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.in_flight, 1);
    }

    #[tokio::test]
    async fn test_cancel_keeps_dispatched_and_foreign_jobs() {
        let (mock, scheduler, store) = setup(serial());
        let owner = StreamId(7);
        let other = StreamId(8);

        store.ensure(&[0..BLOCK], Priority::Speculative, Some(owner)).unwrap();
        store.ensure(&[200..300], Priority::Speculative, Some(owner)).unwrap();
        store.ensure(&[400..500], Priority::Speculative, Some(other)).unwrap();
        store.ensure(&[600..700], Priority::Immediate, Some(owner)).unwrap();
        assert_eq!(scheduler.stats().queued, 3);

        // Only the owner's queued speculative job goes.
        assert_eq!(scheduler.cancel_speculative(owner), 1);
        assert_eq!(scheduler.cancel_speculative(owner), 0);
        let stats = scheduler.stats();
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.queued, 2);
        assert!(matches!(state_at(&store, 200), BlockState::Pending));

        for offset in [0, 400, 600] {
            let block = store.get(offset..offset + 1).remove(0);
            let state = block.settled().await.unwrap();
            assert!(matches!(state, BlockState::Ready(_)), "{} settled {}", offset, state.name());
        }
        let mut fetched = mock.fetches_for("k");
        fetched.sort_by_key(|r| r.start);
        assert_eq!(fetched, vec![0..100, 400..500, 600..700]);
    }

    #[tokio::test]
    async fn test_immediate_dequeued_before_speculative() {
        let (mock, _scheduler, store) = setup(serial());

        store.ensure(&[0..BLOCK], Priority::Speculative, None).unwrap();
        store.ensure(&[200..300], Priority::Speculative, None).unwrap();
        store.ensure(&[400..500], Priority::Immediate, None).unwrap();

        let last = store.get(200..201).remove(0);
        last.settled().await.unwrap();
        assert_eq!(mock.fetches_for("k"), vec![0..100, 400..500, 200..300]);
    }

    #[tokio::test]
    async fn test_per_object_ceiling() {
        let config = SchedulerConfig::default()
            .with_max_concurrent_fetches(2)
            .with_max_concurrent_fetches_per_object(1);
        let (mock, scheduler, first) = setup(config);
        let second = store_for(&scheduler, "j");

        first.ensure(&[0..BLOCK], Priority::Speculative, None).unwrap();
        first.ensure(&[200..300], Priority::Speculative, None).unwrap();
        second.ensure(&[0..BLOCK], Priority::Speculative, None).unwrap();

        // The second object gets the free global slot; the first waits its turn.
        let stats = scheduler.stats();
        assert_eq!(stats.in_flight, 2);
        assert_eq!(stats.queued, 1);

        second.get(0..1)[0].settled().await.unwrap();
        first.get(200..201)[0].settled().await.unwrap();
        assert_eq!(mock.fetches_for("j"), vec![0..100]);
        assert_eq!(mock.fetches_for("k"), vec![0..100, 200..300]);
        assert_eq!(scheduler.stats().dispatched, 3);
    }
}
