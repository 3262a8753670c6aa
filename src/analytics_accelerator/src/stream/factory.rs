//! Stream factory: the session that owns the scheduler, the object registry
//! and the column access store shared by every stream it opens.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use super::seekable::ObjectStream;
use crate::config::AcceleratorConfig;
use crate::error::{AcceleratorError, AcceleratorResult};
use crate::prefetch::{
    with_retry, ColumnAccessStore, PrefetchScheduler, Priority, SchedulerStats, StreamId,
};
use crate::storage::{BlockStore, BlockStoreStats, ObjectHandle, ObjectRegistry, ObjectState};
use crate::transport::{ObjectClient, TransportError};

/// Opens [`ObjectStream`]s over one object client.
///
/// Streams opened by the same factory share block stores, footers and the
/// fetch concurrency budget.
pub struct StreamFactory {
    config: Arc<AcceleratorConfig>,
    scheduler: Arc<PrefetchScheduler>,
    registry: Arc<ObjectRegistry>,
    recent_columns: Arc<ColumnAccessStore>,
    next_stream_id: AtomicU64,
}

impl StreamFactory {
    /// Create a factory. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`AcceleratorError::InvalidConfig`] if the configuration is
    /// inconsistent.
    pub fn new(client: Arc<dyn ObjectClient>, config: AcceleratorConfig) -> AcceleratorResult<Self> {
        config.validate()?;
        let scheduler = PrefetchScheduler::new(client, config.scheduler.clone())?;
        let registry = Arc::new(ObjectRegistry::new(config.registry.max_idle_objects));
        let recent_columns = Arc::new(ColumnAccessStore::new(
            config.planner.column_access_store_size,
        ));
        info!(
            block_size = config.block_store.block_size,
            memory_budget_bytes = config.block_store.memory_budget_bytes,
            max_concurrent_fetches = config.scheduler.max_concurrent_fetches,
            "stream factory created"
        );
        Ok(Self {
            config: Arc::new(config),
            scheduler,
            registry,
            recent_columns,
            next_stream_id: AtomicU64::new(1),
        })
    }

    /// Factory configuration.
    pub fn config(&self) -> &AcceleratorConfig {
        &self.config
    }

    /// Open a stream over `key`, resolving its size with a HEAD request the
    /// first time the object is seen.
    ///
    /// # Errors
    ///
    /// Returns [`AcceleratorError::ObjectNotFound`] if the object does not
    /// exist, or a fetch error if the HEAD request fails otherwise.
    pub async fn open(&self, key: &str) -> AcceleratorResult<ObjectStream> {
        let handle = match self.registry.lookup(key) {
            Some(handle) => handle,
            None => self.head(key).await?,
        };
        Ok(self.open_handle(handle))
    }

    /// Open a stream over `key` whose size the caller already knows.
    pub fn open_with_size(&self, key: &str, size: u64) -> ObjectStream {
        let handle = self
            .registry
            .lookup(key)
            .unwrap_or_else(|| ObjectHandle::new(key, size));
        self.open_handle(handle)
    }

    /// Scheduler counters.
    pub fn stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    /// Block store counters of a tracked object.
    pub fn object_stats(&self, key: &str) -> Option<BlockStoreStats> {
        self.registry.get(key).map(|object| object.store().stats())
    }

    /// Number of objects the registry currently tracks.
    pub fn cached_objects(&self) -> usize {
        self.registry.len()
    }

    /// Recently read column paths, most recent first.
    pub fn recent_columns(&self) -> Vec<String> {
        self.recent_columns.recent()
    }

    async fn head(&self, key: &str) -> AcceleratorResult<ObjectHandle> {
        let client = self.scheduler.client();
        let (result, attempts) = with_retry(&self.config.scheduler.retry, "head_object", key, || {
            client.head_object(key)
        })
        .await;
        match result {
            Ok(metadata) => {
                debug!(key, size = metadata.size, "object resolved");
                Ok(ObjectHandle::new(key, metadata.size).with_etag(metadata.etag))
            }
            Err(TransportError::NotFound { .. }) => Err(AcceleratorError::ObjectNotFound {
                key: key.to_string(),
            }),
            Err(error) => Err(AcceleratorError::from_transport(key, 0..0, attempts, &error)),
        }
    }

    fn open_handle(&self, handle: ObjectHandle) -> ObjectStream {
        let (object, created) = self.registry.acquire(handle, |handle| {
            BlockStore::new(
                handle.clone(),
                self.config.block_store.clone(),
                Arc::clone(&self.scheduler),
            )
        });
        if created {
            self.on_first_open(&object);
        }

        let id = StreamId(self.next_stream_id.fetch_add(1, Ordering::Relaxed));
        debug!(key = object.handle().key(), stream = %id, "stream opened");
        ObjectStream::new(
            id,
            object,
            Arc::clone(&self.config),
            Arc::clone(&self.registry),
            Arc::clone(&self.recent_columns),
        )
    }

    /// Object-level prefetch when an object enters the registry.
    fn on_first_open(&self, object: &Arc<ObjectState>) {
        let handle = object.handle();
        let size = handle.size();
        let registry_config = &self.config.registry;

        if registry_config.small_object_prefetch
            && size > 0
            && size <= registry_config.small_object_threshold
        {
            debug!(key = handle.key(), size, "prefetching small object whole");
            if let Err(error) = object.store().ensure(&[0..size], Priority::Speculative, None) {
                debug!(key = handle.key(), error = %error, "small object prefetch skipped");
            }
        }

        let footer_config = &self.config.footer;
        if footer_config.prefetch_footer_on_open && footer_config.is_footer_indexed(handle.key()) {
            let object = Arc::clone(object);
            let config = Arc::clone(&self.config);
            self.scheduler.spawn(async move {
                if object.footer(&config.footer).await.is_none() {
                    debug!(key = object.handle().key(), "footer prefetch on open failed");
                }
            });
        }
    }
}
