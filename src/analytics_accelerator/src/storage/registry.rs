//! Session-level registry of open objects.
//!
//! The registry owns each object's [`BlockStore`] and footer. Streams hold a
//! counted lease on the object state; nothing the registry owns points back
//! at a stream, so there are no reference cycles.

use lru::LruCache;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

use super::{BlockStore, ObjectHandle};
use crate::config::FooterConfig;
use crate::footer::{load_footer, FooterState};

/// Shared state of one object.
pub(crate) struct ObjectState {
    handle: ObjectHandle,
    store: Arc<BlockStore>,
    footer: OnceCell<FooterState>,
    open_streams: AtomicUsize,
}

impl ObjectState {
    fn new(handle: ObjectHandle, store: Arc<BlockStore>) -> Self {
        Self {
            handle,
            store,
            footer: OnceCell::new(),
            open_streams: AtomicUsize::new(0),
        }
    }

    pub(crate) fn handle(&self) -> &ObjectHandle {
        &self.handle
    }

    pub(crate) fn store(&self) -> &Arc<BlockStore> {
        &self.store
    }

    pub(crate) fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::Acquire)
    }

    /// Footer state if it was already loaded.
    pub(crate) fn loaded_footer(&self) -> Option<&FooterState> {
        self.footer.get()
    }

    /// Load the footer once per object.
    ///
    /// Format problems are cached as a degraded state. Fetch failures are not
    /// cached; they return `None` and the next caller tries again.
    pub(crate) async fn footer(&self, config: &FooterConfig) -> Option<&FooterState> {
        match self
            .footer
            .get_or_try_init(|| load_footer(&self.store, config))
            .await
        {
            Ok(state) => Some(state),
            Err(error) => {
                debug!(key = self.handle.key(), error = %error, "footer fetch failed");
                None
            }
        }
    }
}

/// Objects keyed by object key, least recently opened first out.
pub(crate) struct ObjectRegistry {
    objects: Mutex<LruCache<String, Arc<ObjectState>>>,
    max_idle_objects: usize,
}

impl ObjectRegistry {
    pub(crate) fn new(max_idle_objects: usize) -> Self {
        Self {
            objects: Mutex::new(LruCache::unbounded()),
            max_idle_objects,
        }
    }

    /// Cached handle for `key`, without touching recency.
    pub(crate) fn lookup(&self, key: &str) -> Option<ObjectHandle> {
        self.objects
            .lock()
            .peek(key)
            .map(|state| state.handle().clone())
    }

    /// Cached object state for `key`, without touching recency.
    pub(crate) fn get(&self, key: &str) -> Option<Arc<ObjectState>> {
        self.objects.lock().peek(key).cloned()
    }

    /// Take a stream lease on the object, creating its state if needed.
    ///
    /// Returns the state and whether it was created by this call.
    pub(crate) fn acquire(
        &self,
        handle: ObjectHandle,
        make_store: impl FnOnce(&ObjectHandle) -> Arc<BlockStore>,
    ) -> (Arc<ObjectState>, bool) {
        let mut objects = self.objects.lock();
        if let Some(state) = objects.get(handle.key()) {
            if state.handle().size() != handle.size() {
                debug!(
                    key = handle.key(),
                    cached = state.handle().size(),
                    requested = handle.size(),
                    "size mismatch for cached object, keeping cached handle"
                );
            }
            state.open_streams.fetch_add(1, Ordering::AcqRel);
            return (Arc::clone(state), false);
        }

        let store = make_store(&handle);
        let state = Arc::new(ObjectState::new(handle, store));
        state.open_streams.fetch_add(1, Ordering::AcqRel);
        objects.put(state.handle().key().to_string(), Arc::clone(&state));
        (state, true)
    }

    /// Return a stream lease and trim idle objects beyond the bound.
    pub(crate) fn release(&self, key: &str) {
        let mut objects = self.objects.lock();
        if let Some(state) = objects.peek(key) {
            let _ = state
                .open_streams
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        }

        let idle: Vec<String> = objects
            .iter()
            .rev()
            .filter(|(_, state)| state.open_streams() == 0)
            .map(|(key, _)| key.clone())
            .collect();
        let excess = idle.len().saturating_sub(self.max_idle_objects);
        for key in idle.into_iter().take(excess) {
            objects.pop(&key);
            debug!(key = %key, "idle object dropped from registry");
        }
    }

    /// Number of tracked objects.
    pub(crate) fn len(&self) -> usize {
        self.objects.lock().len()
    }
}
