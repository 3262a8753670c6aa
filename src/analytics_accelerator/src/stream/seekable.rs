//! # Seekable Object Stream
//!
//! Position-tracking read surface over one remote object.
//!
//! ```text
//! read(dst) at position p
//!   │
//!   ├─ tail access on a footer-indexed key? ──▶ load footer once per object
//!   ├─ planner.on_read(p, n) ──▶ cancel previous speculative plan, submit new
//!   ├─ block_store.read_range(p..p+n) ──▶ pin, ensure, await Ready, copy
//!   └─ position += n
//! ```
//!
//! A stream owns only its planner state. Blocks, footers and in-flight
//! fetches belong to the object and outlive the stream.

use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::config::AcceleratorConfig;
use crate::error::{AcceleratorError, AcceleratorResult};
use crate::footer::FooterState;
use crate::prefetch::{ColumnAccessStore, PrefetchPlan, Priority, ReadPattern, ReadPlanner, StreamId};
use crate::storage::{BlockStoreStats, ObjectHandle, ObjectRegistry, ObjectState};

/// A logical stream over one object, created by
/// [`StreamFactory`](super::StreamFactory).
///
/// Reads never go past the end of the object: a read at or beyond the end
/// returns fewer bytes (possibly zero) rather than an error.
pub struct ObjectStream {
    id: StreamId,
    object: Arc<ObjectState>,
    config: Arc<AcceleratorConfig>,
    registry: Arc<ObjectRegistry>,
    recent_columns: Arc<ColumnAccessStore>,
    planner: ReadPlanner,
    position: u64,
    footer_settled: bool,
    closed: bool,
}

impl ObjectStream {
    pub(crate) fn new(
        id: StreamId,
        object: Arc<ObjectState>,
        config: Arc<AcceleratorConfig>,
        registry: Arc<ObjectRegistry>,
        recent_columns: Arc<ColumnAccessStore>,
    ) -> Self {
        let predictive = config
            .planner
            .predictive_column_prefetch
            .then(|| Arc::clone(&recent_columns));
        let planner = ReadPlanner::new(
            config.planner.clone(),
            config.block_store.block_size,
            object.handle().size(),
            predictive,
        );
        Self {
            id,
            object,
            config,
            registry,
            recent_columns,
            planner,
            position: 0,
            footer_settled: false,
            closed: false,
        }
    }

    /// Stream identity.
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Object behind the stream.
    pub fn handle(&self) -> &ObjectHandle {
        self.object.handle()
    }

    /// Current offset.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Object length in bytes.
    pub fn size(&self) -> u64 {
        self.object.handle().size()
    }

    /// Access pattern observed so far.
    pub fn pattern(&self) -> ReadPattern {
        self.planner.pattern()
    }

    /// Footer state of the object, if it was loaded.
    pub fn footer_state(&self) -> Option<FooterState> {
        self.object.loaded_footer().cloned()
    }

    /// Block store counters of the object.
    pub fn stats(&self) -> BlockStoreStats {
        self.object.store().stats()
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &Arc<crate::storage::BlockStore> {
        self.object.store()
    }

    /// Read up to `dst.len()` bytes at the current position and advance.
    ///
    /// Returns the number of bytes read; 0 at end of object.
    ///
    /// # Errors
    ///
    /// Surfaces the fetch error recorded on a needed block. The position is
    /// unchanged on error and the stream stays usable.
    pub async fn read(&mut self, dst: &mut [u8]) -> AcceleratorResult<usize> {
        self.check_open()?;
        let offset = self.position;
        let len = (dst.len() as u64).min(self.size().saturating_sub(offset));
        if len == 0 {
            return Ok(0);
        }

        self.sync_footer(offset, len).await;
        let plan = self.planner.on_read(offset, len);
        self.apply_plan(&plan)?;

        let bytes = self
            .object
            .store()
            .read_range(offset..offset + len, Some(self.id))
            .await?;
        dst[..bytes.len()].copy_from_slice(&bytes);
        self.position += bytes.len() as u64;
        self.record_column_access(offset);
        trace!(stream = %self.id, offset, len = bytes.len(), "read");
        Ok(bytes.len())
    }

    /// Move to `position`. Seeking to the object length is allowed.
    ///
    /// # Errors
    ///
    /// Returns [`AcceleratorError::InvalidArgument`] for positions past the end.
    pub fn seek(&mut self, position: u64) -> AcceleratorResult<()> {
        self.check_open()?;
        if position > self.size() {
            return Err(AcceleratorError::invalid_argument(format!(
                "seek to {} past end of object ({} bytes)",
                position,
                self.size()
            )));
        }
        self.position = position;
        let plan = self.planner.on_seek(position);
        self.apply_plan(&plan)
    }

    /// Read the last `dst.len()` bytes of the object (or the whole object if
    /// it is shorter) without moving the position.
    pub async fn read_tail(&mut self, dst: &mut [u8]) -> AcceleratorResult<usize> {
        self.check_open()?;
        let size = self.size();
        let len = (dst.len() as u64).min(size);
        if len == 0 {
            return Ok(0);
        }
        self.sync_footer(size - len, len).await;
        let bytes = self
            .object
            .store()
            .read_range(size - len..size, Some(self.id))
            .await?;
        dst[..bytes.len()].copy_from_slice(&bytes);
        Ok(bytes.len())
    }

    /// Declare the leaf columns the caller is about to read.
    ///
    /// Loads the footer if needed. Once parsed, reads inside a row group
    /// fetch exactly the declared columns' chunks instead of reading ahead.
    /// Without a usable footer the hint has no effect.
    pub async fn declare_column_interest(&mut self, columns: &[usize]) -> AcceleratorResult<()> {
        self.check_open()?;
        self.load_footer().await;
        let plan = self.planner.on_column_select(self.position, columns);
        self.apply_plan(&plan)
    }

    /// Declare columns by dotted path. Unknown names are ignored.
    ///
    /// Returns the number of names that resolved.
    pub async fn declare_column_names(&mut self, names: &[&str]) -> AcceleratorResult<usize> {
        self.check_open()?;
        self.load_footer().await;
        let Some(footer) = self.planner.footer() else {
            debug!(stream = %self.id, "no usable footer, column names ignored");
            return Ok(0);
        };
        let columns: Vec<usize> = names
            .iter()
            .filter_map(|name| footer.column_index(name))
            .collect();
        let resolved = columns.len();
        self.declare_column_interest(&columns).await?;
        Ok(resolved)
    }

    /// Close the stream: cancel its queued speculative fetches and release
    /// its lease on the object. Cached blocks stay with the object.
    ///
    /// Idempotent; later reads fail with [`AcceleratorError::StreamClosed`].
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let cancelled = self.object.store().cancel_speculative(self.id);
        self.registry.release(self.object.handle().key());
        debug!(stream = %self.id, key = self.object.handle().key(), cancelled, "stream closed");
    }

    fn check_open(&self) -> AcceleratorResult<()> {
        if self.closed {
            return Err(AcceleratorError::StreamClosed {
                key: self.object.handle().key().to_string(),
            });
        }
        Ok(())
    }

    /// Replace the stream's outstanding speculative plan with `plan`.
    ///
    /// Column plans are fetched exactly; readahead is widened to the block grid.
    fn apply_plan(&self, plan: &PrefetchPlan) -> AcceleratorResult<()> {
        let store = self.object.store();
        store.cancel_speculative(self.id);
        if plan.is_empty() {
            return Ok(());
        }
        debug!(
            stream = %self.id,
            kind = ?plan.kind(),
            ranges = plan.entries().len(),
            "prefetch plan"
        );
        for priority in [Priority::Immediate, Priority::Speculative] {
            let ranges = plan.ranges(priority);
            if ranges.is_empty() {
                continue;
            }
            if plan.kind().is_exact() {
                store.ensure_exact(&ranges, priority, Some(self.id))?;
            } else {
                store.ensure(&ranges, priority, Some(self.id))?;
            }
        }
        Ok(())
    }

    /// Pick up a footer loaded elsewhere, or load it on a tail access of a
    /// footer-indexed key.
    async fn sync_footer(&mut self, offset: u64, len: u64) {
        if self.footer_settled {
            return;
        }
        let state = match self.object.loaded_footer() {
            Some(state) => Some(state.clone()),
            None if self.touches_footer_tail(offset, len) => self
                .object
                .footer(&self.config.footer)
                .await
                .cloned(),
            None => None,
        };
        if let Some(state) = state {
            self.adopt_footer(state);
        }
    }

    /// Load the footer regardless of the key suffix.
    async fn load_footer(&mut self) {
        if self.footer_settled {
            return;
        }
        if let Some(state) = self.object.footer(&self.config.footer).await.cloned() {
            self.adopt_footer(state);
        }
    }

    fn adopt_footer(&mut self, state: FooterState) {
        self.footer_settled = true;
        if let FooterState::Parsed(metadata) = state {
            self.planner.set_footer(metadata);
        }
    }

    fn touches_footer_tail(&self, offset: u64, len: u64) -> bool {
        let size = self.size();
        self.config.footer.is_footer_indexed(self.object.handle().key())
            && offset + len > size - self.config.footer.tail_prefetch_for(size)
    }

    fn record_column_access(&self, offset: u64) {
        if !self.config.planner.predictive_column_prefetch {
            return;
        }
        let Some(footer) = self.planner.footer() else {
            return;
        };
        if let Some(column) = footer
            .column_containing(offset)
            .filter(|column| column.range.start == offset)
        {
            self.recent_columns.record(&column.path);
        }
    }
}

impl fmt::Debug for ObjectStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStream")
            .field("id", &self.id)
            .field("key", &self.object.handle().key())
            .field("size", &self.size())
            .field("position", &self.position)
            .field("pattern", &self.planner.pattern())
            .field("closed", &self.closed)
            .finish()
    }
}

impl Drop for ObjectStream {
    fn drop(&mut self) {
        self.close();
    }
}
