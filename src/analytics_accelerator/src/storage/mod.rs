//! Block storage: object handles, blocks, per-object block stores and the
//! session-level object registry.

mod block;
mod block_store;
mod registry;

pub use block::{Block, BlockState};
pub use block_store::{BlockStore, BlockStoreStats};
pub(crate) use registry::{ObjectRegistry, ObjectState};

/// Identity of a remote object, immutable once resolved.
///
/// Shared by every stream over the object within one factory.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectHandle {
    key: String,
    size: u64,
    etag: Option<String>,
}

impl ObjectHandle {
    /// Handle for `key` with a known size.
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
            etag: None,
        }
    }

    /// Attach a consistency token.
    pub fn with_etag(mut self, etag: Option<String>) -> Self {
        self.etag = etag;
        self
    }

    /// Object key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Object length in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Consistency token reported by the store, if any.
    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }
}
