//! Object client trait for abstracting remote range reads.
//!
//! This module defines the [`ObjectClient`] trait which the scheduler uses to
//! issue range-GET and HEAD requests, along with the transport error
//! classification that drives retry decisions.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::ops::Range;

/// Result type for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Metadata returned by a HEAD request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// Object length in bytes.
    pub size: u64,
    /// Consistency token (ETag or version), if the store reports one.
    pub etag: Option<String>,
}

impl ObjectMetadata {
    /// Create metadata with no consistency token.
    pub fn new(size: u64) -> Self {
        Self { size, etag: None }
    }

    /// Attach a consistency token.
    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }
}

/// Failure of a single transport call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportError {
    /// Request timed out.
    Timeout {
        /// Error message.
        message: String,
    },

    /// Store asked the client to slow down.
    Throttled {
        /// Error message.
        message: String,
    },

    /// 5xx-equivalent server failure.
    ServerError {
        /// HTTP status or equivalent code.
        status: u16,
        /// Error message.
        message: String,
    },

    /// Fewer bytes came back than were requested.
    ShortRead {
        /// Requested length.
        expected: u64,
        /// Received length.
        actual: u64,
    },

    /// Object does not exist.
    NotFound {
        /// Object key.
        key: String,
    },

    /// Caller lacks permission.
    AccessDenied {
        /// Object key.
        key: String,
    },

    /// Requested range is not satisfiable.
    InvalidRange {
        /// Requested range.
        range: Range<u64>,
        /// Error message.
        message: String,
    },

    /// Store refused the request as malformed or unsupported.
    Rejected {
        /// Error message.
        message: String,
    },

    /// Unclassified failure.
    Other {
        /// Error message.
        message: String,
    },
}

impl TransportError {
    /// Whether a retry of the same request may succeed.
    ///
    /// Unclassified failures are treated as transient, matching how most
    /// object store clients wrap connection errors.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Timeout { .. }
            | TransportError::Throttled { .. }
            | TransportError::ServerError { .. }
            | TransportError::ShortRead { .. }
            | TransportError::Other { .. } => true,
            TransportError::NotFound { .. }
            | TransportError::AccessDenied { .. }
            | TransportError::InvalidRange { .. }
            | TransportError::Rejected { .. } => false,
        }
    }

    /// Create a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        TransportError::Timeout {
            message: message.into(),
        }
    }

    /// Create a throttling error.
    pub fn throttled(message: impl Into<String>) -> Self {
        TransportError::Throttled {
            message: message.into(),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Timeout { message } => write!(f, "timeout: {}", message),
            TransportError::Throttled { message } => write!(f, "throttled: {}", message),
            TransportError::ServerError { status, message } => {
                write!(f, "server error {}: {}", status, message)
            }
            TransportError::ShortRead { expected, actual } => {
                write!(f, "short read: expected {} bytes, got {}", expected, actual)
            }
            TransportError::NotFound { key } => write!(f, "object not found: {}", key),
            TransportError::AccessDenied { key } => write!(f, "access denied: {}", key),
            TransportError::InvalidRange { range, message } => {
                write!(
                    f,
                    "invalid range {}-{}: {}",
                    range.start, range.end, message
                )
            }
            TransportError::Rejected { message } => write!(f, "rejected: {}", message),
            TransportError::Other { message } => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for TransportError {}

/// Abstraction over the remote object store.
///
/// Implementations:
/// - Production: [`ObjectStoreClient`](super::ObjectStoreClient) over any
///   `object_store` backend
/// - Testing: an in-memory mock with call recording and failure injection
///
/// Both calls are independently retryable; the scheduler decides whether to
/// retry using [`TransportError::is_transient`].
#[async_trait]
pub trait ObjectClient: Send + Sync {
    /// Resolve an object's size and consistency token.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotFound`] or [`TransportError::AccessDenied`]
    /// when the object cannot be opened.
    async fn head_object(&self, key: &str) -> TransportResult<ObjectMetadata>;

    /// Read a byte range from an object.
    ///
    /// # Arguments
    ///
    /// * `key` - Object key
    /// * `range` - Byte range to read (start inclusive, end exclusive)
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// // Read bytes 100-199 (100 bytes total)
    /// let data = client.fetch_range("data/part-0.parquet", 100..200).await?;
    /// assert_eq!(data.len(), 100);
    /// ```
    async fn fetch_range(&self, key: &str, range: Range<u64>) -> TransportResult<Bytes>;
}
