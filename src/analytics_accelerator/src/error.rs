//! Error types for the accelerator.
//!
//! Fetch failures are recorded on the block that needed them and handed to
//! every caller waiting on that block, so the error type is `Clone`.

use std::fmt;
use std::ops::Range;

use crate::transport::TransportError;

/// Result type for accelerator operations.
pub type AcceleratorResult<T> = std::result::Result<T, AcceleratorError>;

/// Errors surfaced by streams, block stores and the footer parser.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AcceleratorError {
    /// Footer is malformed or inconsistent with the object size.
    ///
    /// Never fails a read; the object falls back to plain block fetching.
    Format {
        /// Description of the format problem.
        message: String,
    },

    /// A transient fetch failure persisted past the retry ceiling.
    TransientFetch {
        /// Object key.
        key: String,
        /// Byte range of the failed fetch.
        range: Range<u64>,
        /// Number of attempts made.
        attempts: u32,
        /// Message of the last transport error.
        message: String,
    },

    /// A fetch failed in a way retrying cannot fix.
    PermanentFetch {
        /// Object key.
        key: String,
        /// Byte range of the failed fetch.
        range: Range<u64>,
        /// Transport error message.
        message: String,
    },

    /// The object does not exist.
    ObjectNotFound {
        /// Object key.
        key: String,
    },

    /// The scheduler queue is at its hard bound.
    CapacityExceeded {
        /// Jobs currently queued.
        queued: usize,
        /// Configured queue bound.
        limit: usize,
    },

    /// Caller passed an argument outside the valid domain.
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },

    /// Configuration failed validation.
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },

    /// Operation on a stream after `close`.
    StreamClosed {
        /// Object key of the stream.
        key: String,
    },

    /// Generic internal error.
    Internal {
        /// Error message.
        message: String,
    },
}

impl fmt::Display for AcceleratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcceleratorError::Format { message } => {
                write!(f, "Invalid footer format: {}", message)
            }
            AcceleratorError::TransientFetch {
                key,
                range,
                attempts,
                message,
            } => {
                write!(
                    f,
                    "Fetch of {}-{} from '{}' failed after {} attempts: {}",
                    range.start, range.end, key, attempts, message
                )
            }
            AcceleratorError::PermanentFetch {
                key,
                range,
                message,
            } => {
                write!(
                    f,
                    "Fetch of {}-{} from '{}' failed permanently: {}",
                    range.start, range.end, key, message
                )
            }
            AcceleratorError::ObjectNotFound { key } => {
                write!(f, "Object not found: {}", key)
            }
            AcceleratorError::CapacityExceeded { queued, limit } => {
                write!(
                    f,
                    "Fetch queue is full ({} queued, limit {})",
                    queued, limit
                )
            }
            AcceleratorError::InvalidArgument { message } => {
                write!(f, "Invalid argument: {}", message)
            }
            AcceleratorError::InvalidConfig { message } => {
                write!(f, "Invalid configuration: {}", message)
            }
            AcceleratorError::StreamClosed { key } => {
                write!(f, "Stream over '{}' is closed", key)
            }
            AcceleratorError::Internal { message } => {
                write!(f, "Internal error: {}", message)
            }
        }
    }
}

impl std::error::Error for AcceleratorError {}

impl From<serde_json::Error> for AcceleratorError {
    fn from(e: serde_json::Error) -> Self {
        AcceleratorError::InvalidConfig {
            message: e.to_string(),
        }
    }
}

impl From<parquet::errors::ParquetError> for AcceleratorError {
    fn from(e: parquet::errors::ParquetError) -> Self {
        AcceleratorError::Format {
            message: e.to_string(),
        }
    }
}

impl AcceleratorError {
    /// Create a format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        AcceleratorError::Format {
            message: message.into(),
        }
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        AcceleratorError::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        AcceleratorError::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        AcceleratorError::Internal {
            message: message.into(),
        }
    }

    /// Convert the final transport error of a fetch into an accelerator error.
    ///
    /// Transient errors become [`AcceleratorError::TransientFetch`] (the retry
    /// ceiling was hit), everything else [`AcceleratorError::PermanentFetch`].
    pub fn from_transport(
        key: &str,
        range: Range<u64>,
        attempts: u32,
        error: &TransportError,
    ) -> Self {
        if error.is_transient() {
            AcceleratorError::TransientFetch {
                key: key.to_string(),
                range,
                attempts,
                message: error.to_string(),
            }
        } else {
            AcceleratorError::PermanentFetch {
                key: key.to_string(),
                range,
                message: error.to_string(),
            }
        }
    }

    /// Whether this is a footer format error.
    pub fn is_format(&self) -> bool {
        matches!(self, AcceleratorError::Format { .. })
    }
}
