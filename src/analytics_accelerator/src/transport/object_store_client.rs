//! [`ObjectClient`] backed by the `object_store` crate.

use async_trait::async_trait;
use bytes::Bytes;
use object_store::path::Path;
use object_store::ObjectStore;
use std::ops::Range;
use std::sync::Arc;

use super::client::{ObjectClient, ObjectMetadata, TransportError, TransportResult};

/// Production transport over any [`ObjectStore`] (S3, GCS, Azure, local, memory).
///
/// # Example
///
/// ```rust,ignore
/// let s3 = AmazonS3Builder::from_env().with_bucket_name("warehouse").build()?;
/// let client = Arc::new(ObjectStoreClient::new(Arc::new(s3)));
/// let factory = StreamFactory::new(client, AcceleratorConfig::default())?;
/// ```
#[derive(Clone, Debug)]
pub struct ObjectStoreClient {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreClient {
    /// Wrap an object store.
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// The wrapped store.
    pub fn inner(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }
}

/// Map a store error onto the retry taxonomy. Only errors that can clear
/// up on their own end up in a transient variant.
fn classify(key: &str, range: Option<Range<u64>>, error: object_store::Error) -> TransportError {
    match error {
        object_store::Error::NotFound { .. } => TransportError::NotFound {
            key: key.to_string(),
        },
        object_store::Error::PermissionDenied { .. }
        | object_store::Error::Unauthenticated { .. } => TransportError::AccessDenied {
            key: key.to_string(),
        },
        object_store::Error::NotSupported { .. }
        | object_store::Error::NotImplemented { .. }
        | object_store::Error::InvalidPath { .. }
        | object_store::Error::Precondition { .. }
        | object_store::Error::NotModified { .. }
        | object_store::Error::AlreadyExists { .. }
        | object_store::Error::UnknownConfigurationKey { .. } => TransportError::Rejected {
            message: error.to_string(),
        },
        other => {
            let message = other.to_string();
            match range {
                // Stores report unsatisfiable ranges as generic errors.
                Some(range) if message.to_ascii_lowercase().contains("range") => {
                    TransportError::InvalidRange { range, message }
                }
                _ => TransportError::Other { message },
            }
        }
    }
}

#[async_trait]
impl ObjectClient for ObjectStoreClient {
    async fn head_object(&self, key: &str) -> TransportResult<ObjectMetadata> {
        let meta = self
            .store
            .head(&Path::from(key))
            .await
            .map_err(|e| classify(key, None, e))?;
        Ok(ObjectMetadata {
            size: meta.size,
            etag: meta.e_tag.or(meta.version),
        })
    }

    async fn fetch_range(&self, key: &str, range: Range<u64>) -> TransportResult<Bytes> {
        if range.start >= range.end {
            return Err(TransportError::InvalidRange {
                range,
                message: "empty range".to_string(),
            });
        }
        self.store
            .get_range(&Path::from(key), range.clone())
            .await
            .map_err(|e| classify(key, Some(range), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;
    use object_store::PutPayload;

    async fn store_with(key: &str, data: &'static [u8]) -> ObjectStoreClient {
        let store = InMemory::new();
        store
            .put(&Path::from(key), PutPayload::from_static(data))
            .await
            .unwrap();
        ObjectStoreClient::new(Arc::new(store))
    }

    #[tokio::test]
    async fn test_head_and_range() {
        let client = store_with("tables/t1/part-0.parquet", b"0123456789").await;

        let meta = client.head_object("tables/t1/part-0.parquet").await.unwrap();
        assert_eq!(meta.size, 10);

        let data = client
            .fetch_range("tables/t1/part-0.parquet", 2..6)
            .await
            .unwrap();
        assert_eq!(&data[..], b"2345");
    }

    #[tokio::test]
    async fn test_missing_object_is_permanent() {
        let client = store_with("a", b"x").await;

        let err = client.head_object("missing").await.unwrap_err();
        assert_eq!(
            err,
            TransportError::NotFound {
                key: "missing".to_string()
            }
        );
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_unsatisfiable_range_is_permanent() {
        let client = store_with("a", b"0123456789").await;
        let err = client.fetch_range("a", 20..30).await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidRange { .. }), "{}", err);
        assert!(!err.is_transient());
    }

    #[test]
    fn test_unsupported_operations_are_permanent() {
        let err = classify(
            "a",
            Some(0..4),
            object_store::Error::NotSupported {
                source: "conditional reads".into(),
            },
        );
        assert!(matches!(err, TransportError::Rejected { .. }), "{}", err);
        assert!(!err.is_transient());

        let err = classify(
            "a",
            Some(0..4),
            object_store::Error::Generic {
                store: "S3",
                source: "connection reset".into(),
            },
        );
        assert!(matches!(err, TransportError::Other { .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_empty_range_rejected() {
        let client = store_with("a", b"abc").await;
        let err = client.fetch_range("a", 2..2).await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidRange { .. }));
    }
}
