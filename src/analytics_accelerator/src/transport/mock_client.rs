//! Mock object client for testing.
//!
//! Stores objects in a `HashMap`, records every call, and can be scripted to
//! fail specific range requests.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use super::client::{ObjectClient, ObjectMetadata, TransportError, TransportResult};

/// In-memory mock object client.
///
/// # Example
///
/// ```rust,ignore
/// let mock = MockObjectClient::builder()
///     .with_object("data.bin", Bytes::from_static(b"hello"))
///     .with_latency(Duration::from_millis(10))
///     .build();
///
/// // Fail the first two fetches starting at offset 0.
/// mock.fail_next("data.bin", 0, vec![TransportError::timeout("t"); 2]);
/// ```
pub struct MockObjectClient {
    /// Storage for objects: key -> data
    objects: RwLock<HashMap<String, Bytes>>,
    /// Every fetch_range call in arrival order.
    fetch_log: Mutex<Vec<(String, Range<u64>)>>,
    /// Scripted failures keyed by (key, range start), consumed front first.
    failures: Mutex<HashMap<(String, u64), VecDeque<TransportError>>>,
    head_calls: AtomicUsize,
    latency: Option<Duration>,
}

impl MockObjectClient {
    /// Create a new empty mock client.
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            fetch_log: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            head_calls: AtomicUsize::new(0),
            latency: None,
        }
    }

    /// Start building a mock client.
    pub fn builder() -> MockObjectClientBuilder {
        MockObjectClientBuilder::default()
    }

    /// Insert or replace an object.
    pub fn put(&self, key: impl Into<String>, data: Bytes) {
        self.objects.write().unwrap().insert(key.into(), data);
    }

    /// Make the next fetches of `key` starting at `start` fail with `errors`, in order.
    pub fn fail_next(&self, key: &str, start: u64, errors: Vec<TransportError>) {
        self.failures
            .lock()
            .unwrap()
            .entry((key.to_string(), start))
            .or_default()
            .extend(errors);
    }

    /// All fetch_range calls so far.
    pub fn fetch_calls(&self) -> Vec<(String, Range<u64>)> {
        self.fetch_log.lock().unwrap().clone()
    }

    /// Ranges fetched for one key, in call order.
    pub fn fetches_for(&self, key: &str) -> Vec<Range<u64>> {
        self.fetch_log
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, r)| r.clone())
            .collect()
    }

    /// Number of head_object calls so far.
    pub fn head_calls(&self) -> usize {
        self.head_calls.load(Ordering::SeqCst)
    }

    /// Forget recorded calls.
    pub fn clear_log(&self) {
        self.fetch_log.lock().unwrap().clear();
    }
}

impl Default for MockObjectClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectClient for MockObjectClient {
    async fn head_object(&self, key: &str) -> TransportResult<ObjectMetadata> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        let objects = self.objects.read().unwrap();
        match objects.get(key) {
            Some(data) => Ok(ObjectMetadata::new(data.len() as u64)
                .with_etag(format!("\"{:x}\"", data.len()))),
            None => Err(TransportError::NotFound {
                key: key.to_string(),
            }),
        }
    }

    async fn fetch_range(&self, key: &str, range: Range<u64>) -> TransportResult<Bytes> {
        self.fetch_log
            .lock()
            .unwrap()
            .push((key.to_string(), range.clone()));

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let scripted = self
            .failures
            .lock()
            .unwrap()
            .get_mut(&(key.to_string(), range.start))
            .and_then(|queue| queue.pop_front());
        if let Some(error) = scripted {
            return Err(error);
        }

        let objects = self.objects.read().unwrap();
        let data = objects.get(key).ok_or_else(|| TransportError::NotFound {
            key: key.to_string(),
        })?;
        let size = data.len() as u64;
        if range.start >= range.end || range.end > size {
            return Err(TransportError::InvalidRange {
                message: format!("object size is {}", size),
                range,
            });
        }
        Ok(data.slice(range.start as usize..range.end as usize))
    }
}

/// Builder for [`MockObjectClient`].
#[derive(Default)]
pub struct MockObjectClientBuilder {
    objects: HashMap<String, Bytes>,
    latency: Option<Duration>,
}

impl MockObjectClientBuilder {
    /// Add an object.
    pub fn with_object(mut self, key: impl Into<String>, data: impl Into<Bytes>) -> Self {
        self.objects.insert(key.into(), data.into());
        self
    }

    /// Delay every fetch by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Build the client.
    pub fn build(self) -> MockObjectClient {
        MockObjectClient {
            objects: RwLock::new(self.objects),
            latency: self.latency,
            ..MockObjectClient::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_failures_are_consumed_in_order() {
        let mock = MockObjectClient::builder()
            .with_object("k", Bytes::from_static(b"abcdef"))
            .build();
        mock.fail_next(
            "k",
            0,
            vec![TransportError::timeout("first"), TransportError::throttled("second")],
        );

        assert!(matches!(
            mock.fetch_range("k", 0..3).await,
            Err(TransportError::Timeout { .. })
        ));
        assert!(matches!(
            mock.fetch_range("k", 0..3).await,
            Err(TransportError::Throttled { .. })
        ));
        assert_eq!(&mock.fetch_range("k", 0..3).await.unwrap()[..], b"abc");
        // Other ranges are unaffected.
        assert_eq!(&mock.fetch_range("k", 3..6).await.unwrap()[..], b"def");
        assert_eq!(mock.fetches_for("k").len(), 4);
    }

    #[tokio::test]
    async fn test_out_of_bounds_range() {
        let mock = MockObjectClient::builder()
            .with_object("k", Bytes::from_static(b"abc"))
            .build();
        let err = mock.fetch_range("k", 1..10).await.unwrap_err();
        assert!(!err.is_transient());
    }
}
