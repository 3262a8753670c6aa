//! # Accelerator Configuration
//!
//! All policy constants of the block cache, planner and scheduler live here.
//! Values are tunable because no single prefetch window or concurrency
//! ceiling suits every object store and workload.
//!
//! ## Layout
//!
//! ```text
//! AcceleratorConfig
//! ├─ block_store   block size, per-object memory budget, fetch coalescing
//! ├─ planner       access window, readahead ramp, column prefetch mode
//! ├─ scheduler     concurrency ceilings, queue bound
//! │  └─ retry      attempt ceiling, exponential backoff
//! ├─ footer        footer-aware suffixes, tail and page index prefetch sizes
//! └─ registry      idle object retention, small object prefetch
//! ```
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! let config = AcceleratorConfig::builder()
//!     .block_store(BlockStoreConfig::default().with_block_size(4 * MIB))
//!     .scheduler(SchedulerConfig::default().with_max_concurrent_fetches(64))
//!     .build();
//! config.validate()?;
//!
//! // Or from JSON; missing fields take their defaults.
//! let config = AcceleratorConfig::from_json_str(r#"{"planner": {"max_readahead_blocks": 16}}"#)?;
//! ```

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use typed_builder::TypedBuilder;

use crate::error::{AcceleratorError, AcceleratorResult};

/// One kibibyte.
pub const KIB: u64 = 1024;
/// One mebibyte.
pub const MIB: u64 = 1024 * KIB;
/// One gibibyte.
pub const GIB: u64 = 1024 * MIB;

/// Default block size (8 MiB).
pub const DEFAULT_BLOCK_SIZE: u64 = 8 * MIB;
/// Default per-object memory budget (256 MiB).
pub const DEFAULT_MEMORY_BUDGET_BYTES: u64 = 256 * MIB;
/// Default maximum number of adjacent blocks merged into one range request.
pub const DEFAULT_MAX_COALESCED_BLOCKS: usize = 4;

/// Default number of reads kept in a stream's access record.
pub const DEFAULT_ACCESS_WINDOW: usize = 8;
/// Default largest forward gap still treated as sequential.
pub const DEFAULT_SEQUENTIAL_GAP_THRESHOLD: u64 = 0;
/// Default readahead after the first sequential read, in blocks.
pub const DEFAULT_INITIAL_READAHEAD_BLOCKS: u64 = 1;
/// Default readahead ceiling, in blocks.
pub const DEFAULT_MAX_READAHEAD_BLOCKS: u64 = 8;
/// Default capacity of the recently accessed column store.
pub const DEFAULT_COLUMN_ACCESS_STORE_SIZE: usize = 15;

/// Default process-wide in-flight fetch ceiling.
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 32;
/// Default per-object in-flight fetch ceiling.
pub const DEFAULT_MAX_CONCURRENT_FETCHES_PER_OBJECT: usize = 8;
/// Default hard bound on queued fetch jobs.
pub const DEFAULT_MAX_QUEUED_FETCHES: usize = 1024;

/// Default attempts per fetch, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default first backoff.
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 100;
/// Default backoff ceiling.
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 2_000;

/// Default tail prefetch when loading a footer (32 KiB).
pub const DEFAULT_TAIL_PREFETCH_BYTES: u64 = 32 * KIB;
/// Default tail prefetch for large objects (1 MiB).
pub const DEFAULT_LARGE_OBJECT_TAIL_PREFETCH_BYTES: u64 = MIB;
/// Default page index prefetch below the footer (1 MiB).
pub const DEFAULT_PAGE_INDEX_PREFETCH_BYTES: u64 = MIB;
/// Default page index prefetch for large objects (8 MiB).
pub const DEFAULT_LARGE_OBJECT_PAGE_INDEX_PREFETCH_BYTES: u64 = 8 * MIB;
/// Objects at least this large use the large tail prefetch (1 GiB).
pub const DEFAULT_LARGE_OBJECT_THRESHOLD: u64 = GIB;

/// Default number of idle objects kept in the registry.
pub const DEFAULT_MAX_IDLE_OBJECTS: usize = 45;
/// Objects up to this size are prefetched whole on open (3 MiB).
pub const DEFAULT_SMALL_OBJECT_THRESHOLD: u64 = 3 * MIB;

/// Block store settings, applied to every object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockStoreConfig {
    /// Size of a cached block. The last block of an object may be shorter.
    ///
    /// Default: 8 MiB
    pub block_size: u64,

    /// Memory budget for Ready blocks of one object.
    ///
    /// Exceeding it triggers LRU eviction of unpinned Ready blocks. When every
    /// block is pinned the budget is overshot temporarily.
    ///
    /// Default: 256 MiB
    pub memory_budget_bytes: u64,

    /// Maximum contiguous blocks merged into one range request.
    ///
    /// Default: 4
    pub max_coalesced_blocks: usize,
}

impl BlockStoreConfig {
    /// Set the block size.
    pub fn with_block_size(mut self, block_size: u64) -> Self {
        self.block_size = block_size;
        self
    }

    /// Set the per-object memory budget.
    pub fn with_memory_budget_bytes(mut self, memory_budget_bytes: u64) -> Self {
        self.memory_budget_bytes = memory_budget_bytes;
        self
    }

    /// Set the coalescing limit.
    pub fn with_max_coalesced_blocks(mut self, max_coalesced_blocks: usize) -> Self {
        self.max_coalesced_blocks = max_coalesced_blocks;
        self
    }
}

impl Default for BlockStoreConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            memory_budget_bytes: DEFAULT_MEMORY_BUDGET_BYTES,
            max_coalesced_blocks: DEFAULT_MAX_COALESCED_BLOCKS,
        }
    }
}

/// Which row groups a column-targeted plan covers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrefetchMode {
    /// No column-targeted or predictive plans; only sequential readahead.
    Off,
    /// The row group being read and every row group after it.
    All,
    /// Only the row group being read.
    #[default]
    RowGroup,
}

/// Read-pattern planner settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Number of recent reads used to classify the access pattern.
    pub access_window: usize,

    /// Largest forward gap between reads still classified as sequential.
    ///
    /// Default: 0 (reads must be contiguous)
    pub sequential_gap_threshold: u64,

    /// Readahead after the first sequential read, in blocks.
    pub initial_readahead_blocks: u64,

    /// Readahead ceiling, in blocks. The window doubles on every further
    /// sequential read until it reaches this value. Zero disables readahead.
    pub max_readahead_blocks: u64,

    /// Speculatively prefetch recently used columns when a stream over a
    /// footer-indexed object has not declared any columns.
    ///
    /// Default: false
    pub predictive_column_prefetch: bool,

    /// Capacity of the recently accessed column store.
    pub column_access_store_size: usize,

    /// Row groups covered by column-targeted and predictive plans.
    ///
    /// Default: [`PrefetchMode::RowGroup`]
    pub prefetch_mode: PrefetchMode,
}

impl PlannerConfig {
    /// Set the readahead ramp.
    pub fn with_readahead(mut self, initial_blocks: u64, max_blocks: u64) -> Self {
        self.initial_readahead_blocks = initial_blocks;
        self.max_readahead_blocks = max_blocks;
        self
    }

    /// Set the sequential gap threshold.
    pub fn with_sequential_gap_threshold(mut self, threshold: u64) -> Self {
        self.sequential_gap_threshold = threshold;
        self
    }

    /// Enable or disable predictive column prefetch.
    pub fn with_predictive_column_prefetch(mut self, enabled: bool) -> Self {
        self.predictive_column_prefetch = enabled;
        self
    }

    /// Set the column prefetch mode.
    pub fn with_prefetch_mode(mut self, mode: PrefetchMode) -> Self {
        self.prefetch_mode = mode;
        self
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            access_window: DEFAULT_ACCESS_WINDOW,
            sequential_gap_threshold: DEFAULT_SEQUENTIAL_GAP_THRESHOLD,
            initial_readahead_blocks: DEFAULT_INITIAL_READAHEAD_BLOCKS,
            max_readahead_blocks: DEFAULT_MAX_READAHEAD_BLOCKS,
            predictive_column_prefetch: false,
            column_access_store_size: DEFAULT_COLUMN_ACCESS_STORE_SIZE,
            prefetch_mode: PrefetchMode::default(),
        }
    }
}

/// Retry behavior for transient fetch failures.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per fetch including the first one.
    pub max_attempts: u32,
    /// Backoff before the first retry, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Backoff ceiling, in milliseconds.
    pub max_backoff_ms: u64,
    /// Add up to 25% random jitter to each backoff.
    pub jitter: bool,
}

impl RetryConfig {
    /// Set the attempt ceiling.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the backoff bounds in milliseconds.
    pub fn with_backoff_ms(mut self, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        self.initial_backoff_ms = initial_backoff_ms;
        self.max_backoff_ms = max_backoff_ms;
        self
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Backoff before retry number `retry` (zero based).
    pub fn backoff_duration(&self, retry: u32) -> Duration {
        let base_ms = self
            .initial_backoff_ms
            .saturating_mul(2u64.saturating_pow(retry));
        let capped_ms = base_ms.min(self.max_backoff_ms);

        let final_ms = if self.jitter {
            let jitter_range = capped_ms / 4;
            let jitter = rand::rng().random_range(0..=jitter_range);
            capped_ms.saturating_add(jitter)
        } else {
            capped_ms
        };

        Duration::from_millis(final_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            jitter: false,
        }
    }
}

/// Prefetch scheduler settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Process-wide in-flight fetch ceiling.
    pub max_concurrent_fetches: usize,
    /// Per-object in-flight fetch ceiling.
    pub max_concurrent_fetches_per_object: usize,
    /// Queued jobs beyond this bound are rejected with `CapacityExceeded`.
    pub max_queued_fetches: usize,
    /// Retry policy for each dispatched fetch.
    pub retry: RetryConfig,
}

impl SchedulerConfig {
    /// Set the concurrency ceilings.
    pub fn with_max_concurrent_fetches(mut self, global: usize) -> Self {
        self.max_concurrent_fetches = global;
        self
    }

    /// Set the per-object concurrency ceiling.
    pub fn with_max_concurrent_fetches_per_object(mut self, per_object: usize) -> Self {
        self.max_concurrent_fetches_per_object = per_object;
        self
    }

    /// Set the queue bound.
    pub fn with_max_queued_fetches(mut self, max_queued_fetches: usize) -> Self {
        self.max_queued_fetches = max_queued_fetches;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            max_concurrent_fetches_per_object: DEFAULT_MAX_CONCURRENT_FETCHES_PER_OBJECT,
            max_queued_fetches: DEFAULT_MAX_QUEUED_FETCHES,
            retry: RetryConfig::default(),
        }
    }
}

/// Footer-aware planning settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FooterConfig {
    /// Key suffixes whose objects get footer-aware planning automatically.
    pub file_suffixes: Vec<String>,
    /// Tail bytes fetched for the first footer parse attempt.
    pub tail_prefetch_bytes: u64,
    /// Tail bytes fetched for objects at least `large_object_threshold` long.
    pub large_object_tail_prefetch_bytes: u64,
    /// Size from which an object counts as large.
    pub large_object_threshold: u64,
    /// Load the footer in the background as soon as an eligible object is opened.
    pub prefetch_footer_on_open: bool,
    /// Speculatively fetch the page index region between the last column
    /// chunk and the footer once the footer is parsed.
    pub prefetch_page_index: bool,
    /// Page index bytes fetched below the footer.
    pub page_index_prefetch_bytes: u64,
    /// Page index bytes fetched for objects at least `large_object_threshold` long.
    pub large_object_page_index_prefetch_bytes: u64,
}

impl FooterConfig {
    /// Whether `key` names a footer-indexed object.
    pub fn is_footer_indexed(&self, key: &str) -> bool {
        let key = key.to_ascii_lowercase();
        self.file_suffixes
            .iter()
            .any(|suffix| key.ends_with(&suffix.to_ascii_lowercase()))
    }

    /// Tail bytes to fetch first for an object of `object_size` bytes.
    pub fn tail_prefetch_for(&self, object_size: u64) -> u64 {
        let wanted = if object_size >= self.large_object_threshold {
            self.large_object_tail_prefetch_bytes
        } else {
            self.tail_prefetch_bytes
        };
        wanted.min(object_size)
    }

    /// Page index bytes to fetch below the footer of an object of
    /// `object_size` bytes.
    pub fn page_index_prefetch_for(&self, object_size: u64) -> u64 {
        if object_size >= self.large_object_threshold {
            self.large_object_page_index_prefetch_bytes
        } else {
            self.page_index_prefetch_bytes
        }
    }

    /// Set the tail prefetch size for regular objects.
    pub fn with_tail_prefetch_bytes(mut self, bytes: u64) -> Self {
        self.tail_prefetch_bytes = bytes;
        self
    }

    /// Enable or disable footer loading on open.
    pub fn with_prefetch_footer_on_open(mut self, enabled: bool) -> Self {
        self.prefetch_footer_on_open = enabled;
        self
    }

    /// Enable or disable the page index prefetch.
    pub fn with_prefetch_page_index(mut self, enabled: bool) -> Self {
        self.prefetch_page_index = enabled;
        self
    }

    /// Set the page index prefetch size for regular objects.
    pub fn with_page_index_prefetch_bytes(mut self, bytes: u64) -> Self {
        self.page_index_prefetch_bytes = bytes;
        self
    }
}

impl Default for FooterConfig {
    fn default() -> Self {
        Self {
            file_suffixes: vec![".parquet".to_string(), ".par".to_string()],
            tail_prefetch_bytes: DEFAULT_TAIL_PREFETCH_BYTES,
            large_object_tail_prefetch_bytes: DEFAULT_LARGE_OBJECT_TAIL_PREFETCH_BYTES,
            large_object_threshold: DEFAULT_LARGE_OBJECT_THRESHOLD,
            prefetch_footer_on_open: true,
            prefetch_page_index: true,
            page_index_prefetch_bytes: DEFAULT_PAGE_INDEX_PREFETCH_BYTES,
            large_object_page_index_prefetch_bytes: DEFAULT_LARGE_OBJECT_PAGE_INDEX_PREFETCH_BYTES,
        }
    }
}

/// Object registry settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Objects without open streams kept for reuse.
    pub max_idle_objects: usize,
    /// Prefetch small objects whole when they are first opened.
    pub small_object_prefetch: bool,
    /// Largest object size eligible for whole-object prefetch.
    pub small_object_threshold: u64,
}

impl RegistryConfig {
    /// Set the idle object bound.
    pub fn with_max_idle_objects(mut self, max_idle_objects: usize) -> Self {
        self.max_idle_objects = max_idle_objects;
        self
    }

    /// Enable or disable small object prefetch.
    pub fn with_small_object_prefetch(mut self, enabled: bool) -> Self {
        self.small_object_prefetch = enabled;
        self
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_idle_objects: DEFAULT_MAX_IDLE_OBJECTS,
            small_object_prefetch: true,
            small_object_threshold: DEFAULT_SMALL_OBJECT_THRESHOLD,
        }
    }
}

/// Top-level configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, TypedBuilder, Serialize, Deserialize)]
#[serde(default)]
pub struct AcceleratorConfig {
    /// Block store settings.
    #[builder(default)]
    pub block_store: BlockStoreConfig,
    /// Planner settings.
    #[builder(default)]
    pub planner: PlannerConfig,
    /// Scheduler settings.
    #[builder(default)]
    pub scheduler: SchedulerConfig,
    /// Footer settings.
    #[builder(default)]
    pub footer: FooterConfig,
    /// Registry settings.
    #[builder(default)]
    pub registry: RegistryConfig,
}

impl AcceleratorConfig {
    /// Parse a JSON configuration. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> AcceleratorResult<Self> {
        let config: AcceleratorConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for inconsistent values.
    pub fn validate(&self) -> AcceleratorResult<()> {
        let fail = |message: &str| Err(AcceleratorError::invalid_config(message));

        if self.block_store.block_size == 0 {
            return fail("block_size must be non-zero");
        }
        if self.block_store.max_coalesced_blocks == 0 {
            return fail("max_coalesced_blocks must be non-zero");
        }
        if self.planner.access_window == 0 {
            return fail("access_window must be non-zero");
        }
        if self.planner.initial_readahead_blocks > self.planner.max_readahead_blocks {
            return fail("initial_readahead_blocks exceeds max_readahead_blocks");
        }
        if self.scheduler.max_concurrent_fetches == 0
            || self.scheduler.max_concurrent_fetches_per_object == 0
        {
            return fail("fetch concurrency ceilings must be non-zero");
        }
        if self.scheduler.max_concurrent_fetches_per_object > self.scheduler.max_concurrent_fetches
        {
            return fail("per-object concurrency exceeds the global ceiling");
        }
        if self.scheduler.max_queued_fetches == 0 {
            return fail("max_queued_fetches must be non-zero");
        }
        if self.scheduler.retry.max_attempts == 0 {
            return fail("retry max_attempts must be at least 1");
        }
        if self.scheduler.retry.initial_backoff_ms > self.scheduler.retry.max_backoff_ms {
            return fail("initial backoff exceeds max backoff");
        }
        if self.footer.tail_prefetch_bytes < 8 {
            return fail("tail_prefetch_bytes must cover the footer trailer");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = AcceleratorConfig::default();
        config.validate().unwrap();
        assert_eq!(config.block_store.block_size, 8 * MIB);
        assert!(config.footer.prefetch_footer_on_open);
        assert!(config.registry.small_object_prefetch);
        assert!(!config.planner.predictive_column_prefetch);
        assert_eq!(config.planner.prefetch_mode, PrefetchMode::RowGroup);
        assert!(config.footer.prefetch_page_index);
    }

    #[test]
    fn test_json_partial_override() {
        let config = AcceleratorConfig::from_json_str(
            r#"{"planner": {"max_readahead_blocks": 16}, "block_store": {"block_size": 4096}}"#,
        )
        .unwrap();
        assert_eq!(config.planner.max_readahead_blocks, 16);
        assert_eq!(config.planner.initial_readahead_blocks, 1);
        assert_eq!(config.block_store.block_size, 4096);
        assert_eq!(config.scheduler, SchedulerConfig::default());

        let config =
            AcceleratorConfig::from_json_str(r#"{"planner": {"prefetch_mode": "all"}}"#).unwrap();
        assert_eq!(config.planner.prefetch_mode, PrefetchMode::All);
        assert!(AcceleratorConfig::from_json_str(r#"{"planner": {"prefetch_mode": "some"}}"#).is_err());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = AcceleratorConfig::builder()
            .planner(PlannerConfig::default().with_readahead(4, 2))
            .build();
        assert!(matches!(
            config.validate(),
            Err(AcceleratorError::InvalidConfig { .. })
        ));

        let config = AcceleratorConfig::builder()
            .scheduler(
                SchedulerConfig::default()
                    .with_max_concurrent_fetches(2)
                    .with_max_concurrent_fetches_per_object(4),
            )
            .build();
        assert!(config.validate().is_err());

        assert!(AcceleratorConfig::from_json_str(r#"{"block_store": {"block_size": 0}}"#).is_err());
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let retry = RetryConfig::default().with_backoff_ms(100, 350);
        assert_eq!(retry.backoff_duration(0), Duration::from_millis(100));
        assert_eq!(retry.backoff_duration(1), Duration::from_millis(200));
        assert_eq!(retry.backoff_duration(2), Duration::from_millis(350));
        assert_eq!(retry.backoff_duration(40), Duration::from_millis(350));

        let jittered = RetryConfig::default().with_backoff_ms(100, 100).with_jitter(true);
        let d = jittered.backoff_duration(0);
        assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(125));
    }

    #[test]
    fn test_footer_suffix_and_tail_size() {
        let footer = FooterConfig::default();
        assert!(footer.is_footer_indexed("warehouse/t/part-0.parquet"));
        assert!(footer.is_footer_indexed("x.PAR"));
        assert!(!footer.is_footer_indexed("x.csv"));

        assert_eq!(footer.tail_prefetch_for(10), 10);
        assert_eq!(footer.tail_prefetch_for(100 * MIB), 32 * KIB);
        assert_eq!(footer.tail_prefetch_for(2 * GIB), MIB);
        assert_eq!(footer.page_index_prefetch_for(100 * MIB), MIB);
        assert_eq!(footer.page_index_prefetch_for(2 * GIB), 8 * MIB);
    }
}
