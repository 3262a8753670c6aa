//! # Analytics Accelerator
//!
//! A block cache, prefetching engine and footer-aware read planner for
//! remote immutable objects, tuned for Parquet.
//!
//! ## Overview
//!
//! Callers read objects through seekable [`ObjectStream`]s. Every read is
//! served from cached, non-overlapping range blocks; missing ranges are
//! fetched with coalesced range requests, widened to the block grid unless a
//! column plan asked for exact chunks. Each stream's access pattern drives speculative
//! readahead, and for Parquet objects the decoded footer lets a stream fetch
//! exactly the column chunks it declared interest in.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        StreamFactory                             │
//! │   ObjectRegistry (key → block store + footer, refcounted)        │
//! │   PrefetchScheduler (global / per-object concurrency, retries)   │
//! │   ColumnAccessStore (recently read column paths)                 │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ObjectStream (one per caller)                                   │
//! │  ├─ ReadPlanner: access record → Sequential / Random             │
//! │  │               footer + declared columns → column plan         │
//! │  └─ position                                                     │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  BlockStore (one per object)                                     │
//! │  └─ Block: Pending → InFlight → Ready / Failed → Evicted         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ObjectClient: head_object, fetch_range                          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Read Flow
//!
//! ```text
//! 1. Planner classifies the read and emits a prefetch plan
//! 2. The stream's previous speculative plan is cancelled, the new one queued
//! 3. Blocks covering the read are pinned and ensured at immediate priority
//! 4. The read awaits those blocks; other streams share the same fetches
//! 5. Bytes are copied out and the position advances
//! ```
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! let store = Arc::new(AmazonS3Builder::from_env().with_bucket_name("lake").build()?);
//! let client = Arc::new(ObjectStoreClient::new(store));
//! let factory = StreamFactory::new(client, AcceleratorConfig::default())?;
//!
//! let mut stream = factory.open("events/part-0001.parquet").await?;
//! stream.declare_column_names(&["user_id", "ts"]).await?;
//! stream.seek(row_group_start)?;
//! let n = stream.read(&mut buf).await?;
//! ```

pub mod config;
pub mod error;
pub mod footer;
pub mod prefetch;
pub mod storage;
pub mod stream;
pub mod transport;

pub use config::{AcceleratorConfig, PrefetchMode};
pub use error::{AcceleratorError, AcceleratorResult};
pub use footer::{FooterMetadata, FooterState};
pub use prefetch::{PlanKind, PrefetchPlan, Priority, ReadPattern, SchedulerStats};
pub use storage::{BlockStoreStats, ObjectHandle};
pub use stream::{ObjectStream, StreamFactory};
pub use transport::{ObjectClient, ObjectMetadata, ObjectStoreClient, TransportError};
