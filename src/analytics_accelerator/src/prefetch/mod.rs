//! Prefetching: access-pattern classification, plan construction and the
//! scheduler that turns plans into range fetches.

mod access;
mod column_store;
mod plan;
mod planner;
mod retry;
mod scheduler;

pub use access::{AccessEntry, AccessRecord, ReadPattern};
pub use column_store::ColumnAccessStore;
pub use plan::{PlanKind, PlannedRange, PrefetchPlan, Priority, StreamId};
pub use planner::ReadPlanner;
pub use scheduler::SchedulerStats;

pub(crate) use retry::with_retry;
pub(crate) use scheduler::{FetchJob, PrefetchScheduler};
