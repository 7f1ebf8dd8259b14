//! Concurrency plumbing for dispatched work.
//!
//! - `lease`: hierarchical worker leases bounding concurrency
//! - `scope`: the managed scope (lease, build operation, context) of a task
//! - `queue`: the bounded execution queue with expansion
//! - `item` / `tracker`: completion state of dispatched work, per operation

pub mod item;
pub mod lease;
pub mod queue;
pub mod scope;
pub mod tracker;
pub mod types;

pub use item::WorkItem;
pub use lease::{LeaseHandle, PendingLease, WorkerLease, WorkerLeaseRegistry};
pub use queue::{ExecutionQueue, QueuedExecution};
pub use scope::{BuildOperationRef, BuildScope, WorkerContext};
pub use tracker::AsyncWorkTracker;
pub use types::{WorkExecutionFailure, WorkState};
