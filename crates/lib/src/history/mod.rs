//! Execution history and change detection.
//!
//! This module turns two snapshots of a unit of work (the state persisted
//! after the previous successful execution and the state captured right
//! before this one) into an [`ExecutionStateChanges`] report:
//! - `state`: the snapshot types consumed from the fingerprinting layer
//! - `incremental`: which input properties take part in incremental tracking
//! - `detector`: the deterministic state comparison
//! - `changes`: the resulting report and the per-file input changes

pub mod changes;
pub mod detector;
pub mod error;
pub mod incremental;
pub mod state;

pub use changes::{ExecutionStateChanges, FileChange, FileChangeKind, InputChanges};
pub use detector::{DefaultExecutionStateChangeDetector, ExecutionStateChangeDetector};
pub use error::ChangeDetectionError;
pub use incremental::{IncrementalInputProperties, NamedIncrementalProperties};
pub use state::{AfterPreviousExecutionState, BeforeExecutionState, ExecutionState, FileCollectionFingerprint};
