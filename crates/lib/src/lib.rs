//! kiln-lib: execution core of an incremental build engine
//!
//! This crate decides whether a unit of work must run again and dispatches
//! the work it runs:
//! - `history`: execution state snapshots and change detection
//! - `steps`: the resolve-changes step of the execution pipeline
//! - `work`: worker leases, build scopes, the execution queue and tracker
//! - `workers`: isolation modes, work actions and the worker executor

pub mod config;
pub mod history;
pub mod steps;
pub mod unit;
pub mod util;
pub mod work;
pub mod workers;
