//! Execution steps.
//!
//! A unit of work travels through a chain of steps, each consuming a context
//! and handing an enriched context to the next one. Only the change
//! resolution step lives here; the rest of the chain belongs to the
//! surrounding engine.

pub mod resolve_changes;

use std::sync::Arc;

use crate::history::{AfterPreviousExecutionState, BeforeExecutionState, ExecutionStateChanges};
use crate::unit::UnitOfWork;

pub use resolve_changes::{ResolveChangesStep, create_incremental_input_properties};

/// A stage of the execution pipeline.
pub trait Step<C> {
  type Result;

  fn execute(&self, context: C) -> Self::Result;
}

/// Context entering change resolution.
#[derive(Clone)]
pub struct IncrementalContext {
  pub work: Arc<dyn UnitOfWork>,
  /// Set when the unit must run regardless of its history.
  pub rebuild_reason: Option<String>,
  /// Absent when input tracking is disabled for the unit.
  pub before_execution_state: Option<BeforeExecutionState>,
  /// Absent when the unit never executed successfully.
  pub after_previous_execution_state: Option<AfterPreviousExecutionState>,
}

impl IncrementalContext {
  pub fn new(work: Arc<dyn UnitOfWork>) -> Self {
    Self {
      work,
      rebuild_reason: None,
      before_execution_state: None,
      after_previous_execution_state: None,
    }
  }

  pub fn with_rebuild_reason(mut self, reason: &str) -> Self {
    self.rebuild_reason = Some(reason.to_string());
    self
  }

  pub fn with_before_execution_state(mut self, state: BeforeExecutionState) -> Self {
    self.before_execution_state = Some(state);
    self
  }

  pub fn with_after_previous_execution_state(mut self, state: AfterPreviousExecutionState) -> Self {
    self.after_previous_execution_state = Some(state);
    self
  }
}

/// Context leaving change resolution: the incoming context plus the changes.
#[derive(Clone)]
pub struct IncrementalChangesContext {
  pub work: Arc<dyn UnitOfWork>,
  pub rebuild_reason: Option<String>,
  pub before_execution_state: Option<BeforeExecutionState>,
  pub after_previous_execution_state: Option<AfterPreviousExecutionState>,
  /// Absent when input tracking is disabled; the unit then always runs fully.
  pub changes: Option<ExecutionStateChanges>,
}
