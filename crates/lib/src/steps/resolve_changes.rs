//! Resolution of execution state changes for a unit of work.
//!
//! Decides between a forced rebuild, untracked execution, a rebuild for lack
//! of history, and a real diff, then hands the result to the next step.

use std::sync::Arc;

use tracing::debug;

use super::{IncrementalChangesContext, IncrementalContext, Step};
use crate::history::{
  AfterPreviousExecutionState, BeforeExecutionState, ChangeDetectionError, ExecutionStateChangeDetector,
  ExecutionStateChanges, IncrementalInputProperties, NamedIncrementalProperties,
};
use crate::unit::UnitOfWork;

/// Rebuild reason used when no successful execution has been recorded.
pub const NO_HISTORY: &str = "No history is available.";

/// Attaches [`ExecutionStateChanges`] to the context and runs the delegate.
pub struct ResolveChangesStep<D> {
  detector: Arc<dyn ExecutionStateChangeDetector>,
  delegate: D,
}

impl<D> ResolveChangesStep<D> {
  pub fn new(detector: Arc<dyn ExecutionStateChangeDetector>, delegate: D) -> Self {
    Self { detector, delegate }
  }

  /// Resolve the changes for one execution attempt.
  ///
  /// First match wins:
  /// 1. `rebuild_reason` is set: a rebuild with that reason as only message
  /// 2. no `before` state: `None`, input tracking is disabled
  /// 3. no `after_previous` state: a rebuild because there is no history
  /// 4. otherwise: the detector's diff of both states
  ///
  /// # Errors
  ///
  /// Returns [`ChangeDetectionError::DuplicateIncrementalProperty`] if the
  /// unit declares the same incremental property name or value twice.
  pub fn resolve(
    &self,
    work: &dyn UnitOfWork,
    before: Option<&BeforeExecutionState>,
    after_previous: Option<&AfterPreviousExecutionState>,
    rebuild_reason: Option<&str>,
  ) -> Result<Option<ExecutionStateChanges>, ChangeDetectionError> {
    let display_name = work.display_name();

    if let Some(reason) = rebuild_reason {
      debug!(work = %display_name, reason, "rebuild forced");
      let properties = create_incremental_input_properties(work)?;
      return Ok(Some(ExecutionStateChanges::rebuild(reason, before, properties)));
    }

    let Some(before) = before else {
      debug!(work = %display_name, "input tracking disabled, changes not resolved");
      return Ok(None);
    };

    let properties = create_incremental_input_properties(work)?;
    let changes = match after_previous {
      Some(previous) => self.detector.detect_changes(
        previous,
        before,
        &display_name,
        !work.allows_overlapping_outputs(),
        properties,
      ),
      None => {
        debug!(work = %display_name, "no execution history");
        ExecutionStateChanges::rebuild(NO_HISTORY, Some(before), properties)
      }
    };
    Ok(Some(changes))
  }
}

impl<D: Step<IncrementalChangesContext>> Step<IncrementalContext> for ResolveChangesStep<D> {
  type Result = Result<D::Result, ChangeDetectionError>;

  fn execute(&self, context: IncrementalContext) -> Self::Result {
    let changes = self.resolve(
      context.work.as_ref(),
      context.before_execution_state.as_ref(),
      context.after_previous_execution_state.as_ref(),
      context.rebuild_reason.as_deref(),
    )?;

    Ok(self.delegate.execute(IncrementalChangesContext {
      work: context.work,
      rebuild_reason: context.rebuild_reason,
      before_execution_state: context.before_execution_state,
      after_previous_execution_state: context.after_previous_execution_state,
      changes,
    }))
  }
}

/// Compute which input properties of `work` are tracked incrementally.
///
/// - no input changes required: [`IncrementalInputProperties::None`]
/// - legacy input changes: [`IncrementalInputProperties::All`]
/// - otherwise: the properties the unit marked incremental
pub fn create_incremental_input_properties(
  work: &dyn UnitOfWork,
) -> Result<IncrementalInputProperties, ChangeDetectionError> {
  if !work.requires_input_changes() {
    return Ok(IncrementalInputProperties::None);
  }
  if work.requires_legacy_input_changes() {
    return Ok(IncrementalInputProperties::All);
  }

  let mut named = NamedIncrementalProperties::new();
  let mut result = Ok(());
  work.visit_input_file_properties(&mut |property| {
    if property.incremental && result.is_ok() {
      result = named.insert(property.name, property.value);
    }
  });
  result?;

  Ok(IncrementalInputProperties::Named(named))
}
