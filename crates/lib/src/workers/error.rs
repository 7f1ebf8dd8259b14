use std::path::PathBuf;

use thiserror::Error;

use crate::work::WorkExecutionFailure;

/// Errors raised by the worker dispatch engine.
///
/// Configuration errors and [`WorkerError::NoAvailableWorkerLease`] are
/// raised synchronously by queue creation and `submit`. Failures of the work
/// itself only surface when awaited, as [`WorkerError::Execution`].
#[derive(Debug, Error)]
pub enum WorkerError {
  /// A process worker was configured with its own working directory.
  #[error("Setting the working directory of a worker is not supported (requested {}).", .requested.display())]
  WorkingDirectoryOverride { requested: PathBuf },

  /// The parameters could not be isolated before handing them off.
  #[error("Could not isolate parameters of {description}: {source}")]
  ParameterIsolation {
    description: String,
    #[source]
    source: serde_json::Error,
  },

  /// Work was submitted or awaited outside of a managed build scope.
  #[error(
    "An attempt was made to submit work from a task not managed by the build. Work may only be submitted from a managed task."
  )]
  NoAvailableWorkerLease,

  /// One or more awaited work items failed.
  #[error(transparent)]
  Execution(#[from] WorkerExecutionError),
}

/// Every failure observed while awaiting a set of work items.
#[derive(Debug, Clone, Error)]
#[error("{}", summary(.failures.len()))]
pub struct WorkerExecutionError {
  failures: Vec<WorkExecutionFailure>,
}

fn summary(count: usize) -> &'static str {
  if count == 1 {
    "There was a failure while executing work items"
  } else {
    "There were multiple failures while executing work items"
  }
}

impl WorkerExecutionError {
  /// Returns `None` when there is nothing to report.
  pub fn from_failures(failures: Vec<WorkExecutionFailure>) -> Option<Self> {
    if failures.is_empty() {
      None
    } else {
      Some(Self { failures })
    }
  }

  pub fn failures(&self) -> &[WorkExecutionFailure] {
    &self.failures
  }

  pub fn into_failures(self) -> Vec<WorkExecutionFailure> {
    self.failures
  }
}
