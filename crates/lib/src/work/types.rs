//! Types shared by the work queue, the tracker and the dispatch engine.

use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

/// A failure of one dispatched work item, tied to its description.
#[derive(Debug, Clone, Error)]
#[error("A failure occurred while executing {description}")]
pub struct WorkExecutionFailure {
  description: String,
  #[source]
  cause: Arc<dyn StdError + Send + Sync>,
}

impl WorkExecutionFailure {
  pub fn new(description: &str, cause: anyhow::Error) -> Self {
    let cause: Box<dyn StdError + Send + Sync> = cause.into();
    Self {
      description: description.to_string(),
      cause: Arc::from(cause),
    }
  }

  pub fn description(&self) -> &str {
    &self.description
  }

  pub fn cause(&self) -> &(dyn StdError + Send + Sync + 'static) {
    self.cause.as_ref()
  }
}

/// Completion state of a work item. Leaves `Pending` exactly once.
#[derive(Debug, Clone)]
pub enum WorkState {
  Pending,
  Succeeded,
  Failed(WorkExecutionFailure),
}

impl WorkState {
  pub fn is_terminal(&self) -> bool {
    !matches!(self, WorkState::Pending)
  }
}
