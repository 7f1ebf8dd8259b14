use std::sync::Arc;

use tokio::sync::watch;

use super::types::{WorkExecutionFailure, WorkState};

/// One dispatched unit of deferred work.
///
/// Its state is set exactly once. Any number of callers may wait for it.
#[derive(Debug)]
pub struct WorkItem {
  description: String,
  state: watch::Sender<WorkState>,
}

impl WorkItem {
  pub fn new(description: &str) -> Arc<Self> {
    let (state, _) = watch::channel(WorkState::Pending);
    Arc::new(Self {
      description: description.to_string(),
      state,
    })
  }

  pub fn description(&self) -> &str {
    &self.description
  }

  pub fn state(&self) -> WorkState {
    self.state.borrow().clone()
  }

  pub fn is_complete(&self) -> bool {
    self.state.borrow().is_terminal()
  }

  /// Record the outcome. Returns false if the item was already complete.
  pub(crate) fn complete(&self, result: Result<(), WorkExecutionFailure>) -> bool {
    let outcome = match result {
      Ok(()) => WorkState::Succeeded,
      Err(failure) => WorkState::Failed(failure),
    };
    self.state.send_if_modified(move |state| {
      if state.is_terminal() {
        return false;
      }
      *state = outcome;
      true
    })
  }

  /// Wait until the item is complete and return its outcome.
  pub async fn wait(&self) -> Result<(), WorkExecutionFailure> {
    let mut receiver = self.state.subscribe();
    let state = match receiver.wait_for(WorkState::is_terminal).await {
      Ok(state) => state.clone(),
      Err(_) => self.state(),
    };
    match state {
      WorkState::Failed(failure) => Err(failure),
      WorkState::Pending | WorkState::Succeeded => Ok(()),
    }
  }
}
