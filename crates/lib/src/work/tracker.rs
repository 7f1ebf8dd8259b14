//! Registry of outstanding work per build operation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use super::item::WorkItem;
use super::scope::BuildOperationRef;
use super::types::WorkExecutionFailure;

/// Tracks dispatched work items by the build operation that submitted them.
#[derive(Debug, Default)]
pub struct AsyncWorkTracker {
  items: Mutex<HashMap<BuildOperationRef, Vec<Arc<WorkItem>>>>,
}

impl AsyncWorkTracker {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<BuildOperationRef, Vec<Arc<WorkItem>>>> {
    self.items.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn register_work(&self, operation: &BuildOperationRef, item: Arc<WorkItem>) {
    self.lock().entry(operation.clone()).or_default().push(item);
  }

  /// Returns true if any item registered under `operation` is still pending.
  pub fn has_uncompleted_work(&self, operation: &BuildOperationRef) -> bool {
    self
      .lock()
      .get(operation)
      .is_some_and(|items| items.iter().any(|item| !item.is_complete()))
  }

  /// Wait for every item registered under `operation`, including items
  /// registered while waiting, and return all failures.
  ///
  /// Items stay registered until they are terminal, so concurrent waiters on
  /// the same operation each observe every item and every failure.
  pub async fn wait_for_completion(&self, operation: &BuildOperationRef) -> Vec<WorkExecutionFailure> {
    let mut observed: Vec<Arc<WorkItem>> = Vec::new();
    let mut failures = Vec::new();
    loop {
      let fresh: Vec<Arc<WorkItem>> = self
        .lock()
        .get(operation)
        .map(|items| {
          items
            .iter()
            .filter(|item| !contains(&observed, item))
            .cloned()
            .collect()
        })
        .unwrap_or_default();
      if fresh.is_empty() {
        break;
      }
      debug!(operation = %operation, items = fresh.len(), "waiting for work items");
      failures.extend(wait_all(&fresh).await);
      observed.extend(fresh);
    }
    self.forget(&observed);
    failures
  }

  /// Wait for the given items only and return their failures.
  ///
  /// The items stop being tracked once they complete, whichever operation
  /// registered them.
  pub async fn wait_for_items(&self, items: &[Arc<WorkItem>]) -> Vec<WorkExecutionFailure> {
    let failures = wait_all(items).await;
    self.forget(items);
    failures
  }

  fn forget(&self, items: &[Arc<WorkItem>]) {
    self.lock().retain(|_, remaining| {
      remaining.retain(|tracked| !contains(items, tracked));
      !remaining.is_empty()
    });
  }
}

fn contains(items: &[Arc<WorkItem>], item: &Arc<WorkItem>) -> bool {
  items.iter().any(|candidate| Arc::ptr_eq(candidate, item))
}

async fn wait_all(items: &[Arc<WorkItem>]) -> Vec<WorkExecutionFailure> {
  let mut failures = Vec::new();
  for item in items {
    if let Err(failure) = item.wait().await {
      failures.push(failure);
    }
  }
  failures
}
