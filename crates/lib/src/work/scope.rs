//! Build operations and the managed scope of a task.
//!
//! A [`BuildScope`] binds a held worker lease, the current logical build
//! operation and the ambient [`WorkerContext`] to a task. Work can only be
//! submitted from inside a scope; code running outside one is not managed by
//! the build and has no lease to derive child leases from.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::lease::WorkerLease;

static NEXT_OPERATION_ID: AtomicU64 = AtomicU64::new(1);

tokio::task_local! {
  static CURRENT_SCOPE: BuildScope;
}

/// Identifies a logical build operation.
///
/// Work items are grouped by the operation that submitted them so that all
/// outstanding work of an operation can be awaited together.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BuildOperationRef {
  id: u64,
  parent_id: Option<u64>,
  name: Arc<str>,
}

impl BuildOperationRef {
  pub fn new(name: &str) -> Self {
    Self {
      id: NEXT_OPERATION_ID.fetch_add(1, Ordering::Relaxed),
      parent_id: None,
      name: Arc::from(name),
    }
  }

  /// Start a child operation of this one.
  pub fn child(&self, name: &str) -> Self {
    Self {
      parent_id: Some(self.id),
      ..Self::new(name)
    }
  }

  pub fn id(&self) -> u64 {
    self.id
  }

  pub fn parent_id(&self) -> Option<u64> {
    self.parent_id
  }

  pub fn name(&self) -> &str {
    &self.name
  }
}

impl std::fmt::Display for BuildOperationRef {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}#{}", self.name, self.id)
  }
}

/// Ambient values visible to work executing in the caller's context.
///
/// Captured explicitly when a non-isolated queue is created and handed to the
/// worker, so work running on a pool task sees the creator's values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerContext {
  values: Arc<BTreeMap<String, String>>,
}

impl WorkerContext {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn from_values<I, K, V>(values: I) -> Self
  where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
  {
    Self {
      values: Arc::new(values.into_iter().map(|(k, v)| (k.into(), v.into())).collect()),
    }
  }

  pub fn with_value(&self, key: &str, value: &str) -> Self {
    let mut values = (*self.values).clone();
    values.insert(key.to_string(), value.to_string());
    Self {
      values: Arc::new(values),
    }
  }

  pub fn get(&self, key: &str) -> Option<&str> {
    self.values.get(key).map(String::as_str)
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }
}

/// The managed execution scope of a task.
#[derive(Clone)]
pub struct BuildScope {
  lease: Arc<WorkerLease>,
  operation: BuildOperationRef,
  context: WorkerContext,
}

impl BuildScope {
  pub fn new(lease: WorkerLease, operation: BuildOperationRef, context: WorkerContext) -> Self {
    Self {
      lease: Arc::new(lease),
      operation,
      context,
    }
  }

  /// The scope of the current task, if it is managed.
  pub fn current() -> Option<BuildScope> {
    CURRENT_SCOPE.try_with(BuildScope::clone).ok()
  }

  /// Run `future` with this scope as the current one.
  pub async fn run<F: Future>(self, future: F) -> F::Output {
    CURRENT_SCOPE.scope(self, future).await
  }

  pub fn lease(&self) -> &WorkerLease {
    &self.lease
  }

  pub fn operation(&self) -> &BuildOperationRef {
    &self.operation
  }

  pub fn context(&self) -> &WorkerContext {
    &self.context
  }
}

impl std::fmt::Debug for BuildScope {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("BuildScope")
      .field("lease", &self.lease)
      .field("operation", &self.operation)
      .finish()
  }
}
