//! Shared fixtures for library integration tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use kiln_lib::config::WorkerConfig;
use kiln_lib::work::{BuildOperationRef, BuildScope, WorkerContext, WorkerLeaseRegistry};
use kiln_lib::workers::WorkerExecutor;
use tempfile::TempDir;

/// An executor rooted in a temporary worker directory.
pub struct Harness {
  pub executor: WorkerExecutor,
  pub leases: WorkerLeaseRegistry,
  pub dir: TempDir,
}

impl Harness {
  pub fn new(max_workers: usize) -> Self {
    let dir = TempDir::new().unwrap();
    let config = WorkerConfig {
      max_workers,
      worker_directory: dir.path().to_path_buf(),
    };
    let leases = config.lease_registry();
    let executor = WorkerExecutor::new(config, leases.clone());
    Self { executor, leases, dir }
  }

  /// A managed scope holding a root lease.
  pub async fn scope(&self, name: &str, context: WorkerContext) -> BuildScope {
    let lease = self.leases.acquire_root(name).await;
    BuildScope::new(lease, BuildOperationRef::new(name), context)
  }
}

/// Poll `condition` until it holds or a generous deadline passes.
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
  for _ in 0..500 {
    if condition() {
      return true;
    }
    tokio::time::sleep(Duration::from_millis(2)).await;
  }
  condition()
}

pub fn bump(counter: &Arc<AtomicUsize>) -> usize {
  counter.fetch_add(1, Ordering::SeqCst) + 1
}
