//! Engine configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::work::WorkerLeaseRegistry;

/// Configuration of the worker dispatch engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
  /// Maximum number of concurrently held worker leases and pool workers.
  pub max_workers: usize,
  /// Root under which worker processes get their managed working directory.
  pub worker_directory: PathBuf,
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      max_workers: num_cpus(),
      worker_directory: std::env::temp_dir().join("kiln"),
    }
  }
}

impl WorkerConfig {
  /// A lease registry sized for this configuration.
  pub fn lease_registry(&self) -> WorkerLeaseRegistry {
    WorkerLeaseRegistry::new(self.max_workers)
  }
}

/// Get the number of CPUs for default parallelism.
fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}
