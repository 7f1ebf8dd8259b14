//! Bounded execution queue.
//!
//! A pool of worker tasks runs queued executions in submission order, each
//! one only after its child lease has been acquired. Workers wait on the
//! lease registry for a free slot, then bind it to the front execution.
//!
//! A worker running an execution that itself waits on queued work keeps its
//! pool slot while it waits. If every worker did that, nothing would be left
//! to drain the queue, so waiters call [`ExecutionQueue::expand`] first.
//! Expanding raises the worker ceiling by one and starts a worker when work
//! is queued. The ceiling never shrinks; idle workers exit once the queue is
//! empty and later submissions start new ones up to the ceiling.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace};

use super::lease::{LeaseHandle, WorkerLease, WorkerLeaseRegistry};
use crate::util::BoxFuture;

type RunFn = Box<dyn FnOnce(WorkerLease) -> BoxFuture<'static, ()> + Send>;

/// A queued execution waiting for a child lease of `parent`.
pub struct QueuedExecution {
  description: String,
  parent: LeaseHandle,
  run: RunFn,
}

impl QueuedExecution {
  /// `run` receives the acquired child lease and must hold it until done.
  pub fn new<F>(description: &str, parent: LeaseHandle, run: F) -> Self
  where
    F: FnOnce(WorkerLease) -> BoxFuture<'static, ()> + Send + 'static,
  {
    Self {
      description: description.to_string(),
      parent,
      run: Box::new(run),
    }
  }

  pub fn description(&self) -> &str {
    &self.description
  }
}

struct QueueState {
  queue: VecDeque<QueuedExecution>,
  workers: usize,
  ceiling: usize,
}

impl QueueState {
  fn start_worker_if_allowed(&mut self) -> bool {
    if self.workers < self.ceiling {
      self.workers += 1;
      true
    } else {
      false
    }
  }

  fn retire_worker(&mut self) {
    self.workers = self.workers.saturating_sub(1);
  }
}

struct QueueInner {
  state: Mutex<QueueState>,
  leases: WorkerLeaseRegistry,
}

impl QueueInner {
  fn lock(&self) -> MutexGuard<'_, QueueState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

/// A bounded pool executing queued work under lease control.
#[derive(Clone)]
pub struct ExecutionQueue {
  inner: Arc<QueueInner>,
}

impl ExecutionQueue {
  /// The lease slots of queued executions come from `leases`.
  pub fn new(leases: WorkerLeaseRegistry, max_workers: usize) -> Self {
    Self {
      inner: Arc::new(QueueInner {
        state: Mutex::new(QueueState {
          queue: VecDeque::new(),
          workers: 0,
          ceiling: max_workers.max(1),
        }),
        leases,
      }),
    }
  }

  /// Queue an execution. Never blocks.
  ///
  /// Must be called from within a tokio runtime.
  pub fn submit(&self, execution: QueuedExecution) {
    let mut state = self.inner.lock();
    trace!(work = %execution.description, queued = state.queue.len() + 1, "queued execution");
    state.queue.push_back(execution);
    if state.start_worker_if_allowed() {
      self.start_worker();
    }
  }

  /// Raise the ceiling by one and start a worker, if work is queued.
  pub fn expand(&self) {
    let mut state = self.inner.lock();
    if state.queue.is_empty() {
      return;
    }
    state.ceiling += 1;
    debug!(ceiling = state.ceiling, queued = state.queue.len(), "expanding execution queue");
    if state.start_worker_if_allowed() {
      self.start_worker();
    }
  }

  /// The current worker ceiling. Starts at the configured size and only
  /// grows through [`ExecutionQueue::expand`].
  pub fn max_workers(&self) -> usize {
    self.inner.lock().ceiling
  }

  /// Number of running worker tasks.
  pub fn workers(&self) -> usize {
    self.inner.lock().workers
  }

  /// Number of executions waiting to start.
  pub fn queued(&self) -> usize {
    self.inner.lock().queue.len()
  }

  fn start_worker(&self) {
    tokio::spawn(run_worker(Arc::clone(&self.inner)));
  }
}

impl std::fmt::Debug for ExecutionQueue {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let state = self.inner.lock();
    f.debug_struct("ExecutionQueue")
      .field("ceiling", &state.ceiling)
      .field("workers", &state.workers)
      .field("queued", &state.queue.len())
      .finish()
  }
}

async fn run_worker(inner: Arc<QueueInner>) {
  loop {
    {
      let mut state = inner.lock();
      if state.queue.is_empty() {
        state.retire_worker();
        return;
      }
    }

    let Some(permit) = inner.leases.acquire_slot().await else {
      inner.lock().retire_worker();
      return;
    };

    let execution = {
      let mut state = inner.lock();
      match state.queue.pop_front() {
        Some(execution) => execution,
        None => {
          state.retire_worker();
          return;
        }
      }
    };

    let lease = execution.parent.create_child().acquire_with(permit);
    trace!(work = %execution.description, lease = lease.id(), "starting execution");
    (execution.run)(lease).await;
  }
}
