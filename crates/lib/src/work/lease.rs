//! Hierarchical worker leases.
//!
//! Every managed task of control holds exactly one [`WorkerLease`]. The
//! registry bounds how many leases are held at once across the whole build.
//! Work items get child leases that are acquired lazily, right before they
//! run, so queued items never hold permits they are not using.
//!
//! Acquisition is two-phase: a [`PendingLease`] only offers `try_acquire`,
//! and a held [`WorkerLease`] releases its slot when dropped.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, trace, warn};

struct RegistryInner {
  max_workers: usize,
  slots: Arc<Semaphore>,
  next_id: AtomicU64,
}

impl RegistryInner {
  fn next_id(&self) -> u64 {
    self.next_id.fetch_add(1, Ordering::Relaxed)
  }
}

/// Hands out worker leases, bounding the number held concurrently.
///
/// Slots are permits of a fair semaphore, so waiters are served in order.
#[derive(Clone)]
pub struct WorkerLeaseRegistry {
  inner: Arc<RegistryInner>,
}

impl WorkerLeaseRegistry {
  /// Create a registry allowing `max_workers` leases at once (at least one).
  pub fn new(max_workers: usize) -> Self {
    let max_workers = max_workers.clamp(1, Semaphore::MAX_PERMITS);
    Self {
      inner: Arc::new(RegistryInner {
        max_workers,
        slots: Arc::new(Semaphore::new(max_workers)),
        next_id: AtomicU64::new(1),
      }),
    }
  }

  pub fn max_workers(&self) -> usize {
    self.inner.max_workers
  }

  /// Number of slots currently taken.
  pub fn leases_in_use(&self) -> usize {
    self.inner.max_workers - self.inner.slots.available_permits()
  }

  /// Acquire a root lease for a top-level build task, waiting for a free slot.
  pub async fn acquire_root(&self, name: &str) -> WorkerLease {
    let permit = self.acquire_slot().await;
    let lease = WorkerLease::new(LeaseInfo::new(&self.inner, name, None), permit);
    debug!(lease = %lease.display_name(), "acquired root worker lease");
    lease
  }

  /// Acquire a root lease only if a slot is free right now.
  pub fn try_acquire_root(&self, name: &str) -> Option<WorkerLease> {
    let permit = Arc::clone(&self.inner.slots).try_acquire_owned().ok()?;
    Some(WorkerLease::new(LeaseInfo::new(&self.inner, name, None), Some(permit)))
  }

  /// Wait for a free slot, to be bound to a child lease with
  /// [`PendingLease::acquire_with`].
  pub(crate) async fn acquire_slot(&self) -> Option<OwnedSemaphorePermit> {
    Arc::clone(&self.inner.slots).acquire_owned().await.ok()
  }
}

impl std::fmt::Debug for WorkerLeaseRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("WorkerLeaseRegistry")
      .field("max_workers", &self.inner.max_workers)
      .field("in_use", &self.leases_in_use())
      .finish()
  }
}

#[derive(Clone)]
struct LeaseInfo {
  id: u64,
  parent_id: Option<u64>,
  display_name: Arc<str>,
  registry: Arc<RegistryInner>,
}

impl LeaseInfo {
  fn new(registry: &Arc<RegistryInner>, name: &str, parent_id: Option<u64>) -> Self {
    Self {
      id: registry.next_id(),
      parent_id,
      display_name: Arc::from(name),
      registry: Arc::clone(registry),
    }
  }
}

/// A reference to a held lease from which child leases can be created.
///
/// Only a held [`WorkerLease`] can hand one out.
#[derive(Clone)]
pub struct LeaseHandle {
  info: LeaseInfo,
}

impl LeaseHandle {
  pub fn id(&self) -> u64 {
    self.info.id
  }

  pub fn display_name(&self) -> &str {
    &self.info.display_name
  }

  /// Create a not-yet-acquired child of this lease.
  pub fn create_child(&self) -> PendingLease {
    let name = format!("{} > child", self.info.display_name);
    PendingLease {
      info: LeaseInfo::new(&self.info.registry, &name, Some(self.info.id)),
    }
  }
}

impl std::fmt::Debug for LeaseHandle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("LeaseHandle")
      .field("id", &self.info.id)
      .field("display_name", &self.info.display_name)
      .finish()
  }
}

/// A lease that has not been acquired. The only operation is `try_acquire`.
pub struct PendingLease {
  info: LeaseInfo,
}

impl PendingLease {
  /// Try to take a slot without waiting.
  ///
  /// Returns the pending lease back on contention so the caller can retry.
  pub fn try_acquire(self) -> Result<WorkerLease, PendingLease> {
    match Arc::clone(&self.info.registry.slots).try_acquire_owned() {
      Ok(permit) => Ok(self.acquire_with(permit)),
      Err(_) => Err(self),
    }
  }

  /// Bind a slot obtained from [`WorkerLeaseRegistry::acquire_slot`].
  pub(crate) fn acquire_with(self, permit: OwnedSemaphorePermit) -> WorkerLease {
    trace!(lease = %self.info.display_name, "acquired child worker lease");
    WorkerLease::new(self.info, Some(permit))
  }
}

type PermitSlot = Arc<Mutex<Option<OwnedSemaphorePermit>>>;

fn lock_slot(slot: &PermitSlot) -> MutexGuard<'_, Option<OwnedSemaphorePermit>> {
  slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A held concurrency permit. Dropping it releases the slot.
pub struct WorkerLease {
  info: LeaseInfo,
  permit: PermitSlot,
}

impl WorkerLease {
  fn new(info: LeaseInfo, permit: Option<OwnedSemaphorePermit>) -> Self {
    Self {
      info,
      permit: Arc::new(Mutex::new(permit)),
    }
  }

  pub fn id(&self) -> u64 {
    self.info.id
  }

  pub fn parent_id(&self) -> Option<u64> {
    self.info.parent_id
  }

  pub fn display_name(&self) -> &str {
    &self.info.display_name
  }

  /// Returns false while the slot is temporarily given back.
  pub fn is_held(&self) -> bool {
    lock_slot(&self.permit).is_some()
  }

  pub fn handle(&self) -> LeaseHandle {
    LeaseHandle {
      info: self.info.clone(),
    }
  }

  /// Give the slot back while `future` runs and take one again afterwards.
  ///
  /// Used while blocking on other work so that the awaited work can obtain
  /// the slot. Nested calls only release once. If the returned future is
  /// dropped early the slot is still taken back, immediately when one is
  /// free and otherwise as soon as one is released.
  pub async fn while_released<F: Future>(&self, future: F) -> F::Output {
    let permit = lock_slot(&self.permit).take();
    let Some(permit) = permit else {
      return future.await;
    };
    drop(permit);
    trace!(lease = %self.info.display_name, "released worker lease while waiting");

    let mut restore = RestoreOnDrop { lease: self, armed: true };
    let output = future.await;

    let permit = Arc::clone(&self.info.registry.slots).acquire_owned().await;
    restore.armed = false;
    if let Ok(permit) = permit {
      *lock_slot(&self.permit) = Some(permit);
      trace!(lease = %self.info.display_name, "reacquired worker lease");
    }
    output
  }

  fn restore_after_cancel(&self) {
    let slots = Arc::clone(&self.info.registry.slots);
    if let Ok(permit) = Arc::clone(&slots).try_acquire_owned() {
      *lock_slot(&self.permit) = Some(permit);
      return;
    }

    let slot = Arc::clone(&self.permit);
    let name = Arc::clone(&self.info.display_name);
    match Handle::try_current() {
      Ok(runtime) => {
        debug!(lease = %name, "wait cancelled, reacquiring worker lease in the background");
        runtime.spawn(async move {
          if let Ok(permit) = slots.acquire_owned().await {
            *lock_slot(&slot) = Some(permit);
          }
        });
      }
      Err(_) => warn!(lease = %name, "wait cancelled outside a runtime, worker lease not reacquired"),
    }
  }
}

/// Takes the slot back when a `while_released` wait is dropped before it
/// finishes.
struct RestoreOnDrop<'a> {
  lease: &'a WorkerLease,
  armed: bool,
}

impl Drop for RestoreOnDrop<'_> {
  fn drop(&mut self) {
    if self.armed {
      self.lease.restore_after_cancel();
    }
  }
}

impl std::fmt::Debug for WorkerLease {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("WorkerLease")
      .field("id", &self.info.id)
      .field("parent_id", &self.info.parent_id)
      .field("display_name", &self.info.display_name)
      .field("held", &self.is_held())
      .finish()
  }
}
