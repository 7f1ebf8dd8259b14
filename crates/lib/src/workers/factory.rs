//! Worker factories, one per isolation mode.

use std::sync::Arc;

use anyhow::anyhow;
use tracing::trace;

use super::action::{ActionExecutionSpec, WorkContext};
use super::spec::{DaemonForkOptions, IsolationMode};
use crate::util::BoxFuture;
use crate::work::WorkerContext;

/// Runs an action spec.
pub trait Worker: Send + Sync {
  fn execute(&self, spec: ActionExecutionSpec, context: WorkContext) -> BoxFuture<'static, anyhow::Result<()>>;
}

/// Produces workers suitable for a set of fork options.
pub trait WorkerFactory: Send + Sync {
  fn worker(&self, options: &DaemonForkOptions) -> anyhow::Result<Arc<dyn Worker>>;

  fn isolation_mode(&self) -> IsolationMode;
}

/// Runs actions directly on the current runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct InProcessWorkerFactory;

struct InProcessWorker;

impl Worker for InProcessWorker {
  fn execute(&self, spec: ActionExecutionSpec, context: WorkContext) -> BoxFuture<'static, anyhow::Result<()>> {
    Box::pin(async move { spec.invoke(context).await })
  }
}

impl WorkerFactory for InProcessWorkerFactory {
  fn worker(&self, _options: &DaemonForkOptions) -> anyhow::Result<Arc<dyn Worker>> {
    Ok(Arc::new(InProcessWorker))
  }

  fn isolation_mode(&self) -> IsolationMode {
    IsolationMode::None
  }
}

/// Hands the ambient context captured at queue creation to every worker of
/// the delegate.
pub struct ContextCapturingWorkerFactory {
  delegate: Arc<dyn WorkerFactory>,
  context: WorkerContext,
}

impl ContextCapturingWorkerFactory {
  pub fn new(delegate: Arc<dyn WorkerFactory>, context: WorkerContext) -> Self {
    Self { delegate, context }
  }
}

struct ContextCapturingWorker {
  delegate: Arc<dyn Worker>,
  context: WorkerContext,
}

impl Worker for ContextCapturingWorker {
  fn execute(&self, spec: ActionExecutionSpec, context: WorkContext) -> BoxFuture<'static, anyhow::Result<()>> {
    self.delegate.execute(spec, context.with_context(self.context.clone()))
  }
}

impl WorkerFactory for ContextCapturingWorkerFactory {
  fn worker(&self, options: &DaemonForkOptions) -> anyhow::Result<Arc<dyn Worker>> {
    Ok(Arc::new(ContextCapturingWorker {
      delegate: self.delegate.worker(options)?,
      context: self.context.clone(),
    }))
  }

  fn isolation_mode(&self) -> IsolationMode {
    self.delegate.isolation_mode()
  }
}

/// Runs actions in-process behind an isolation boundary.
///
/// The action sees none of the submitter's ambient context, only what the
/// isolation structure declares, and its parameters are re-materialized from
/// their isolated form.
#[derive(Debug, Clone, Copy, Default)]
pub struct IsolatedWorkerFactory;

struct IsolatedWorker {
  context: WorkerContext,
}

impl Worker for IsolatedWorker {
  fn execute(&self, spec: ActionExecutionSpec, context: WorkContext) -> BoxFuture<'static, anyhow::Result<()>> {
    trace!(work = %spec.display_name(), action = spec.action_type(), "running isolated action");
    let context = context.with_context(self.context.clone());
    Box::pin(async move { spec.invoke(context).await })
  }
}

impl WorkerFactory for IsolatedWorkerFactory {
  fn worker(&self, options: &DaemonForkOptions) -> anyhow::Result<Arc<dyn Worker>> {
    let structure = options
      .isolation_structure
      .as_ref()
      .ok_or_else(|| anyhow!("isolated workers require an isolation structure"))?;
    let classpath = structure
      .classpath
      .iter()
      .map(|path| path.display().to_string())
      .collect::<Vec<_>>()
      .join(":");
    let context = WorkerContext::from_values([
      ("isolation.classpath", classpath),
      ("isolation.types", structure.visible_types.join(",")),
    ]);
    Ok(Arc::new(IsolatedWorker { context }))
  }

  fn isolation_mode(&self) -> IsolationMode {
    IsolationMode::ClassLoader
  }
}

/// Daemon factory used when no worker process launcher is installed.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableProcessWorkerFactory;

impl WorkerFactory for UnavailableProcessWorkerFactory {
  fn worker(&self, _options: &DaemonForkOptions) -> anyhow::Result<Arc<dyn Worker>> {
    Err(anyhow!("worker processes are unavailable: no worker process factory is configured"))
  }

  fn isolation_mode(&self) -> IsolationMode {
    IsolationMode::Process
  }
}
