//! The worker dispatch engine.
//!
//! [`WorkerExecutor`] creates [`WorkQueue`]s for an isolation mode. Each
//! submitted action is isolated on the submitting task, queued on the shared
//! [`ExecutionQueue`] and only started once a child of the submitter's lease
//! is acquired. Completions are recorded in the [`AsyncWorkTracker`] under
//! the submitter's build operation; failures surface when awaited.

use std::any::{TypeId, type_name};
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use tracing::{debug, info, warn};

use super::action::{ActionExecutionSpec, NoParameters, WorkAction, WorkContext};
use super::error::{WorkerError, WorkerExecutionError};
use super::factory::{
  ContextCapturingWorkerFactory, InProcessWorkerFactory, IsolatedWorkerFactory, UnavailableProcessWorkerFactory,
  WorkerFactory,
};
use super::spec::{
  ClassLoaderWorkerSpec, DaemonForkOptions, DefaultIsolationStructureProvider, DefaultWorkerDirectoryProvider,
  ForkOptions, IsolationMode, IsolationStructureProvider, KeepAliveMode, ProcessWorkerSpec, WorkerConfiguration,
  WorkerDirectoryProvider, WorkerSpec,
};
use crate::config::WorkerConfig;
use crate::util::BoxFuture;
use crate::work::{
  AsyncWorkTracker, BuildScope, ExecutionQueue, QueuedExecution, WorkExecutionFailure, WorkItem, WorkerLease,
  WorkerLeaseRegistry,
};

struct ExecutorInner {
  queue: ExecutionQueue,
  tracker: AsyncWorkTracker,
  in_process: Arc<dyn WorkerFactory>,
  isolated: Arc<dyn WorkerFactory>,
  daemon: Arc<dyn WorkerFactory>,
  structures: Arc<dyn IsolationStructureProvider>,
  directories: Arc<dyn WorkerDirectoryProvider>,
}

/// Dispatches work actions under a chosen isolation mode.
#[derive(Clone)]
pub struct WorkerExecutor {
  inner: Arc<ExecutorInner>,
}

/// Builder for [`WorkerExecutor`].
pub struct WorkerExecutorBuilder {
  config: WorkerConfig,
  leases: WorkerLeaseRegistry,
  daemon: Arc<dyn WorkerFactory>,
  structures: Arc<dyn IsolationStructureProvider>,
  directories: Option<Arc<dyn WorkerDirectoryProvider>>,
}

impl WorkerExecutorBuilder {
  /// Factory used for process isolation.
  pub fn daemon_factory(mut self, factory: Arc<dyn WorkerFactory>) -> Self {
    self.daemon = factory;
    self
  }

  pub fn isolation_structures(mut self, provider: Arc<dyn IsolationStructureProvider>) -> Self {
    self.structures = provider;
    self
  }

  /// Defaults to `<worker_directory>/workers`.
  pub fn worker_directories(mut self, provider: Arc<dyn WorkerDirectoryProvider>) -> Self {
    self.directories = Some(provider);
    self
  }

  pub fn build(self) -> WorkerExecutor {
    let directories = self
      .directories
      .unwrap_or_else(|| Arc::new(DefaultWorkerDirectoryProvider::new(&self.config.worker_directory)));
    WorkerExecutor {
      inner: Arc::new(ExecutorInner {
        queue: ExecutionQueue::new(self.leases, self.config.max_workers),
        tracker: AsyncWorkTracker::new(),
        in_process: Arc::new(InProcessWorkerFactory),
        isolated: Arc::new(IsolatedWorkerFactory),
        daemon: self.daemon,
        structures: self.structures,
        directories,
      }),
    }
  }
}

impl WorkerExecutor {
  pub fn builder(config: WorkerConfig, leases: WorkerLeaseRegistry) -> WorkerExecutorBuilder {
    WorkerExecutorBuilder {
      config,
      leases,
      daemon: Arc::new(UnavailableProcessWorkerFactory),
      structures: Arc::new(DefaultIsolationStructureProvider),
      directories: None,
    }
  }

  /// An executor with default factories and providers.
  pub fn new(config: WorkerConfig, leases: WorkerLeaseRegistry) -> Self {
    Self::builder(config, leases).build()
  }

  /// A queue running items in-process with the creator's ambient context.
  pub fn no_isolation(&self) -> WorkQueue {
    self.queue_for(WorkerSpec::NoIsolation)
  }

  /// A queue running items in-process behind an isolation boundary.
  pub fn class_loader_isolation(&self, configure: impl FnOnce(&mut ClassLoaderWorkerSpec)) -> WorkQueue {
    let mut spec = ClassLoaderWorkerSpec::default();
    configure(&mut spec);
    self.queue_for(WorkerSpec::ClassLoader(spec))
  }

  /// A queue running items in worker processes.
  ///
  /// Fails if `configure` changes the working directory.
  pub fn process_isolation(&self, configure: impl FnOnce(&mut ProcessWorkerSpec)) -> Result<WorkQueue, WorkerError> {
    self.create_queue(IsolationMode::Process, |spec| {
      if let WorkerSpec::Process(process) = spec {
        configure(process);
      }
    })
  }

  /// A queue for `mode`, starting from that mode's default spec.
  pub fn create_queue(
    &self,
    mode: IsolationMode,
    configure: impl FnOnce(&mut WorkerSpec),
  ) -> Result<WorkQueue, WorkerError> {
    let managed = self.inner.directories.working_directory();
    let mut spec = WorkerSpec::for_mode(mode, &managed);
    configure(&mut spec);

    if let WorkerSpec::Process(process) = &spec
      && process.fork_options.working_dir != managed
    {
      return Err(WorkerError::WorkingDirectoryOverride {
        requested: process.fork_options.working_dir.clone(),
      });
    }
    Ok(self.queue_for(spec))
  }

  /// Wait for every item submitted under the current build operation.
  ///
  /// The caller's lease is given back while waiting.
  pub async fn await_completion(&self) -> Result<(), WorkerError> {
    let scope = BuildScope::current().ok_or(WorkerError::NoAvailableWorkerLease)?;
    let operation = scope.operation();
    if self.inner.tracker.has_uncompleted_work(operation) {
      self.inner.queue.expand();
    }
    let failures = scope
      .lease()
      .while_released(self.inner.tracker.wait_for_completion(operation))
      .await;
    into_result(failures)
  }

  pub fn max_workers(&self) -> usize {
    self.inner.queue.max_workers()
  }

  fn queue_for(&self, spec: WorkerSpec) -> WorkQueue {
    let factory: Arc<dyn WorkerFactory> = match &spec {
      WorkerSpec::NoIsolation => {
        let context = BuildScope::current()
          .map(|scope| scope.context().clone())
          .unwrap_or_default();
        Arc::new(ContextCapturingWorkerFactory::new(
          Arc::clone(&self.inner.in_process),
          context,
        ))
      }
      WorkerSpec::ClassLoader(_) => Arc::clone(&self.inner.isolated),
      WorkerSpec::Process(_) => Arc::clone(&self.inner.daemon),
    };
    debug!(isolation = %spec.isolation_mode(), "created work queue");
    WorkQueue {
      executor: self.clone(),
      spec,
      factory,
      items: Vec::new(),
    }
  }

  fn fork_options<A: WorkAction>(&self, spec: &WorkerSpec) -> DaemonForkOptions {
    let mut types = vec![type_name::<A>()];
    if TypeId::of::<A::Parameters>() != TypeId::of::<NoParameters>() {
      types.push(type_name::<A::Parameters>());
    }

    let (fork_options, isolation_structure) = match spec {
      WorkerSpec::NoIsolation => (None, None),
      WorkerSpec::ClassLoader(class_loader) => (
        None,
        Some(self.inner.structures.in_process_structure(&class_loader.classpath, &types)),
      ),
      WorkerSpec::Process(process) => {
        let mut fork_options = process.fork_options.clone();
        fork_options.working_dir = self.inner.directories.working_directory();
        (
          Some(fork_options),
          Some(self.inner.structures.worker_process_structure(&process.classpath, &types)),
        )
      }
    };

    DaemonForkOptions {
      fork_options,
      isolation_structure,
      keep_alive: KeepAliveMode::Daemon,
    }
  }

  /// Submit a single action with its isolation chosen per call.
  ///
  /// `configure` starts from [`IsolationMode::Auto`], no display name and
  /// fork options in the managed working directory. The item is tracked
  /// under the current build operation and awaited through
  /// [`WorkerExecutor::await_completion`]. A configured display name
  /// replaces the action's own.
  pub fn submit<A: WorkAction>(
    &self,
    configure: impl FnOnce(&mut WorkerConfiguration<A::Parameters>),
  ) -> Result<(), WorkerError> {
    let mut configuration = WorkerConfiguration {
      isolation_mode: IsolationMode::Auto,
      display_name: None,
      parameters: A::Parameters::default(),
      classpath: Vec::new(),
      fork_options: ForkOptions {
        working_dir: self.inner.directories.working_directory(),
        ..ForkOptions::default()
      },
    };
    configure(&mut configuration);

    let WorkerConfiguration {
      isolation_mode,
      display_name,
      parameters,
      classpath,
      fork_options,
    } = configuration;
    let queue = self.create_queue(isolation_mode, |spec| match spec {
      WorkerSpec::NoIsolation => {}
      WorkerSpec::ClassLoader(class_loader) => class_loader.classpath = classpath,
      WorkerSpec::Process(process) => {
        process.classpath = classpath;
        process.fork_options = fork_options;
      }
    })?;

    self.submit_work::<A>(&queue.spec, &queue.factory, parameters, display_name)?;
    Ok(())
  }

  fn submit_work<A: WorkAction>(
    &self,
    spec: &WorkerSpec,
    factory: &Arc<dyn WorkerFactory>,
    parameters: A::Parameters,
    display_name: Option<String>,
  ) -> Result<Arc<WorkItem>, WorkerError> {
    let scope = BuildScope::current().ok_or(WorkerError::NoAvailableWorkerLease)?;
    let description = display_name.unwrap_or_else(|| A::display_name(&parameters));

    let options = self.fork_options::<A>(spec);
    let action = ActionExecutionSpec::isolated::<A>(&description, &parameters, options.isolation_structure.clone())
      .map_err(|source| WorkerError::ParameterIsolation {
        description: description.clone(),
        source,
      })?;

    Ok(self.dispatch(&scope, action, Arc::clone(factory), options, spec.isolation_mode()))
  }

  fn dispatch(
    &self,
    scope: &BuildScope,
    action: ActionExecutionSpec,
    factory: Arc<dyn WorkerFactory>,
    options: DaemonForkOptions,
    isolation: IsolationMode,
  ) -> Arc<WorkItem> {
    let description = action.display_name().to_string();
    let operation = scope.operation().clone();
    let context = scope.context().clone();
    let item = WorkItem::new(&description);
    self.inner.tracker.register_work(&operation, Arc::clone(&item));

    let executor = Arc::downgrade(&self.inner);
    let completion = Arc::clone(&item);
    let name = description.clone();
    let run = move |lease: WorkerLease| -> BoxFuture<'static, ()> {
      Box::pin(async move {
        let child = operation.child(&format!("Execute {name}"));
        let executor = upgrade(&executor).filter(|_| isolation != IsolationMode::Process);
        let work = WorkContext::new(&name, child.clone(), isolation, context.clone(), executor);
        let scope = BuildScope::new(lease, child, context);

        let task = tokio::spawn(scope.run(async move {
          let worker = factory.worker(&options)?;
          worker.execute(action, work).await
        }));
        let result = match task.await {
          Ok(result) => result,
          Err(err) => Err(anyhow::anyhow!("work action did not complete: {err}")),
        };

        match &result {
          Ok(()) => debug!(work = %name, "work item succeeded"),
          Err(err) => warn!(work = %name, error = %err, "work item failed"),
        }
        completion.complete(result.map_err(|cause| WorkExecutionFailure::new(&name, cause)));
      })
    };

    self
      .inner
      .queue
      .submit(QueuedExecution::new(&description, scope.lease().handle(), run));
    item
  }

  async fn await_items(&self, items: &[Arc<WorkItem>]) -> Result<(), WorkerError> {
    if items.iter().any(|item| !item.is_complete()) {
      self.inner.queue.expand();
    }
    let failures = match BuildScope::current() {
      Some(scope) => {
        scope
          .lease()
          .while_released(self.inner.tracker.wait_for_items(items))
          .await
      }
      None => self.inner.tracker.wait_for_items(items).await,
    };
    into_result(failures)
  }
}

impl std::fmt::Debug for WorkerExecutor {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("WorkerExecutor")
      .field("queue", &self.inner.queue)
      .finish_non_exhaustive()
  }
}

fn upgrade(executor: &Weak<ExecutorInner>) -> Option<WorkerExecutor> {
  executor.upgrade().map(|inner| WorkerExecutor { inner })
}

fn into_result(failures: Vec<WorkExecutionFailure>) -> Result<(), WorkerError> {
  match WorkerExecutionError::from_failures(failures) {
    None => Ok(()),
    Some(err) => {
      info!(failures = err.failures().len(), "work items failed");
      Err(err.into())
    }
  }
}

/// Items submitted through one queue, awaited together.
pub struct WorkQueue {
  executor: WorkerExecutor,
  spec: WorkerSpec,
  factory: Arc<dyn WorkerFactory>,
  items: Vec<Arc<WorkItem>>,
}

impl WorkQueue {
  /// Configure fresh parameters, isolate them and queue the action.
  ///
  /// Never blocks. Fails outside a managed scope or when the parameters
  /// cannot be isolated; failures of the action itself surface on await.
  pub fn submit<A: WorkAction>(&mut self, configure: impl FnOnce(&mut A::Parameters)) -> Result<(), WorkerError> {
    let mut parameters = A::Parameters::default();
    configure(&mut parameters);
    let item = self.executor.submit_work::<A>(&self.spec, &self.factory, parameters, None)?;
    self.items.push(item);
    Ok(())
  }

  /// Wait for every item submitted through this queue so far.
  pub async fn await_completion(&mut self) -> Result<(), WorkerError> {
    let items = std::mem::take(&mut self.items);
    self.executor.await_items(&items).await
  }

  pub fn isolation_mode(&self) -> IsolationMode {
    self.spec.isolation_mode()
  }

  pub fn spec(&self) -> &WorkerSpec {
    &self.spec
  }

  /// Items submitted and not yet awaited.
  pub fn pending(&self) -> usize {
    self.items.len()
  }

  /// Managed working directory of process workers, if this is a process queue.
  pub fn working_dir(&self) -> Option<PathBuf> {
    match &self.spec {
      WorkerSpec::Process(process) => Some(process.fork_options.working_dir.clone()),
      _ => None,
    }
  }
}

impl std::fmt::Debug for WorkQueue {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("WorkQueue")
      .field("spec", &self.spec)
      .field("pending", &self.items.len())
      .finish()
  }
}
