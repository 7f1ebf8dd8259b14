//! Worker dispatch: isolation specs, work actions, worker factories and the
//! executor that queues actions under lease control.

pub mod action;
pub mod error;
pub mod executor;
pub mod factory;
pub mod spec;

pub use action::{ActionExecutionSpec, NoParameters, WorkAction, WorkContext, WorkParameters};
pub use error::{WorkerError, WorkerExecutionError};
pub use executor::{WorkQueue, WorkerExecutor, WorkerExecutorBuilder};
pub use factory::{
  ContextCapturingWorkerFactory, InProcessWorkerFactory, IsolatedWorkerFactory, UnavailableProcessWorkerFactory,
  Worker, WorkerFactory,
};
pub use spec::{
  ClassLoaderWorkerSpec, DaemonForkOptions, DefaultIsolationStructureProvider, DefaultWorkerDirectoryProvider,
  ForkOptions, IsolationMode, IsolationStructure, IsolationStructureProvider, KeepAliveMode, ProcessWorkerSpec,
  WorkerConfiguration, WorkerDirectoryProvider, WorkerSpec,
};
