//! Worker specifications and isolation requirements.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// The execution boundary chosen for work items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationMode {
  /// Run in the caller's process with the caller's captured context.
  None,
  /// Run in-process behind a fresh isolation boundary.
  ClassLoader,
  /// Run in a separate worker process.
  Process,
  /// Let the engine choose; currently behaves like [`IsolationMode::None`].
  Auto,
}

impl std::fmt::Display for IsolationMode {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      IsolationMode::None => write!(f, "none"),
      IsolationMode::ClassLoader => write!(f, "classloader"),
      IsolationMode::Process => write!(f, "process"),
      IsolationMode::Auto => write!(f, "auto"),
    }
  }
}

/// Configuration of in-process isolated workers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassLoaderWorkerSpec {
  /// Extra code locations visible inside the isolation boundary.
  pub classpath: Vec<PathBuf>,
}

/// Options for launching a worker process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkOptions {
  /// Managed by the engine; changing it is rejected.
  pub working_dir: PathBuf,
  pub executable: Option<PathBuf>,
  pub args: Vec<String>,
  pub environment: BTreeMap<String, String>,
}

/// Configuration of out-of-process workers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessWorkerSpec {
  pub classpath: Vec<PathBuf>,
  pub fork_options: ForkOptions,
}

/// How and where the items of a queue run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerSpec {
  NoIsolation,
  ClassLoader(ClassLoaderWorkerSpec),
  Process(ProcessWorkerSpec),
}

impl WorkerSpec {
  /// The default spec for a mode. `Auto` maps to no isolation.
  pub fn for_mode(mode: IsolationMode, managed_working_dir: &Path) -> Self {
    match mode {
      IsolationMode::None | IsolationMode::Auto => WorkerSpec::NoIsolation,
      IsolationMode::ClassLoader => WorkerSpec::ClassLoader(ClassLoaderWorkerSpec::default()),
      IsolationMode::Process => WorkerSpec::Process(ProcessWorkerSpec {
        classpath: Vec::new(),
        fork_options: ForkOptions {
          working_dir: managed_working_dir.to_path_buf(),
          ..ForkOptions::default()
        },
      }),
    }
  }

  pub fn isolation_mode(&self) -> IsolationMode {
    match self {
      WorkerSpec::NoIsolation => IsolationMode::None,
      WorkerSpec::ClassLoader(_) => IsolationMode::ClassLoader,
      WorkerSpec::Process(_) => IsolationMode::Process,
    }
  }
}

/// Per-call configuration of [`WorkerExecutor::submit`].
///
/// Fields that do not apply to the chosen isolation mode are ignored.
///
/// [`WorkerExecutor::submit`]: super::executor::WorkerExecutor::submit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfiguration<P> {
  pub isolation_mode: IsolationMode,
  /// Replaces the action's display name in logs and failures.
  pub display_name: Option<String>,
  pub parameters: P,
  pub classpath: Vec<PathBuf>,
  pub fork_options: ForkOptions,
}

/// Lifetime of a worker process after its work completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeepAliveMode {
  /// Stop when the build session ends.
  Session,
  /// Keep the worker for reuse by later builds.
  Daemon,
}

/// Opaque description of what must be visible across an isolation boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsolationStructure {
  pub classpath: Vec<PathBuf>,
  pub visible_types: Vec<String>,
  pub out_of_process: bool,
}

/// Everything a worker factory needs to produce a suitable worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonForkOptions {
  pub fork_options: Option<ForkOptions>,
  pub isolation_structure: Option<IsolationStructure>,
  pub keep_alive: KeepAliveMode,
}

/// Builds isolation structures from code locations and the types of the
/// action and its parameters.
pub trait IsolationStructureProvider: Send + Sync {
  fn in_process_structure(&self, classpath: &[PathBuf], types: &[&str]) -> IsolationStructure;

  fn worker_process_structure(&self, classpath: &[PathBuf], types: &[&str]) -> IsolationStructure;
}

/// Exposes exactly the declared code locations and types, deduplicated.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultIsolationStructureProvider;

impl DefaultIsolationStructureProvider {
  fn structure(classpath: &[PathBuf], types: &[&str], out_of_process: bool) -> IsolationStructure {
    let mut classpath = classpath.to_vec();
    classpath.dedup();
    let mut visible_types: Vec<String> = types.iter().map(ToString::to_string).collect();
    visible_types.sort();
    visible_types.dedup();
    IsolationStructure {
      classpath,
      visible_types,
      out_of_process,
    }
  }
}

impl IsolationStructureProvider for DefaultIsolationStructureProvider {
  fn in_process_structure(&self, classpath: &[PathBuf], types: &[&str]) -> IsolationStructure {
    Self::structure(classpath, types, false)
  }

  fn worker_process_structure(&self, classpath: &[PathBuf], types: &[&str]) -> IsolationStructure {
    Self::structure(classpath, types, true)
  }
}

/// Supplies the managed working directory of worker processes.
pub trait WorkerDirectoryProvider: Send + Sync {
  fn working_directory(&self) -> PathBuf;
}

/// Worker processes run in `<root>/workers`.
#[derive(Debug, Clone)]
pub struct DefaultWorkerDirectoryProvider {
  root: PathBuf,
}

impl DefaultWorkerDirectoryProvider {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }
}

impl WorkerDirectoryProvider for DefaultWorkerDirectoryProvider {
  fn working_directory(&self) -> PathBuf {
    self.root.join("workers")
  }
}
