//! Tests for the worker dispatch engine.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail};
use kiln_lib::util::BoxFuture;
use kiln_lib::work::WorkerContext;
use kiln_lib::workers::{
  ActionExecutionSpec, DaemonForkOptions, IsolationMode, NoParameters, WorkAction, WorkContext, WorkParameters, Worker,
  WorkerError, WorkerExecutor, WorkerFactory,
};
use serde::{Deserialize, Serialize};
use tracing_test::traced_test;

use super::common::{Harness, bump, eventually};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Labelled {
  label: String,
  fail: bool,
}

impl WorkParameters for Labelled {}

struct Flaky;

impl WorkAction for Flaky {
  type Parameters = Labelled;

  fn display_name(parameters: &Labelled) -> String {
    format!("item {}", parameters.label)
  }

  async fn execute(parameters: Labelled, _context: WorkContext) -> anyhow::Result<()> {
    tokio::task::yield_now().await;
    if parameters.fail {
      bail!("{} broke", parameters.label);
    }
    Ok(())
  }
}

fn execution_failures(err: WorkerError) -> Vec<(String, String)> {
  let err = match err {
    WorkerError::Execution(err) => err,
    other => panic!("expected an execution error, got {other}"),
  };
  err
    .failures()
    .iter()
    .map(|failure| (failure.description().to_string(), failure.cause().to_string()))
    .collect()
}

mod failures {
  use super::*;

  #[tokio::test]
  #[traced_test]
  async fn one_failure_of_three_is_reported_alone() {
    let harness = Harness::new(2);
    let scope = harness.scope("build", WorkerContext::new()).await;

    let result = scope
      .run(async {
        let mut queue = harness.executor.no_isolation();
        for (label, fail) in [("a", false), ("b", true), ("c", false)] {
          queue.submit::<Flaky>(|p| {
            p.label = label.to_string();
            p.fail = fail;
          })?;
        }
        queue.await_completion().await
      })
      .await;

    let err = result.unwrap_err();
    assert_eq!(err.to_string(), "There was a failure while executing work items");
    assert_eq!(
      execution_failures(err),
      vec![("item b".to_string(), "b broke".to_string())]
    );
  }

  #[tokio::test]
  async fn several_failures_are_all_reported() {
    let harness = Harness::new(3);
    let scope = harness.scope("build", WorkerContext::new()).await;

    let result = scope
      .run(async {
        let mut queue = harness.executor.no_isolation();
        for label in ["x", "y"] {
          queue.submit::<Flaky>(|p| {
            p.label = label.to_string();
            p.fail = true;
          })?;
        }
        queue.await_completion().await
      })
      .await;

    let err = result.unwrap_err();
    assert_eq!(err.to_string(), "There were multiple failures while executing work items");
    let mut descriptions: Vec<String> = execution_failures(err).into_iter().map(|(d, _)| d).collect();
    descriptions.sort();
    assert_eq!(descriptions, vec!["item x", "item y"]);
  }

  struct Panics;

  impl WorkAction for Panics {
    type Parameters = NoParameters;

    fn display_name(_parameters: &NoParameters) -> String {
      "panicking item".to_string()
    }

    async fn execute(_parameters: NoParameters, _context: WorkContext) -> anyhow::Result<()> {
      panic!("exploded");
    }
  }

  #[tokio::test]
  async fn panics_become_failures() {
    let harness = Harness::new(2);
    let scope = harness.scope("build", WorkerContext::new()).await;

    let result = scope
      .run(async {
        let mut queue = harness.executor.no_isolation();
        queue.submit::<Panics>(|_| {})?;
        queue.await_completion().await
      })
      .await;

    let failures = execution_failures(result.unwrap_err());
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, "panicking item");
    assert!(eventually(|| harness.leases.leases_in_use() == 0).await);
  }

  #[tokio::test]
  async fn executor_await_collects_every_queue_of_the_operation() {
    let harness = Harness::new(2);
    let scope = harness.scope("build", WorkerContext::new()).await;

    let result = scope
      .run(async {
        let mut first = harness.executor.no_isolation();
        let mut second = harness.executor.class_loader_isolation(|_| {});
        first.submit::<Flaky>(|p| {
          p.label = "first".to_string();
          p.fail = true;
        })?;
        second.submit::<Flaky>(|p| {
          p.label = "second".to_string();
          p.fail = true;
        })?;
        harness.executor.await_completion().await
      })
      .await;

    assert_eq!(execution_failures(result.unwrap_err()).len(), 2);
  }
}

mod leases {
  use super::*;

  #[tokio::test]
  async fn submit_outside_managed_scope_fails() {
    let harness = Harness::new(2);
    let mut queue = harness.executor.no_isolation();
    let err = queue.submit::<Flaky>(|p| p.label = "lost".to_string()).unwrap_err();
    assert!(matches!(err, WorkerError::NoAvailableWorkerLease));
  }

  static CONTENDED_RUNS: AtomicUsize = AtomicUsize::new(0);

  struct Contended;

  impl WorkAction for Contended {
    type Parameters = NoParameters;

    async fn execute(_parameters: NoParameters, _context: WorkContext) -> anyhow::Result<()> {
      CONTENDED_RUNS.fetch_add(1, Ordering::SeqCst);
      Ok(())
    }
  }

  #[tokio::test]
  async fn item_stays_pending_under_permanent_contention() {
    let harness = Harness::new(1);
    let scope = harness.scope("build", WorkerContext::new()).await;

    let mut queue = scope
      .clone()
      .run(async {
        let mut queue = harness.executor.no_isolation();
        queue.submit::<Contended>(|_| {})?;
        Ok::<_, WorkerError>(queue)
      })
      .await
      .unwrap();

    let waited = tokio::time::timeout(Duration::from_millis(50), queue.await_completion()).await;
    assert!(waited.is_err(), "item completed without a free lease");
    assert_eq!(CONTENDED_RUNS.load(Ordering::SeqCst), 0);
    assert!(scope.lease().is_held());
    assert_eq!(harness.leases.leases_in_use(), 1);
  }

  static CHILD_RUNS: AtomicUsize = AtomicUsize::new(0);

  struct Child;

  impl WorkAction for Child {
    type Parameters = NoParameters;

    async fn execute(_parameters: NoParameters, _context: WorkContext) -> anyhow::Result<()> {
      CHILD_RUNS.fetch_add(1, Ordering::SeqCst);
      Ok(())
    }
  }

  struct Parent;

  impl WorkAction for Parent {
    type Parameters = NoParameters;

    async fn execute(_parameters: NoParameters, context: WorkContext) -> anyhow::Result<()> {
      let executor = context
        .executor()
        .ok_or_else(|| anyhow!("nested submission needs an executor"))?;
      let mut queue = executor.no_isolation();
      queue.submit::<Child>(|_| {})?;
      queue.submit::<Child>(|_| {})?;
      queue.await_completion().await?;
      Ok(())
    }
  }

  #[tokio::test]
  #[traced_test]
  async fn nested_submit_and_await_completes() {
    let harness = Harness::new(2);
    let scope = harness.scope("build", WorkerContext::new()).await;

    let result = tokio::time::timeout(
      Duration::from_secs(10),
      scope.run(async {
        let mut queue = harness.executor.no_isolation();
        queue.submit::<Parent>(|_| {})?;
        queue.await_completion().await
      }),
    )
    .await
    .expect("nested work deadlocked");

    assert!(result.is_ok());
    assert_eq!(CHILD_RUNS.load(Ordering::SeqCst), 2);
    assert!(eventually(|| harness.leases.leases_in_use() == 0).await);
  }
}

mod isolation {
  use super::*;

  pub(super) struct ExpectUser;

  impl WorkAction for ExpectUser {
    type Parameters = NoParameters;

    async fn execute(_parameters: NoParameters, context: WorkContext) -> anyhow::Result<()> {
      match context.context().get("user") {
        Some("alice") => Ok(()),
        other => bail!("saw user {other:?}"),
      }
    }
  }

  #[tokio::test]
  async fn no_isolation_sees_context_of_queue_creator() {
    let harness = Harness::new(2);
    let scope = harness
      .scope("build", WorkerContext::new().with_value("user", "alice"))
      .await;

    let result = scope
      .run(async {
        let mut queue = harness.executor.create_queue(IsolationMode::Auto, |_| {})?;
        queue.submit::<ExpectUser>(|_| {})?;
        queue.await_completion().await
      })
      .await;
    assert!(result.is_ok());
  }

  #[tokio::test]
  async fn class_loader_isolation_hides_ambient_context() {
    let harness = Harness::new(2);
    let scope = harness
      .scope("build", WorkerContext::new().with_value("user", "alice"))
      .await;

    let result = scope
      .run(async {
        let mut queue = harness
          .executor
          .class_loader_isolation(|spec| spec.classpath.push(PathBuf::from("lib/tools")));
        queue.submit::<ExpectUser>(|_| {})?;
        queue.await_completion().await
      })
      .await;

    let failures = execution_failures(result.unwrap_err());
    assert_eq!(failures[0].1, "saw user None");
  }

  #[tokio::test]
  async fn custom_working_dir_is_rejected_before_queueing() {
    let harness = Harness::new(1);
    let err = harness
      .executor
      .process_isolation(|spec| spec.fork_options.working_dir = harness.dir.path().join("mine"))
      .unwrap_err();
    assert!(matches!(err, WorkerError::WorkingDirectoryOverride { .. }));
    assert!(err.to_string().contains("not supported"));
  }

  #[tokio::test]
  async fn process_work_fails_on_await_without_a_daemon_factory() {
    let harness = Harness::new(2);
    let scope = harness.scope("build", WorkerContext::new()).await;

    let result = scope
      .run(async {
        let mut queue = harness.executor.process_isolation(|_| {})?;
        queue.submit::<Flaky>(|p| p.label = "remote".to_string())?;
        queue.await_completion().await
      })
      .await;

    let failures = execution_failures(result.unwrap_err());
    assert_eq!(failures[0].0, "item remote");
    assert!(failures[0].1.contains("unavailable"));
  }

  /// Records fork options and runs actions in-process.
  #[derive(Default)]
  struct RecordingDaemonFactory {
    seen: Mutex<Vec<DaemonForkOptions>>,
    workers: Arc<AtomicUsize>,
  }

  struct LocalWorker;

  impl Worker for LocalWorker {
    fn execute(&self, spec: ActionExecutionSpec, context: WorkContext) -> BoxFuture<'static, anyhow::Result<()>> {
      Box::pin(async move { spec.invoke(context.without_executor()).await })
    }
  }

  impl WorkerFactory for RecordingDaemonFactory {
    fn worker(&self, options: &DaemonForkOptions) -> anyhow::Result<Arc<dyn Worker>> {
      self.seen.lock().unwrap().push(options.clone());
      bump(&self.workers);
      Ok(Arc::new(LocalWorker))
    }

    fn isolation_mode(&self) -> IsolationMode {
      IsolationMode::Process
    }
  }

  #[tokio::test]
  async fn process_work_runs_in_managed_directory() {
    let harness = Harness::new(2);
    let daemon = Arc::new(RecordingDaemonFactory::default());
    let config = kiln_lib::config::WorkerConfig {
      max_workers: 2,
      worker_directory: harness.dir.path().to_path_buf(),
    };
    let executor = WorkerExecutor::builder(config, harness.leases.clone())
      .daemon_factory(daemon.clone())
      .build();
    let scope = harness.scope("build", WorkerContext::new()).await;

    let result = scope
      .run(async {
        let mut queue = executor.process_isolation(|spec| spec.classpath.push(PathBuf::from("lib/remote")))?;
        queue.submit::<Flaky>(|p| p.label = "remote".to_string())?;
        queue.await_completion().await
      })
      .await;

    assert!(result.is_ok());
    let seen = daemon.seen.lock().unwrap();
    let fork_options = seen[0].fork_options.as_ref().unwrap();
    assert_eq!(fork_options.working_dir, harness.dir.path().join("workers"));
    let structure = seen[0].isolation_structure.as_ref().unwrap();
    assert!(structure.out_of_process);
    assert_eq!(structure.classpath, vec![PathBuf::from("lib/remote")]);
    assert_eq!(daemon.workers.load(Ordering::SeqCst), 1);
  }
}

mod single_submit {
  use super::*;

  #[tokio::test]
  async fn configured_display_name_names_the_failure() {
    let harness = Harness::new(2);
    let scope = harness.scope("build", WorkerContext::new()).await;

    let result = scope
      .run(async {
        harness.executor.submit::<Flaky>(|config| {
          config.display_name = Some("compile shaders".to_string());
          config.parameters.label = "shaders".to_string();
          config.parameters.fail = true;
        })?;
        harness.executor.submit::<Flaky>(|config| {
          config.parameters.label = "fonts".to_string();
          config.parameters.fail = true;
        })?;
        harness.executor.await_completion().await
      })
      .await;

    let mut descriptions: Vec<String> = execution_failures(result.unwrap_err())
      .into_iter()
      .map(|(description, _)| description)
      .collect();
    descriptions.sort();
    assert_eq!(descriptions, vec!["compile shaders", "item fonts"]);
  }

  #[tokio::test]
  async fn auto_mode_runs_with_the_callers_context() {
    let harness = Harness::new(2);
    let scope = harness
      .scope("build", WorkerContext::new().with_value("user", "alice"))
      .await;

    let result = scope
      .run(async {
        harness.executor.submit::<isolation::ExpectUser>(|_| {})?;
        harness.executor.await_completion().await
      })
      .await;
    assert!(result.is_ok());
  }

  #[tokio::test]
  async fn process_mode_rejects_custom_working_dir() {
    let harness = Harness::new(1);
    let scope = harness.scope("build", WorkerContext::new()).await;

    let result = scope
      .run(async {
        harness.executor.submit::<Flaky>(|config| {
          config.isolation_mode = IsolationMode::Process;
          config.fork_options.working_dir = PathBuf::from("/tmp/elsewhere");
        })
      })
      .await;
    assert!(matches!(result, Err(WorkerError::WorkingDirectoryOverride { .. })));
  }

  #[tokio::test]
  async fn class_loader_mode_isolates_context() {
    let harness = Harness::new(2);
    let scope = harness
      .scope("build", WorkerContext::new().with_value("user", "alice"))
      .await;

    let result = scope
      .run(async {
        harness.executor.submit::<isolation::ExpectUser>(|config| {
          config.isolation_mode = IsolationMode::ClassLoader;
          config.classpath.push(PathBuf::from("lib/tools"));
        })?;
        harness.executor.await_completion().await
      })
      .await;
    assert_eq!(execution_failures(result.unwrap_err())[0].1, "saw user None");
  }
}
