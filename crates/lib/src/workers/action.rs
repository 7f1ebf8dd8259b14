//! Work actions, their parameters and isolated execution specs.

use std::any::type_name;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::executor::WorkerExecutor;
use super::spec::{IsolationMode, IsolationStructure};
use crate::util::BoxFuture;
use crate::work::{BuildOperationRef, WorkerContext};

/// Parameters of a work action.
///
/// Parameters are serialized on the submitting task, so later changes made
/// by the caller never race with the executing work.
pub trait WorkParameters: Serialize + DeserializeOwned + Default + Send + 'static {}

/// Marker for actions without parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct NoParameters;

impl WorkParameters for NoParameters {}

/// A unit of deferred work executed by a worker.
pub trait WorkAction: Send + Sync + 'static {
  type Parameters: WorkParameters;

  /// Description used in logs and failure messages.
  fn display_name(_parameters: &Self::Parameters) -> String {
    type_name::<Self>().to_string()
  }

  fn execute(parameters: Self::Parameters, context: WorkContext) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// What a running action can see of its environment.
#[derive(Debug, Clone)]
pub struct WorkContext {
  description: String,
  operation: BuildOperationRef,
  isolation: IsolationMode,
  context: WorkerContext,
  executor: Option<WorkerExecutor>,
}

impl WorkContext {
  pub(crate) fn new(
    description: &str,
    operation: BuildOperationRef,
    isolation: IsolationMode,
    context: WorkerContext,
    executor: Option<WorkerExecutor>,
  ) -> Self {
    Self {
      description: description.to_string(),
      operation,
      isolation,
      context,
      executor,
    }
  }

  pub fn description(&self) -> &str {
    &self.description
  }

  /// The build operation this item executes under.
  pub fn operation(&self) -> &BuildOperationRef {
    &self.operation
  }

  pub fn isolation(&self) -> IsolationMode {
    self.isolation
  }

  /// Ambient values visible to the action.
  pub fn context(&self) -> &WorkerContext {
    &self.context
  }

  /// The executor, for submitting nested work. Absent out of process.
  pub fn executor(&self) -> Option<&WorkerExecutor> {
    self.executor.as_ref()
  }

  pub fn with_context(mut self, context: WorkerContext) -> Self {
    self.context = context;
    self
  }

  pub fn without_executor(mut self) -> Self {
    self.executor = None;
    self
  }
}

type Invoker = dyn Fn(serde_json::Value, WorkContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;

/// An action with its parameters already isolated, ready to hand to a worker.
#[derive(Clone)]
pub struct ActionExecutionSpec {
  display_name: String,
  action_type: &'static str,
  parameter_type: &'static str,
  parameters: serde_json::Value,
  isolation_structure: Option<IsolationStructure>,
  invoker: Arc<Invoker>,
}

impl ActionExecutionSpec {
  /// Serialize `parameters` now and capture how to run `A` with them later.
  pub fn isolated<A: WorkAction>(
    display_name: &str,
    parameters: &A::Parameters,
    isolation_structure: Option<IsolationStructure>,
  ) -> Result<Self, serde_json::Error> {
    let parameters = serde_json::to_value(parameters)?;
    let invoker: Arc<Invoker> = Arc::new(
      |parameters: serde_json::Value, context: WorkContext| -> BoxFuture<'static, anyhow::Result<()>> {
        Box::pin(async move {
          let parameters: A::Parameters = serde_json::from_value(parameters)?;
          A::execute(parameters, context).await
        })
      },
    );

    Ok(Self {
      display_name: display_name.to_string(),
      action_type: type_name::<A>(),
      parameter_type: type_name::<A::Parameters>(),
      parameters,
      isolation_structure,
      invoker,
    })
  }

  pub fn display_name(&self) -> &str {
    &self.display_name
  }

  pub fn action_type(&self) -> &'static str {
    self.action_type
  }

  pub fn parameter_type(&self) -> &'static str {
    self.parameter_type
  }

  /// The isolated parameters, as handed across an isolation boundary.
  pub fn parameters(&self) -> &serde_json::Value {
    &self.parameters
  }

  pub fn isolation_structure(&self) -> Option<&IsolationStructure> {
    self.isolation_structure.as_ref()
  }

  /// Re-materialize the parameters and run the action in this process.
  pub async fn invoke(&self, context: WorkContext) -> anyhow::Result<()> {
    (self.invoker)(self.parameters.clone(), context).await
  }
}

impl std::fmt::Debug for ActionExecutionSpec {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ActionExecutionSpec")
      .field("display_name", &self.display_name)
      .field("action_type", &self.action_type)
      .field("parameters", &self.parameters)
      .field("isolation_structure", &self.isolation_structure)
      .finish()
  }
}
