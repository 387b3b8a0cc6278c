pub mod registry;
pub mod builtin;

pub use registry::{ExecutorRegistry, ExecutorRegistryBuilder, TypedExecutor};
pub use builtin::{DataProcessing, EmailProcessing, DataReport, EmailReport, BuiltinLatency, register_builtins};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::JobError;

/// Processing logic for one job type.
///
/// Executors share no mutable state with each other and may be invoked more
/// than once for the same job, so they must be safe to re-run.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Job type tag this executor handles
    fn job_type(&self) -> &str;

    /// Run the job on its payload
    async fn execute(&self, payload: Value) -> Result<Value, JobError>;
}

/// Strongly typed job definition, adapted into an [`Executor`] by the registry
#[async_trait]
pub trait Job: DeserializeOwned + Send + 'static {
    /// Context handed to every execution, fixed at registration
    type Context: Clone + Send + Sync + 'static;

    /// Result stored on the job record
    type Output: Serialize + Send + 'static;

    /// Job type identifier for dispatch
    const JOB_TYPE: &'static str;

    /// Execute the job with the given context
    async fn execute(self, ctx: Self::Context) -> Result<Self::Output, JobError>;
}
