use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{Executor, Job};
use crate::{JobError, QueueError, QueueResult};

/// Executor wrapping a typed [`Job`]: decodes the payload, runs the job and
/// encodes its output
pub struct TypedExecutor<J: Job> {
    ctx: J::Context,
    _job: PhantomData<fn() -> J>,
}

impl<J: Job> TypedExecutor<J> {
    pub fn new(ctx: J::Context) -> Self {
        Self {
            ctx,
            _job: PhantomData,
        }
    }
}

#[async_trait]
impl<J: Job> Executor for TypedExecutor<J> {
    fn job_type(&self) -> &str {
        J::JOB_TYPE
    }

    async fn execute(&self, payload: Value) -> Result<Value, JobError> {
        let job: J = serde_json::from_value(payload)
            .map_err(|e| JobError::permanent(format!("Failed to deserialize job: {}", e)))?;

        let output = job.execute(self.ctx.clone()).await?;

        serde_json::to_value(output)
            .map_err(|e| JobError::permanent(format!("Failed to serialize result: {}", e)))
    }
}

/// Collects executors at start-up
#[derive(Default)]
pub struct ExecutorRegistryBuilder {
    executors: HashMap<String, Arc<dyn Executor>>,
}

impl ExecutorRegistryBuilder {
    /// Register a typed job with the context its executions receive
    pub fn register_job<J: Job>(&mut self, ctx: J::Context) -> QueueResult<&mut Self> {
        self.register(Arc::new(TypedExecutor::<J>::new(ctx)))
    }

    /// Register an executor. Each job type may be registered once.
    pub fn register(&mut self, executor: Arc<dyn Executor>) -> QueueResult<&mut Self> {
        let job_type = executor.job_type().to_string();
        if self.executors.contains_key(&job_type) {
            return Err(QueueError::DuplicateJobType(job_type));
        }
        self.executors.insert(job_type, executor);
        Ok(self)
    }

    pub fn build(self) -> ExecutorRegistry {
        ExecutorRegistry {
            executors: self.executors,
        }
    }
}

/// Static mapping from job type to executor, fixed once built
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn builder() -> ExecutorRegistryBuilder {
        ExecutorRegistryBuilder::default()
    }

    /// Look up the executor for a job type
    pub fn resolve(&self, job_type: &str) -> QueueResult<Arc<dyn Executor>> {
        self.executors
            .get(job_type)
            .cloned()
            .ok_or_else(|| QueueError::UnknownJobType(job_type.to_string()))
    }

    /// Check if a job type is registered
    pub fn is_registered(&self, job_type: &str) -> bool {
        self.executors.contains_key(job_type)
    }

    /// Registered job types, sorted
    pub fn job_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.executors.keys().cloned().collect();
        types.sort();
        types
    }

    /// Run the executor for `job_type`. An unknown type can never succeed and
    /// fails permanently.
    pub async fn execute(&self, job_type: &str, payload: Value) -> Result<Value, JobError> {
        let executor = self
            .resolve(job_type)
            .map_err(|e| JobError::permanent(e.to_string()))?;
        executor.execute(payload).await
    }
}
