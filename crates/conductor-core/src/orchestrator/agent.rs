//! The agent contract: something that can take a task and a context and
//! produce a result.
//!
//! Same dynamic-dispatch pattern as the task executor: RPITIT trait,
//! boxed-future `AgentHandleDyn` with a blanket impl, and `BoxAgent`.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use crate::workflow::ExecutionError;

pub trait AgentHandle: Send + Sync {
    fn run(
        &self,
        task: &str,
        context: &Value,
    ) -> impl Future<Output = Result<Value, ExecutionError>> + Send;
}

/// Object-safe version of [`AgentHandle`] with boxed futures.
pub trait AgentHandleDyn: Send + Sync {
    fn run_boxed<'a>(
        &'a self,
        task: &'a str,
        context: &'a Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ExecutionError>> + Send + 'a>>;
}

impl<T: AgentHandle> AgentHandleDyn for T {
    fn run_boxed<'a>(
        &'a self,
        task: &'a str,
        context: &'a Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ExecutionError>> + Send + 'a>> {
        Box::pin(self.run(task, context))
    }
}

/// Type-erased agent held by the orchestrator registry.
pub struct BoxAgent {
    inner: Box<dyn AgentHandleDyn + Send + Sync>,
}

impl BoxAgent {
    pub fn new<T: AgentHandle + 'static>(agent: T) -> Self {
        Self {
            inner: Box::new(agent),
        }
    }

    pub async fn run(&self, task: &str, context: &Value) -> Result<Value, ExecutionError> {
        self.inner.run_boxed(task, context).await
    }
}
