//! The task executor contract and its object-safe wrapper.
//!
//! The engine never runs commands itself; it hands each step's command to a
//! caller-supplied [`TaskExecutor`] along with the executor name and the
//! step timeout. Enforcing the timeout is the executor's job.
//!
//! Same blanket-impl pattern as the agent handle:
//! 1. `TaskExecutor` uses RPITIT
//! 2. `TaskExecutorDyn` boxes the future and is blanket-implemented
//! 3. `BoxTaskExecutor` wraps `Box<dyn TaskExecutorDyn>` and delegates

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde_json::Value;

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum ExecutionError {
    #[error("{0}")]
    Failed(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("unknown executor: {0}")]
    UnknownExecutor(String),
}

/// Runs one command on behalf of a workflow step.
pub trait TaskExecutor: Send + Sync {
    fn execute(
        &self,
        command: &str,
        executor: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<Value, ExecutionError>> + Send;
}

/// Object-safe version of [`TaskExecutor`] with boxed futures.
pub trait TaskExecutorDyn: Send + Sync {
    fn execute_boxed<'a>(
        &'a self,
        command: &'a str,
        executor: &'a str,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ExecutionError>> + Send + 'a>>;
}

impl<T: TaskExecutor> TaskExecutorDyn for T {
    fn execute_boxed<'a>(
        &'a self,
        command: &'a str,
        executor: &'a str,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ExecutionError>> + Send + 'a>> {
        Box::pin(self.execute(command, executor, timeout))
    }
}

/// Type-erased executor so the engine can be built without a generic
/// parameter.
pub struct BoxTaskExecutor {
    inner: Box<dyn TaskExecutorDyn + Send + Sync>,
}

impl BoxTaskExecutor {
    pub fn new<T: TaskExecutor + 'static>(executor: T) -> Self {
        Self {
            inner: Box::new(executor),
        }
    }

    pub async fn execute(
        &self,
        command: &str,
        executor: &str,
        timeout: Duration,
    ) -> Result<Value, ExecutionError> {
        self.inner.execute_boxed(command, executor, timeout).await
    }
}

impl std::fmt::Debug for BoxTaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxTaskExecutor").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Upper;

    impl TaskExecutor for Upper {
        async fn execute(
            &self,
            command: &str,
            executor: &str,
            _timeout: Duration,
        ) -> Result<Value, ExecutionError> {
            match executor {
                "upper" => Ok(json!(command.to_uppercase())),
                other => Err(ExecutionError::UnknownExecutor(other.to_string())),
            }
        }
    }

    #[tokio::test]
    async fn boxed_executor_delegates() {
        let boxed = BoxTaskExecutor::new(Upper);
        let out = boxed.execute("hi", "upper", Duration::from_secs(1)).await;
        assert_eq!(out, Ok(json!("HI")));

        let err = boxed
            .execute("hi", "shell", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "unknown executor: shell");
    }
}
