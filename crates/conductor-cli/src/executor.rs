//! Dry-run execution: steps are routed through an [`AgentOrchestrator`]
//! whose agents only echo the command back.
//!
//! A command starting with `fail:` fails with the rest of the text as its
//! message, which is handy for exercising retry and skip behaviour from a
//! workflow file.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use conductor_core::orchestrator::{AgentHandle, AgentOrchestrator};
use conductor_core::workflow::{ExecutionError, TaskExecutor};
use conductor_types::agent::TaskCategory;

/// Agents registered for dry runs, one per routing category.
pub const ECHO_AGENTS: [TaskCategory; 4] = [
    TaskCategory::Email,
    TaskCategory::Web,
    TaskCategory::System,
    TaskCategory::General,
];

/// Returns the task text, or fails on a `fail:` prefix.
#[derive(Debug, Clone)]
pub struct EchoAgent {
    name: String,
}

impl EchoAgent {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl AgentHandle for EchoAgent {
    async fn run(&self, task: &str, _context: &Value) -> Result<Value, ExecutionError> {
        if let Some(reason) = task.strip_prefix("fail:") {
            return Err(ExecutionError::Failed(reason.trim().to_string()));
        }
        Ok(json!({ "agent": self.name, "output": task }))
    }
}

/// Register one [`EchoAgent`] per routing category.
pub fn register_echo_agents(orchestrator: &AgentOrchestrator) -> anyhow::Result<()> {
    for category in ECHO_AGENTS {
        let name = category.as_str();
        orchestrator.register_agent(name, EchoAgent::new(name), vec![name.to_string()])?;
    }
    Ok(())
}

/// [`TaskExecutor`] that hands each step to the orchestrator. `auto` lets
/// the orchestrator route by command text; any other name picks that agent.
pub struct AgentExecutor {
    orchestrator: Arc<AgentOrchestrator>,
}

impl AgentExecutor {
    pub fn new(orchestrator: Arc<AgentOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

impl TaskExecutor for AgentExecutor {
    async fn execute(
        &self,
        command: &str,
        executor: &str,
        timeout: Duration,
    ) -> Result<Value, ExecutionError> {
        let agent = (executor != "auto").then_some(executor);
        if let Some(name) = agent {
            if self.orchestrator.agent_stats(name).is_none() {
                return Err(ExecutionError::UnknownExecutor(name.to_string()));
            }
        }

        let context = json!({ "timeout_secs": timeout.as_secs() });
        let outcome = self.orchestrator.execute_task(command, &context, agent).await;
        match (outcome.success, outcome.result) {
            (true, Some(result)) => Ok(result),
            (true, None) => Ok(Value::Null),
            (false, _) => Err(ExecutionError::Failed(
                outcome.error.unwrap_or_else(|| "agent failed".to_string()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::recovery::ErrorRecovery;
    use conductor_types::config::{OrchestratorConfig, RecoveryConfig};

    fn executor() -> AgentExecutor {
        let orchestrator = AgentOrchestrator::new(
            Arc::new(ErrorRecovery::new(&RecoveryConfig::default())),
            OrchestratorConfig::default(),
        );
        register_echo_agents(&orchestrator).unwrap();
        AgentExecutor::new(Arc::new(orchestrator))
    }

    #[tokio::test]
    async fn auto_routes_by_command_text() {
        let exec = executor();
        let out = exec
            .execute("scrape the pricing page", "auto", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out["agent"], "web");
        assert_eq!(out["output"], "scrape the pricing page");

        let out = exec.execute("tidy up", "auto", Duration::from_secs(5)).await.unwrap();
        assert_eq!(out["agent"], "general");
    }

    #[tokio::test]
    async fn named_agent_and_failures() {
        let exec = executor();
        let out = exec.execute("anything", "email", Duration::from_secs(5)).await.unwrap();
        assert_eq!(out["agent"], "email");

        let err = exec
            .execute("fail: disk full", "system", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err, ExecutionError::Failed("disk full".into()));

        let err = exec.execute("x", "fax", Duration::from_secs(5)).await.unwrap_err();
        assert_eq!(err, ExecutionError::UnknownExecutor("fax".into()));
    }
}
