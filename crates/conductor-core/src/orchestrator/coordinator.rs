//! Agent registry, routing, messaging and multi-agent coordination.
//!
//! Every agent call goes through [`ErrorRecovery`] under the context
//! `agent:{name}`, so a misbehaving agent trips its own circuit breaker
//! without affecting the others. Task failures are reported in the
//! returned [`TaskOutcome`], never raised.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::{Map, Value, json};
use tokio::time::Instant;

use conductor_types::agent::{
    AgentInfo, AgentMessage, AgentRun, AgentStats, CoordinationResult, CoordinationStrategy,
    TaskOutcome,
};
use conductor_types::config::OrchestratorConfig;

use super::agent::{AgentHandle, BoxAgent};
use super::mailbox::Mailbox;
use super::routing::classify_task;
use crate::recovery::{ErrorRecovery, RetryPolicy};
use crate::workflow::ExecutionError;

/// Smoothing factor for the response-time moving average.
const EMA_ALPHA: f64 = 0.2;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum OrchestratorError {
    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("no agents registered")]
    NoAgentsRegistered,

    #[error("mailbox full for agent '{0}'")]
    MailboxFull(String),

    #[error("mailbox closed for agent '{0}'")]
    MailboxClosed(String),

    #[error("agent already registered: {0}")]
    DuplicateAgent(String),
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

struct RegisteredAgent {
    handle: Arc<BoxAgent>,
    capabilities: Vec<String>,
    mailbox: Arc<Mailbox>,
    stats: AgentStats,
    seq: u64,
}

impl RegisteredAgent {
    fn info(&self, name: &str) -> AgentInfo {
        AgentInfo {
            name: name.to_string(),
            capabilities: self.capabilities.clone(),
            stats: self.stats.clone(),
            pending_messages: self.mailbox.len(),
        }
    }
}

/// Registry overview returned by [`AgentOrchestrator::system_status`].
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub total_agents: usize,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub messages_in_history: usize,
    pub agents: Vec<AgentInfo>,
}

pub struct AgentOrchestrator {
    agents: DashMap<String, RegisteredAgent>,
    next_seq: AtomicU64,
    recovery: Arc<ErrorRecovery>,
    policy: RetryPolicy,
    config: OrchestratorConfig,
    history: Mutex<VecDeque<AgentMessage>>,
}

impl AgentOrchestrator {
    pub fn new(recovery: Arc<ErrorRecovery>, config: OrchestratorConfig) -> Self {
        Self {
            agents: DashMap::new(),
            next_seq: AtomicU64::new(0),
            recovery,
            policy: RetryPolicy::new(config.max_attempts),
            config,
            history: Mutex::new(VecDeque::new()),
        }
    }

    fn history(&self) -> MutexGuard<'_, VecDeque<AgentMessage>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    pub fn register_agent<A: AgentHandle + 'static>(
        &self,
        name: &str,
        agent: A,
        capabilities: Vec<String>,
    ) -> Result<(), OrchestratorError> {
        match self.agents.entry(name.to_string()) {
            Entry::Occupied(_) => Err(OrchestratorError::DuplicateAgent(name.to_string())),
            Entry::Vacant(entry) => {
                entry.insert(RegisteredAgent {
                    handle: Arc::new(BoxAgent::new(agent)),
                    capabilities,
                    mailbox: Arc::new(Mailbox::new(name, self.config.mailbox_capacity)),
                    stats: AgentStats::default(),
                    seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                });
                tracing::info!(agent = name, "agent registered");
                Ok(())
            }
        }
    }

    pub fn unregister_agent(&self, name: &str) -> Result<(), OrchestratorError> {
        self.agents
            .remove(name)
            .map(|_| tracing::info!(agent = name, "agent unregistered"))
            .ok_or_else(|| OrchestratorError::AgentNotFound(name.to_string()))
    }

    /// Registered agents in registration order.
    pub fn list_agents(&self) -> Vec<AgentInfo> {
        let mut agents: Vec<(u64, AgentInfo)> = self
            .agents
            .iter()
            .map(|entry| (entry.seq, entry.info(entry.key())))
            .collect();
        agents.sort_by_key(|(seq, _)| *seq);
        agents.into_iter().map(|(_, info)| info).collect()
    }

    pub fn agent_stats(&self, name: &str) -> Option<AgentStats> {
        self.agents.get(name).map(|entry| entry.stats.clone())
    }

    // -----------------------------------------------------------------------
    // Routing
    // -----------------------------------------------------------------------

    /// Pick an agent for `task`:
    /// 1. `context.preferred_agent`, if registered;
    /// 2. an agent named after, or advertising, the task's category;
    /// 3. the least-loaded agent, ties going to the earliest registered.
    ///
    /// `None` only when no agent is registered.
    pub fn select_best_agent(&self, task: &str, context: &Value) -> Option<String> {
        if let Some(preferred) = context.get("preferred_agent").and_then(Value::as_str) {
            if self.agents.contains_key(preferred) {
                return Some(preferred.to_string());
            }
            tracing::debug!(preferred, "preferred agent not registered, routing by task");
        }

        let mut candidates: Vec<(u64, String, bool, u64)> = {
            let category = classify_task(task);
            self.agents
                .iter()
                .map(|entry| {
                    let fits = entry.key() == category.as_str()
                        || entry.capabilities.iter().any(|c| c == category.as_str());
                    (entry.seq, entry.key().clone(), fits, entry.stats.load())
                })
                .collect()
        };
        candidates.sort_by_key(|(seq, ..)| *seq);

        if let Some((_, name, ..)) = candidates.iter().find(|(_, _, fits, _)| *fits) {
            return Some(name.clone());
        }
        candidates
            .into_iter()
            .min_by_key(|(seq, _, _, load)| (*load, *seq))
            .map(|(_, name, ..)| name)
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Run `task` on `agent` (or on the selected agent) and report the
    /// outcome.
    pub async fn execute_task(
        &self,
        task: &str,
        context: &Value,
        agent: Option<&str>,
    ) -> TaskOutcome {
        let name = match agent.map(str::to_string).or_else(|| self.select_best_agent(task, context)) {
            Some(name) => name,
            None => return failed_outcome(None, OrchestratorError::NoAgentsRegistered.to_string(), 0.0),
        };
        let Some(handle) = self.agents.get(&name).map(|entry| Arc::clone(&entry.handle)) else {
            return failed_outcome(Some(name.clone()), OrchestratorError::AgentNotFound(name).to_string(), 0.0);
        };

        let start = Instant::now();
        let agent_ref = handle.as_ref();
        let limit = Duration::from_secs(self.config.default_timeout_secs);
        let result = self
            .recovery
            .execute_with_retry(
                move || async move {
                    tokio::time::timeout(limit, agent_ref.run(task, context))
                        .await
                        .unwrap_or(Err(ExecutionError::Timeout(limit)))
                },
                &self.policy,
                &format!("agent:{name}"),
            )
            .await;
        let elapsed = start.elapsed().as_secs_f64();

        self.record_outcome(&name, result.is_ok(), elapsed);
        match result {
            Ok(value) => {
                tracing::debug!(agent = %name, elapsed_secs = elapsed, "agent task completed");
                TaskOutcome {
                    success: true,
                    agent: Some(name),
                    result: Some(value),
                    error: None,
                    response_time_secs: elapsed,
                }
            }
            Err(err) => {
                tracing::warn!(agent = %name, error = %err, "agent task failed");
                failed_outcome(Some(name), err.last_message(), elapsed)
            }
        }
    }

    fn record_outcome(&self, name: &str, success: bool, elapsed_secs: f64) {
        let Some(mut entry) = self.agents.get_mut(name) else {
            return;
        };
        let stats = &mut entry.stats;
        if success {
            stats.tasks_completed += 1;
            stats.avg_response_time_secs = if stats.tasks_completed == 1 {
                elapsed_secs
            } else {
                EMA_ALPHA * elapsed_secs + (1.0 - EMA_ALPHA) * stats.avg_response_time_secs
            };
        } else {
            stats.tasks_failed += 1;
        }
        stats.last_active = Some(Utc::now());
    }

    // -----------------------------------------------------------------------
    // Messaging
    // -----------------------------------------------------------------------

    /// Deliver one message. Returns the number delivered (always 1 on
    /// success).
    pub fn send_message(
        &self,
        from: &str,
        to: &str,
        message_type: &str,
        payload: Value,
    ) -> Result<usize, OrchestratorError> {
        let mailbox = self
            .agents
            .get(to)
            .map(|entry| Arc::clone(&entry.mailbox))
            .ok_or_else(|| OrchestratorError::AgentNotFound(to.to_string()))?;

        let message = AgentMessage::new(from, to, message_type, payload);
        mailbox.try_send(message.clone())?;
        self.record_delivery(message);
        Ok(1)
    }

    /// Send to every registered agent except `from`. Full mailboxes are
    /// skipped. Returns how many agents received the message.
    pub fn broadcast_message(&self, from: &str, message_type: &str, payload: Value) -> usize {
        let recipients: Vec<(String, Arc<Mailbox>)> = self
            .agents
            .iter()
            .filter(|entry| entry.key() != from)
            .map(|entry| (entry.key().clone(), Arc::clone(&entry.mailbox)))
            .collect();

        let mut delivered = 0;
        for (to, mailbox) in recipients {
            let message = AgentMessage::new(from, &to, message_type, payload.clone());
            match mailbox.try_send(message.clone()) {
                Ok(()) => {
                    self.record_delivery(message);
                    delivered += 1;
                }
                Err(err) => tracing::warn!(from, to = %to, error = %err, "broadcast delivery skipped"),
            }
        }
        delivered
    }

    fn record_delivery(&self, message: AgentMessage) {
        if let Some(mut sender) = self.agents.get_mut(&message.from) {
            sender.stats.messages_sent += 1;
        }
        if let Some(mut recipient) = self.agents.get_mut(&message.to) {
            recipient.stats.messages_received += 1;
        }

        let limit = self.config.message_history_limit.max(1);
        let mut history = self.history();
        history.push_back(message);
        while history.len() > limit {
            history.pop_front();
        }
    }

    /// Next message for `name`, waiting up to `timeout`.
    pub async fn receive_message(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<Option<AgentMessage>, OrchestratorError> {
        let mailbox = self
            .agents
            .get(name)
            .map(|entry| Arc::clone(&entry.mailbox))
            .ok_or_else(|| OrchestratorError::AgentNotFound(name.to_string()))?;
        Ok(mailbox.receive(timeout).await)
    }

    /// The most recent `limit` messages, oldest first.
    pub fn message_history(&self, limit: usize) -> Vec<AgentMessage> {
        let history = self.history();
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    // -----------------------------------------------------------------------
    // Coordination
    // -----------------------------------------------------------------------

    pub async fn coordinate_agents(
        &self,
        task: &str,
        agents: &[String],
        strategy: CoordinationStrategy,
        context: &Value,
    ) -> CoordinationResult {
        tracing::info!(%strategy, agents = agents.len(), "coordinating agents");

        let results = match strategy {
            CoordinationStrategy::Sequential => self.run_sequential(task, agents, context).await,
            CoordinationStrategy::Parallel => {
                let outcomes = join_all(
                    agents
                        .iter()
                        .map(|agent| self.execute_task(task, context, Some(agent))),
                )
                .await;
                agents
                    .iter()
                    .cloned()
                    .zip(outcomes)
                    .map(|(agent, outcome)| AgentRun { agent, outcome })
                    .collect()
            }
            CoordinationStrategy::Pipeline => self.run_pipeline(task, agents, context).await,
        };

        CoordinationResult {
            success: results.iter().all(|run| run.outcome.success),
            strategy,
            agents: agents.to_vec(),
            results,
        }
    }

    async fn run_sequential(&self, task: &str, agents: &[String], context: &Value) -> Vec<AgentRun> {
        let mut ctx = as_object(context);
        let mut runs = Vec::with_capacity(agents.len());
        for agent in agents {
            let outcome = self
                .execute_task(task, &Value::Object(ctx.clone()), Some(agent))
                .await;
            // The next agent sees only the latest outcome.
            match (&outcome.result, &outcome.error) {
                (Some(result), _) if outcome.success => {
                    ctx.remove("previous_error");
                    ctx.insert("previous_result".to_string(), result.clone());
                }
                (_, error) => {
                    ctx.remove("previous_result");
                    ctx.insert(
                        "previous_error".to_string(),
                        error.clone().map(Value::String).unwrap_or(Value::Null),
                    );
                }
            }
            runs.push(AgentRun {
                agent: agent.clone(),
                outcome,
            });
        }
        runs
    }

    async fn run_pipeline(&self, task: &str, agents: &[String], context: &Value) -> Vec<AgentRun> {
        let mut ctx = as_object(context);
        ctx.insert("pipeline_mode".to_string(), Value::Bool(true));
        let ctx = Value::Object(ctx);

        let mut input = task.to_string();
        let mut runs = Vec::with_capacity(agents.len());
        for agent in agents {
            let outcome = self.execute_task(&input, &ctx, Some(agent)).await;
            input = match &outcome.result {
                Some(Value::String(s)) if outcome.success => s.clone(),
                Some(other) if outcome.success => other.to_string(),
                _ => "{}".to_string(),
            };
            runs.push(AgentRun {
                agent: agent.clone(),
                outcome,
            });
        }
        runs
    }

    pub fn system_status(&self) -> OrchestratorStatus {
        let agents = self.list_agents();
        OrchestratorStatus {
            total_agents: agents.len(),
            tasks_completed: agents.iter().map(|a| a.stats.tasks_completed).sum(),
            tasks_failed: agents.iter().map(|a| a.stats.tasks_failed).sum(),
            messages_in_history: self.history().len(),
            agents,
        }
    }
}

fn failed_outcome(agent: Option<String>, error: String, elapsed_secs: f64) -> TaskOutcome {
    TaskOutcome {
        success: false,
        agent,
        result: None,
        error: Some(error),
        response_time_secs: elapsed_secs,
    }
}

fn as_object(value: &Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("input".to_string(), other.clone());
            map
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use conductor_types::config::RecoveryConfig;

    /// Echoes the task and context back; fails on tasks containing "fail"
    /// or always when `broken`; sleeps `delay` first.
    #[derive(Clone, Default)]
    struct EchoAgent {
        delay: Duration,
        broken: bool,
        seen: Arc<StdMutex<Vec<(String, Value)>>>,
    }

    impl AgentHandle for EchoAgent {
        async fn run(&self, task: &str, context: &Value) -> Result<Value, ExecutionError> {
            self.seen.lock().unwrap().push((task.to_string(), context.clone()));
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.broken || task.contains("fail") {
                return Err(ExecutionError::Failed(format!("cannot {task}")));
            }
            Ok(json!(format!("{task}+")))
        }
    }

    fn orchestrator() -> AgentOrchestrator {
        AgentOrchestrator::new(
            Arc::new(ErrorRecovery::new(&RecoveryConfig::default())),
            OrchestratorConfig {
                mailbox_capacity: 2,
                message_history_limit: 3,
                ..OrchestratorConfig::default()
            },
        )
    }

    fn caps(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn registration_is_unique_and_ordered() {
        let orch = orchestrator();
        orch.register_agent("zeta", EchoAgent::default(), vec![]).unwrap();
        orch.register_agent("alpha", EchoAgent::default(), vec![]).unwrap();
        assert_eq!(
            orch.register_agent("zeta", EchoAgent::default(), vec![]),
            Err(OrchestratorError::DuplicateAgent("zeta".into()))
        );

        let names: Vec<_> = orch.list_agents().into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);

        orch.unregister_agent("zeta").unwrap();
        assert!(orch.unregister_agent("zeta").is_err());
    }

    #[tokio::test]
    async fn selection_order() {
        let orch = orchestrator();
        assert_eq!(orch.select_best_agent("anything", &json!({})), None);

        orch.register_agent("general", EchoAgent::default(), vec![]).unwrap();
        orch.register_agent("browser", EchoAgent::default(), caps(&["web"])).unwrap();
        orch.register_agent("email", EchoAgent::default(), vec![]).unwrap();

        // 1. explicit preference wins, unknown preference falls through
        assert_eq!(
            orch.select_best_agent("search the web", &json!({"preferred_agent": "email"})),
            Some("email".into())
        );
        // 2. category by capability or by name
        assert_eq!(
            orch.select_best_agent("search the web", &json!({"preferred_agent": "ghost"})),
            Some("browser".into())
        );
        assert_eq!(orch.select_best_agent("mail Bob", &json!({})), Some("email".into()));
        // 3. no category match: least loaded, ties by registration order
        assert_eq!(orch.select_best_agent("take a screenshot", &json!({})), Some("general".into()));
        orch.execute_task("warm up", &json!({}), Some("general")).await;
        assert_eq!(orch.select_best_agent("take a screenshot", &json!({})), Some("browser".into()));
    }

    #[tokio::test]
    async fn execute_task_reports_failures_without_raising() {
        let orch = orchestrator();
        let outcome = orch.execute_task("anything", &json!({}), None).await;
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("no agents registered"));

        orch.register_agent("worker", EchoAgent::default(), vec![]).unwrap();
        let ok = orch.execute_task("build", &json!({}), None).await;
        assert!(ok.success);
        assert_eq!(ok.result, Some(json!("build+")));

        let bad = orch.execute_task("fail now", &json!({}), Some("worker")).await;
        assert!(!bad.success);
        assert_eq!(bad.error.as_deref(), Some("cannot fail now"));

        let missing = orch.execute_task("x", &json!({}), Some("nobody")).await;
        assert_eq!(missing.error.as_deref(), Some("agent not found: nobody"));

        let stats = orch.agent_stats("worker").unwrap();
        assert_eq!(stats.tasks_completed, 1);
        assert_eq!(stats.tasks_failed, 1);
        assert!(stats.last_active.is_some());
        assert_eq!(stats.error_rate(), 0.5);
    }

    #[tokio::test(start_paused = true)]
    async fn response_time_is_an_ema_seeded_by_first_sample() {
        let orch = orchestrator();
        let slow = EchoAgent {
            delay: Duration::from_secs(10),
            ..EchoAgent::default()
        };
        orch.register_agent("slow", slow, vec![]).unwrap();

        orch.execute_task("a", &json!({}), None).await;
        let first = orch.agent_stats("slow").unwrap().avg_response_time_secs;
        assert!((first - 10.0).abs() < 1e-6);

        orch.execute_task("b", &json!({}), None).await;
        let second = orch.agent_stats("slow").unwrap().avg_response_time_secs;
        assert!((second - 10.0).abs() < 1e-6, "same sample keeps the average");

        // A failure does not move the average.
        orch.execute_task("fail", &json!({}), None).await;
        let third = orch.agent_stats("slow").unwrap().avg_response_time_secs;
        assert!((third - 10.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn agent_calls_are_bounded_by_the_configured_timeout() {
        let orch = AgentOrchestrator::new(
            Arc::new(ErrorRecovery::new(&RecoveryConfig::default())),
            OrchestratorConfig {
                default_timeout_secs: 2,
                ..OrchestratorConfig::default()
            },
        );
        let stuck = EchoAgent {
            delay: Duration::from_secs(60),
            ..EchoAgent::default()
        };
        orch.register_agent("stuck", stuck, vec![]).unwrap();

        let outcome = orch.execute_task("wait", &json!({}), None).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("timed out"));
        assert!((outcome.response_time_secs - 2.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn messaging_fifo_broadcast_and_history() {
        let orch = orchestrator();
        for name in ["a", "b", "c"] {
            orch.register_agent(name, EchoAgent::default(), vec![]).unwrap();
        }

        assert_eq!(orch.send_message("a", "b", "ping", json!(1)).unwrap(), 1);
        assert_eq!(orch.send_message("a", "b", "ping", json!(2)).unwrap(), 1);
        assert!(matches!(
            orch.send_message("a", "b", "ping", json!(3)),
            Err(OrchestratorError::MailboxFull(_))
        ));
        assert!(matches!(
            orch.send_message("a", "ghost", "ping", json!(0)),
            Err(OrchestratorError::AgentNotFound(_))
        ));

        // b is full, so only c receives the broadcast.
        assert_eq!(orch.broadcast_message("a", "hello", json!({})), 1);

        let first = orch.receive_message("b", Duration::from_millis(10)).await.unwrap().unwrap();
        let second = orch.receive_message("b", Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!((first.payload, second.payload), (json!(1), json!(2)));
        assert!(orch.receive_message("a", Duration::from_millis(10)).await.unwrap().is_none());

        let a = orch.agent_stats("a").unwrap();
        assert_eq!(a.messages_sent, 3);
        assert_eq!(orch.agent_stats("b").unwrap().messages_received, 2);
        assert_eq!(orch.agent_stats("c").unwrap().messages_received, 1);

        // history is bounded to 3 and returns oldest first
        assert_eq!(orch.message_history(10).len(), 3);
        let last = orch.message_history(1);
        assert_eq!(last[0].to, "c");
        assert_eq!(orch.system_status().messages_in_history, 3);
    }

    #[tokio::test]
    async fn sequential_threads_previous_result() {
        let orch = orchestrator();
        let first = EchoAgent::default();
        let second = EchoAgent::default();
        let seen = Arc::clone(&second.seen);
        orch.register_agent("one", first, vec![]).unwrap();
        orch.register_agent("two", second, vec![]).unwrap();

        let result = orch
            .coordinate_agents(
                "draft",
                &caps(&["one", "two"]),
                CoordinationStrategy::Sequential,
                &json!({"topic": "q3"}),
            )
            .await;

        assert!(result.success);
        assert_eq!(result.results.len(), 2);
        let (_, ctx) = seen.lock().unwrap()[0].clone();
        assert_eq!(ctx["previous_result"], json!("draft+"));
        assert_eq!(ctx["topic"], json!("q3"));
    }

    #[tokio::test]
    async fn sequential_failure_replaces_previous_result() {
        let orch = orchestrator();
        let last = EchoAgent::default();
        let seen = Arc::clone(&last.seen);
        orch.register_agent("one", EchoAgent::default(), vec![]).unwrap();
        let broken = EchoAgent {
            broken: true,
            ..EchoAgent::default()
        };
        orch.register_agent("two", broken, vec![]).unwrap();
        orch.register_agent("three", last, vec![]).unwrap();

        let result = orch
            .coordinate_agents(
                "draft",
                &caps(&["one", "two", "three"]),
                CoordinationStrategy::Sequential,
                &json!({}),
            )
            .await;

        assert!(!result.success);
        let (_, ctx) = seen.lock().unwrap()[0].clone();
        assert!(ctx.get("previous_result").is_none());
        assert_eq!(ctx["previous_error"], json!("cannot draft"));
    }

    #[tokio::test(start_paused = true)]
    async fn custom_recovery_policy_applies_to_agent_calls() {
        let recovery = Arc::new(ErrorRecovery::new(&RecoveryConfig::default()));
        recovery.set_custom_policy("agent:worker", RetryPolicy::new(3));
        let orch = AgentOrchestrator::new(Arc::clone(&recovery), OrchestratorConfig::default());
        let worker = EchoAgent::default();
        let seen = Arc::clone(&worker.seen);
        orch.register_agent("worker", worker, vec![]).unwrap();

        let outcome = orch
            .execute_task("fail over network", &json!({}), Some("worker"))
            .await;

        assert!(!outcome.success);
        assert_eq!(seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn pipeline_feeds_output_forward() {
        let orch = orchestrator();
        let last = EchoAgent::default();
        let seen = Arc::clone(&last.seen);
        orch.register_agent("one", EchoAgent::default(), vec![]).unwrap();
        orch.register_agent("two", EchoAgent::default(), vec![]).unwrap();
        orch.register_agent("three", last, vec![]).unwrap();

        let result = orch
            .coordinate_agents(
                "x",
                &caps(&["one", "two", "three"]),
                CoordinationStrategy::Pipeline,
                &json!({}),
            )
            .await;

        assert!(result.success);
        assert_eq!(result.results[2].outcome.result, Some(json!("x+++")));
        let (input, ctx) = seen.lock().unwrap()[0].clone();
        assert_eq!(input, "x++");
        assert_eq!(ctx["pipeline_mode"], json!(true));
    }

    #[tokio::test]
    async fn pipeline_failure_passes_empty_object() {
        let orch = orchestrator();
        let last = EchoAgent::default();
        let seen = Arc::clone(&last.seen);
        orch.register_agent("one", EchoAgent::default(), vec![]).unwrap();
        orch.register_agent("two", last, vec![]).unwrap();

        let result = orch
            .coordinate_agents("fail", &caps(&["one", "two"]), CoordinationStrategy::Pipeline, &json!({}))
            .await;

        assert!(!result.success);
        assert_eq!(seen.lock().unwrap()[0].0, "{}");
        assert!(result.results[1].outcome.success);
    }

    #[tokio::test(start_paused = true)]
    async fn parallel_runs_concurrently_and_ands_success() {
        let orch = orchestrator();
        let slow = EchoAgent {
            delay: Duration::from_secs(5),
            ..EchoAgent::default()
        };
        orch.register_agent("a", slow.clone(), vec![]).unwrap();
        orch.register_agent("b", slow, vec![]).unwrap();

        let start = Instant::now();
        let ok = orch
            .coordinate_agents("job", &caps(&["a", "b"]), CoordinationStrategy::Parallel, &json!({}))
            .await;
        assert_eq!(start.elapsed(), Duration::from_secs(5));
        assert!(ok.success);
        assert_eq!(ok.agents, vec!["a", "b"]);

        let mixed = orch
            .coordinate_agents("job", &caps(&["a", "missing"]), CoordinationStrategy::Parallel, &json!({}))
            .await;
        assert!(!mixed.success);

        let empty = orch
            .coordinate_agents("job", &[], CoordinationStrategy::Parallel, &json!({}))
            .await;
        assert!(empty.success);
        assert!(empty.results.is_empty());
    }
}
