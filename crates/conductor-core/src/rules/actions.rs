//! Executing the actions of a fired rule.
//!
//! [`AutomationActions`] closes the loop from rules back into the rest of
//! the core: alerts go to the event bus, workflow control goes to the
//! engine, and task control goes to the scheduler.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};

use conductor_types::event::AutomationEvent;
use conductor_types::rule::RuleAction;

use super::condition::lookup_path;
use crate::event::EventBus;
use crate::scheduler::{SchedulerError, TaskScheduler};
use crate::workflow::{WorkflowEngine, WorkflowError};

/// Priority for `run_workflow` actions that do not name one.
const DEFAULT_RUN_PRIORITY: i32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("no {0} configured for action")]
    Unavailable(&'static str),

    #[error("{0} action has no workflow id and the context has no workflow.id")]
    MissingTarget(&'static str),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// Runs one action of a satisfied rule.
///
/// `context` is the merged evaluation context plus a `rule` object with the
/// firing rule's `id` and `name`.
pub trait ActionExecutor: Send + Sync {
    fn execute(&self, action: &RuleAction, context: &Map<String, Value>) -> Result<(), ActionError>;
}

// ---------------------------------------------------------------------------
// AutomationActions
// ---------------------------------------------------------------------------

pub struct AutomationActions {
    events: EventBus,
    engine: Option<Arc<WorkflowEngine>>,
    scheduler: Option<Arc<TaskScheduler>>,
}

impl AutomationActions {
    pub fn new(events: EventBus) -> Self {
        Self {
            events,
            engine: None,
            scheduler: None,
        }
    }

    pub fn with_engine(mut self, engine: Arc<WorkflowEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_scheduler(mut self, scheduler: Arc<TaskScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    fn engine(&self) -> Result<&WorkflowEngine, ActionError> {
        self.engine.as_deref().ok_or(ActionError::Unavailable("workflow engine"))
    }

    fn scheduler(&self) -> Result<&TaskScheduler, ActionError> {
        self.scheduler.as_deref().ok_or(ActionError::Unavailable("scheduler"))
    }
}

impl ActionExecutor for AutomationActions {
    fn execute(&self, action: &RuleAction, context: &Map<String, Value>) -> Result<(), ActionError> {
        match action {
            RuleAction::Alert { message, severity } => {
                let rule_id = rule_id(context);
                tracing::warn!(rule_id = %rule_id, %severity, "{message}");
                self.events.publish(AutomationEvent::RuleAlert {
                    rule_id,
                    message: message.clone(),
                    severity: *severity,
                    timestamp: Utc::now(),
                });
            }
            RuleAction::RunWorkflow { workflow_id, priority } => {
                let task_id = self
                    .scheduler()?
                    .run_now(workflow_id, priority.unwrap_or(DEFAULT_RUN_PRIORITY));
                tracing::info!(%workflow_id, %task_id, "rule queued workflow run");
            }
            RuleAction::PauseWorkflow { workflow_id } => {
                let id = target(workflow_id, context, "pause_workflow")?;
                self.engine()?.pause(&id)?;
            }
            RuleAction::ResumeWorkflow { workflow_id } => {
                let id = target(workflow_id, context, "resume_workflow")?;
                self.engine()?.resume(&id)?;
            }
            RuleAction::CancelWorkflow { workflow_id } => {
                let id = target(workflow_id, context, "cancel_workflow")?;
                self.engine()?.cancel(&id)?;
            }
            RuleAction::EnableTask { task_id } => self.scheduler()?.enable_task(task_id)?,
            RuleAction::DisableTask { task_id } => self.scheduler()?.disable_task(task_id)?,
        }
        Ok(())
    }
}

fn target(
    explicit: &Option<String>,
    context: &Map<String, Value>,
    action: &'static str,
) -> Result<String, ActionError> {
    if let Some(id) = explicit {
        return Ok(id.clone());
    }
    match lookup_path(context, "workflow.id") {
        Value::String(id) => Ok(id),
        _ => Err(ActionError::MissingTarget(action)),
    }
}

fn rule_id(context: &Map<String, Value>) -> String {
    match lookup_path(context, "rule.id") {
        Value::String(id) => id,
        _ => "unknown".to_string(),
    }
}

// ---------------------------------------------------------------------------
// LoggingActions
// ---------------------------------------------------------------------------

/// Logs each action instead of performing it. Used for dry runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingActions;

impl ActionExecutor for LoggingActions {
    fn execute(&self, action: &RuleAction, context: &Map<String, Value>) -> Result<(), ActionError> {
        tracing::info!(rule_id = %rule_id(context), action = action.kind(), ?action, "rule action (dry run)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use conductor_types::config::{EngineConfig, RecoveryConfig, SchedulerConfig};
    use conductor_types::rule::AlertSeverity;
    use conductor_types::schedule::{Schedule, ScheduledTaskConfig};

    use crate::recovery::ErrorRecovery;
    use crate::scheduler::WorkflowCatalog;
    use crate::workflow::{ExecutionError, TaskExecutor};

    struct Noop;

    impl TaskExecutor for Noop {
        async fn execute(
            &self,
            command: &str,
            _executor: &str,
            _timeout: std::time::Duration,
        ) -> Result<Value, ExecutionError> {
            Ok(json!(command))
        }
    }

    fn ctx(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    fn wiring() -> (AutomationActions, Arc<TaskScheduler>, EventBus) {
        let bus = EventBus::new(16);
        let engine = Arc::new(WorkflowEngine::new(
            crate::workflow::BoxTaskExecutor::new(Noop),
            Arc::new(ErrorRecovery::new(&RecoveryConfig::default())),
            bus.clone(),
            EngineConfig::default(),
        ));
        let catalog = WorkflowCatalog::new(Arc::clone(&engine));
        let scheduler = Arc::new(TaskScheduler::new(catalog, bus.clone(), SchedulerConfig::default()));
        let actions = AutomationActions::new(bus.clone())
            .with_engine(engine)
            .with_scheduler(Arc::clone(&scheduler));
        (actions, scheduler, bus)
    }

    #[tokio::test]
    async fn alert_publishes_rule_alert() {
        let (actions, _, bus) = wiring();
        let mut rx = bus.subscribe();
        let action = RuleAction::Alert {
            message: "disk almost full".into(),
            severity: AlertSeverity::Critical,
        };
        actions
            .execute(&action, &ctx(json!({"rule": {"id": "disk", "name": "Disk"}})))
            .unwrap();

        match rx.recv().await.unwrap() {
            AutomationEvent::RuleAlert { rule_id, severity, message, .. } => {
                assert_eq!(rule_id, "disk");
                assert_eq!(severity, AlertSeverity::Critical);
                assert_eq!(message, "disk almost full");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn run_workflow_queues_an_ephemeral_task() {
        let (actions, scheduler, _) = wiring();
        let action = RuleAction::RunWorkflow {
            workflow_id: "backup".into(),
            priority: Some(1),
        };
        actions.execute(&action, &Map::new()).unwrap();

        let stats = scheduler.stats();
        assert_eq!(stats.queued, 1);
        let task = scheduler.list_tasks().into_iter().next().unwrap();
        assert_eq!(task.workflow_id, "backup");
        assert!(task.ephemeral);
    }

    #[tokio::test]
    async fn task_toggles_go_to_the_scheduler() {
        let (actions, scheduler, _) = wiring();
        let id = scheduler
            .add_task(ScheduledTaskConfig {
                id: "nightly".into(),
                workflow_id: "backup".into(),
                schedule: Schedule::Interval { interval_secs: 60 },
                enabled: true,
                max_runs: None,
                priority: 5,
            })
            .unwrap();

        actions
            .execute(&RuleAction::DisableTask { task_id: id.clone() }, &Map::new())
            .unwrap();
        assert!(!scheduler.get_task(&id).unwrap().enabled);

        let err = actions
            .execute(&RuleAction::EnableTask { task_id: "ghost".into() }, &Map::new())
            .unwrap_err();
        assert!(matches!(err, ActionError::Scheduler(SchedulerError::TaskNotFound(_))));
    }

    #[tokio::test]
    async fn workflow_control_needs_a_target() {
        let (actions, _, _) = wiring();

        let err = actions
            .execute(&RuleAction::PauseWorkflow { workflow_id: None }, &Map::new())
            .unwrap_err();
        assert!(matches!(err, ActionError::MissingTarget("pause_workflow")));

        // Target from context; nothing is running under that id.
        let err = actions
            .execute(
                &RuleAction::CancelWorkflow { workflow_id: None },
                &ctx(json!({"workflow": {"id": "wf-9"}})),
            )
            .unwrap_err();
        assert!(matches!(err, ActionError::Workflow(WorkflowError::NotFound(id)) if id == "wf-9"));
    }

    #[test]
    fn missing_collaborators_are_reported() {
        let actions = AutomationActions::new(EventBus::new(4));
        let err = actions
            .execute(&RuleAction::EnableTask { task_id: "t".into() }, &Map::new())
            .unwrap_err();
        assert!(matches!(err, ActionError::Unavailable("scheduler")));
        assert!(LoggingActions.execute(&RuleAction::EnableTask { task_id: "t".into() }, &Map::new()).is_ok());
    }
}
