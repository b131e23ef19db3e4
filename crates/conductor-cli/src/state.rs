//! Application state wiring the core components together.
//!
//! One event bus is shared by every component. The workflow engine runs
//! steps through the agent orchestrator; the scheduler launches workflows
//! from the catalog; rules act back on the scheduler and engine.

use std::sync::Arc;

use conductor_core::event::EventBus;
use conductor_core::metrics::MetricsRegistry;
use conductor_core::orchestrator::AgentOrchestrator;
use conductor_core::recovery::ErrorRecovery;
use conductor_core::rules::{ActionExecutor, AutomationActions, RulesEngine};
use conductor_core::scheduler::{TaskScheduler, WorkflowCatalog};
use conductor_core::workflow::{BoxTaskExecutor, WorkflowEngine};
use conductor_types::config::GlobalConfig;

use crate::executor::{AgentExecutor, register_echo_agents};

pub struct AppState {
    pub events: EventBus,
    pub recovery: Arc<ErrorRecovery>,
    pub orchestrator: Arc<AgentOrchestrator>,
    pub engine: Arc<WorkflowEngine>,
    pub catalog: WorkflowCatalog,
    pub scheduler: Arc<TaskScheduler>,
    pub metrics: Arc<MetricsRegistry>,
}

impl AppState {
    pub fn init(config: &GlobalConfig) -> anyhow::Result<Self> {
        let events = EventBus::new(config.events.capacity);
        let recovery =
            Arc::new(ErrorRecovery::new(&config.recovery).with_events(events.clone()));

        let orchestrator = Arc::new(AgentOrchestrator::new(
            Arc::clone(&recovery),
            config.orchestrator.clone(),
        ));
        register_echo_agents(&orchestrator)?;

        let engine = Arc::new(WorkflowEngine::new(
            BoxTaskExecutor::new(AgentExecutor::new(Arc::clone(&orchestrator))),
            Arc::clone(&recovery),
            events.clone(),
            config.engine.clone(),
        ));
        let catalog = WorkflowCatalog::new(Arc::clone(&engine));
        let scheduler = Arc::new(TaskScheduler::new(
            catalog.clone(),
            events.clone(),
            config.scheduler.clone(),
        ));
        let metrics = Arc::new(MetricsRegistry::new(&config.metrics).with_events(events.clone()));

        Ok(Self {
            events,
            recovery,
            orchestrator,
            engine,
            catalog,
            scheduler,
            metrics,
        })
    }

    /// Record runtime gauges for threshold checks and `source: metrics`
    /// rule conditions.
    pub fn sample_metrics(&self) {
        let scheduler = self.scheduler.stats();
        let agents = self.orchestrator.system_status();
        let handled = agents.tasks_completed + agents.tasks_failed;

        let gauges = [
            ("workflows_active", self.engine.active_count() as f64),
            ("scheduler_queued", scheduler.queued as f64),
            ("scheduler_running", scheduler.running as f64),
            (
                "scheduler_utilization_percent",
                percent(scheduler.running as f64, scheduler.max_concurrent as f64),
            ),
            ("agents_total", agents.total_agents as f64),
            (
                "agent_error_rate_percent",
                percent(agents.tasks_failed as f64, handled as f64),
            ),
            ("open_circuits", self.recovery.open_circuits() as f64),
        ];
        for (name, value) in gauges {
            self.metrics.record_gauge(name, value);
        }
    }

    /// Rules engine reading this state's metrics and acting through
    /// `actions`.
    pub fn rules_engine(&self, actions: Arc<dyn ActionExecutor>) -> RulesEngine {
        RulesEngine::new()
            .with_actions(actions)
            .with_metrics(self.metrics.clone())
    }

    /// Actions that drive this state's scheduler and engine.
    pub fn automation_actions(&self) -> AutomationActions {
        AutomationActions::new(self.events.clone())
            .with_engine(Arc::clone(&self.engine))
            .with_scheduler(Arc::clone(&self.scheduler))
    }
}

fn percent(part: f64, whole: f64) -> f64 {
    if whole > 0.0 { part / whole * 100.0 } else { 0.0 }
}
