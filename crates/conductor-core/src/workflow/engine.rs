//! Workflow engine: runs a [`Workflow`] to a terminal state.
//!
//! Sequential mode repeatedly picks the ready set (pending steps whose
//! dependencies are all terminal). Parallel mode groups steps into
//! dependency levels and runs each level concurrently, joining before the
//! next. Every step goes through [`ErrorRecovery`] with a per-step policy.
//!
//! Pause, resume and cancel are checked at step (sequential) or level
//! (parallel) boundaries. An in-flight executor call is never interrupted,
//! but a cancel does cut short the backoff sleep between retries.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::{RwLock, watch};
use tokio_util::sync::CancellationToken;

use conductor_types::config::EngineConfig;
use conductor_types::event::AutomationEvent;
use conductor_types::workflow::{
    SkippedStepPolicy, StepStatus, Workflow, WorkflowStatus, WorkflowStep,
};

use super::dag::{compute_levels, ready_steps};
use super::definition::WorkflowError;
use super::executor::BoxTaskExecutor;
use super::expression::ConditionEvaluator;
use crate::event::EventBus;
use crate::recovery::policy::secs_or;
use crate::recovery::{ErrorRecovery, RecoveryError, RetryPolicy};

const DEPENDENCIES_NOT_MET: &str = "dependencies not met";
const CONDITION_NOT_MET: &str = "condition not met";
const WORKFLOW_CANCELLED: &str = "workflow cancelled";
const CYCLIC_DEPENDENCY: &str = "cyclic dependency";

// ---------------------------------------------------------------------------
// Registry entry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunControl {
    Running,
    Paused,
    Cancelled,
}

/// One workflow in the registry. The run task is the only writer of
/// `snapshot`; status queries read it.
struct ActiveWorkflow {
    snapshot: RwLock<Workflow>,
    control: watch::Sender<RunControl>,
    cancel: CancellationToken,
    /// Set once the cancel actually cut a step short.
    interrupted: AtomicBool,
    done: AtomicBool,
}

impl ActiveWorkflow {
    fn new(workflow: Workflow) -> Self {
        let (control, _) = watch::channel(RunControl::Running);
        Self {
            snapshot: RwLock::new(workflow),
            control,
            cancel: CancellationToken::new(),
            interrupted: AtomicBool::new(false),
            done: AtomicBool::new(false),
        }
    }

    fn is_running(&self) -> bool {
        !self.done.load(Ordering::Acquire)
    }
}

/// What one step attempt sequence produced.
struct StepOutcome {
    id: String,
    status: StepStatus,
    result: Option<Value>,
    error: Option<String>,
    attempts: u32,
    cancelled: bool,
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

pub struct WorkflowEngine {
    executor: Arc<BoxTaskExecutor>,
    recovery: Arc<ErrorRecovery>,
    events: EventBus,
    config: EngineConfig,
    active: DashMap<String, Arc<ActiveWorkflow>>,
}

impl WorkflowEngine {
    pub fn new(
        executor: BoxTaskExecutor,
        recovery: Arc<ErrorRecovery>,
        events: EventBus,
        config: EngineConfig,
    ) -> Self {
        Self {
            executor: Arc::new(executor),
            recovery,
            events,
            config,
            active: DashMap::new(),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Run `workflow` to a terminal state and return the final snapshot.
    ///
    /// A dependency cycle in parallel mode does not surface as an error
    /// here: the returned workflow is `Failed` with every step skipped.
    /// Errors when two steps share an id, or when a workflow with the same
    /// id is still running.
    pub async fn execute(&self, workflow: Workflow) -> Result<Workflow, WorkflowError> {
        let (workflow, _) = self.run(workflow).await?;
        Ok(workflow)
    }

    /// Like [`execute`](Self::execute), but a dependency cycle is returned
    /// as [`WorkflowError::CyclicDependency`]. The failed run stays in the
    /// registry and can still be read with [`status`](Self::status).
    pub async fn try_execute(&self, workflow: Workflow) -> Result<Workflow, WorkflowError> {
        match self.run(workflow).await? {
            (_, Some(err)) => Err(err),
            (workflow, None) => Ok(workflow),
        }
    }

    async fn run(
        &self,
        mut workflow: Workflow,
    ) -> Result<(Workflow, Option<WorkflowError>), WorkflowError> {
        check_step_ids(&workflow)?;
        let handle = self.register(&workflow)?;

        workflow.status = WorkflowStatus::Running;
        workflow.started_at = Some(Utc::now());
        workflow.finished_at = None;
        tracing::info!(
            workflow_id = %workflow.id,
            name = %workflow.name,
            parallel = workflow.parallel,
            steps = workflow.steps.len(),
            "workflow started"
        );
        self.events.publish(AutomationEvent::workflow_update(
            &workflow.id,
            WorkflowStatus::Running,
            "workflow started",
        ));
        sync(&handle, &workflow).await;

        let failure = if workflow.parallel {
            self.run_parallel(&handle, &mut workflow).await
        } else {
            self.run_sequential(&handle, &mut workflow).await;
            None
        };

        self.finish(&handle, &mut workflow, failure.is_some()).await;
        Ok((workflow, failure))
    }

    fn register(&self, workflow: &Workflow) -> Result<Arc<ActiveWorkflow>, WorkflowError> {
        let handle = Arc::new(ActiveWorkflow::new(workflow.clone()));
        match self.active.entry(workflow.id.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_running() {
                    return Err(WorkflowError::AlreadyRunning(workflow.id.clone()));
                }
                entry.insert(Arc::clone(&handle));
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&handle));
            }
        }
        Ok(handle)
    }

    // -----------------------------------------------------------------------
    // Sequential mode
    // -----------------------------------------------------------------------

    async fn run_sequential(&self, handle: &ActiveWorkflow, workflow: &mut Workflow) {
        loop {
            let ready = ready_steps(&workflow.steps);
            if ready.is_empty() {
                if workflow.count(StepStatus::Pending) > 0 {
                    tracing::warn!(
                        workflow_id = %workflow.id,
                        pending = workflow.count(StepStatus::Pending),
                        "no step is ready, skipping the rest"
                    );
                    self.skip_pending(workflow, DEPENDENCIES_NOT_MET);
                    sync(handle, workflow).await;
                }
                return;
            }

            for step_id in ready {
                if !self.checkpoint(handle, workflow).await {
                    handle.interrupted.store(true, Ordering::Release);
                    self.skip_pending(workflow, WORKFLOW_CANCELLED);
                    sync(handle, workflow).await;
                    return;
                }

                let Some(step) = workflow.step(&step_id).cloned() else {
                    continue;
                };
                if !self.condition_allows(&step, workflow) {
                    self.skip_step(workflow, &step_id, CONDITION_NOT_MET);
                    sync(handle, workflow).await;
                    continue;
                }

                self.mark_running(workflow, &step_id);
                sync(handle, workflow).await;

                let outcome = self.run_step(&workflow.id, &step, &handle.cancel).await;
                self.apply(handle, workflow, outcome);
                sync(handle, workflow).await;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Parallel mode
    // -----------------------------------------------------------------------

    /// Returns the cycle error when the graph cannot be levelled.
    async fn run_parallel(
        &self,
        handle: &ActiveWorkflow,
        workflow: &mut Workflow,
    ) -> Option<WorkflowError> {
        let plan = match compute_levels(&workflow.steps) {
            Ok(plan) => plan,
            Err(err) => {
                tracing::error!(workflow_id = %workflow.id, error = %err, "cannot level workflow");
                self.skip_pending(workflow, CYCLIC_DEPENDENCY);
                sync(handle, workflow).await;
                return Some(err);
            }
        };

        for step_id in &plan.unresolved {
            self.skip_step(workflow, step_id, DEPENDENCIES_NOT_MET);
        }
        if !plan.unresolved.is_empty() {
            sync(handle, workflow).await;
        }

        for (level, ids) in plan.levels.iter().enumerate() {
            if !self.checkpoint(handle, workflow).await {
                handle.interrupted.store(true, Ordering::Release);
                self.skip_pending(workflow, WORKFLOW_CANCELLED);
                sync(handle, workflow).await;
                return None;
            }

            let mut batch = Vec::with_capacity(ids.len());
            for id in ids {
                let Some(step) = workflow.step(id).cloned() else {
                    continue;
                };
                if self.condition_allows(&step, workflow) {
                    batch.push(step);
                } else {
                    self.skip_step(workflow, id, CONDITION_NOT_MET);
                }
            }
            for step in &batch {
                self.mark_running(workflow, &step.id);
            }
            sync(handle, workflow).await;

            tracing::debug!(workflow_id = %workflow.id, level, steps = batch.len(), "running level");
            let workflow_id = workflow.id.clone();
            let outcomes = join_all(
                batch
                    .iter()
                    .map(|step| self.run_step(&workflow_id, step, &handle.cancel)),
            )
            .await;

            for outcome in outcomes {
                self.apply(handle, workflow, outcome);
            }
            sync(handle, workflow).await;
        }

        None
    }

    // -----------------------------------------------------------------------
    // Step execution
    // -----------------------------------------------------------------------

    fn step_policy(&self, step: &WorkflowStep) -> RetryPolicy {
        RetryPolicy::new(step.retry_count.max(1))
            .with_backoff(self.config.step_backoff)
            .with_base_delay(secs_or(self.config.step_base_delay_secs, Duration::from_secs(1)))
            .with_max_delay(secs_or(self.config.step_max_delay_secs, Duration::from_secs(60)))
    }

    async fn run_step(
        &self,
        workflow_id: &str,
        step: &WorkflowStep,
        cancel: &CancellationToken,
    ) -> StepOutcome {
        let policy = self.step_policy(step);
        let context = format!("workflow:{workflow_id}:{}", step.id);
        let timeout = Duration::from_secs(step.timeout_secs);
        let attempts = AtomicU32::new(0);

        let executor = self.executor.as_ref();
        let command = step.command.as_str();
        let agent = step.agent.as_str();
        let counter = &attempts;

        let result = self
            .recovery
            .execute_with_retry_cancellable(
                move || {
                    counter.fetch_add(1, Ordering::Relaxed);
                    executor.execute(command, agent, timeout)
                },
                &policy,
                &context,
                cancel,
            )
            .await;

        let attempts = attempts.load(Ordering::Relaxed);
        match result {
            Ok(value) => {
                tracing::info!(workflow_id, step_id = %step.id, attempts, "step completed");
                StepOutcome {
                    id: step.id.clone(),
                    status: StepStatus::Success,
                    result: Some(value),
                    error: None,
                    attempts,
                    cancelled: false,
                }
            }
            Err(err) => {
                tracing::warn!(workflow_id, step_id = %step.id, attempts, error = %err, "step failed");
                let error = match &err {
                    RecoveryError::NonRetryable { .. } | RecoveryError::Exhausted { .. } => {
                        err.last_message()
                    }
                    RecoveryError::CircuitOpen { .. } | RecoveryError::Cancelled { .. } => {
                        err.to_string()
                    }
                };
                StepOutcome {
                    id: step.id.clone(),
                    status: StepStatus::Failed,
                    result: None,
                    error: Some(error),
                    attempts,
                    cancelled: matches!(err, RecoveryError::Cancelled { .. }),
                }
            }
        }
    }

    fn condition_allows(&self, step: &WorkflowStep, workflow: &Workflow) -> bool {
        match step.condition.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(expr) => ConditionEvaluator::new().condition_met(expr, workflow),
        }
    }

    // -----------------------------------------------------------------------
    // State transitions
    // -----------------------------------------------------------------------

    fn mark_running(&self, workflow: &mut Workflow, step_id: &str) {
        if let Some(step) = workflow.step_mut(step_id) {
            step.status = StepStatus::Running;
            step.started_at = Some(Utc::now());
        }
        self.events.publish(AutomationEvent::step_update(
            &workflow.id,
            step_id,
            StepStatus::Running,
            "step started",
        ));
    }

    fn apply(&self, handle: &ActiveWorkflow, workflow: &mut Workflow, outcome: StepOutcome) {
        if outcome.cancelled {
            handle.interrupted.store(true, Ordering::Release);
        }
        let message = outcome
            .error
            .clone()
            .unwrap_or_else(|| "step completed".to_string());
        if let Some(step) = workflow.step_mut(&outcome.id) {
            step.status = outcome.status;
            step.error = outcome.error;
            step.attempts = outcome.attempts;
            step.finished_at = Some(Utc::now());
            if let Some(value) = &outcome.result {
                step.result = Some(value.clone());
            }
        }
        if let Some(value) = outcome.result {
            workflow.results.insert(outcome.id.clone(), value);
        }
        self.events.publish(AutomationEvent::step_update(
            &workflow.id,
            &outcome.id,
            outcome.status,
            message,
        ));
    }

    fn skip_step(&self, workflow: &mut Workflow, step_id: &str, reason: &str) {
        if let Some(step) = workflow.step_mut(step_id) {
            step.status = StepStatus::Skipped;
            step.error = Some(reason.to_string());
            step.finished_at = Some(Utc::now());
        }
        tracing::info!(workflow_id = %workflow.id, step_id, reason, "step skipped");
        self.events.publish(AutomationEvent::step_update(
            &workflow.id,
            step_id,
            StepStatus::Skipped,
            reason,
        ));
    }

    fn skip_pending(&self, workflow: &mut Workflow, reason: &str) {
        let pending: Vec<String> = workflow
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Pending)
            .map(|s| s.id.clone())
            .collect();
        for id in pending {
            self.skip_step(workflow, &id, reason);
        }
    }

    /// Wait out a pause. Returns `false` once the run has been cancelled.
    async fn checkpoint(&self, handle: &ActiveWorkflow, workflow: &mut Workflow) -> bool {
        let mut control = handle.control.subscribe();
        loop {
            let state = *control.borrow_and_update();
            match state {
                RunControl::Running => {
                    if workflow.status == WorkflowStatus::Paused {
                        workflow.status = WorkflowStatus::Running;
                        tracing::info!(workflow_id = %workflow.id, "workflow resumed");
                        self.events.publish(AutomationEvent::workflow_update(
                            &workflow.id,
                            WorkflowStatus::Running,
                            "workflow resumed",
                        ));
                        sync(handle, workflow).await;
                    }
                    return true;
                }
                RunControl::Cancelled => return false,
                RunControl::Paused => {
                    if workflow.status != WorkflowStatus::Paused {
                        workflow.status = WorkflowStatus::Paused;
                        tracing::info!(workflow_id = %workflow.id, "workflow paused");
                        self.events.publish(AutomationEvent::workflow_update(
                            &workflow.id,
                            WorkflowStatus::Paused,
                            "workflow paused",
                        ));
                        sync(handle, workflow).await;
                    }
                    if control.changed().await.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    async fn finish(&self, handle: &ActiveWorkflow, workflow: &mut Workflow, cyclic: bool) {
        let failed = workflow.count(StepStatus::Failed);
        let skipped = workflow.count(StepStatus::Skipped);
        let succeeded = workflow.count(StepStatus::Success);

        // A cancel that lands after the last step was dispatched changes nothing.
        workflow.status = if handle.interrupted.load(Ordering::Acquire) {
            WorkflowStatus::Cancelled
        } else if cyclic || failed > 0 {
            WorkflowStatus::Failed
        } else if skipped > 0 && self.config.skipped_step_policy == SkippedStepPolicy::CountAsFailure
        {
            WorkflowStatus::Failed
        } else {
            WorkflowStatus::Success
        };
        workflow.finished_at = Some(Utc::now());

        let message = format!(
            "workflow {}: {succeeded} succeeded, {failed} failed, {skipped} skipped",
            workflow.status
        );
        tracing::info!(
            workflow_id = %workflow.id,
            status = %workflow.status,
            succeeded,
            failed,
            skipped,
            "workflow finished"
        );
        self.events.publish(AutomationEvent::workflow_update(
            &workflow.id,
            workflow.status,
            message,
        ));

        sync(handle, workflow).await;
        handle.done.store(true, Ordering::Release);
    }

    // -----------------------------------------------------------------------
    // Control
    // -----------------------------------------------------------------------

    fn running_handle(&self, id: &str) -> Result<Arc<ActiveWorkflow>, WorkflowError> {
        self.active
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .filter(|handle| handle.is_running())
            .ok_or_else(|| WorkflowError::NotFound(id.to_string()))
    }

    /// Hold the workflow at its next step or level boundary.
    pub fn pause(&self, id: &str) -> Result<(), WorkflowError> {
        let handle = self.running_handle(id)?;
        handle.control.send_if_modified(|state| {
            if *state == RunControl::Running {
                *state = RunControl::Paused;
                true
            } else {
                false
            }
        });
        tracing::info!(workflow_id = id, "pause requested");
        Ok(())
    }

    pub fn resume(&self, id: &str) -> Result<(), WorkflowError> {
        let handle = self.running_handle(id)?;
        handle.control.send_if_modified(|state| {
            if *state == RunControl::Paused {
                *state = RunControl::Running;
                true
            } else {
                false
            }
        });
        tracing::info!(workflow_id = id, "resume requested");
        Ok(())
    }

    /// Stop dispatching new steps and cut short any retry backoff. The
    /// remaining pending steps end skipped.
    pub fn cancel(&self, id: &str) -> Result<(), WorkflowError> {
        let handle = self.running_handle(id)?;
        handle.control.send_replace(RunControl::Cancelled);
        handle.cancel.cancel();
        tracing::info!(workflow_id = id, "cancel requested");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Consistent snapshot of a registered workflow, running or finished.
    pub async fn status(&self, id: &str) -> Option<Workflow> {
        let handle = self.active.get(id).map(|entry| Arc::clone(entry.value()))?;
        let snapshot = handle.snapshot.read().await.clone();
        Some(snapshot)
    }

    pub async fn list_active(&self) -> Vec<Workflow> {
        let handles: Vec<Arc<ActiveWorkflow>> = self
            .active
            .iter()
            .filter(|entry| entry.value().is_running())
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut workflows = Vec::with_capacity(handles.len());
        for handle in handles {
            workflows.push(handle.snapshot.read().await.clone());
        }
        workflows.sort_by(|a, b| a.id.cmp(&b.id));
        workflows
    }

    /// Number of workflows currently running.
    pub fn active_count(&self) -> usize {
        self.active.iter().filter(|entry| entry.value().is_running()).count()
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.active.get(id).is_some_and(|entry| entry.value().is_running())
    }

    /// Drop a finished workflow from the registry, returning its final state.
    pub async fn discard(&self, id: &str) -> Result<Workflow, WorkflowError> {
        if self.is_running(id) {
            return Err(WorkflowError::AlreadyRunning(id.to_string()));
        }
        let (_, handle) = self
            .active
            .remove_if(id, |_, handle| !handle.is_running())
            .ok_or_else(|| WorkflowError::NotFound(id.to_string()))?;
        let workflow = handle.snapshot.read().await.clone();
        Ok(workflow)
    }
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("active", &self.active.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Step ids key results and dependencies, so they must be unique.
fn check_step_ids(workflow: &Workflow) -> Result<(), WorkflowError> {
    let mut seen = HashSet::new();
    for step in &workflow.steps {
        if !seen.insert(step.id.as_str()) {
            return Err(WorkflowError::Validation(format!(
                "duplicate step ID: '{}'",
                step.id
            )));
        }
    }
    Ok(())
}

async fn sync(handle: &ActiveWorkflow, workflow: &Workflow) {
    *handle.snapshot.write().await = workflow.clone();
}
