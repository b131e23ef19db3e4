//! The scheduler service: task table, polling loop and bounded dispatch.
//!
//! Each tick queues every due task that is not already queued or running,
//! recomputes its `next_run`, then drains the queue while a slot is free.
//! Launches run as independent tokio tasks. A launch that errors or panics
//! only affects its own task; the slot is always released, and with
//! `redrain_on_release` the loop drains again right away instead of
//! waiting for the next tick.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use conductor_types::config::SchedulerConfig;
use conductor_types::event::AutomationEvent;
use conductor_types::schedule::{Schedule, ScheduledTaskConfig, SchedulerStats};

use super::launcher::{BoxLauncher, WorkflowLauncher};
use super::queue::TaskQueue;
use super::task::{ScheduledTask, SchedulerError};
use crate::event::EventBus;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct SchedulerShared {
    tasks: DashMap<String, ScheduledTask>,
    queue: Mutex<TaskQueue<String>>,
    running: DashSet<String>,
    slot_released: Notify,
    launcher: BoxLauncher,
    events: EventBus,
    config: SchedulerConfig,
}

impl SchedulerShared {
    fn queue(&self) -> MutexGuard<'_, TaskQueue<String>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn max_concurrent(&self) -> usize {
        self.config.max_concurrent.max(1)
    }

    /// Queue every due task and push its `next_run` forward.
    fn enqueue_due(&self, now: DateTime<Utc>) -> usize {
        let mut queue = self.queue();
        let queued: HashSet<String> = queue.iter().cloned().collect();

        let mut due = Vec::new();
        for mut task in self.tasks.iter_mut() {
            if queued.contains(&task.id) || self.running.contains(&task.id) {
                continue;
            }
            if task.should_run_at(now) {
                due.push((task.id.clone(), task.priority));
                task.refresh_next_run(now);
            }
        }

        let count = due.len();
        for (id, priority) in due {
            tracing::debug!(task_id = %id, priority, "task queued");
            queue.push(id, priority);
        }
        count
    }

    /// Launch queued tasks while slots are free.
    fn drain(self: &Arc<Self>) {
        while self.running.len() < self.max_concurrent() {
            let Some(task_id) = self.queue().pop() else {
                break;
            };
            self.launch(task_id);
        }
    }

    fn launch(self: &Arc<Self>, task_id: String) {
        let now = Utc::now();
        let workflow_id = match self.tasks.get_mut(&task_id) {
            Some(mut task) if task.enabled => {
                task.record_run(now);
                task.workflow_id.clone()
            }
            _ => {
                tracing::debug!(task_id = %task_id, "queued task removed or disabled, dropping");
                return;
            }
        };

        self.running.insert(task_id.clone());
        let slot = RunningSlot {
            shared: Arc::clone(self),
            task_id: task_id.clone(),
        };
        let shared = Arc::clone(self);

        tokio::spawn(async move {
            let _slot = slot;
            tracing::info!(task_id = %task_id, workflow_id = %workflow_id, "launching scheduled workflow");

            match shared.launcher.launch(&workflow_id).await {
                Ok(summary) => {
                    tracing::info!(
                        task_id = %task_id,
                        workflow_id = %workflow_id,
                        status = %summary.status,
                        succeeded = summary.succeeded,
                        failed = summary.failed,
                        skipped = summary.skipped,
                        "scheduled workflow finished"
                    );
                }
                Err(err) => {
                    tracing::error!(task_id = %task_id, workflow_id = %workflow_id, error = %err, "scheduled workflow failed to run");
                    if let Some(mut task) = shared.tasks.get_mut(&task_id) {
                        task.record_error(err.to_string());
                    }
                    shared.events.publish(AutomationEvent::TaskError {
                        task_id: task_id.clone(),
                        error: err.to_string(),
                        timestamp: Utc::now(),
                    });
                }
            }

            shared.after_run(&task_id);
        });
    }

    fn after_run(&self, task_id: &str) {
        let ephemeral = self.tasks.get(task_id).is_some_and(|t| t.ephemeral);
        if ephemeral {
            self.tasks.remove(task_id);
            return;
        }
        if let Some(mut task) = self.tasks.get_mut(task_id) {
            if task.enabled {
                task.refresh_next_run(Utc::now());
            }
        }
    }
}

/// Frees a running slot on drop, so a panicking launch still releases it.
struct RunningSlot {
    shared: Arc<SchedulerShared>,
    task_id: String,
}

impl Drop for RunningSlot {
    fn drop(&mut self) {
        self.shared.running.remove(&self.task_id);
        self.shared.slot_released.notify_one();
    }
}

// ---------------------------------------------------------------------------
// TaskScheduler
// ---------------------------------------------------------------------------

struct LoopHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

pub struct TaskScheduler {
    shared: Arc<SchedulerShared>,
    handle: Mutex<Option<LoopHandle>>,
}

impl TaskScheduler {
    pub fn new<L: WorkflowLauncher + 'static>(
        launcher: L,
        events: EventBus,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            shared: Arc::new(SchedulerShared {
                tasks: DashMap::new(),
                queue: Mutex::new(TaskQueue::new()),
                running: DashSet::new(),
                slot_released: Notify::new(),
                launcher: BoxLauncher::new(launcher),
                events,
                config,
            }),
            handle: Mutex::new(None),
        }
    }

    fn loop_handle(&self) -> MutexGuard<'_, Option<LoopHandle>> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Task management
    // -----------------------------------------------------------------------

    /// Validate and register a task. Returns its id.
    pub fn add_task(&self, task: impl Into<ScheduledTask>) -> Result<String, SchedulerError> {
        let mut task = task.into();
        task.validate()?;
        task.refresh_next_run(Utc::now());

        let id = task.id.clone();
        match self.shared.tasks.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(SchedulerError::DuplicateTask(id));
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                tracing::info!(
                    task_id = %id,
                    workflow_id = %task.workflow_id,
                    schedule = task.schedule.kind(),
                    next_run = ?task.next_run,
                    "scheduled task added"
                );
                entry.insert(task);
            }
        }
        Ok(id)
    }

    pub fn remove_task(&self, task_id: &str) -> Result<ScheduledTask, SchedulerError> {
        let (_, task) = self
            .shared
            .tasks
            .remove(task_id)
            .ok_or_else(|| SchedulerError::TaskNotFound(task_id.to_string()))?;
        tracing::info!(task_id, "scheduled task removed");
        Ok(task)
    }

    pub fn enable_task(&self, task_id: &str) -> Result<(), SchedulerError> {
        self.set_enabled(task_id, true)
    }

    pub fn disable_task(&self, task_id: &str) -> Result<(), SchedulerError> {
        self.set_enabled(task_id, false)
    }

    fn set_enabled(&self, task_id: &str, enabled: bool) -> Result<(), SchedulerError> {
        let mut task = self
            .shared
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| SchedulerError::TaskNotFound(task_id.to_string()))?;
        task.enabled = enabled;
        task.refresh_next_run(Utc::now());
        tracing::info!(task_id, enabled, "scheduled task toggled");
        Ok(())
    }

    pub fn get_task(&self, task_id: &str) -> Option<ScheduledTask> {
        self.shared.tasks.get(task_id).map(|t| t.clone())
    }

    /// Snapshots ordered by priority, then id.
    pub fn list_tasks(&self) -> Vec<ScheduledTask> {
        let mut tasks: Vec<ScheduledTask> =
            self.shared.tasks.iter().map(|t| t.value().clone()).collect();
        tasks.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        tasks
    }

    /// Queue a one-shot run of `workflow_id`, ahead of the next tick.
    /// Returns the ephemeral task id.
    pub fn run_now(&self, workflow_id: &str, priority: i32) -> String {
        let mut task = ScheduledTask::from(ScheduledTaskConfig {
            id: format!("run_now_{}", uuid::Uuid::now_v7()),
            workflow_id: workflow_id.to_string(),
            schedule: Schedule::Once { at: None },
            enabled: true,
            max_runs: Some(1),
            priority,
        });
        task.ephemeral = true;
        let id = task.id.clone();

        {
            let mut queue = self.shared.queue();
            self.shared.tasks.insert(id.clone(), task);
            queue.push(id.clone(), priority);
        }
        self.shared.slot_released.notify_one();
        tracing::info!(task_id = %id, workflow_id, priority, "run-now queued");
        id
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Spawn the polling loop. Must be called inside a tokio runtime.
    pub fn start(&self) -> Result<(), SchedulerError> {
        let mut handle = self.loop_handle();
        if handle.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }

        let cancel = CancellationToken::new();
        let join = tokio::spawn(run_loop(Arc::clone(&self.shared), cancel.clone()));
        *handle = Some(LoopHandle { cancel, join });

        tracing::info!(
            max_concurrent = self.shared.max_concurrent(),
            check_interval_secs = self.shared.config.check_interval_secs,
            "scheduler started"
        );
        Ok(())
    }

    /// Stop the polling loop and wait for it to exit. Launches already in
    /// flight run to completion on their own.
    pub async fn stop(&self) {
        let Some(LoopHandle { cancel, join }) = self.loop_handle().take() else {
            return;
        };
        cancel.cancel();
        if let Err(err) = join.await {
            tracing::warn!(error = %err, "scheduler loop ended abnormally");
        }
        tracing::info!("scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.loop_handle().is_some()
    }

    /// Run one tick by hand: queue due tasks, then drain.
    pub fn tick(&self) {
        self.shared.enqueue_due(Utc::now());
        self.shared.drain();
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            total_tasks: self.shared.tasks.len(),
            enabled_tasks: self.shared.tasks.iter().filter(|t| t.enabled).count(),
            queued: self.shared.queue().len(),
            running: self.shared.running.len(),
            max_concurrent: self.shared.max_concurrent(),
        }
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.loop_handle().take() {
            handle.cancel.cancel();
        }
    }
}

async fn run_loop(shared: Arc<SchedulerShared>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(shared.config.check_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let redrain = shared.config.redrain_on_release;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let queued = shared.enqueue_due(Utc::now());
                if queued > 0 {
                    tracing::debug!(queued, "scheduler tick");
                }
                shared.drain();
            }
            _ = shared.slot_released.notified(), if redrain => {
                shared.drain();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use conductor_types::workflow::{WorkflowRunSummary, WorkflowStatus};
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    use crate::scheduler::launcher::LaunchError;

    /// Reports each launch; `slow` blocks until released, `broken` errors,
    /// `panic` panics.
    #[derive(Clone)]
    struct Probe {
        launched: mpsc::UnboundedSender<(String, Instant)>,
        release: Arc<Notify>,
    }

    impl WorkflowLauncher for Probe {
        async fn launch(&self, workflow_id: &str) -> Result<WorkflowRunSummary, LaunchError> {
            let _ = self.launched.send((workflow_id.to_string(), Instant::now()));
            match workflow_id {
                "slow" => self.release.notified().await,
                "broken" => return Err(LaunchError::UnknownWorkflow(workflow_id.to_string())),
                "panic" => panic!("launcher exploded"),
                _ => {}
            }
            Ok(WorkflowRunSummary {
                workflow_id: workflow_id.to_string(),
                status: WorkflowStatus::Success,
                succeeded: 1,
                failed: 0,
                skipped: 0,
            })
        }
    }

    fn scheduler(
        config: SchedulerConfig,
    ) -> (TaskScheduler, mpsc::UnboundedReceiver<(String, Instant)>, Arc<Notify>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let release = Arc::new(Notify::new());
        let probe = Probe {
            launched: tx,
            release: Arc::clone(&release),
        };
        (TaskScheduler::new(probe, EventBus::new(16), config), rx, release)
    }

    fn config(max_concurrent: usize, redrain: bool) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent,
            check_interval_secs: 60,
            redrain_on_release: redrain,
        }
    }

    fn interval_task(id: &str, workflow_id: &str, secs: u64) -> ScheduledTaskConfig {
        ScheduledTaskConfig {
            id: id.into(),
            workflow_id: workflow_id.into(),
            schedule: Schedule::Interval { interval_secs: secs },
            enabled: true,
            max_runs: None,
            priority: 5,
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn task_management() {
        let (sched, _rx, _release) = scheduler(config(2, true));

        let id = sched.add_task(interval_task("t1", "wf", 30)).unwrap();
        assert_eq!(id, "t1");
        assert!(matches!(
            sched.add_task(interval_task("t1", "wf", 30)),
            Err(SchedulerError::DuplicateTask(_))
        ));
        assert!(sched.get_task("t1").unwrap().next_run.is_some());

        sched.disable_task("t1").unwrap();
        assert!(!sched.get_task("t1").unwrap().enabled);
        assert_eq!(sched.stats().enabled_tasks, 0);
        sched.enable_task("t1").unwrap();

        assert!(matches!(sched.enable_task("nope"), Err(SchedulerError::TaskNotFound(_))));
        assert_eq!(sched.list_tasks().len(), 1);
        sched.remove_task("t1").unwrap();
        assert_eq!(sched.stats().total_tasks, 0);
    }

    #[tokio::test]
    async fn invalid_task_is_rejected() {
        let (sched, _rx, _release) = scheduler(config(1, true));
        assert!(matches!(
            sched.add_task(interval_task("t", "wf", 0)),
            Err(SchedulerError::InvalidSchedule(_))
        ));
    }

    #[tokio::test]
    async fn drain_respects_priority_and_concurrency() {
        let (sched, mut rx, release) = scheduler(config(1, false));
        sched.run_now("slow", 5);
        sched.run_now("later", 9);
        sched.run_now("urgent", 1);

        sched.tick();
        let (first, _) = rx.recv().await.unwrap();
        assert_eq!(first, "urgent");
        settle().await;

        sched.tick();
        let (second, _) = rx.recv().await.unwrap();
        assert_eq!(second, "slow");
        assert_eq!(sched.stats().running, 1);

        sched.tick();
        settle().await;
        assert!(rx.try_recv().is_err(), "slot is taken by 'slow'");
        assert_eq!(sched.stats().queued, 1);

        release.notify_one();
        settle().await;
        sched.tick();
        assert_eq!(rx.recv().await.unwrap().0, "later");
        settle().await;
        assert_eq!(sched.stats().total_tasks, 0, "run-now tasks are removed after running");
    }

    #[tokio::test]
    async fn running_task_is_not_queued_again() {
        let (sched, mut rx, release) = scheduler(config(4, false));
        let mut task = interval_task("t", "slow", 1);
        task.schedule = Schedule::Conditional;
        sched.add_task(task).unwrap();

        sched.tick();
        assert_eq!(rx.recv().await.unwrap().0, "slow");
        sched.tick();
        sched.tick();
        settle().await;
        assert!(rx.try_recv().is_err());
        assert_eq!(sched.stats().queued, 0);

        release.notify_one();
        settle().await;
        assert_eq!(sched.get_task("t").unwrap().run_count, 1);
    }

    #[tokio::test]
    async fn launch_errors_are_isolated_and_recorded() {
        let (sched, mut rx, _release) = scheduler(config(2, false));
        let mut events = sched.shared.events.subscribe();
        let mut task = interval_task("t", "broken", 1);
        task.schedule = Schedule::Conditional;
        sched.add_task(task).unwrap();
        sched.add_task(ScheduledTaskConfig {
            schedule: Schedule::Conditional,
            ..interval_task("ok", "fine", 1)
        })
        .unwrap();

        sched.tick();
        let mut launched = vec![rx.recv().await.unwrap().0, rx.recv().await.unwrap().0];
        launched.sort();
        assert_eq!(launched, vec!["broken", "fine"]);
        settle().await;

        let broken = sched.get_task("t").unwrap();
        assert_eq!(broken.error_count, 1);
        assert_eq!(broken.last_error.as_deref(), Some("unknown workflow: broken"));
        assert!(broken.enabled);
        assert!(matches!(events.recv().await.unwrap(), AutomationEvent::TaskError { task_id, .. } if task_id == "t"));
        assert_eq!(sched.get_task("ok").unwrap().error_count, 0);
    }

    #[tokio::test]
    async fn panicking_launch_releases_its_slot() {
        let (sched, mut rx, _release) = scheduler(config(1, false));
        sched.run_now("panic", 1);
        sched.run_now("fine", 2);

        sched.tick();
        assert_eq!(rx.recv().await.unwrap().0, "panic");
        settle().await;
        assert_eq!(sched.stats().running, 0);

        sched.tick();
        assert_eq!(rx.recv().await.unwrap().0, "fine");
    }

    #[tokio::test(start_paused = true)]
    async fn released_slot_is_redrained_before_next_tick() {
        let (sched, mut rx, release) = scheduler(config(1, true));
        sched.run_now("slow", 1);
        sched.run_now("next", 2);
        let start = Instant::now();
        sched.start().unwrap();

        assert_eq!(rx.recv().await.unwrap().0, "slow");
        tokio::time::sleep(Duration::from_secs(5)).await;
        release.notify_one();

        let (id, at) = rx.recv().await.unwrap();
        assert_eq!(id, "next");
        assert_eq!(at - start, Duration::from_secs(5));
        sched.stop().await;
        assert!(!sched.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn without_redrain_work_waits_for_the_tick() {
        let (sched, mut rx, release) = scheduler(config(1, false));
        sched.run_now("slow", 1);
        sched.run_now("next", 2);
        let start = Instant::now();
        sched.start().unwrap();

        assert_eq!(rx.recv().await.unwrap().0, "slow");
        tokio::time::sleep(Duration::from_secs(5)).await;
        release.notify_one();

        let (_, at) = rx.recv().await.unwrap();
        assert_eq!(at - start, Duration::from_secs(60));
        sched.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn conditional_task_stops_at_max_runs() {
        let (sched, mut rx, _release) = scheduler(SchedulerConfig {
            max_concurrent: 2,
            check_interval_secs: 1,
            redrain_on_release: true,
        });
        sched
            .add_task(ScheduledTaskConfig {
                schedule: Schedule::Conditional,
                max_runs: Some(2),
                ..interval_task("t", "wf", 1)
            })
            .unwrap();
        sched.start().unwrap();

        assert_eq!(rx.recv().await.unwrap().0, "wf");
        assert_eq!(rx.recv().await.unwrap().0, "wf");
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(rx.try_recv().is_err());

        let task = sched.get_task("t").unwrap();
        assert_eq!(task.run_count, 2);
        assert!(!task.should_run_at(Utc::now()));
        assert!(matches!(sched.start(), Err(SchedulerError::AlreadyRunning)));
        sched.stop().await;
    }
}
