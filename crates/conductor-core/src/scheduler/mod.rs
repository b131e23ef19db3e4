//! Task scheduler: decides when workflows run and bounds how many run at
//! once.

pub mod launcher;
pub mod queue;
pub mod runner;
pub mod task;

pub use launcher::{BoxLauncher, LaunchError, WorkflowCatalog, WorkflowLauncher, WorkflowLauncherDyn};
pub use queue::TaskQueue;
pub use runner::TaskScheduler;
pub use task::{ScheduledTask, SchedulerError, normalize_cron};
