//! Workflow domain types for Conductor.
//!
//! `WorkflowDefinition` is the declarative shape loaded from YAML or JSON.
//! `Workflow` is the runtime instance the engine mutates while executing:
//! it carries per-step status, results and timing.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Definitions (declarative)
// ---------------------------------------------------------------------------

/// Declarative workflow as authored in a definition file.
///
/// ```yaml
/// name: nightly-report
/// parallel: true
/// steps:
///   - id: fetch
///     command: "download latest export"
///   - id: summarize
///     command: "summarize export"
///     depends_on: [fetch]
///     condition: "steps.fetch.status == 'success'"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Assigned on load when omitted.
    #[serde(default = "new_id")]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Run dependency levels concurrently instead of one step at a time.
    #[serde(default)]
    pub parallel: bool,
    pub steps: Vec<StepDefinition>,
}

/// A single step in the workflow DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Unique within a workflow.
    pub id: String,
    /// Opaque command text handed to the executor.
    pub command: String,
    /// Executor name; `"auto"` lets the executor pick.
    #[serde(default = "default_agent")]
    pub agent: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Maximum attempts for this step (values below 1 still run once).
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    /// Passed through to the executor; not enforced by the engine.
    #[serde(default = "default_step_timeout", alias = "timeout")]
    pub timeout_secs: u64,
    /// JEXL predicate over accumulated results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

fn new_id() -> String {
    Uuid::now_v7().to_string()
}

fn default_agent() -> String {
    "auto".to_string()
}

fn default_retry_count() -> u32 {
    3
}

fn default_step_timeout() -> u64 {
    300
}

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

/// Lifecycle of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    Pending,
    Running,
    Success,
    Failed,
    Paused,
    Cancelled,
}

impl WorkflowStatus {
    /// Whether the run has finished and will not change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Paused => "paused",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "paused" => Ok(Self::Paused),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("invalid workflow status: '{other}'")),
        }
    }
}

/// Lifecycle of a single step within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl StepStatus {
    /// Terminal steps never re-execute within the same run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

/// Whether skipped steps make the overall run fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SkippedStepPolicy {
    /// Only explicit step failures fail the workflow.
    #[default]
    Ignore,
    /// Any skipped step also fails the workflow.
    CountAsFailure,
}

// ---------------------------------------------------------------------------
// Runtime workflow
// ---------------------------------------------------------------------------

/// Runtime state of one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: String,
    pub command: String,
    pub agent: String,
    pub depends_on: Vec<String>,
    pub retry_count: u32,
    pub timeout_secs: u64,
    pub condition: Option<String>,
    pub status: StepStatus,
    pub result: Option<serde_json::Value>,
    /// Failure message, or the reason a step was skipped.
    pub error: Option<String>,
    /// Number of times the executor was invoked for this step.
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<StepDefinition> for WorkflowStep {
    fn from(def: StepDefinition) -> Self {
        Self {
            id: def.id,
            command: def.command,
            agent: def.agent,
            depends_on: def.depends_on,
            retry_count: def.retry_count,
            timeout_secs: def.timeout_secs,
            condition: def.condition,
            status: StepStatus::Pending,
            result: None,
            error: None,
            attempts: 0,
            started_at: None,
            finished_at: None,
        }
    }
}

/// A workflow instance: the unit the engine executes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub parallel: bool,
    pub status: WorkflowStatus,
    /// Steps in definition order. Ids are unique.
    pub steps: Vec<WorkflowStep>,
    /// Successful step results keyed by step id.
    pub results: BTreeMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Workflow {
    /// Build a fresh pending instance from a definition.
    pub fn from_definition(def: WorkflowDefinition) -> Self {
        Self {
            id: def.id,
            name: def.name,
            description: def.description,
            parallel: def.parallel,
            status: WorkflowStatus::Pending,
            steps: def.steps.into_iter().map(WorkflowStep::from).collect(),
            results: BTreeMap::new(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn step(&self, id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn step_mut(&mut self, id: &str) -> Option<&mut WorkflowStep> {
        self.steps.iter_mut().find(|s| s.id == id)
    }

    /// Count steps currently in `status`.
    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }
}

/// Condensed outcome of one run, as reported to schedulers and CLIs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowRunSummary {
    pub workflow_id: String,
    pub status: WorkflowStatus,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl From<&Workflow> for WorkflowRunSummary {
    fn from(wf: &Workflow) -> Self {
        Self {
            workflow_id: wf.id.clone(),
            status: wf.status,
            succeeded: wf.count(StepStatus::Success),
            failed: wf.count(StepStatus::Failed),
            skipped: wf.count(StepStatus::Skipped),
        }
    }
}
