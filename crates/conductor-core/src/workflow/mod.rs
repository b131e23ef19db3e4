//! Workflow execution: definitions, dependency resolution, step conditions
//! and the engine that drives runs.

pub mod dag;
pub mod definition;
pub mod engine;
pub mod executor;
pub mod expression;

pub use dag::{LevelPlan, compute_levels, ready_steps};
pub use definition::{
    WorkflowError, definition_warnings, load_workflow_file, parse_workflow_json,
    parse_workflow_yaml, validate_definition,
};
pub use engine::WorkflowEngine;
pub use executor::{BoxTaskExecutor, ExecutionError, TaskExecutor, TaskExecutorDyn};
pub use expression::ConditionEvaluator;
