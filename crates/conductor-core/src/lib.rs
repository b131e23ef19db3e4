//! Orchestration core for Conductor.
//!
//! Leaf to root: `recovery` (retry policy plus circuit breakers) is used by
//! `workflow` (DAG execution) and `orchestrator` (agent routing). The
//! `scheduler` decides when workflows run, and `rules` fires actions that
//! feed back into the scheduler and engine. Every registry lives inside an
//! instance passed by handle; there is no process-global state.

pub mod event;
pub mod metrics;
pub mod orchestrator;
pub mod recovery;
pub mod rules;
pub mod scheduler;
pub mod workflow;
