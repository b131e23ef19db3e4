//! Shared domain types for Conductor.
//!
//! Workflows, schedules, recovery state, agents, rules, emitted events and
//! configuration. Everything here is plain data: serde-serialisable, no
//! async, no I/O.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod agent;
pub mod config;
pub mod error;
pub mod event;
pub mod recovery;
pub mod rule;
pub mod schedule;
pub mod workflow;
