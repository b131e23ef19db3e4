//! Multi-agent orchestration: registry, keyword routing, mailboxes and
//! coordination strategies.

pub mod agent;
pub mod coordinator;
pub mod mailbox;
pub mod routing;

pub use agent::{AgentHandle, AgentHandleDyn, BoxAgent};
pub use coordinator::{AgentOrchestrator, OrchestratorError, OrchestratorStatus};
pub use mailbox::Mailbox;
pub use routing::classify_task;
