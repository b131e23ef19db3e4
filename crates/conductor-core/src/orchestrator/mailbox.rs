//! Bounded per-agent mailbox.
//!
//! FIFO within one mailbox. Sends never wait: a full mailbox is an error
//! the sender sees immediately.

use std::time::Duration;

use tokio::sync::{Mutex, mpsc};

use conductor_types::agent::AgentMessage;

use super::coordinator::OrchestratorError;

pub struct Mailbox {
    owner: String,
    sender: mpsc::Sender<AgentMessage>,
    receiver: Mutex<mpsc::Receiver<AgentMessage>>,
}

impl Mailbox {
    pub fn new(owner: impl Into<String>, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            owner: owner.into(),
            sender,
            receiver: Mutex::new(receiver),
        }
    }

    pub fn try_send(&self, message: AgentMessage) -> Result<(), OrchestratorError> {
        self.sender.try_send(message).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => OrchestratorError::MailboxFull(self.owner.clone()),
            mpsc::error::TrySendError::Closed(_) => {
                OrchestratorError::MailboxClosed(self.owner.clone())
            }
        })
    }

    /// Wait up to `timeout` for the next message. `None` means nothing
    /// arrived in time.
    pub async fn receive(&self, timeout: Duration) -> Option<AgentMessage> {
        let next = async { self.receiver.lock().await.recv().await };
        tokio::time::timeout(timeout, next).await.ok().flatten()
    }

    /// Messages waiting to be received.
    pub fn len(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.sender.max_capacity()
    }
}

impl std::fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("owner", &self.owner)
            .field("len", &self.len())
            .finish()
    }
}
