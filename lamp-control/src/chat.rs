//! Chat integration capability
//!
//! The chat transport itself lives outside this crate. It parses incoming
//! lines into [`ViewerRequest`]s and receives text replies through
//! [`ChatAdapter`].

use async_trait::async_trait;
use thiserror::Error;

use crate::cooldown::Privileges;

#[derive(Error, Debug)]
#[error("Chat reply failed: {0}")]
pub struct ChatError(pub String);

/// Outbound side of a chat integration
#[async_trait]
pub trait ChatAdapter: Send + Sync {
    /// Post a reply into the chat
    async fn send_reply(&self, text: &str) -> Result<(), ChatError>;
}

/// A validated viewer request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewerRequest {
    /// Stable identity used for per-user cooldowns
    pub requester: String,
    /// Name used when addressing the viewer in replies
    pub display_name: String,
    pub privileges: Privileges,
    /// Command name as typed, e.g. `red`
    pub command: String,
}

impl ViewerRequest {
    pub fn new(requester: &str, command: &str) -> Self {
        Self {
            requester: requester.to_string(),
            display_name: requester.to_string(),
            privileges: Privileges::default(),
            command: command.to_string(),
        }
    }

    pub fn with_privileges(mut self, privileges: Privileges) -> Self {
        self.privileges = privileges;
        self
    }
}
