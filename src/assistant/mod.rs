//! Command resolution
//!
//! Utterances resolve against the local rule table first and fall back to a
//! remote chat-completion assistant. Failures never leave this module as
//! errors: they become the fixed fallback reply.

mod client;
mod dispatcher;
mod rules;

use async_trait::async_trait;

pub use client::RemoteAssistantClient;
pub use dispatcher::{CommandDispatcher, Reply, ReplySource};
pub use rules::{RuleTable, normalize};

/// Reply spoken when neither a local rule nor the assistant produced one
pub const FALLBACK_REPLY: &str = "Sorry, I didn't understand that.";

/// Why the remote assistant produced no reply
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssistantFailure {
    /// Another request is still outstanding; this utterance was dropped
    #[error("request already in flight")]
    Busy,

    /// Network failure or request task loss
    #[error("transport failure: {0}")]
    Transport(String),

    /// Non-success HTTP status
    #[error("endpoint returned status {0}")]
    Status(u16),

    /// Body did not have the expected completion shape
    #[error("malformed response: {0}")]
    Malformed(String),

    /// First choice carried no text
    #[error("empty reply")]
    EmptyReply,
}

/// Conversational fallback for utterances with no local rule
#[async_trait]
pub trait Assistant: Send + Sync {
    /// Ask for a spoken reply to `utterance`
    async fn ask(&self, utterance: &str) -> Result<String, AssistantFailure>;
}
