//! Utterance to reply resolution

use std::sync::Arc;

use serde::Serialize;

use super::{Assistant, FALLBACK_REPLY, RuleTable, normalize};

/// Where a reply came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplySource {
    /// Local rule table
    Rule,
    /// Remote assistant
    Assistant,
    /// Fixed fallback phrase
    Fallback,
}

/// A resolved reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reply {
    /// Text to speak
    pub text: String,
    /// Resolution path
    pub source: ReplySource,
}

impl Reply {
    fn fallback() -> Self {
        Self {
            text: FALLBACK_REPLY.to_string(),
            source: ReplySource::Fallback,
        }
    }
}

/// Resolves utterances: local rules first, then the remote assistant
pub struct CommandDispatcher {
    rules: Arc<RuleTable>,
    assistant: Option<Arc<dyn Assistant>>,
}

impl CommandDispatcher {
    /// Create a dispatcher; without an assistant, misses resolve to the fallback
    #[must_use]
    pub fn new(rules: Arc<RuleTable>, assistant: Option<Arc<dyn Assistant>>) -> Self {
        Self { rules, assistant }
    }

    /// Whether a remote assistant is configured
    #[must_use]
    pub fn has_assistant(&self) -> bool {
        self.assistant.is_some()
    }

    /// Resolve an utterance to the text to speak
    pub async fn resolve(&self, utterance: &str) -> String {
        self.resolve_reply(utterance).await.text
    }

    /// Resolve an utterance, reporting which path produced the reply
    pub async fn resolve_reply(&self, utterance: &str) -> Reply {
        let normalized = normalize(utterance);
        if normalized.is_empty() {
            return Reply::fallback();
        }

        if let Some(text) = self.rules.lookup(&normalized) {
            tracing::debug!(utterance = %normalized, "matched local rule");
            return Reply {
                text: text.to_string(),
                source: ReplySource::Rule,
            };
        }

        let Some(assistant) = &self.assistant else {
            tracing::debug!(utterance = %normalized, "no rule and no assistant configured");
            return Reply::fallback();
        };

        // The assistant gets the utterance as heard, not the lookup key
        match assistant.ask(utterance).await {
            Ok(text) => Reply {
                text,
                source: ReplySource::Assistant,
            },
            Err(failure) => {
                tracing::warn!(%failure, "assistant unavailable, using fallback reply");
                Reply::fallback()
            }
        }
    }
}
