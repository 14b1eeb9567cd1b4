//! Remote chat-completion assistant
//!
//! Single-turn requests against an OpenAI-compatible `/chat/completions`
//! endpoint. At most one request is outstanding per client; an utterance that
//! arrives while one is in flight is dropped and reported as
//! [`AssistantFailure::Busy`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use super::{Assistant, AssistantFailure};
use crate::config::AssistantConfig;
use crate::{Error, Result};

/// Chat completion request body
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

/// Chat completion response body (only the fields we read)
#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Everything a request task needs, shared with spawned tasks
struct Endpoint {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: SecretString,
}

/// Client for the remote conversational assistant
pub struct RemoteAssistantClient {
    endpoint: Arc<Endpoint>,
    in_flight: Arc<AtomicBool>,
}

/// Clears the in-flight flag when the request task ends, however it ends
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl RemoteAssistantClient {
    /// Create a client from configuration
    ///
    /// # Errors
    ///
    /// Returns error if no API key is configured or the HTTP client cannot be built
    pub fn new(config: &AssistantConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_ref()
            .filter(|k| !k.expose_secret().is_empty())
            .ok_or_else(|| Error::Config("assistant API key required".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Assistant(format!("failed to build HTTP client: {e}")))?;

        tracing::debug!(endpoint = %config.endpoint, model = %config.model, "assistant client initialized");

        Ok(Self {
            endpoint: Arc::new(Endpoint {
                client,
                url: config.endpoint.clone(),
                model: config.model.clone(),
                api_key: SecretString::from(api_key.expose_secret().to_owned()),
            }),
            in_flight: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Whether a request is currently outstanding
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Assistant for RemoteAssistantClient {
    async fn ask(&self, utterance: &str) -> std::result::Result<String, AssistantFailure> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!(utterance, "assistant request already in flight, dropping utterance");
            return Err(AssistantFailure::Busy);
        }

        let guard = InFlightGuard(Arc::clone(&self.in_flight));
        let endpoint = Arc::clone(&self.endpoint);
        let utterance = utterance.to_string();
        let (tx, rx) = oneshot::channel();

        // The request runs on its own task so an abandoned caller does not
        // cancel it; the reply is then dropped here instead of being spoken.
        tokio::spawn(async move {
            let outcome = endpoint.complete(&utterance).await;
            drop(guard);
            if tx.send(outcome).is_err() {
                tracing::debug!("assistant reply arrived after caller left, discarding");
            }
        });

        rx.await
            .unwrap_or_else(|_| Err(AssistantFailure::Transport("request task ended".to_string())))
    }
}

impl Endpoint {
    async fn complete(&self, utterance: &str) -> std::result::Result<String, AssistantFailure> {
        tracing::debug!(utterance, "sending assistant request");

        let request = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: utterance,
            }],
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "assistant request failed");
                AssistantFailure::Transport(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %body, "assistant API error");
            return Err(AssistantFailure::Status(status.as_u16()));
        }

        let body = response.text().await.map_err(|e| {
            tracing::warn!(error = %e, "failed to read assistant response");
            AssistantFailure::Transport(e.to_string())
        })?;

        let reply = parse_reply(&body)?;
        tracing::info!(reply_len = reply.len(), "assistant replied");
        Ok(reply)
    }
}

/// Extract the first choice's message content from a completion body
fn parse_reply(body: &str) -> std::result::Result<String, AssistantFailure> {
    let response: ChatResponse = serde_json::from_str(body).map_err(|e| {
        tracing::warn!(error = %e, "unexpected assistant response shape");
        AssistantFailure::Malformed(e.to_string())
    })?;

    let content = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| AssistantFailure::Malformed("no choices".to_string()))?
        .message
        .content
        .ok_or_else(|| AssistantFailure::Malformed("choice has no content".to_string()))?;

    if content.trim().is_empty() {
        return Err(AssistantFailure::EmptyReply);
    }

    Ok(content)
}
