//! Text command endpoint
//!
//! Resolves typed utterances through the same dispatcher the voice loop
//! uses, so the chat surface and voice agree on every reply.

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::post};
use serde::Deserialize;

use super::ApiState;
use crate::assistant::Reply;

/// Build command router
#[must_use]
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new().route("/", post(command)).with_state(state)
}

/// Command request
#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub text: String,
}

/// Resolve a typed command to a reply
async fn command(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<CommandRequest>,
) -> Json<Reply> {
    tracing::debug!(text = %request.text, "command received");
    Json(state.dispatcher.resolve_reply(&request.text).await)
}
