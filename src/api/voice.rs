//! Voice loop status endpoint

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use super::ApiState;
use crate::voice::VoiceSessionState;

/// Build voice router
#[must_use]
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new().route("/", get(status)).with_state(state)
}

/// Voice loop status response
#[derive(Debug, Serialize)]
pub struct VoiceStatus {
    pub enabled: bool,
    pub running: bool,
    pub state: VoiceSessionState,
}

/// Get voice loop status
async fn status(State(state): State<Arc<ApiState>>) -> Json<VoiceStatus> {
    let Some(voice) = state.voice.as_ref() else {
        return Json(VoiceStatus {
            enabled: false,
            running: false,
            state: VoiceSessionState::Idle,
        });
    };

    Json(VoiceStatus {
        enabled: true,
        running: voice.is_running().await,
        state: voice.state(),
    })
}
