//! Vehicle connection endpoints
//!
//! Delivers attach, detach and permission events to the connection manager
//! and reports its state and the latest data read from the vehicle.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiState};
use crate::Error;
use crate::vehicle::{ConnectionState, Device, TransportKind};

/// Build vehicle router
#[must_use]
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/", get(status))
        .route("/connect", post(connect))
        .route("/disconnect", post(disconnect))
        .route("/attach", post(attach))
        .route("/detach", post(detach))
        .route("/permission", post(permission))
        .route("/data", get(data))
        .with_state(state)
}

/// Connection status response
#[derive(Debug, Serialize)]
pub struct VehicleStatus {
    pub state: ConnectionState,
    pub transport: TransportKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<Device>,
}

/// Latest data read from the vehicle
#[derive(Debug, Serialize)]
pub struct VehicleData {
    /// Lossy UTF-8 text of the last chunk
    pub data: Option<String>,
    pub bytes: usize,
}

/// Body for connect and attach; defaults to the configured transport
#[derive(Debug, Default, Deserialize)]
pub struct TransportRequest {
    pub transport: Option<TransportKind>,
}

/// Platform permission decision
#[derive(Debug, Deserialize)]
pub struct PermissionRequest {
    pub granted: bool,
    /// Port path; defaults to the device awaiting permission
    pub device: Option<String>,
}

fn snapshot(state: &ApiState) -> VehicleStatus {
    VehicleStatus {
        state: state.connection.current_state(),
        transport: state.connection.kind(),
        device: state.connection.device(),
    }
}

/// Get connection status
async fn status(State(state): State<Arc<ApiState>>) -> Json<VehicleStatus> {
    Json(snapshot(&state))
}

/// Request a connection
async fn connect(
    State(state): State<Arc<ApiState>>,
    body: Option<Json<TransportRequest>>,
) -> Result<Json<VehicleStatus>, ApiError> {
    let kind = requested_kind(&state, body);

    match state.connection.request_connect(kind).await {
        Ok(()) => Ok(Json(snapshot(&state))),
        Err(e @ Error::TransportMismatch { .. }) => Err(ApiError::Conflict(e.to_string())),
        Err(e) => Err(ApiError::BadRequest(e.to_string())),
    }
}

/// Close the link
async fn disconnect(State(state): State<Arc<ApiState>>) -> Json<VehicleStatus> {
    state.connection.disconnect().await;
    Json(snapshot(&state))
}

/// A device of `transport` was attached
async fn attach(
    State(state): State<Arc<ApiState>>,
    body: Option<Json<TransportRequest>>,
) -> Json<VehicleStatus> {
    let kind = requested_kind(&state, body);
    state.connection.on_device_attached(kind).await;
    Json(snapshot(&state))
}

/// The device was detached
async fn detach(State(state): State<Arc<ApiState>>) -> Json<VehicleStatus> {
    state.connection.on_device_detached().await;
    Json(snapshot(&state))
}

/// Deliver a permission decision
async fn permission(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<PermissionRequest>,
) -> Json<VehicleStatus> {
    let kind = state.connection.kind();
    let device = request
        .device
        .map(|id| Device::new(id, kind))
        .or_else(|| state.connection.device());

    state
        .connection
        .on_permission_result(request.granted, device)
        .await;
    Json(snapshot(&state))
}

/// Get the latest data read from the vehicle
async fn data(State(state): State<Arc<ApiState>>) -> Json<VehicleData> {
    let latest = state.connection.latest_data();
    Json(VehicleData {
        bytes: latest.as_ref().map_or(0, Vec::len),
        data: latest.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()),
    })
}

fn requested_kind(state: &ApiState, body: Option<Json<TransportRequest>>) -> TransportKind {
    body.and_then(|Json(req)| req.transport)
        .unwrap_or_else(|| state.connection.kind())
}
