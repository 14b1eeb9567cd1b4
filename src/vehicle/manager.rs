//! Connection lifecycle manager
//!
//! Single writer for the vehicle connection state. Every transition runs
//! under one async mutex, so attach, detach and permission events delivered
//! concurrently are applied one at a time in arrival order. Reads go through
//! a snapshot that is only written while that mutex is held.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{Mutex, broadcast};

use super::{
    ConnectionEvent, ConnectionState, DataSink, Device, EVENT_CHANNEL_CAPACITY, Transport,
    TransportKind,
};
use crate::{Error, Result};

/// Owns the vehicle transport and its connection state machine
///
/// ```text
/// Disconnected --attach/connect (usb)--> PermissionPending --grant--> Connected
/// PermissionPending --deny--> Disconnected
/// Disconnected --attach/connect (bluetooth)--> Connected
/// any --detach/disconnect--> Disconnected
/// ```
pub struct ConnectionManager {
    kind: TransportKind,
    endpoint: Option<Device>,
    inner: Mutex<Inner>,
    snapshot: RwLock<Snapshot>,
    latest_data: Arc<RwLock<Option<Vec<u8>>>>,
    events: broadcast::Sender<ConnectionEvent>,
}

struct Inner {
    transport: Box<dyn Transport>,
    state: ConnectionState,
    device: Option<Device>,
}

#[derive(Clone)]
struct Snapshot {
    state: ConnectionState,
    device: Option<Device>,
}

impl ConnectionManager {
    /// Create a manager around a transport
    ///
    /// The transport kind is fixed for the lifetime of the manager.
    #[must_use]
    pub fn new(transport: Box<dyn Transport>) -> Self {
        let kind = transport.kind();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            kind,
            endpoint: None,
            inner: Mutex::new(Inner {
                transport,
                state: ConnectionState::Disconnected,
                device: None,
            }),
            snapshot: RwLock::new(Snapshot {
                state: ConnectionState::Disconnected,
                device: None,
            }),
            latest_data: Arc::new(RwLock::new(None)),
            events,
        }
    }

    /// Set the endpoint used when no device handle comes with the event
    /// (direct Bluetooth connects, permission requests)
    #[must_use]
    pub fn with_endpoint(mut self, id: impl Into<String>) -> Self {
        self.endpoint = Some(Device::new(id, self.kind));
        self
    }

    /// Transport this manager drives
    #[must_use]
    pub const fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Current connection state
    #[must_use]
    pub fn current_state(&self) -> ConnectionState {
        self.snapshot.read().state
    }

    /// Device currently pending or connected
    #[must_use]
    pub fn device(&self) -> Option<Device> {
        self.snapshot.read().device.clone()
    }

    /// Most recent bytes read from the vehicle, kept across reconnects
    #[must_use]
    pub fn latest_data(&self) -> Option<Vec<u8>> {
        self.latest_data.read().clone()
    }

    /// Subscribe to state changes, permission requests and vehicle data
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Ask for a connection over `kind`
    ///
    /// USB links only enter the permission handshake here; the link is opened
    /// once a grant arrives through [`Self::on_permission_result`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportMismatch`] if `kind` is not the configured transport
    pub async fn request_connect(&self, kind: TransportKind) -> Result<()> {
        if kind != self.kind {
            tracing::warn!(configured = %self.kind, requested = %kind, "connect over wrong transport");
            return Err(Error::TransportMismatch {
                configured: self.kind,
                requested: kind,
            });
        }

        let mut inner = self.inner.lock().await;
        match inner.state {
            ConnectionState::Connected => {
                tracing::debug!(transport = %kind, "already connected");
            }
            ConnectionState::PermissionPending => {
                tracing::debug!(transport = %kind, "permission already pending");
            }
            ConnectionState::Disconnected => self.begin(&mut inner).await,
        }

        Ok(())
    }

    /// Handle a device-attached signal from the platform
    pub async fn on_device_attached(&self, kind: TransportKind) {
        if kind != self.kind {
            tracing::debug!(configured = %self.kind, attached = %kind, "ignoring attach for other transport");
            return;
        }

        tracing::info!(transport = %kind, "device attached");

        let mut inner = self.inner.lock().await;
        if inner.state == ConnectionState::Disconnected {
            self.begin(&mut inner).await;
        }
    }

    /// Handle the platform's answer to a permission request
    ///
    /// Only meaningful while a handshake is pending. Redundant grants while
    /// connected, stale grants after a detach and grants for a device other
    /// than the one awaiting permission are ignored.
    pub async fn on_permission_result(&self, granted: bool, device: Option<Device>) {
        let mut inner = self.inner.lock().await;

        if inner.state != ConnectionState::PermissionPending {
            tracing::debug!(
                state = %inner.state,
                granted,
                "ignoring permission result outside handshake"
            );
            return;
        }

        if !granted {
            tracing::info!(transport = %self.kind, "device permission denied");
            inner.device = None;
            self.transition(&mut inner, ConnectionState::Disconnected);
            return;
        }

        let Some(device) = device else {
            tracing::warn!("permission granted without a device handle");
            return;
        };

        if let Some(pending) = inner.device.as_ref()
            && pending.id != device.id
        {
            tracing::debug!(
                pending = %pending.id,
                granted = %device.id,
                "ignoring grant for a device not awaiting permission"
            );
            return;
        }

        tracing::info!(device = %device.id, "device permission granted");
        self.open(&mut inner, device).await;
    }

    /// Handle a device-detached signal; always ends disconnected
    pub async fn on_device_detached(&self) {
        let mut inner = self.inner.lock().await;

        if inner.state == ConnectionState::PermissionPending {
            tracing::info!("device detached during permission handshake");
        } else {
            tracing::info!("device detached");
        }

        self.close(&mut inner).await;
    }

    /// Close the link if open; safe to call when already disconnected
    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        self.close(&mut inner).await;
    }

    /// Forward raw bytes to the vehicle
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] unless connected, or the transport's write error
    pub async fn send(&self, payload: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state != ConnectionState::Connected {
            return Err(Error::NotConnected);
        }

        inner.transport.send(payload).await
    }

    /// Leave `Disconnected`: handshake for USB, direct open otherwise
    async fn begin(&self, inner: &mut Inner) {
        if self.kind.requires_permission() {
            inner.device.clone_from(&self.endpoint);
            self.transition(inner, ConnectionState::PermissionPending);
            let _ = self.events.send(ConnectionEvent::PermissionRequested {
                kind: self.kind,
                device: self.endpoint.clone(),
            });
            tracing::debug!(transport = %self.kind, "requested device permission");
            return;
        }

        match self.endpoint.clone() {
            Some(device) => self.open(inner, device).await,
            None => tracing::warn!(transport = %self.kind, "no endpoint configured, cannot connect"),
        }
    }

    async fn open(&self, inner: &mut Inner, device: Device) {
        let sink = DataSink::new(self.events.clone(), Arc::clone(&self.latest_data));
        match inner.transport.connect(&device, sink).await {
            Ok(()) => {
                tracing::info!(device = %device.id, transport = %self.kind, "vehicle connected");
                inner.device = Some(device);
                self.transition(inner, ConnectionState::Connected);
            }
            Err(e) => {
                tracing::error!(device = %device.id, error = %e, "failed to open vehicle link");
                inner.device = None;
                self.transition(inner, ConnectionState::Disconnected);
            }
        }
    }

    async fn close(&self, inner: &mut Inner) {
        if inner.transport.is_connected() {
            if let Err(e) = inner.transport.disconnect().await {
                tracing::warn!(error = %e, "error closing vehicle link");
            }
        }

        inner.device = None;
        self.transition(inner, ConnectionState::Disconnected);
    }

    fn transition(&self, inner: &mut Inner, to: ConnectionState) {
        let from = inner.state;
        inner.state = to;

        {
            let mut snapshot = self.snapshot.write();
            snapshot.state = to;
            snapshot.device.clone_from(&inner.device);
        }

        if from == to {
            return;
        }

        tracing::info!(%from, %to, "connection state changed");
        // No subscribers is fine
        let _ = self.events.send(ConnectionEvent::StateChanged { from, to });
    }
}
