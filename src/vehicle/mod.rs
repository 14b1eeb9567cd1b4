//! Vehicle link
//!
//! The vehicle controller is reached over an opaque byte transport (USB
//! serial or a Bluetooth serial profile). [`ConnectionManager`] owns the
//! transport and the connection state machine; everything else observes it.

mod manager;
mod serial;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub use manager::ConnectionManager;
pub use serial::{DEFAULT_BAUD_RATE, SerialTransport, list_ports};

use crate::{Error, Result};

/// Capacity of the connection event broadcast channel
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Physical link used to reach the vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// USB serial; opening requires a permission handshake
    Usb,
    /// Bluetooth serial profile; no permission step
    Bluetooth,
}

impl TransportKind {
    /// Whether the platform must grant access before the link may be opened
    #[must_use]
    pub const fn requires_permission(self) -> bool {
        matches!(self, Self::Usb)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Usb => write!(f, "usb"),
            Self::Bluetooth => write!(f, "bluetooth"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "usb" => Ok(Self::Usb),
            "bluetooth" | "bt" => Ok(Self::Bluetooth),
            other => Err(Error::Config(format!("unknown transport: {other}"))),
        }
    }
}

/// Handle to an attached physical endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Platform identifier of the endpoint (serial port path)
    pub id: String,
    /// Link the endpoint is reached over
    pub kind: TransportKind,
}

impl Device {
    /// Create a device handle
    #[must_use]
    pub fn new(id: impl Into<String>, kind: TransportKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No link open
    Disconnected,
    /// Waiting for the platform to grant access to the device
    PermissionPending,
    /// Link open
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::PermissionPending => write!(f, "permission_pending"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Event republished by the connection manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionEvent {
    /// State transition
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// The platform layer should ask for access and answer with a permission result
    PermissionRequested {
        kind: TransportKind,
        device: Option<Device>,
    },
    /// Bytes read from the vehicle
    DataReceived { data: Vec<u8> },
}

/// Where a transport delivers bytes read from the vehicle
///
/// Cheap to clone and safe to call from blocking reader threads. Each chunk
/// is republished as [`ConnectionEvent::DataReceived`] and kept as the
/// latest received data.
#[derive(Clone)]
pub struct DataSink {
    events: broadcast::Sender<ConnectionEvent>,
    latest: Arc<RwLock<Option<Vec<u8>>>>,
}

impl DataSink {
    pub(crate) const fn new(
        events: broadcast::Sender<ConnectionEvent>,
        latest: Arc<RwLock<Option<Vec<u8>>>>,
    ) -> Self {
        Self { events, latest }
    }

    /// Publish one chunk read from the link
    pub fn publish(&self, data: Vec<u8>) {
        if data.is_empty() {
            return;
        }

        tracing::trace!(bytes = data.len(), "vehicle data received");
        *self.latest.write() = Some(data.clone());
        // No subscribers is fine
        let _ = self.events.send(ConnectionEvent::DataReceived { data });
    }
}

/// Opaque bidirectional channel to the vehicle
///
/// The wire protocol spoken over the link belongs to the vehicle firmware;
/// transports only open, close and move bytes.
#[async_trait]
pub trait Transport: Send {
    /// Link this transport speaks
    fn kind(&self) -> TransportKind;

    /// Open the link to `device`; bytes read from it go to `sink` until
    /// the link is closed
    async fn connect(&mut self, device: &Device, sink: DataSink) -> Result<()>;

    /// Close the link; closing a closed link is not an error
    async fn disconnect(&mut self) -> Result<()>;

    /// Whether the link is open
    fn is_connected(&self) -> bool;

    /// Write raw bytes to the vehicle
    async fn send(&mut self, payload: &[u8]) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_kind_parse() {
        assert_eq!("usb".parse::<TransportKind>().unwrap(), TransportKind::Usb);
        assert_eq!(" USB ".parse::<TransportKind>().unwrap(), TransportKind::Usb);
        assert_eq!(
            "Bluetooth".parse::<TransportKind>().unwrap(),
            TransportKind::Bluetooth
        );
        assert!("serial".parse::<TransportKind>().is_err());
    }

    #[test]
    fn only_usb_needs_permission() {
        assert!(TransportKind::Usb.requires_permission());
        assert!(!TransportKind::Bluetooth.requires_permission());
    }

    #[test]
    fn event_serialization() {
        let event = ConnectionEvent::StateChanged {
            from: ConnectionState::PermissionPending,
            to: ConnectionState::Connected,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "state_changed");
        assert_eq!(json["from"], "permission_pending");
        assert_eq!(json["to"], "connected");
    }

    #[tokio::test]
    async fn sink_publishes_and_keeps_latest() {
        let (events, mut rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let latest = Arc::new(RwLock::new(None));
        let sink = DataSink::new(events, Arc::clone(&latest));

        sink.publish(Vec::new());
        sink.publish(b"b42\n".to_vec());

        assert_eq!(
            rx.recv().await.unwrap(),
            ConnectionEvent::DataReceived {
                data: b"b42\n".to_vec()
            }
        );
        assert!(rx.try_recv().is_err());
        assert_eq!(latest.read().as_deref(), Some(&b"b42\n"[..]));
    }
}
