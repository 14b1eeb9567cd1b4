//! Serial transport
//!
//! USB serial adaptors and Bluetooth serial (RFCOMM/SPP) bindings both show
//! up as serial ports, so one transport covers both links. The kind only
//! decides whether a permission handshake precedes the open.

use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serialport::SerialPort;

use super::{DataSink, Device, Transport, TransportKind};
use crate::{Error, Result};

/// Default baud rate of the vehicle firmware
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Write timeout for a single frame; also how often the reader checks for close
const IO_TIMEOUT: Duration = Duration::from_millis(500);

/// Read buffer size
const READ_CHUNK: usize = 256;

/// Serial port link to the vehicle controller
pub struct SerialTransport {
    kind: TransportKind,
    baud_rate: u32,
    link: Option<Link>,
}

/// An open port: the writer half behind a lock, the reader on its own clone
struct Link {
    port: Arc<Mutex<Box<dyn SerialPort>>>,
    closed: Arc<AtomicBool>,
}

impl SerialTransport {
    /// Create a closed transport
    #[must_use]
    pub const fn new(kind: TransportKind, baud_rate: u32) -> Self {
        Self {
            kind,
            baud_rate,
            link: None,
        }
    }

    /// Take over an open port and start reading from it
    fn attach(&mut self, port: Box<dyn SerialPort>, sink: DataSink) -> Result<()> {
        let reader = port.try_clone()?;
        let closed = Arc::new(AtomicBool::new(false));

        let reader_closed = Arc::clone(&closed);
        tokio::task::spawn_blocking(move || read_loop(reader, &sink, &reader_closed));

        self.link = Some(Link {
            port: Arc::new(Mutex::new(port)),
            closed,
        });
        Ok(())
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn connect(&mut self, device: &Device, sink: DataSink) -> Result<()> {
        if self.link.is_some() {
            return Ok(());
        }

        let path = device.id.clone();
        let baud_rate = self.baud_rate;

        let port = tokio::task::spawn_blocking(move || {
            let mut port = serialport::new(&path, baud_rate)
                .timeout(IO_TIMEOUT)
                .open()?;
            // Boards that reset on DTR need it raised before they talk
            if let Err(e) = port.write_data_terminal_ready(true) {
                tracing::debug!(error = %e, "could not raise DTR");
            }
            Ok::<_, Error>(port)
        })
        .await
        .map_err(|e| Error::Transport(format!("serial open task failed: {e}")))??;

        self.attach(port, sink)?;
        tracing::debug!(port = %device.id, baud_rate, "serial port opened");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(link) = self.link.take() {
            link.closed.store(true, Ordering::SeqCst);
            let port = link.port.lock();
            tracing::debug!(port = port.name().unwrap_or_default(), "serial port closed");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    async fn send(&mut self, payload: &[u8]) -> Result<()> {
        let port = self
            .link
            .as_ref()
            .map(|link| Arc::clone(&link.port))
            .ok_or(Error::NotConnected)?;
        let data = payload.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut port = port.lock();
            port.write_all(&data).and_then(|()| port.flush())
        })
        .await
        .map_err(|e| Error::Transport(format!("serial write task failed: {e}")))?
        .map_err(|e| Error::Transport(format!("serial write failed: {e}")))
    }
}

/// Forward everything read from `port` to `sink` until the link closes
fn read_loop(mut port: Box<dyn SerialPort>, sink: &DataSink, closed: &AtomicBool) {
    let mut buf = [0u8; READ_CHUNK];

    while !closed.load(Ordering::SeqCst) {
        match port.read(&mut buf) {
            Ok(0) => {
                tracing::debug!("serial port reached end of stream");
                break;
            }
            Ok(n) => sink.publish(buf[..n].to_vec()),
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted) => {}
            Err(e) => {
                if !closed.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "serial read failed, reader stopped");
                }
                break;
            }
        }
    }

    tracing::debug!("serial reader stopped");
}

/// List serial ports visible to this host
///
/// # Errors
///
/// Returns error if the platform port enumeration fails
pub fn list_ports() -> Result<Vec<String>> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|p| match p.port_type {
            serialport::SerialPortType::UsbPort(usb) => format!(
                "{} (usb {:04x}:{:04x}{})",
                p.port_name,
                usb.vid,
                usb.pid,
                usb.product.map(|name| format!(" {name}")).unwrap_or_default()
            ),
            serialport::SerialPortType::BluetoothPort => format!("{} (bluetooth)", p.port_name),
            _ => p.port_name,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use parking_lot::RwLock;
    use tokio::sync::broadcast;

    use super::*;
    use crate::vehicle::{ConnectionEvent, EVENT_CHANNEL_CAPACITY};

    #[tokio::test]
    async fn starts_closed() {
        let transport = SerialTransport::new(TransportKind::Usb, DEFAULT_BAUD_RATE);
        assert!(!transport.is_connected());
        assert_eq!(transport.kind(), TransportKind::Usb);
    }

    #[tokio::test]
    async fn send_without_port_fails() {
        let mut transport = SerialTransport::new(TransportKind::Bluetooth, DEFAULT_BAUD_RATE);
        assert!(matches!(transport.send(b"x").await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn disconnect_when_closed_is_ok() {
        let mut transport = SerialTransport::new(TransportKind::Usb, DEFAULT_BAUD_RATE);
        assert!(transport.disconnect().await.is_ok());
    }

    #[tokio::test]
    async fn open_missing_port_fails() {
        let mut transport = SerialTransport::new(TransportKind::Usb, DEFAULT_BAUD_RATE);
        let device = Device::new("/dev/rover-does-not-exist", TransportKind::Usb);
        let (sink, _events) = test_sink();
        assert!(transport.connect(&device, sink).await.is_err());
        assert!(!transport.is_connected());
    }

    fn test_sink() -> (DataSink, broadcast::Receiver<ConnectionEvent>) {
        let (events, rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        (DataSink::new(events, Arc::new(RwLock::new(None))), rx)
    }

    /// Open transport over one end of a pseudo-terminal; the test holds the other
    #[cfg(unix)]
    fn pty_transport() -> (
        SerialTransport,
        serialport::TTYPort,
        broadcast::Receiver<ConnectionEvent>,
    ) {
        let (mut vehicle_end, host_end) = serialport::TTYPort::pair().unwrap();
        vehicle_end.set_timeout(Duration::from_secs(2)).unwrap();

        let (sink, events) = test_sink();
        let mut transport = SerialTransport::new(TransportKind::Usb, DEFAULT_BAUD_RATE);
        transport.attach(Box::new(host_end), sink).unwrap();
        (transport, vehicle_end, events)
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn bytes_from_vehicle_are_published() {
        let (mut transport, mut vehicle_end, mut events) = pty_transport();

        vehicle_end.write_all(b"sonar 42\n").unwrap();
        vehicle_end.flush().unwrap();

        let received = tokio::time::timeout(Duration::from_secs(5), async {
            let mut received = Vec::new();
            while !String::from_utf8_lossy(&received).contains("sonar 42") {
                match events.recv().await {
                    Ok(ConnectionEvent::DataReceived { data }) => received.extend(data),
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            received
        })
        .await
        .unwrap();

        assert!(String::from_utf8_lossy(&received).contains("sonar 42"));
        transport.disconnect().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn port_survives_repeated_writes() {
        let (mut transport, vehicle_end, _events) = pty_transport();

        transport.send(b"c1,").await.unwrap();
        transport.send(b"1").await.unwrap();
        assert!(transport.is_connected());

        let read = tokio::task::spawn_blocking(move || {
            let mut vehicle_end = vehicle_end;
            let mut got = Vec::new();
            let mut buf = [0u8; 16];
            while got.len() < 4 {
                let n = vehicle_end.read(&mut buf).unwrap();
                got.extend_from_slice(&buf[..n]);
            }
            got
        })
        .await
        .unwrap();

        assert_eq!(read, b"c1,1");
        transport.disconnect().await.unwrap();
        assert!(!transport.is_connected());
        assert!(matches!(transport.send(b"x").await, Err(Error::NotConnected)));
    }
}
