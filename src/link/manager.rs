//! SPP link manager: one duplex stream to one paired device

use crate::link::error::LinkError;
use crate::transport::{BluetoothBackend, DeviceDescriptor, SppStream, SPP_SERVICE_UUID};
use bluer::Address;
use std::collections::HashSet;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Bytes requested per read
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;

/// Link lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkState::Disconnected => write!(f, "disconnected"),
            LinkState::Connecting => write!(f, "connecting"),
            LinkState::Connected => write!(f, "connected"),
        }
    }
}

/// Configuration for the link manager
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Size of the buffer handed to each read
    pub read_buffer_size: usize,
    /// Upper bound on a single read; `None` waits as long as the remote does
    pub read_timeout: Option<Duration>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            read_timeout: None,
        }
    }
}

struct Connection<S> {
    address: Address,
    stream: S,
    /// Cleared on I/O failure; may lag behind the transport's real state
    alive: bool,
}

/// Owns at most one SPP connection and exposes best-effort I/O on it
///
/// Callers serialise access; the manager holds no lock of its own. Read and
/// write failures clear the liveness flag but keep the stream until
/// [`LinkManager::disconnect`] runs.
pub struct LinkManager<B: BluetoothBackend> {
    backend: B,
    config: LinkConfig,
    state: LinkState,
    connection: Option<Connection<B::Stream>>,
}

impl<B: BluetoothBackend> LinkManager<B> {
    pub fn new(backend: B, config: LinkConfig) -> Self {
        Self {
            backend,
            config,
            state: LinkState::Disconnected,
            connection: None,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Address of the device the current stream belongs to
    pub fn remote_address(&self) -> Option<Address> {
        self.connection.as_ref().map(|c| c.address)
    }

    /// Whether a stream handle is still held, live or not
    pub fn holds_stream(&self) -> bool {
        self.connection.is_some()
    }

    /// True iff the local radio exists and is powered on
    pub async fn is_transport_available(&self) -> bool {
        self.backend.is_available().await
    }

    /// Open an SPP stream to `address`, replacing any existing connection
    pub async fn connect(&mut self, address: &str) -> Result<(), LinkError> {
        if !self.backend.is_available().await {
            error!("[LINK] {} transport unavailable", self.backend.name());
            return Err(LinkError::TransportUnavailable);
        }

        let remote: Address = address
            .trim()
            .parse()
            .map_err(|e| LinkError::unreachable(address, format!("invalid address: {}", e)))?;

        if let Err(e) = self.backend.resolve(remote).await {
            error!("[LINK] Could not resolve {}: {}", remote, e);
            return Err(LinkError::unreachable(address, e));
        }

        self.disconnect().await;
        self.state = LinkState::Connecting;

        if let Err(e) = self.backend.cancel_discovery().await {
            debug!("[LINK] Could not cancel discovery: {}", e);
        }

        match self.backend.open(remote, SPP_SERVICE_UUID).await {
            Ok(stream) => {
                self.connection = Some(Connection {
                    address: remote,
                    stream,
                    alive: true,
                });
                self.state = LinkState::Connected;
                info!("[LINK] Connected to {} via {}", remote, self.backend.name());
                Ok(())
            }
            Err(e) => {
                error!("[LINK] Failed to connect to {}: {}", remote, e);
                self.disconnect().await;
                Err(LinkError::unreachable(address, e))
            }
        }
    }

    /// Close input, output and socket in that order; close errors are ignored
    pub async fn disconnect(&mut self) {
        if let Some(mut conn) = self.connection.take() {
            if let Err(e) = conn.stream.close_input() {
                debug!("[LINK] Closing input: {}", e);
            }
            if let Err(e) = conn.stream.close_output().await {
                debug!("[LINK] Closing output: {}", e);
            }
            if let Err(e) = conn.stream.close() {
                debug!("[LINK] Closing socket: {}", e);
            }
            info!("[LINK] Disconnected from {}", conn.address);
        }
        self.state = LinkState::Disconnected;
    }

    /// Liveness flag set and the transport still reports a link
    pub fn is_connected(&self) -> bool {
        self.connection
            .as_ref()
            .map(|c| c.alive && c.stream.is_connected())
            .unwrap_or(false)
    }

    /// One bounded read, decoded and trimmed
    ///
    /// Returns `Ok(None)` when the read yields no bytes. Without a configured
    /// read timeout a silent remote blocks this call indefinitely.
    pub async fn read(&mut self) -> Result<Option<String>, LinkError> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        let Some(conn) = self.connection.as_mut() else {
            return Err(LinkError::NotConnected);
        };

        let mut buf = vec![0u8; self.config.read_buffer_size];
        let result = match self.config.read_timeout {
            Some(limit) => match timeout(limit, conn.stream.read(&mut buf)).await {
                Ok(result) => result,
                Err(_) => {
                    debug!("[LINK] No data from {} within {:?}", conn.address, limit);
                    return Ok(None);
                }
            },
            None => conn.stream.read(&mut buf).await,
        };

        match result {
            Ok(0) => Ok(None),
            Ok(n) => {
                let text = String::from_utf8_lossy(&buf[..n]).trim().to_string();
                debug!("[LINK] Received: {}", text);
                Ok(Some(text))
            }
            Err(e) => {
                warn!("[LINK] Read from {} failed: {}", conn.address, e);
                conn.alive = false;
                self.state = LinkState::Disconnected;
                Err(LinkError::Io(e))
            }
        }
    }

    /// Write the UTF-8 bytes of `data` and flush
    pub async fn write(&mut self, data: &str) -> Result<(), LinkError> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        let Some(conn) = self.connection.as_mut() else {
            return Err(LinkError::NotConnected);
        };

        let result = async {
            conn.stream.write_all(data.as_bytes()).await?;
            conn.stream.flush().await
        }
        .await;

        match result {
            Ok(()) => {
                debug!("[LINK] Sent: {}", data);
                Ok(())
            }
            Err(e) => {
                warn!("[LINK] Write to {} failed: {}", conn.address, e);
                conn.alive = false;
                self.state = LinkState::Disconnected;
                Err(LinkError::Io(e))
            }
        }
    }

    /// Bonded devices; empty when the transport is down or the query fails
    pub async fn list_paired_devices(&self) -> HashSet<DeviceDescriptor> {
        if !self.backend.is_available().await {
            return HashSet::new();
        }
        match self.backend.paired_devices().await {
            Ok(devices) => devices,
            Err(e) => {
                warn!("[LINK] Could not list paired devices: {}", e);
                HashSet::new()
            }
        }
    }
}
