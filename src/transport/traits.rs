//! Transport trait abstraction for pluggable SPP backends

use anyhow::Result;
use async_trait::async_trait;
use bluer::Address;
use std::collections::HashSet;
use std::fmt;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

/// Well-known Serial Port Profile service class UUID
pub const SPP_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_1101_0000_1000_8000_0080_5F9B_34FB);

/// A previously bonded remote device
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceDescriptor {
    pub address: Address,
    pub name: Option<String>,
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.address),
            None => write!(f, "{}", self.address),
        }
    }
}

/// A duplex byte stream to one remote device
///
/// Closing happens in three steps so the link manager can tear down the
/// inbound side, the outbound side and the socket in a fixed order.
#[async_trait]
pub trait SppStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Whether the underlying transport still reports the link as up
    fn is_connected(&self) -> bool;

    /// Stop accepting inbound data
    fn close_input(&mut self) -> io::Result<()>;

    /// Flush and shut down the outbound side
    async fn close_output(&mut self) -> io::Result<()>;

    /// Release the socket
    fn close(&mut self) -> io::Result<()>;
}

/// Platform side of the link: adapter state, device lookup, stream factory
#[async_trait]
pub trait BluetoothBackend: Send + Sync {
    /// The stream type this backend produces
    type Stream: SppStream;

    /// True iff a local radio exists and is powered on
    async fn is_available(&self) -> bool;

    /// Check that the address refers to a device the platform knows about
    async fn resolve(&self, address: Address) -> Result<()>;

    /// Stop any device discovery that would contend with a connect
    async fn cancel_discovery(&self) -> Result<()>;

    /// Open a stream to `service` on the remote device
    async fn open(&self, address: Address, service: Uuid) -> Result<Self::Stream>;

    /// Devices bonded at the OS level
    async fn paired_devices(&self) -> Result<HashSet<DeviceDescriptor>>;

    /// Human-readable name for this backend
    fn name(&self) -> &'static str;
}
