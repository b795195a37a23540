//! RFCOMM backend for SPP links through BlueZ

use crate::transport::traits::{BluetoothBackend, DeviceDescriptor, SppStream};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use bluer::rfcomm::{Profile, ProfileHandle, ReqError, Role, Stream as RfcommStream};
use bluer::{Adapter, Address, Device, Session};
use futures::StreamExt;
use std::collections::HashSet;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default time allowed for BlueZ to hand over an SPP connection
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// RFCOMM stream wrapper implementing SppStream
pub struct RfcommLinkStream {
    inner: Option<RfcommStream>,
    input_open: bool,
    /// BlueZ shuts the socket down when the profile is unregistered
    _profile: ProfileHandle,
}

impl RfcommLinkStream {
    fn new(stream: RfcommStream, profile: ProfileHandle) -> Self {
        Self {
            inner: Some(stream),
            input_open: true,
            _profile: profile,
        }
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "RFCOMM stream closed")
}

impl AsyncRead for RfcommLinkStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.input_open {
            return Poll::Ready(Err(closed()));
        }
        match self.inner.as_mut() {
            Some(inner) => Pin::new(inner).poll_read(cx, buf),
            None => Poll::Ready(Err(closed())),
        }
    }
}

impl AsyncWrite for RfcommLinkStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.inner.as_mut() {
            Some(inner) => Pin::new(inner).poll_write(cx, buf),
            None => Poll::Ready(Err(closed())),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.inner.as_mut() {
            Some(inner) => Pin::new(inner).poll_flush(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.inner.as_mut() {
            Some(inner) => Pin::new(inner).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}

#[async_trait]
impl SppStream for RfcommLinkStream {
    fn is_connected(&self) -> bool {
        // The kernel refuses getpeername once the RFCOMM DLC leaves BT_CONNECTED
        self.inner
            .as_ref()
            .map(|s| s.peer_addr().is_ok())
            .unwrap_or(false)
    }

    fn close_input(&mut self) -> io::Result<()> {
        self.input_open = false;
        Ok(())
    }

    async fn close_output(&mut self) -> io::Result<()> {
        match self.inner.as_mut() {
            Some(inner) => inner.shutdown().await,
            None => Ok(()),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        self.inner.take();
        Ok(())
    }
}

/// Configuration for the RFCOMM backend
#[derive(Debug, Clone)]
pub struct RfcommConfig {
    /// Adapter to use (e.g. "hci0"); the default adapter when unset
    pub adapter_name: Option<String>,
    /// How long to wait for the profile connection
    pub connect_timeout: Duration,
}

impl Default for RfcommConfig {
    fn default() -> Self {
        Self {
            adapter_name: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// BlueZ-backed SPP client
pub struct RfcommBackend {
    session: Session,
    adapter: Option<Adapter>,
    config: RfcommConfig,
}

impl RfcommBackend {
    /// Open a BlueZ session and pick the configured adapter
    ///
    /// A missing adapter is not an error here; the backend then reports
    /// itself unavailable.
    pub async fn new(config: RfcommConfig) -> Result<Self> {
        let session = Session::new().await?;
        let adapter = match &config.adapter_name {
            Some(name) => session.adapter(name).ok(),
            None => session.default_adapter().await.ok(),
        };

        match &adapter {
            Some(adapter) => info!("[BT] Using adapter {}", adapter.name()),
            None => warn!("[BT] No Bluetooth adapter found"),
        }

        Ok(Self {
            session,
            adapter,
            config,
        })
    }

    fn adapter(&self) -> Result<&Adapter> {
        self.adapter
            .as_ref()
            .ok_or_else(|| anyhow!("No Bluetooth adapter"))
    }
}

/// Descriptor for `address` when BlueZ reports it paired
async fn paired_descriptor(
    adapter: &Adapter,
    address: Address,
) -> Result<Option<DeviceDescriptor>> {
    let device = adapter.device(address)?;
    if !device.is_paired().await? {
        return Ok(None);
    }
    Ok(Some(DeviceDescriptor {
        address,
        name: device.name().await?,
    }))
}

/// Keep the paired devices, skipping any whose properties could not be read
fn collect_paired(
    entries: impl IntoIterator<Item = (Address, Result<Option<DeviceDescriptor>>)>,
) -> HashSet<DeviceDescriptor> {
    let mut devices = HashSet::new();
    for (address, entry) in entries {
        match entry {
            Ok(Some(descriptor)) => {
                devices.insert(descriptor);
            }
            Ok(None) => {}
            Err(e) => debug!("[BT] Skipping {}: {}", address, e),
        }
    }
    devices
}

/// Ask BlueZ to connect the profile and accept the stream it hands back
async fn accept_profile_connection(
    device: &Device,
    handle: &mut ProfileHandle,
    service: Uuid,
) -> Result<RfcommStream> {
    let address = device.address();
    let connect_profile = device.connect_profile(&service);
    tokio::pin!(connect_profile);
    let mut profile_connected = false;

    loop {
        tokio::select! {
            res = &mut connect_profile, if !profile_connected => {
                res.map_err(|e| anyhow!("Profile connect failed: {}", e))?;
                profile_connected = true;
            }
            req = handle.next() => {
                let req = req.ok_or_else(|| anyhow!("Profile unregistered during connect"))?;
                if req.device() == address {
                    return req
                        .accept()
                        .map_err(|e| anyhow!("RFCOMM accept failed: {}", e));
                }
                debug!("[BT] Rejecting unexpected connection from {}", req.device());
                req.reject(ReqError::Rejected);
            }
        }
    }
}

#[async_trait]
impl BluetoothBackend for RfcommBackend {
    type Stream = RfcommLinkStream;

    async fn is_available(&self) -> bool {
        match &self.adapter {
            Some(adapter) => adapter.is_powered().await.unwrap_or(false),
            None => false,
        }
    }

    async fn resolve(&self, address: Address) -> Result<()> {
        let adapter = self.adapter()?;
        if !adapter.device_addresses().await?.contains(&address) {
            bail!("Device {} is not known to {}", address, adapter.name());
        }
        Ok(())
    }

    async fn cancel_discovery(&self) -> Result<()> {
        // BlueZ scopes discovery to the D-Bus client that started it and this
        // backend never starts one, so a running scan belongs to someone else.
        let adapter = self.adapter()?;
        if adapter.is_discovering().await? {
            debug!("[BT] Another client is scanning on {}", adapter.name());
        }
        Ok(())
    }

    async fn open(&self, address: Address, service: Uuid) -> Result<Self::Stream> {
        let adapter = self.adapter()?;
        let device = adapter.device(address)?;

        let profile = Profile {
            uuid: service,
            role: Some(Role::Client),
            require_authentication: Some(false),
            require_authorization: Some(false),
            auto_connect: Some(false),
            ..Default::default()
        };
        let mut handle = self.session.register_profile(profile).await?;

        info!("[BT] Connecting to {} service {}", address, service);
        let stream = timeout(
            self.config.connect_timeout,
            accept_profile_connection(&device, &mut handle, service),
        )
        .await
        .map_err(|_| anyhow!("RFCOMM connect timed out after {:?}", self.config.connect_timeout))??;

        info!("[BT] Connected to {}", address);
        Ok(RfcommLinkStream::new(stream, handle))
    }

    async fn paired_devices(&self) -> Result<HashSet<DeviceDescriptor>> {
        let adapter = self.adapter()?;
        let mut entries = Vec::new();
        for address in adapter.device_addresses().await? {
            entries.push((address, paired_descriptor(adapter, address).await));
        }
        Ok(collect_paired(entries))
    }

    fn name(&self) -> &'static str {
        "Bluetooth"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RfcommConfig::default();
        assert!(config.adapter_name.is_none());
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
    }

    #[test]
    fn test_unreadable_device_does_not_hide_others() {
        let meter = Address::new([0x98, 0xD3, 0x31, 0xF5, 0x12, 0x34]);
        let headset = Address::new([0x00, 0x1A, 0x7D, 0xDA, 0x71, 0x13]);
        let stale = Address::new([0x00, 0x1A, 0x7D, 0xDA, 0x71, 0x14]);

        let devices = collect_paired(vec![
            (stale, Err(anyhow!("org.bluez.Error.DoesNotExist"))),
            (
                meter,
                Ok(Some(DeviceDescriptor {
                    address: meter,
                    name: Some("HC-05".into()),
                })),
            ),
            (headset, Ok(None)),
        ]);

        assert_eq!(devices.len(), 1);
        assert!(devices.iter().any(|d| d.address == meter));
    }
}
