//! TCP simulation backend for development without a Bluetooth radio

use crate::transport::traits::{BluetoothBackend, DeviceDescriptor, SppStream};
use anyhow::{bail, Result};
use async_trait::async_trait;
use bluer::Address;
use std::collections::HashSet;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tracing::info;
use uuid::Uuid;

/// Name reported for the simulated paired device
pub const SIMULATED_DEVICE_NAME: &str = "meter-sim";

/// TCP stream wrapper implementing SppStream
pub struct TcpLinkStream {
    inner: Option<TcpStream>,
    input_open: bool,
}

impl TcpLinkStream {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            inner: Some(stream),
            input_open: true,
        }
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "TCP stream closed")
}

impl AsyncRead for TcpLinkStream {
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

impl AsyncWrite for TcpLinkStream {
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
impl SppStream for TcpLinkStream {
    fn is_connected(&self) -> bool {
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

/// Backend that routes one simulated device address to a TCP endpoint
pub struct TcpBackend {
    endpoint: String,
    device: DeviceDescriptor,
}

impl TcpBackend {
    /// Create a backend whose only paired device is `address`
    pub fn new(endpoint: impl Into<String>, address: Address) -> Self {
        Self {
            endpoint: endpoint.into(),
            device: DeviceDescriptor {
                address,
                name: Some(SIMULATED_DEVICE_NAME.into()),
            },
        }
    }
}

#[async_trait]
impl BluetoothBackend for TcpBackend {
    type Stream = TcpLinkStream;

    async fn is_available(&self) -> bool {
        true
    }

    async fn resolve(&self, address: Address) -> Result<()> {
        if address != self.device.address {
            bail!("Device {} is not paired with the simulator", address);
        }
        Ok(())
    }

    async fn cancel_discovery(&self) -> Result<()> {
        Ok(())
    }

    async fn open(&self, address: Address, _service: Uuid) -> Result<Self::Stream> {
        info!("[TCP] Connecting {} via {}", address, self.endpoint);
        let stream = TcpStream::connect(&self.endpoint).await?;
        stream.set_nodelay(true)?;
        Ok(TcpLinkStream::new(stream))
    }

    async fn paired_devices(&self) -> Result<HashSet<DeviceDescriptor>> {
        Ok(HashSet::from([self.device.clone()]))
    }

    fn name(&self) -> &'static str {
        "TCP simulation"
    }
}
