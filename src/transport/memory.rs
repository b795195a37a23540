//! Scripted in-memory backend for exercising the link without hardware

use crate::transport::traits::{BluetoothBackend, DeviceDescriptor, SppStream};
use anyhow::{bail, Result};
use async_trait::async_trait;
use bluer::Address;
use std::collections::{HashSet, VecDeque};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use uuid::Uuid;

/// What the next read on a memory stream yields
#[derive(Debug, Clone)]
pub enum ScriptedRead {
    Data(String),
    Fail(io::ErrorKind),
    Eof,
    /// Never completes, like a silent remote
    Stall,
}

#[derive(Debug, Default)]
struct ProbeState {
    reads: VecDeque<ScriptedRead>,
    reads_served: usize,
    written: Vec<u8>,
    write_error: Option<io::ErrorKind>,
    transport_up: bool,
    closes: Vec<&'static str>,
    backend_calls: Vec<&'static str>,
}

/// Shared view into the streams a memory backend hands out
#[derive(Debug, Clone, Default)]
pub struct LinkProbe {
    state: Arc<Mutex<ProbeState>>,
}

impl LinkProbe {
    fn lock(&self) -> MutexGuard<'_, ProbeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push_read(&self, read: ScriptedRead) {
        self.lock().reads.push_back(read);
    }

    pub fn push_data(&self, text: &str) {
        self.push_read(ScriptedRead::Data(text.into()));
    }

    pub fn reads_served(&self) -> usize {
        self.lock().reads_served
    }

    pub fn written(&self) -> String {
        String::from_utf8_lossy(&self.lock().written).into_owned()
    }

    pub fn fail_writes(&self, kind: io::ErrorKind) {
        self.lock().write_error = Some(kind);
    }

    /// Simulate the radio link dropping underneath the manager
    pub fn drop_transport(&self) {
        self.lock().transport_up = false;
    }

    pub fn closes(&self) -> Vec<&'static str> {
        self.lock().closes.clone()
    }

    /// Discovery cancels and opens, in the order the backend saw them
    pub fn backend_calls(&self) -> Vec<&'static str> {
        self.lock().backend_calls.clone()
    }
}

pub struct MemoryStream {
    probe: LinkProbe,
}

impl AsyncRead for MemoryStream {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut state = self.probe.lock();
        let next = state.reads.pop_front();
        if !matches!(next, Some(ScriptedRead::Stall)) {
            state.reads_served += 1;
        }
        match next {
            Some(ScriptedRead::Data(text)) => {
                let bytes = text.as_bytes();
                let n = bytes.len().min(buf.remaining());
                buf.put_slice(&bytes[..n]);
                Poll::Ready(Ok(()))
            }
            Some(ScriptedRead::Fail(kind)) => Poll::Ready(Err(io::Error::from(kind))),
            Some(ScriptedRead::Stall) => {
                state.reads.push_front(ScriptedRead::Stall);
                Poll::Pending
            }
            Some(ScriptedRead::Eof) | None => Poll::Ready(Ok(())),
        }
    }
}

impl AsyncWrite for MemoryStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut state = self.probe.lock();
        if let Some(kind) = state.write_error {
            return Poll::Ready(Err(io::Error::from(kind)));
        }
        state.written.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[async_trait]
impl SppStream for MemoryStream {
    fn is_connected(&self) -> bool {
        self.probe.lock().transport_up
    }

    fn close_input(&mut self) -> io::Result<()> {
        self.probe.lock().closes.push("input");
        Ok(())
    }

    async fn close_output(&mut self) -> io::Result<()> {
        self.probe.lock().closes.push("output");
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "already gone"))
    }

    fn close(&mut self) -> io::Result<()> {
        let mut state = self.probe.lock();
        state.closes.push("socket");
        state.transport_up = false;
        Ok(())
    }
}

/// Backend whose streams are driven by a [`LinkProbe`]
pub struct MemoryBackend {
    pub available: bool,
    pub known: Vec<Address>,
    pub refuse_open: bool,
    pub probe: LinkProbe,
    pub opens: AtomicUsize,
    pub discovery_cancels: AtomicUsize,
}

impl MemoryBackend {
    pub fn new(known: Address) -> Self {
        Self {
            available: true,
            known: vec![known],
            refuse_open: false,
            probe: LinkProbe::default(),
            opens: AtomicUsize::new(0),
            discovery_cancels: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl BluetoothBackend for MemoryBackend {
    type Stream = MemoryStream;

    async fn is_available(&self) -> bool {
        self.available
    }

    async fn resolve(&self, address: Address) -> Result<()> {
        if !self.known.contains(&address) {
            bail!("unknown device {}", address);
        }
        Ok(())
    }

    async fn cancel_discovery(&self) -> Result<()> {
        self.discovery_cancels.fetch_add(1, Ordering::SeqCst);
        self.probe.lock().backend_calls.push("cancel_discovery");
        Ok(())
    }

    async fn open(&self, _address: Address, _service: Uuid) -> Result<Self::Stream> {
        if self.refuse_open {
            bail!("connection refused");
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        let mut state = self.probe.lock();
        state.backend_calls.push("open");
        state.transport_up = true;
        drop(state);
        Ok(MemoryStream {
            probe: self.probe.clone(),
        })
    }

    async fn paired_devices(&self) -> Result<HashSet<DeviceDescriptor>> {
        if self.known.is_empty() {
            bail!("adapter lost");
        }
        Ok(self
            .known
            .iter()
            .map(|&address| DeviceDescriptor {
                address,
                name: Some("meter".into()),
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
