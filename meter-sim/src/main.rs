use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_LISTEN: &str = "127.0.0.1:9000";
const SEND_INTERVAL: Duration = Duration::from_secs(1);

/// Triangle wave of current draw, in hundredths of an ampere
#[derive(Debug, Clone)]
struct Waveform {
    low: u32,
    high: u32,
    value: u32,
    rising: bool,
}

impl Waveform {
    fn new(low: u32, high: u32) -> Self {
        Self {
            low,
            high,
            value: low,
            rising: true,
        }
    }

    /// Next token as the meter would send it: bare decimal, no delimiter
    fn next_token(&mut self) -> String {
        let token = format!("{}.{:02}", self.value / 100, self.value % 100);
        if self.rising && self.value >= self.high {
            self.rising = false;
        } else if !self.rising && self.value <= self.low {
            self.rising = true;
        }
        if self.rising {
            self.value += 1;
        } else {
            self.value -= 1;
        }
        token
    }
}

async fn serve(mut socket: TcpStream, peer: SocketAddr) -> anyhow::Result<()> {
    let mut wave = Waveform::new(5, 20);
    let mut ticker = tokio::time::interval(SEND_INTERVAL);
    let mut buf = vec![0u8; 1024];

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                socket.write_all(wave.next_token().as_bytes()).await?;
            }
            n = socket.read(&mut buf) => {
                let n = n?;
                if n == 0 {
                    info!("[SIM] {} closed the link", peer);
                    return Ok(());
                }
                info!("[SIM] {} sent {:?}", peer, String::from_utf8_lossy(&buf[..n]));
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let listen = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_LISTEN.to_string());
    let listener = TcpListener::bind(&listen).await?;
    info!("Meter simulator listening on {}", listen);

    loop {
        let (socket, peer) = listener.accept().await?;
        info!("[SIM] Client {} connected", peer);
        tokio::spawn(async move {
            if let Err(e) = serve(socket, peer).await {
                warn!("[SIM] Client {} dropped: {}", peer, e);
            }
        });
    }
}
