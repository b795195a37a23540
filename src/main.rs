use anyhow::Result;
use power_link::transport::{BluetoothBackend, RfcommBackend, TcpBackend};
use power_link::{BluetoothMode, Config, MonitorEvent, MonitorSession, StopReason};
use std::path::PathBuf;
use tokio::time::{interval, MissedTickBehavior};

use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;

    info!("Power link starting: meter {}", config.device_address);
    info!("  Mode: {:?}", config.bluetooth.mode);

    match config.bluetooth.mode {
        BluetoothMode::Rfcomm => {
            let backend = RfcommBackend::new(config.bluetooth.rfcomm_config()).await?;
            run(backend, config).await
        }
        BluetoothMode::TcpSimulation => {
            info!("  TCP simulation: {}", config.bluetooth.tcp_address);
            let backend = TcpBackend::new(config.bluetooth.tcp_address.clone(), config.device()?);
            run(backend, config).await
        }
    }
}

async fn run<B: BluetoothBackend + 'static>(backend: B, config: Config) -> Result<()> {
    let mut session =
        MonitorSession::new(backend, config.bluetooth.link_config(), &config.monitor);

    for device in session.paired_devices().await {
        info!("Paired device: {}", device);
    }

    if let Err(e) = session.start_link(&config.device_address).await {
        error!("Connection failed: {}", e);
    }
    if config.monitor.simulate {
        session.set_simulation(true).await;
    }

    // Retry policy lives here; the link itself never retries
    let mut reconnect = interval(config.monitor.reconnect_delay());
    reconnect.set_missed_tick_behavior(MissedTickBehavior::Delay);
    reconnect.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
            Some(event) = session.recv() => {
                handle_event(&session, event).await;
            }
            _ = reconnect.tick(), if !session.is_polling() => {
                info!("Reconnecting to {}", config.device_address);
                session.stop_link().await;
                if let Err(e) = session.start_link(&config.device_address).await {
                    warn!("Reconnect failed: {}", e);
                }
            }
        }
    }

    session.close().await;
    Ok(())
}

async fn handle_event<B: BluetoothBackend + 'static>(
    session: &MonitorSession<B>,
    event: MonitorEvent,
) {
    match event {
        MonitorEvent::Polled { payload, .. } => {
            debug!("Payload: {:?}", payload);
            info!("{}", session.snapshot().await);
        }
        MonitorEvent::Simulated { .. } => {
            info!("{}", session.snapshot().await);
        }
        MonitorEvent::PollingStopped(StopReason::LinkLost) => {
            warn!("Link to meter lost");
        }
        MonitorEvent::PollingStopped(reason) => {
            debug!("Polling stopped: {}", reason);
        }
    }
}
