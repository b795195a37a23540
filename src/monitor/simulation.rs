use super::{switched_off, MonitorEvent, ReadingStore};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::info;

/// Amperes added per tick of the simulated load
pub const DEFAULT_SIMULATION_STEP: f32 = 0.00002;

/// Bump the reading by `step` every `interval` while `enabled` is true
///
/// Independent of the link; shares the reading with the polling loop.
pub async fn run_simulation_loop(
    reading: ReadingStore,
    mut enabled: watch::Receiver<bool>,
    step: f32,
    interval: Duration,
    events: mpsc::UnboundedSender<MonitorEvent>,
) {
    info!("[SIM] Simulated load started: +{} A every {:?}", step, interval);

    loop {
        let on = *enabled.borrow_and_update();
        if !on {
            break;
        }

        let value = reading.add(step).await;
        let _ = events.send(MonitorEvent::Simulated { reading: value });

        tokio::select! {
            _ = sleep(interval) => {}
            _ = switched_off(&mut enabled) => break,
        }
    }

    info!("[SIM] Simulated load stopped");
}
