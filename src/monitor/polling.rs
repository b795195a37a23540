use super::{parse_reading, switched_off, MonitorEvent, ReadingStore, StopReason};
use crate::link::SharedLink;
use crate::transport::BluetoothBackend;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Poll the link every `interval` while a connection is requested
///
/// Runs zero iterations unless `requested` is true and the link is connected
/// on entry. Cancellation is checked once per iteration and during the sleep;
/// a read that never returns holds the loop until it does.
pub async fn run_polling_loop<B: BluetoothBackend>(
    link: SharedLink<B>,
    reading: ReadingStore,
    mut requested: watch::Receiver<bool>,
    interval: Duration,
    events: mpsc::UnboundedSender<MonitorEvent>,
) -> StopReason {
    let reason = poll(&link, &reading, &mut requested, interval, &events).await;
    match reason {
        StopReason::LinkLost => warn!("[POLL] Polling stopped: {}", reason),
        _ => info!("[POLL] Polling stopped: {}", reason),
    }
    let _ = events.send(MonitorEvent::PollingStopped(reason));
    reason
}

async fn poll<B: BluetoothBackend>(
    link: &SharedLink<B>,
    reading: &ReadingStore,
    requested: &mut watch::Receiver<bool>,
    interval: Duration,
    events: &mpsc::UnboundedSender<MonitorEvent>,
) -> StopReason {
    let wanted = *requested.borrow_and_update();
    if !wanted || !link.lock().await.is_connected() {
        return StopReason::NotStarted;
    }
    info!("[POLL] Polling every {:?}", interval);

    loop {
        let wanted = *requested.borrow_and_update();
        if !wanted {
            return StopReason::Cancelled;
        }

        let payload = {
            let mut link = link.lock().await;
            if !link.is_connected() {
                return StopReason::LinkLost;
            }
            match link.read().await {
                Ok(payload) => payload,
                Err(e) => {
                    debug!("[POLL] Read failed: {}", e);
                    None
                }
            }
        };

        if let Some(text) = payload.as_deref() {
            match parse_reading(text) {
                Some(value) => reading.set(value).await,
                None => debug!("[POLL] Discarding payload {:?}", text),
            }
        }

        let _ = events.send(MonitorEvent::Polled {
            payload,
            reading: reading.get().await,
        });

        tokio::select! {
            _ = sleep(interval) => {}
            _ = switched_off(requested) => return StopReason::Cancelled,
        }
    }
}
