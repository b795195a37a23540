//! Reading Monitor
//!
//! Background loops that keep the current-draw reading up to date: the
//! polling loop that reads the meter over the link, and a simulated load
//! for demos without hardware.

mod polling;
mod reading;
mod simulation;

pub use polling::run_polling_loop;
pub use reading::{
    parse_reading, DashboardSnapshot, Goal, ReadingStore, DEFAULT_GOAL_AMPS,
    DEFAULT_INITIAL_READING,
};
pub use simulation::{run_simulation_loop, DEFAULT_SIMULATION_STEP};

use std::time::Duration;
use tokio::sync::watch;

/// Fixed interval between polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Why the polling loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Not requested or not connected on entry; no iteration ran
    NotStarted,
    /// The connection request was withdrawn
    Cancelled,
    /// The link stopped reporting itself connected
    LinkLost,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::NotStarted => write!(f, "not started"),
            StopReason::Cancelled => write!(f, "cancelled"),
            StopReason::LinkLost => write!(f, "link lost"),
        }
    }
}

/// Events emitted by the monitor loops
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    /// One poll finished; `reading` is the value after it
    Polled {
        payload: Option<String>,
        reading: f32,
    },
    /// The simulated load bumped the reading
    Simulated { reading: f32 },
    /// The polling loop returned to idle
    PollingStopped(StopReason),
}

/// Resolves once `switch` reads false or its sender is gone
async fn switched_off(switch: &mut watch::Receiver<bool>) {
    loop {
        let on = *switch.borrow_and_update();
        if !on {
            return;
        }
        if switch.changed().await.is_err() {
            return;
        }
    }
}
