//! Power Link
//!
//! Bluetooth Serial Port Profile link to a current-draw meter, the polling
//! loop that turns its text tokens into amp readings, and the session that
//! owns both for the lifetime of one dashboard.

pub mod config;
pub mod link;
pub mod monitor;
pub mod session;
pub mod transport;

pub use config::{BluetoothMode, Config};
pub use link::{LinkConfig, LinkError, LinkManager, LinkState};
pub use monitor::{DashboardSnapshot, Goal, MonitorEvent, ReadingStore, StopReason};
pub use session::MonitorSession;
