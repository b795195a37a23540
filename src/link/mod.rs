//! Connection management for the SPP link to the meter
//!
//! This module handles:
//! - Opening and tearing down the single duplex stream
//! - Best-effort reads and writes with a liveness flag
//! - Mapping backend failures onto [`LinkError`]

mod error;
mod manager;

pub use error::LinkError;
pub use manager::{LinkConfig, LinkManager, LinkState, DEFAULT_READ_BUFFER_SIZE};

use std::sync::Arc;
use tokio::sync::Mutex;

/// Link manager shared between the session and its polling task
pub type SharedLink<B> = Arc<Mutex<LinkManager<B>>>;
