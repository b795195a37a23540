use std::io;
use thiserror::Error;

/// Why a link operation did not succeed
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Bluetooth transport unavailable (no adapter or powered off)")]
    TransportUnavailable,

    #[error("Device {address} unreachable: {reason}")]
    DeviceUnreachable { address: String, reason: String },

    #[error("No active connection")]
    NotConnected,

    #[error("Stream I/O error: {0}")]
    Io(#[from] io::Error),
}

impl LinkError {
    pub(crate) fn unreachable(address: &str, reason: impl ToString) -> Self {
        Self::DeviceUnreachable {
            address: address.to_string(),
            reason: reason.to_string(),
        }
    }
}
