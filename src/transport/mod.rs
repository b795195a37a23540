pub mod rfcomm;
pub mod tcp;
pub mod traits;

#[cfg(test)]
pub(crate) mod memory;

pub use rfcomm::{RfcommBackend, RfcommConfig, RfcommLinkStream, DEFAULT_CONNECT_TIMEOUT};
pub use tcp::{TcpBackend, TcpLinkStream};
pub use traits::{BluetoothBackend, DeviceDescriptor, SppStream, SPP_SERVICE_UUID};
