//! Bluetooth side of the bridge: address checks, paired-device lookup and
//! the byte transports that carry printer traffic.

pub mod adapter;
pub mod address;
pub mod transport;

pub use adapter::{BluetoothAdapter, PairedDevice, RfcommAdapter, SocketStrategy};
pub use address::is_valid_address;
pub use transport::{PrinterTransport, TransportState};
