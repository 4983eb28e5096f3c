//! Nordic UART Service transport for BLE centrals.
//!
//! The NUS profile tunnels a byte stream over two characteristics: the central
//! writes to RX and receives TX notifications. [`UartManager`] negotiates how
//! writes are submitted on each connection (acknowledged long writes when RX
//! supports write requests, MTU-sized write commands otherwise) and hands
//! every notification to the application.

pub mod capability;
pub mod config;
pub mod error;
pub mod manager;
pub mod transport;
pub mod transport_btleplug;
pub mod write_path;

#[cfg(test)]
mod test_link;

pub use capability::LinkCapability;
pub use config::UartConfig;
pub use error::{CapabilityError, Error, LinkError, Result, WriteError};
pub use manager::{InboundEvent, LinkState, UartCallbacks, UartHandle, UartManager};
pub use transport::{nus_uuids, DeviceId, GattLink, RadioEvent, WriteMode};
pub use transport_btleplug::{BtleplugLink, Target};
