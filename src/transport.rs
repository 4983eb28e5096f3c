use async_trait::async_trait;
use std::fmt;

use crate::error::LinkError;

/// Nordic UART Service & characteristic UUIDs
///
/// from [Nordic UART Service](https://docs.nordicsemi.com/bundle/ncs-latest/page/nrf/libraries/bluetooth/services/nus.html)
pub mod nus_uuids {
    use uuid::Uuid;
    /// NUS Service
    pub const SERVICE: Uuid = Uuid::from_u128(0x6E400001_B5A3_F393_E0A9_E50E24DCCA9E);
    /// RX Characteristic, the central writes here
    pub const RX: Uuid = Uuid::from_u128(0x6E400002_B5A3_F393_E0A9_E50E24DCCA9E);
    /// TX Characteristic, the peripheral notifies here
    pub const TX: Uuid = Uuid::from_u128(0x6E400003_B5A3_F393_E0A9_E50E24DCCA9E);
}

/// Identity of the remote peripheral, as reported by the radio stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Write-related property flags of a discovered characteristic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CharacteristicProperties {
    /// Acknowledged write ("write request")
    pub write_request: bool,
    /// Unacknowledged write ("write command")
    pub write_command: bool,
    pub notify: bool,
}

/// How writes to a characteristic are submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Write request, acknowledged by the peer
    Request,
    /// Write command, no acknowledgement
    Command,
}

impl From<WriteMode> for btleplug::api::WriteType {
    fn from(mode: WriteMode) -> Self {
        match mode {
            WriteMode::Request => btleplug::api::WriteType::WithResponse,
            WriteMode::Command => btleplug::api::WriteType::WithoutResponse,
        }
    }
}

/// Handle to a discovered characteristic.
///
/// The write mode lives on the handle and is what the link uses for every
/// write submitted through it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    pub uuid: uuid::Uuid,
    pub properties: CharacteristicProperties,
    pub write_mode: WriteMode,
}

impl GattCharacteristic {
    /// Build a handle whose initial write mode follows its properties, the way
    /// radio stacks pick a default write type at discovery time.
    pub fn new(uuid: uuid::Uuid, properties: CharacteristicProperties) -> Self {
        let write_mode = if properties.write_command && !properties.write_request {
            WriteMode::Command
        } else {
            WriteMode::Request
        };
        Self {
            uuid,
            properties,
            write_mode,
        }
    }

    pub fn set_write_mode(&mut self, mode: WriteMode) {
        self.write_mode = mode;
    }
}

/// A discovered primary service and its characteristics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: uuid::Uuid,
    pub characteristics: Vec<GattCharacteristic>,
}

impl GattService {
    pub fn characteristic(&self, uuid: uuid::Uuid) -> Option<&GattCharacteristic> {
        self.characteristics.iter().find(|c| c.uuid == uuid)
    }
}

/// Events the radio stack delivers to the connection state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    Connected(DeviceId),
    ServicesDiscovered(Vec<GattService>),
    /// Attribute value changed on a subscribed characteristic
    Notification { uuid: uuid::Uuid, value: Vec<u8> },
    Disconnected(DeviceId),
}

/// GATT link primitives consumed by the UART manager
#[async_trait]
pub trait GattLink: Send + Sync {
    /// Exchange MTU, returning the value the link settled on
    async fn request_mtu(&self, mtu: u16) -> Result<u16, LinkError>;
    /// Submit one write using the handle's write mode. Acknowledged writes
    /// longer than one MTU are segmented by the stack (long write).
    async fn write(&self, chr: &GattCharacteristic, bytes: &[u8]) -> Result<(), LinkError>;
    /// Subscribe to value-changed notifications
    async fn enable_notifications(&self, chr: &GattCharacteristic) -> Result<(), LinkError>;
}

#[async_trait]
impl<T: GattLink + ?Sized> GattLink for std::sync::Arc<T> {
    async fn request_mtu(&self, mtu: u16) -> Result<u16, LinkError> {
        (**self).request_mtu(mtu).await
    }
    async fn write(&self, chr: &GattCharacteristic, bytes: &[u8]) -> Result<(), LinkError> {
        (**self).write(chr, bytes).await
    }
    async fn enable_notifications(&self, chr: &GattCharacteristic) -> Result<(), LinkError> {
        (**self).enable_notifications(chr).await
    }
}
