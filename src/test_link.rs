//! In-memory GATT link for unit tests

use async_trait::async_trait;
use std::sync::Mutex;

use crate::error::LinkError;
use crate::transport::{
    nus_uuids, CharacteristicProperties, GattCharacteristic, GattLink, GattService, WriteMode,
};

/// A primitive as the link saw it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    RequestMtu(u16),
    Write {
        uuid: uuid::Uuid,
        mode: WriteMode,
        bytes: Vec<u8>,
    },
    EnableNotifications(uuid::Uuid),
}

pub struct MockLink {
    mtu: u16,
    ops: Mutex<Vec<Op>>,
    writes_seen: Mutex<usize>,
    fail_write: Mutex<Option<(usize, LinkError)>>,
    fail_notifications: Mutex<Option<LinkError>>,
}

impl MockLink {
    pub fn new() -> Self {
        Self::with_mtu(247)
    }

    /// Link that settles on `mtu` whatever is requested
    pub fn with_mtu(mtu: u16) -> Self {
        Self {
            mtu,
            ops: Mutex::new(Vec::new()),
            writes_seen: Mutex::new(0),
            fail_write: Mutex::new(None),
            fail_notifications: Mutex::new(None),
        }
    }

    /// Fail the `index`-th write (zero based)
    pub fn fail_write_at(self, index: usize, err: LinkError) -> Self {
        *self.fail_write.lock().unwrap() = Some((index, err));
        self
    }

    pub fn fail_notifications(self, err: LinkError) -> Self {
        *self.fail_notifications.lock().unwrap() = Some(err);
        self
    }

    pub fn ops(&self) -> Vec<Op> {
        self.ops.lock().unwrap().clone()
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::Write { bytes, .. } => Some(bytes),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl GattLink for MockLink {
    async fn request_mtu(&self, mtu: u16) -> Result<u16, LinkError> {
        self.ops.lock().unwrap().push(Op::RequestMtu(mtu));
        Ok(mtu.min(self.mtu))
    }

    async fn write(&self, chr: &GattCharacteristic, bytes: &[u8]) -> Result<(), LinkError> {
        self.ops.lock().unwrap().push(Op::Write {
            uuid: chr.uuid,
            mode: chr.write_mode,
            bytes: bytes.to_vec(),
        });
        let mut seen = self.writes_seen.lock().unwrap();
        let index = *seen;
        *seen += 1;

        let mut fail = self.fail_write.lock().unwrap();
        if matches!(*fail, Some((at, _)) if at == index) {
            if let Some((_, err)) = fail.take() {
                return Err(err);
            }
        }
        Ok(())
    }

    async fn enable_notifications(&self, chr: &GattCharacteristic) -> Result<(), LinkError> {
        self.ops
            .lock()
            .unwrap()
            .push(Op::EnableNotifications(chr.uuid));
        match self.fail_notifications.lock().unwrap().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

pub fn rx_handle(write_request: bool, write_command: bool) -> GattCharacteristic {
    GattCharacteristic::new(
        nus_uuids::RX,
        CharacteristicProperties {
            write_request,
            write_command,
            notify: false,
        },
    )
}

pub fn uart_service(write_request: bool, write_command: bool) -> GattService {
    GattService {
        uuid: nus_uuids::SERVICE,
        characteristics: vec![
            rx_handle(write_request, write_command),
            GattCharacteristic::new(
                nus_uuids::TX,
                CharacteristicProperties {
                    notify: true,
                    ..Default::default()
                },
            ),
        ],
    }
}
