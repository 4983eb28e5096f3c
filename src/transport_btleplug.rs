use crate::config::{UartConfig, ATT_OVERHEAD};
use crate::error::{Error, LinkError};
use crate::transport::nus_uuids;
use crate::transport::{CharacteristicProperties, DeviceId, GattCharacteristic, GattLink, GattService, RadioEvent};

use async_trait::async_trait;
use btleplug::api::{BDAddr, Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Peripheral};
use futures::stream::StreamExt;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

impl From<CharPropFlags> for CharacteristicProperties {
    fn from(flags: CharPropFlags) -> Self {
        CharacteristicProperties {
            write_request: flags.contains(CharPropFlags::WRITE),
            write_command: flags.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
            notify: flags.contains(CharPropFlags::NOTIFY),
        }
    }
}

fn find_characteristic_by_uuid(peripheral: &Peripheral, uuid: uuid::Uuid) -> Result<Characteristic, LinkError> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|chr| chr.uuid == uuid)
        .ok_or(LinkError::CharacteristicNotFound(uuid))
}

fn discovered_services(peripheral: &Peripheral) -> Vec<GattService> {
    peripheral
        .services()
        .into_iter()
        .map(|service| GattService {
            uuid: service.uuid,
            characteristics: service
                .characteristics
                .into_iter()
                .map(|chr| GattCharacteristic::new(chr.uuid, chr.properties.into()))
                .collect(),
        })
        .collect()
}

/// Which peripheral to connect to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Name(String),
    Address(BDAddr),
}

impl Target {
    /// An address wins over a name when both are given.
    pub fn from_args(name: Option<String>, addr: Option<String>) -> crate::Result<Self> {
        match (addr, name) {
            (Some(addr), _) => addr
                .parse::<BDAddr>()
                .map(Target::Address)
                .map_err(|_| Error::InvalidAddress(addr)),
            (None, Some(name)) if !name.is_empty() => Ok(Target::Name(name)),
            _ => Err(Error::DeviceNotFound("no name or address given".into())),
        }
    }

    fn matches(&self, name: Option<&str>, addr: BDAddr) -> bool {
        match self {
            Target::Name(target) => name == Some(target.as_str()),
            Target::Address(target) => *target == addr,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Name(name) => write!(f, "{:?}", name),
            Target::Address(addr) => write!(f, "{}", addr),
        }
    }
}

async fn find_peripheral(central: &Adapter, target: &Target) -> crate::Result<Peripheral> {
    info!("Searching for {} ...", target);
    central
        .start_scan(ScanFilter {
            services: vec![nus_uuids::SERVICE],
        })
        .await?;
    let mut events = central.events().await?;

    while let Some(event) = events.next().await {
        if let CentralEvent::DeviceDiscovered(id) = event {
            let peripheral = central.peripheral(&id).await?;
            let Some(props) = peripheral.properties().await? else {
                continue;
            };
            debug!("Found [{:?}] at [{}]", props.local_name, props.address);
            if target.matches(props.local_name.as_deref(), props.address) {
                info!("Found {} at [{}]", target, id);
                central.stop_scan().await?;
                return Ok(peripheral);
            }
        }
    }
    Err(Error::DeviceNotFound(target.to_string()))
}

async fn timeout<F: std::future::Future>(budget: Duration, future: F) -> Result<F::Output, tokio::time::error::Elapsed> {
    tokio::time::timeout(budget, future).await
}

/// NUS link over a btleplug peripheral
pub struct BtleplugLink {
    adapter: Adapter,
    peripheral: Peripheral,
    /// MTU assumed for the link; btleplug does not expose the exchange
    link_mtu: u16,
    op_timeout: Duration,
}

impl BtleplugLink {
    /// Scan on the first adapter until `target` shows up.
    pub async fn find(
        target: &Target,
        link_mtu: u16,
        config: &UartConfig,
        scan_timeout: Option<Duration>,
    ) -> crate::Result<Self> {
        let manager = btleplug::platform::Manager::new().await?;
        let adapters = manager.adapters().await?;
        let adapter = adapters.into_iter().next().ok_or(Error::NoAdapter)?;

        let peripheral = match scan_timeout {
            Some(budget) => timeout(budget, find_peripheral(&adapter, target))
                .await
                .map_err(|_| Error::DeviceNotFound(target.to_string()))??,
            None => find_peripheral(&adapter, target).await?,
        };
        Ok(BtleplugLink {
            adapter,
            peripheral,
            link_mtu,
            op_timeout: config.op_timeout,
        })
    }

    pub fn device_id(&self) -> DeviceId {
        DeviceId::new(self.peripheral.id().to_string())
    }

    /// Connect, discover, and report both steps to the manager.
    pub async fn connect(&self, events: &mpsc::Sender<RadioEvent>) -> crate::Result<()> {
        self.peripheral.connect().await?;
        events
            .send(RadioEvent::Connected(self.device_id()))
            .await
            .map_err(|_| LinkError::Closed)?;

        self.peripheral.discover_services().await?;
        let services = discovered_services(&self.peripheral);
        debug!("discovered {} services", services.len());
        events
            .send(RadioEvent::ServicesDiscovered(services))
            .await
            .map_err(|_| LinkError::Closed)?;
        Ok(())
    }

    pub async fn disconnect(&self) -> crate::Result<()> {
        self.peripheral.disconnect().await?;
        Ok(())
    }

    /// Forward this peripheral's disconnects and notifications to the manager.
    ///
    /// The task ends when the manager's queue closes or both streams end.
    pub async fn pump_events(&self, events: mpsc::Sender<RadioEvent>) -> crate::Result<JoinHandle<()>> {
        let mut central_events = self.adapter.events().await?;
        let mut notifications = self.peripheral.notifications().await?;
        let id = self.peripheral.id();
        let device = self.device_id();

        Ok(tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    Some(event) = central_events.next() => match event {
                        CentralEvent::DeviceDisconnected(peer) if peer == id => {
                            RadioEvent::Disconnected(device.clone())
                        }
                        _ => continue,
                    },
                    Some(ntf) = notifications.next() => RadioEvent::Notification {
                        uuid: ntf.uuid,
                        value: ntf.value,
                    },
                    else => break,
                };
                if events.send(event).await.is_err() {
                    break;
                }
            }
            debug!("event pump for {} stopped", device);
        }))
    }

    /// Writes of several MTUs worth of data get a proportional budget.
    fn write_budget(&self, len: usize) -> Duration {
        let per_packet = usize::from(self.link_mtu.saturating_sub(ATT_OVERHEAD)).max(1);
        let packets = len.div_ceil(per_packet).max(1);
        self.op_timeout.saturating_mul(u32::try_from(packets).unwrap_or(u32::MAX))
    }
}

#[async_trait]
impl GattLink for BtleplugLink {
    async fn request_mtu(&self, mtu: u16) -> Result<u16, LinkError> {
        // TODO use the negotiated value once btleplug exposes MTU exchange
        let settled = mtu.min(self.link_mtu);
        debug!("MTU exchange is left to the OS, assuming {}", settled);
        Ok(settled)
    }

    async fn write(&self, chr: &GattCharacteristic, bytes: &[u8]) -> Result<(), LinkError> {
        let target = find_characteristic_by_uuid(&self.peripheral, chr.uuid)?;
        timeout(
            self.write_budget(bytes.len()),
            self.peripheral.write(&target, bytes, chr.write_mode.into()),
        )
        .await??;
        Ok(())
    }

    async fn enable_notifications(&self, chr: &GattCharacteristic) -> Result<(), LinkError> {
        let target = find_characteristic_by_uuid(&self.peripheral, chr.uuid)?;
        timeout(self.op_timeout, self.peripheral.subscribe(&target)).await??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_flags_map_to_write_modes() {
        let props = CharacteristicProperties::from(CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE);
        assert!(props.write_request);
        assert!(props.write_command);
        assert!(!props.notify);

        let props = CharacteristicProperties::from(CharPropFlags::NOTIFY);
        assert!(!props.write_request && !props.write_command);
        assert!(props.notify);
    }

    #[test]
    fn target_prefers_address() {
        let target = Target::from_args(Some("uart".into()), Some("C0:FF:EE:00:00:01".into())).unwrap();
        let addr: BDAddr = "C0:FF:EE:00:00:01".parse().unwrap();
        assert_eq!(target, Target::Address(addr));
        assert!(target.matches(None, addr));
        assert!(!target.matches(Some("uart"), BDAddr::default()));

        assert_eq!(
            Target::from_args(Some("uart".into()), None).unwrap(),
            Target::Name("uart".into())
        );
        assert!(matches!(
            Target::from_args(None, Some("not-an-address".into())),
            Err(Error::InvalidAddress(_))
        ));
        assert!(Target::from_args(Some(String::new()), None).is_err());
    }
}
