//! Per-connection write capability, derived from the discovered NUS service
//! and the negotiated MTU.

use crate::config::ATT_OVERHEAD;
use crate::error::CapabilityError;
use crate::transport::{nus_uuids, GattCharacteristic, GattService, WriteMode};

/// How outbound data may be submitted on the current connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkCapability {
    pub write_mode: WriteMode,
    /// Whole payload may go out as one acknowledged long write
    pub allow_long_write: bool,
    /// Largest payload of a single ATT write, `mtu - 3`
    pub max_payload_bytes: usize,
}

/// Locate the NUS service and its RX/TX characteristics.
pub fn find_uart_service(
    services: &[GattService],
) -> Result<(GattCharacteristic, GattCharacteristic), CapabilityError> {
    let service = services
        .iter()
        .find(|s| s.uuid == nus_uuids::SERVICE)
        .ok_or(CapabilityError::ServiceUnsupported {
            reason: "NUS service not found",
        })?;
    let rx = service
        .characteristic(nus_uuids::RX)
        .ok_or(CapabilityError::ServiceUnsupported {
            reason: "RX characteristic not found",
        })?;
    let tx = service
        .characteristic(nus_uuids::TX)
        .ok_or(CapabilityError::ServiceUnsupported {
            reason: "TX characteristic not found",
        })?;
    Ok((rx.clone(), tx.clone()))
}

/// Derive the capability from the RX handle's properties and the MTU.
///
/// When the characteristic supports write requests the handle is switched to
/// acknowledged writes, which lets the stack perform long writes. Applying this
/// again on the same handle changes nothing.
pub fn negotiate_capability(
    rx: &mut GattCharacteristic,
    mtu: u16,
) -> Result<LinkCapability, CapabilityError> {
    let props = rx.properties;
    let (write_mode, allow_long_write) = if props.write_request {
        rx.set_write_mode(WriteMode::Request);
        (WriteMode::Request, true)
    } else if props.write_command {
        (WriteMode::Command, false)
    } else {
        return Err(CapabilityError::ServiceUnsupported {
            reason: "RX characteristic is not writable",
        });
    };

    if mtu <= ATT_OVERHEAD {
        return Err(CapabilityError::InvalidMtu { mtu });
    }

    Ok(LinkCapability {
        write_mode,
        allow_long_write,
        max_payload_bytes: usize::from(mtu - ATT_OVERHEAD),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_link::uart_service;

    #[derive(Debug, PartialEq)]
    struct Negotiated {
        rx: GattCharacteristic,
        capability: LinkCapability,
    }

    fn negotiate(services: &[GattService], mtu: u16) -> Result<Negotiated, CapabilityError> {
        let (mut rx, _tx) = find_uart_service(services)?;
        let capability = negotiate_capability(&mut rx, mtu)?;
        Ok(Negotiated { rx, capability })
    }

    #[test]
    fn request_takes_priority_over_command() {
        for write_command in [false, true] {
            let n = negotiate(&[uart_service(true, write_command)], 260).unwrap();
            assert_eq!(n.capability.write_mode, WriteMode::Request);
            assert!(n.capability.allow_long_write);
            assert_eq!(n.capability.max_payload_bytes, 257);
            assert_eq!(n.rx.write_mode, WriteMode::Request);
        }
    }

    #[test]
    fn command_only_disables_long_write() {
        let n = negotiate(&[uart_service(false, true)], 23).unwrap();
        assert_eq!(n.capability.write_mode, WriteMode::Command);
        assert!(!n.capability.allow_long_write);
        assert_eq!(n.capability.max_payload_bytes, 20);
        assert_eq!(n.rx.write_mode, WriteMode::Command);
    }

    #[test]
    fn unwritable_rx_is_unsupported() {
        for mtu in [0, 23, 260] {
            assert!(matches!(
                negotiate(&[uart_service(false, false)], mtu),
                Err(CapabilityError::ServiceUnsupported { .. })
            ));
        }
    }

    #[test]
    fn small_mtu_is_invalid() {
        for mtu in 0..=3 {
            assert_eq!(
                negotiate(&[uart_service(true, false)], mtu),
                Err(CapabilityError::InvalidMtu { mtu })
            );
        }
        for mtu in [4u16, 5, 23, 247, 260, 517] {
            let n = negotiate(&[uart_service(false, true)], mtu).unwrap();
            assert_eq!(n.capability.max_payload_bytes, usize::from(mtu - 3));
        }
    }

    #[test]
    fn missing_service_or_characteristics() {
        assert!(matches!(
            negotiate(&[], 260),
            Err(CapabilityError::ServiceUnsupported { .. })
        ));

        let other = GattService {
            uuid: uuid::Uuid::from_u128(0x0000180F_0000_1000_8000_00805F9B34FB),
            characteristics: uart_service(true, true).characteristics,
        };
        assert!(matches!(
            negotiate(&[other], 260),
            Err(CapabilityError::ServiceUnsupported { .. })
        ));

        let mut no_tx = uart_service(true, true);
        no_tx.characteristics.retain(|c| c.uuid != nus_uuids::TX);
        assert_eq!(
            negotiate(&[no_tx], 260),
            Err(CapabilityError::ServiceUnsupported {
                reason: "TX characteristic not found"
            })
        );
    }

    #[test]
    fn renegotiation_is_idempotent() {
        let (mut rx, _) = find_uart_service(&[uart_service(true, true)]).unwrap();
        let first = negotiate_capability(&mut rx, 100).unwrap();
        let handle = rx.clone();
        let second = negotiate_capability(&mut rx, 100).unwrap();
        assert_eq!(first, second);
        assert_eq!(handle, rx);
    }
}
