//! Error types for the NUS transport

use thiserror::Error;

/// Crate-level result alias
pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a radio-stack primitive
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    #[error("operation timed out")]
    Timeout(#[from] tokio::time::error::Elapsed),

    #[error("characteristic {0} not found on peripheral")]
    CharacteristicNotFound(uuid::Uuid),

    #[error("link closed")]
    Closed,
}

/// Negotiation outcome that makes the connection unusable
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    #[error("service unsupported: {reason}")]
    ServiceUnsupported { reason: &'static str },

    #[error("MTU {mtu} leaves no room for payload")]
    InvalidMtu { mtu: u16 },
}

/// A write that was cut short
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("write failed after {bytes_sent} bytes: {source}")]
    WriteFailed {
        bytes_sent: usize,
        #[source]
        source: LinkError,
    },
}

impl WriteError {
    pub fn bytes_sent(&self) -> usize {
        match self {
            WriteError::WriteFailed { bytes_sent, .. } => *bytes_sent,
        }
    }
}

/// Top-level error for connection setup and the CLI
#[derive(Debug, Error)]
pub enum Error {
    #[error("no Bluetooth adapter found")]
    NoAdapter,

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("invalid Bluetooth address: {0}")]
    InvalidAddress(String),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<btleplug::Error> for Error {
    fn from(err: btleplug::Error) -> Self {
        Error::Link(LinkError::Ble(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_failed_reports_progress() {
        let err = WriteError::WriteFailed {
            bytes_sent: 40,
            source: LinkError::Closed,
        };
        assert_eq!(err.bytes_sent(), 40);
        assert_eq!(err.to_string(), "write failed after 40 bytes: link closed");
    }

    #[test]
    fn capability_errors_display() {
        assert_eq!(
            CapabilityError::InvalidMtu { mtu: 3 }.to_string(),
            "MTU 3 leaves no room for payload"
        );
        let err: Error = CapabilityError::ServiceUnsupported {
            reason: "NUS service not found",
        }
        .into();
        assert_eq!(err.to_string(), "service unsupported: NUS service not found");
    }

    #[test]
    fn io_errors_convert() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "payload.bin").into();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.to_string(), "IO error: payload.bin");
    }
}
