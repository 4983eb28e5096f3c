//! Tunables for the UART manager and the btleplug link

use std::time::Duration;

/// MTU requested when a connection is set up
pub const REQUESTED_MTU: u16 = 260;

/// ATT header bytes carried by every write/notification
pub const ATT_OVERHEAD: u16 = 3;

/// Per-operation timeout for radio primitives
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_millis(500);

/// Depth of the radio event queue; sends are queued without a bound
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

#[derive(Debug, Clone)]
pub struct UartConfig {
    /// MTU asked for during negotiation
    pub requested_mtu: u16,
    /// Upper bound on any single radio primitive
    pub op_timeout: Duration,
    pub queue_depth: usize,
}

impl Default for UartConfig {
    fn default() -> Self {
        Self {
            requested_mtu: REQUESTED_MTU,
            op_timeout: DEFAULT_OP_TIMEOUT,
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}
