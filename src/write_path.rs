use tracing::{debug, info};

use crate::capability::LinkCapability;
use crate::error::WriteError;
use crate::transport::{GattCharacteristic, GattLink};

/// Split a payload into the physical writes the capability allows.
///
/// A long-write capable link takes the whole payload in one write; otherwise
/// the payload is cut into `max_payload_bytes` pieces in order.
pub fn segments<'a>(capability: &LinkCapability, payload: &'a [u8]) -> std::slice::Chunks<'a, u8> {
    let chunk_len = if capability.allow_long_write {
        payload.len().max(1)
    } else {
        capability.max_payload_bytes.max(1)
    };
    payload.chunks(chunk_len)
}

/// Send a payload to the RX characteristic.
///
/// Without a capability (not connected) or with an empty payload nothing is
/// written and the call succeeds. `on_written` sees every physical write that
/// completed, with the bytes it carried. The first failed write stops the
/// send; the error reports how many bytes went out before it.
pub async fn send<L, F>(
    link: &L,
    rx: &GattCharacteristic,
    capability: Option<&LinkCapability>,
    payload: &[u8],
    mut on_written: F,
) -> Result<(), WriteError>
where
    L: GattLink + ?Sized,
    F: FnMut(&[u8]),
{
    let Some(capability) = capability else {
        debug!("not connected, dropping {} bytes", payload.len());
        return Ok(());
    };
    if payload.is_empty() {
        return Ok(());
    }

    let mut bytes_sent = 0;
    for chunk in segments(capability, payload) {
        link.write(rx, chunk)
            .await
            .map_err(|source| WriteError::WriteFailed { bytes_sent, source })?;
        bytes_sent += chunk.len();
        info!("\"{}\" sent", String::from_utf8_lossy(chunk));
        on_written(chunk);
    }
    Ok(())
}
