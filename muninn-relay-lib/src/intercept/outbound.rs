use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::divert::Diversion;
use super::wire::udp_payload;

pub(super) const MAX_PACKET: usize = 64 * 1024;

/// Steals outbound datagrams and forwards their payloads to the
/// multipath sender. The stolen packets are never reinjected, so the
/// client's own single-path transmission never reaches the wire.
///
/// Runs on a dedicated thread. Returns when the diversion handle closes
/// or the sender side of the relay goes away.
pub fn run_outbound<D: Diversion>(divert: &D, payload_tx: mpsc::Sender<Bytes>) {
    let mut buf = vec![0u8; MAX_PACKET];
    loop {
        let n = match divert.recv(&mut buf) {
            Ok(Some((n, _meta))) => n,
            // Truncated capture: consumed, move on.
            Ok(None) => continue,
            Err(e) => {
                warn!(error = %e, "outbound diversion closed");
                return;
            }
        };
        if n == 0 {
            continue;
        }
        let Some(payload) = udp_payload(&buf[..n]) else {
            continue;
        };
        if payload_tx
            .blocking_send(Bytes::copy_from_slice(payload))
            .is_err()
        {
            debug!("payload channel closed, ending outbound loop");
            return;
        }
    }
}
