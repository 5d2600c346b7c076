use tracing::warn;

use super::divert::Diversion;
use super::outbound::MAX_PACKET;
use super::wire::udp_payload;
use crate::dedup::FingerprintTracker;

/// Reinjects inbound datagrams exactly once: the first copy of each
/// payload goes back into the stack, later copies within the dedup
/// window are dropped. This makes the multipath fan-in invisible to the
/// client.
///
/// Runs on a dedicated thread; returns when the diversion handle
/// closes.
pub fn run_inbound<D: Diversion>(divert: &D, tracker: &FingerprintTracker) {
    let mut buf = vec![0u8; MAX_PACKET];
    loop {
        let (n, meta) = match divert.recv(&mut buf) {
            Ok(Some(received)) => received,
            Ok(None) => continue,
            Err(e) => {
                warn!(error = %e, "inbound diversion closed");
                return;
            }
        };
        let Some(payload) = udp_payload(&buf[..n]) else {
            continue;
        };
        if tracker.is_duplicate(tracker.fingerprint(payload)) {
            continue;
        }
        if let Err(e) = divert.inject(&buf[..n], &meta) {
            warn!(error = %e, "reinject failed");
        }
    }
}
