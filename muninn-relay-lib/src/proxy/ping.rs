use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::bloat::measure_bloat;
use crate::config::Config;
use crate::error::{RelayError, Result};
use crate::ranker::{encode_bloat, PING_LEN};

/// Runs the ping responder, re-measuring bloat around each (re)start.
///
/// A malformed request terminates the inner responder run; the policy
/// here is to log and start a fresh one. Bloat probe failures are
/// transient: the responder serves zero until the next restart.
pub async fn supervise_ping(
    socket: UdpSocket,
    cfg: Arc<Config>,
    bloat_ms: Arc<AtomicU64>,
    cancel: CancellationToken,
) {
    loop {
        let measured = tokio::select! {
            _ = cancel.cancelled() => return,
            measured = measure_bloat(&cfg) => measured,
        };
        match measured {
            Ok(ms) => {
                bloat_ms.store(ms, Ordering::Relaxed);
                info!(bloat_ms = ms, "bloat measured");
            }
            Err(e) => {
                bloat_ms.store(0, Ordering::Relaxed);
                warn!(error = %e, "bloat probe failed, serving zero");
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            ended = respond(&socket, &bloat_ms) => {
                if let Err(e) = ended {
                    warn!(error = %e, "ping responder terminated, restarting");
                }
            }
        }
    }
}

/// Echoes each exactly-8-byte request with the big-endian bloat value.
/// Any other request length is a protocol error and ends the run.
pub async fn respond(socket: &UdpSocket, bloat_ms: &AtomicU64) -> Result<()> {
    // Oversized so a too-long request is measurable rather than
    // silently truncated to 8 bytes.
    let mut buf = [0u8; 64];
    loop {
        let (n, src) = socket.recv_from(&mut buf).await?;
        if n != PING_LEN {
            return Err(RelayError::PingProtocol { len: n });
        }
        let reply = encode_bloat(bloat_ms.load(Ordering::Relaxed));
        socket.send_to(&reply, src).await?;
    }
}
