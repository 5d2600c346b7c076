use std::net::SocketAddr;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::ping;
use crate::config::Config;
use crate::dedup::FingerprintTracker;
use crate::error::{RelayError, Result};

/// Upstream and client flow of one proxy bridge. Delivered once, before
/// the proxy enters its packet loop, and immutable for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyConfig {
    pub remote_addr: SocketAddr,
    pub client_addr: SocketAddr,
}

const MAX_DATAGRAM: usize = 64 * 1024;

/// Single-listener UDP bridge between one client flow and one upstream
/// server flow, with fingerprint dedup in front of both directions.
///
/// Classification is by source address only: datagrams from
/// `remote_addr` go to the client, anything else is treated as
/// client-side traffic and goes upstream. Any sender that reaches the
/// listen port gets bridged; whether that is acceptable is a deployment
/// decision.
pub async fn run(
    cfg: Arc<Config>,
    listen_addr: SocketAddr,
    ping_addr: SocketAddr,
    config_rx: oneshot::Receiver<ProxyConfig>,
    cancel: CancellationToken,
) -> Result<()> {
    let socket = UdpSocket::bind(listen_addr).await?;
    let ping_socket = UdpSocket::bind(ping_addr).await?;
    info!(%listen_addr, %ping_addr, "proxy listening");

    // Ping plane first: RTT measurement works while the bridge is still
    // waiting for its flow configuration.
    let bloat_ms = Arc::new(AtomicU64::new(0));
    let responder = tokio::spawn(ping::supervise_ping(
        ping_socket,
        Arc::clone(&cfg),
        Arc::clone(&bloat_ms),
        cancel.clone(),
    ));

    let flow = tokio::select! {
        _ = cancel.cancelled() => {
            let _ = responder.await;
            return Ok(());
        }
        received = config_rx => match received {
            Ok(flow) => flow,
            Err(_) => {
                let _ = responder.await;
                return Err(RelayError::ChannelClosed("proxy config"));
            }
        },
    };
    info!(remote = %flow.remote_addr, client = %flow.client_addr, "proxy configured");

    let tracker = FingerprintTracker::new(cfg.cleanup_interval);
    let mut sweep = interval(cfg.cleanup_interval);
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sweep.tick() => tracker.sweep(),
            received = socket.recv_from(&mut buf) => {
                let (n, src) = match received {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "proxy read error");
                        continue;
                    }
                };
                let payload = &buf[..n];
                if tracker.is_duplicate(tracker.fingerprint(payload)) {
                    continue;
                }
                let dst = if src == flow.remote_addr {
                    flow.client_addr
                } else {
                    flow.remote_addr
                };
                if let Err(e) = socket.send_to(payload, dst).await {
                    warn!(%dst, error = %e, "proxy forward error");
                }
            }
        }
    }

    let _ = responder.await;
    info!(%listen_addr, "proxy stopped");
    Ok(())
}
