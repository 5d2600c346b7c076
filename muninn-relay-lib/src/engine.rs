use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::dedup::FingerprintTracker;
use crate::error::{RelayError, Result};
use crate::intercept;
use crate::path::{PathSet, ProxyAddrs};
use crate::proxy::{self, ProxyConfig};
use crate::ranker;
use crate::sender::MultipathSender;

/// Where the game client speaks UDP from, as reported by the
/// game-process locator.
#[derive(Debug, Clone, Copy)]
pub struct ClientEndpoint {
    pub ip: IpAddr,
    pub port: u16,
}

/// First observed upstream flow, as reported by the remote-address
/// resolver.
#[derive(Debug, Clone, Copy)]
pub struct RemoteEndpoint {
    pub remote_addr: SocketAddr,
    pub client_local_ip: IpAddr,
}

/// External collaborators the engine blocks on before going live. The
/// locator and resolver behind these channels are out of scope here;
/// anything that can deliver the two endpoints works.
pub struct Collaborators {
    pub client: oneshot::Receiver<ClientEndpoint>,
    pub remote: oneshot::Receiver<RemoteEndpoint>,
}

/// Client-side engine: waits for the collaborators, builds the path
/// set, performs the first selection, then runs interception and
/// multipath fan-out until cancelled.
///
/// With `spawn_proxies` the proxy endpoints run in-process on the given
/// listen addresses and receive their flow configuration over oneshot
/// channels once the upstream flow is known; otherwise the proxies are
/// expected to run elsewhere with matching flags.
pub async fn run(
    cfg: Arc<Config>,
    proxies: Vec<ProxyAddrs>,
    local_ips: Vec<IpAddr>,
    collaborators: Collaborators,
    spawn_proxies: bool,
    cancel: CancellationToken,
) -> Result<()> {
    let client = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        received = collaborators.client => {
            received.map_err(|_| RelayError::ChannelClosed("client endpoint"))?
        }
    };
    info!(ip = %client.ip, port = client.port, "game client located");

    let mut proxy_tasks = Vec::new();
    let mut flow_txs = Vec::new();
    if spawn_proxies {
        for addrs in &proxies {
            let (flow_tx, flow_rx) = oneshot::channel();
            flow_txs.push(flow_tx);
            proxy_tasks.push(tokio::spawn(proxy::run(
                Arc::clone(&cfg),
                addrs.data,
                addrs.ping,
                flow_rx,
                cancel.child_token(),
            )));
        }
    }

    let remote = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        received = collaborators.remote => {
            received.map_err(|_| RelayError::ChannelClosed("remote endpoint"))?
        }
    };
    info!(remote = %remote.remote_addr, "upstream flow resolved");

    let flow = ProxyConfig {
        remote_addr: remote.remote_addr,
        client_addr: SocketAddr::new(client.ip, client.port),
    };
    for flow_tx in flow_txs {
        if flow_tx.send(flow).is_err() {
            warn!("proxy exited before receiving its configuration");
        }
    }

    let local_ips = if local_ips.is_empty() {
        vec![remote.client_local_ip]
    } else {
        local_ips
    };
    let path_set = PathSet::connect(&local_ips, &proxies)?;
    info!(paths = path_set.len(), "paths connected");

    let mut first_time = true;
    let best = ranker::select_best(&cfg, path_set.into_paths(), &mut first_time).await;
    if best.is_empty() {
        return Err(RelayError::NoPaths);
    }

    // Inbound dedup state and its sweep ticker.
    let tracker = Arc::new(FingerprintTracker::new(cfg.cleanup_interval));
    {
        let tracker = Arc::clone(&tracker);
        let cancel = cancel.clone();
        let cleanup_interval = cfg.cleanup_interval;
        tokio::spawn(async move {
            let mut ticker = interval(cleanup_interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => tracker.sweep(),
                }
            }
        });
    }

    let (payload_tx, payload_rx) = mpsc::channel(intercept::INTERCEPT_BUFFER);
    let interceptor = intercept::spawn(client.port, payload_tx, tracker)?;

    let sender = MultipathSender::new(Arc::clone(&cfg), best);
    let probe = tokio::spawn(Arc::clone(&sender).run_probe(cancel.clone()));
    let updater = tokio::spawn(Arc::clone(&sender).run_updater(cancel.clone()));

    sender.run(payload_rx, cancel.clone()).await;

    cancel.cancel();
    let _ = tokio::task::spawn_blocking(move || interceptor.stop()).await;
    let _ = probe.await;
    let _ = updater.await;
    for task in proxy_tasks {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "proxy exited with error"),
            Err(e) => warn!(error = %e, "proxy task failed"),
        }
    }
    info!("engine stopped");
    Ok(())
}
