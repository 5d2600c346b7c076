use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{interval, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::path::Path;
use crate::ranker;

struct DownEntry {
    path: Arc<Path>,
    since: Instant,
}

/// Fans every intercepted payload out over the current best paths and
/// tracks per-path health.
///
/// The best set is an [`ArcSwap`] snapshot: the updater replaces it
/// wholesale while in-flight fan-outs keep the set they started with.
pub struct MultipathSender {
    cfg: Arc<Config>,
    best: ArcSwap<Vec<Arc<Path>>>,
    down_since: Mutex<HashMap<usize, DownEntry>>,
}

impl MultipathSender {
    pub fn new(cfg: Arc<Config>, initial_best: Vec<Arc<Path>>) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            best: ArcSwap::from_pointee(initial_best),
            down_since: Mutex::new(HashMap::new()),
        })
    }

    /// Main loop: one payload at a time; every write of a payload's
    /// fan-out finishes before the next payload is taken.
    pub async fn run(self: Arc<Self>, mut payload_rx: mpsc::Receiver<Bytes>, cancel: CancellationToken) {
        loop {
            let payload = tokio::select! {
                _ = cancel.cancelled() => break,
                received = payload_rx.recv() => match received {
                    Some(payload) => payload,
                    None => {
                        info!("intercepted payload stream closed");
                        break;
                    }
                },
            };
            self.fan_out(payload).await;
        }
    }

    /// Writes `payload` to the best live paths, at most
    /// `max_connections` of them, concurrently. Write errors demote the
    /// path; the payload still goes out on the survivors.
    async fn fan_out(&self, payload: Bytes) {
        let targets = self.fanout_targets();
        if targets.is_empty() {
            debug!("no live paths, dropping payload");
            return;
        }

        let mut writes = JoinSet::new();
        for path in targets {
            let payload = payload.clone();
            writes.spawn(async move {
                let guard = path.send_lock().lock().await;
                let result = path.data().send(&payload).await;
                drop(guard);
                (path, result)
            });
        }
        while let Some(joined) = writes.join_next().await {
            let Ok((path, result)) = joined else { continue };
            if let Err(e) = result {
                self.mark_down(&path, &e);
            }
        }
    }

    /// The ordered best set minus down paths, capped at
    /// `max_connections`.
    fn fanout_targets(&self) -> Vec<Arc<Path>> {
        let best = self.best.load();
        let down = self.down_since.lock().unwrap_or_else(|e| e.into_inner());
        best.iter()
            .filter(|path| !down.contains_key(&path.index()))
            .take(self.cfg.max_connections)
            .cloned()
            .collect()
    }

    /// Records the down transition once; repeat errors on an
    /// already-down path neither re-log nor refresh the timestamp.
    fn mark_down(&self, path: &Arc<Path>, err: &std::io::Error) {
        let mut down = self.down_since.lock().unwrap_or_else(|e| e.into_inner());
        if !down.contains_key(&path.index()) {
            warn!(path = %path.label(), error = %err, "path down");
            down.insert(
                path.index(),
                DownEntry {
                    path: Arc::clone(path),
                    since: Instant::now(),
                },
            );
        }
    }

    /// Probes down paths every `probe_interval` until cancelled.
    pub async fn run_probe(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = interval(self.cfg.probe_interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.probe_down_paths().await;
        }
    }

    /// Writes one deadline-bounded byte to each path that has dwelled in
    /// the down set for at least a probe interval; a successful write
    /// puts the path back in rotation. Best-effort: no reply is
    /// expected, the proxy drops or forwards the byte as its dedup
    /// allows.
    async fn probe_down_paths(&self) {
        let now = Instant::now();
        let due: Vec<Arc<Path>> = {
            let down = self.down_since.lock().unwrap_or_else(|e| e.into_inner());
            down.values()
                .filter(|entry| due_for_probe(entry.since, now, self.cfg.probe_interval))
                .map(|entry| Arc::clone(&entry.path))
                .collect()
        };

        let deadline = probe_deadline(self.cfg.probe_interval);
        for path in due {
            let _guard = path.send_lock().lock().await;
            match timeout(deadline, path.data().send(&[0u8])).await {
                Ok(Ok(_)) => {
                    self.down_since
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .remove(&path.index());
                    info!(path = %path.label(), "path recovered");
                }
                Ok(Err(e)) => debug!(path = %path.label(), error = %e, "probe write failed"),
                Err(_) => debug!(path = %path.label(), "probe write timed out"),
            }
        }
    }

    /// Periodic re-selection. Re-ranks the current best set (no
    /// trimming past the first selection) and publishes the result only
    /// when the ordered identity changed; readers keep whatever
    /// snapshot they already hold.
    pub async fn run_updater(self: Arc<Self>, cancel: CancellationToken) {
        if !self.cfg.dynamic {
            return;
        }
        let mut ticker = interval(self.cfg.update_interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let current = self.best.load_full();
            let mut first_time = false;
            let reranked =
                ranker::select_best(&self.cfg, current.as_ref().clone(), &mut first_time).await;
            if identity(&reranked) != identity(&current) {
                info!("best path set changed");
                self.best.store(Arc::new(reranked));
            }
        }
    }

    #[cfg(test)]
    fn force_down(&self, path: &Arc<Path>, since: Instant) {
        self.down_since.lock().unwrap().insert(
            path.index(),
            DownEntry {
                path: Arc::clone(path),
                since,
            },
        );
    }

    #[cfg(test)]
    fn is_down(&self, path: &Arc<Path>) -> bool {
        self.down_since.lock().unwrap().contains_key(&path.index())
    }
}

fn identity(paths: &[Arc<Path>]) -> Vec<usize> {
    paths.iter().map(|p| p.index()).collect()
}

fn due_for_probe(since: Instant, now: Instant, probe_interval: Duration) -> bool {
    now.duration_since(since) >= probe_interval
}

/// Probe writes get a short deadline so a wedged socket cannot stall
/// the whole probe pass.
fn probe_deadline(probe_interval: Duration) -> Duration {
    probe_interval.min(Duration::from_secs(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::{PathSet, ProxyAddrs};
    use std::net::SocketAddr;
    use tokio::net::UdpSocket;

    async fn loopback_paths(count: usize) -> (Vec<Arc<Path>>, Vec<UdpSocket>) {
        let mut proxies = Vec::new();
        let mut listeners = Vec::new();
        for _ in 0..count {
            let data = UdpSocket::bind("127.0.0.1:0").await.expect("bind data");
            let ping = UdpSocket::bind("127.0.0.1:0").await.expect("bind ping");
            proxies.push(ProxyAddrs {
                data: data.local_addr().expect("data addr"),
                ping: ping.local_addr().expect("ping addr"),
            });
            listeners.push(data);
            listeners.push(ping);
        }
        let local: Vec<_> = vec!["127.0.0.1".parse().expect("ip")];
        let set = PathSet::connect(&local, &proxies).expect("path set");
        (set.into_paths(), listeners)
    }

    fn test_config(probe_interval: Duration) -> Arc<Config> {
        Arc::new(Config {
            probe_interval,
            ..Config::default()
        })
    }

    #[tokio::test]
    async fn down_paths_are_skipped_in_the_fanout() {
        let (paths, _listeners) = loopback_paths(3).await;
        let sender = MultipathSender::new(test_config(Duration::from_secs(10)), paths.clone());

        assert_eq!(identity(&sender.fanout_targets()), vec![0, 1]);

        sender.force_down(&paths[0], Instant::now());
        assert_eq!(identity(&sender.fanout_targets()), vec![1, 2]);
    }

    #[tokio::test]
    async fn successful_probe_restores_the_path() {
        let (paths, _listeners) = loopback_paths(2).await;
        let sender = MultipathSender::new(test_config(Duration::from_millis(10)), paths.clone());

        // Dwelled long enough to be probed; the loopback write succeeds.
        sender.force_down(&paths[0], Instant::now() - Duration::from_secs(1));
        assert!(sender.is_down(&paths[0]));

        sender.probe_down_paths().await;
        assert!(!sender.is_down(&paths[0]));
        assert_eq!(identity(&sender.fanout_targets()), vec![0, 1]);
    }

    #[tokio::test]
    async fn fresh_down_paths_are_not_probed_early() {
        let (paths, _listeners) = loopback_paths(2).await;
        let sender = MultipathSender::new(test_config(Duration::from_secs(10)), paths.clone());

        sender.force_down(&paths[1], Instant::now());
        sender.probe_down_paths().await;
        // Not due yet: dwell is under the probe interval.
        assert!(sender.is_down(&paths[1]));
    }

    #[tokio::test]
    async fn fan_out_writes_to_each_selected_path() {
        let (paths, listeners) = loopback_paths(2).await;
        let sender = MultipathSender::new(test_config(Duration::from_secs(10)), paths);

        sender.fan_out(Bytes::from_static(b"move order")).await;

        let mut buf = [0u8; 32];
        for data_listener in [&listeners[0], &listeners[2]] {
            let (n, _src): (usize, SocketAddr) = timeout(
                Duration::from_secs(1),
                data_listener.recv_from(&mut buf),
            )
            .await
            .expect("fan-out datagram")
            .expect("recv");
            assert_eq!(&buf[..n], b"move order");
        }
    }

    #[test]
    fn probe_deadline_is_capped_at_one_second() {
        assert_eq!(
            probe_deadline(Duration::from_secs(10)),
            Duration::from_secs(1)
        );
        assert_eq!(
            probe_deadline(Duration::from_millis(200)),
            Duration::from_millis(200)
        );
    }

    #[test]
    fn probe_dwell_honors_the_interval() {
        let now = Instant::now();
        let interval = Duration::from_secs(10);
        assert!(due_for_probe(now - Duration::from_secs(11), now, interval));
        assert!(due_for_probe(now - Duration::from_secs(10), now, interval));
        assert!(!due_for_probe(now - Duration::from_secs(9), now, interval));
    }
}
