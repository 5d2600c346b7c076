use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, info};

use super::probe::{udping, BAD_PING};
use crate::config::Config;
use crate::path::Path;

struct Probe {
    path: Arc<Path>,
    rtt_ms: i64,
}

/// Pings every path concurrently and returns them ordered by ascending
/// bloat-corrected RTT; ties keep their input order. On the first call
/// (`first_time`) the ordered tail whose RTT exceeds
/// `threshold_factor × best` is dropped and its sockets released, and
/// the flag is cleared.
///
/// Paths that fail their ping are ranked with [`BAD_PING`] rather than
/// removed: when few paths exist they can still be kept, which beats
/// starving the fan-out.
///
/// The kept list can be longer than `max_connections` when the
/// threshold admits more paths; the sender caps each fan-out, and the
/// surplus serves as fallback while paths are down.
pub async fn select_best(cfg: &Config, paths: Vec<Arc<Path>>, first_time: &mut bool) -> Vec<Arc<Path>> {
    let mut pings = JoinSet::new();
    for path in &paths {
        let path = Arc::clone(path);
        let deadline = cfg.timeout;
        pings.spawn(async move {
            let rtt_ms = match udping(&path, deadline).await {
                Ok(rtt) => rtt,
                Err(e) => {
                    debug!(path = %path.label(), error = %e, "ping failed");
                    BAD_PING
                }
            };
            (path.index(), rtt_ms)
        });
    }

    let mut rtts: HashMap<usize, i64> = HashMap::with_capacity(paths.len());
    while let Some(joined) = pings.join_next().await {
        if let Ok((index, rtt_ms)) = joined {
            rtts.insert(index, rtt_ms);
        }
    }

    let mut probes: Vec<Probe> = paths
        .into_iter()
        .map(|path| {
            let rtt_ms = rtts.get(&path.index()).copied().unwrap_or(BAD_PING);
            Probe { path, rtt_ms }
        })
        .collect();
    // Stable: equal RTTs keep their construction order.
    probes.sort_by_key(|p| p.rtt_ms);

    if *first_time {
        if probes.len() > cfg.max_connections {
            let rtt_order: Vec<i64> = probes.iter().map(|p| p.rtt_ms).collect();
            let keep = keep_count(&rtt_order, cfg.threshold_factor);
            for dropped in probes.split_off(keep) {
                info!(
                    path = %dropped.path.label(),
                    rtt_ms = dropped.rtt_ms,
                    "dropping path above first-selection threshold"
                );
                // Last reference: both sockets close here.
            }
        }
        *first_time = false;
    }

    for probe in probes.iter().take(cfg.max_connections) {
        info!(path = %probe.path.label(), rtt_ms = probe.rtt_ms, "expected ping");
    }

    probes.into_iter().map(|p| p.path).collect()
}

/// Number of leading results the first-selection trim keeps, given the
/// RTTs in ascending order.
fn keep_count(rtts: &[i64], threshold_factor: f64) -> usize {
    let Some(&best) = rtts.first() else { return 0 };
    let cutoff = (best as f64 * threshold_factor) as i64;
    match closest_not_exceeding(rtts, cutoff) {
        Some(idx) => idx + 1,
        // Cutoff below even the best entry; keep the best path.
        None => 1,
    }
}

/// Index of the element closest to `target` without exceeding it, in an
/// ascending slice. An element equal to `target` counts. `None` when
/// every element exceeds `target`.
pub fn closest_not_exceeding(values: &[i64], target: i64) -> Option<usize> {
    values.partition_point(|&v| v <= target).checked_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closest_not_exceeding_finds_exact_match() {
        assert_eq!(closest_not_exceeding(&[100, 120, 140, 160, 180], 140), Some(2));
    }

    #[test]
    fn closest_not_exceeding_between_elements() {
        assert_eq!(closest_not_exceeding(&[100, 120, 140, 160, 180], 150), Some(2));
    }

    #[test]
    fn closest_not_exceeding_at_the_start() {
        assert_eq!(closest_not_exceeding(&[100, 135, 280, 300], 100), Some(0));
    }

    #[test]
    fn closest_not_exceeding_past_the_end() {
        assert_eq!(closest_not_exceeding(&[120, 150, 190, 200], 250), Some(3));
    }

    #[test]
    fn closest_not_exceeding_below_every_element() {
        assert_eq!(closest_not_exceeding(&[120, 150, 190], 100), None);
    }

    #[test]
    fn trim_drops_the_tail_above_the_cutoff() {
        // Sorted [100, 120, 150, 180] with factor 1.4: cutoff 140.
        assert_eq!(keep_count(&[100, 120, 150, 180], 1.4), 2);
    }

    #[test]
    fn trim_with_a_tight_factor_keeps_only_the_best() {
        // Cutoff 11 admits nothing past the first entry.
        assert_eq!(keep_count(&[10, 20, 30, 40], 1.1), 1);
    }

    #[test]
    fn trim_keeps_an_rtt_equal_to_the_cutoff() {
        // Cutoff 140 lands exactly on the third entry.
        assert_eq!(keep_count(&[100, 120, 140, 180], 1.4), 3);
    }

    #[test]
    fn trim_keeps_everything_under_a_generous_factor() {
        assert_eq!(keep_count(&[20, 30, 50], 3.0), 3);
    }
}
