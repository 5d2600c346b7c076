use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use ahash::RandomState;

/// Time-windowed set of packet fingerprints.
///
/// The proxy endpoint and the inbound interceptor keep one tracker per
/// listener: the first copy of a payload passes, later copies seen
/// within the cleanup window are dropped. Fingerprints are 64-bit
/// content hashes of the payload bytes only.
pub struct FingerprintTracker {
    seen: Mutex<HashMap<u64, Instant>>,
    hasher: RandomState,
    cleanup_interval: Duration,
}

impl FingerprintTracker {
    pub fn new(cleanup_interval: Duration) -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            hasher: RandomState::default(),
            cleanup_interval,
        }
    }

    /// 64-bit content fingerprint of a datagram payload. Keyed per
    /// tracker, so fingerprints from different trackers do not compare.
    pub fn fingerprint(&self, payload: &[u8]) -> u64 {
        self.hasher.hash_one(payload)
    }

    /// Whether `fp` was already observed within the cleanup window. A
    /// novel fingerprint is recorded with the current time. Atomic with
    /// respect to concurrent callers.
    pub fn is_duplicate(&self, fp: u64) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        match seen.entry(fp) {
            Entry::Occupied(_) => true,
            Entry::Vacant(slot) => {
                slot.insert(Instant::now());
                false
            }
        }
    }

    /// Evicts every fingerprint at least one cleanup interval old.
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        seen.retain(|_, first_seen| now.duration_since(*first_seen) < self.cleanup_interval);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_occurrence_is_a_duplicate() {
        let tracker = FingerprintTracker::new(Duration::from_secs(60));
        assert!(!tracker.is_duplicate(42));
        assert!(tracker.is_duplicate(42));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn distinct_payloads_get_distinct_fingerprints() {
        let tracker = FingerprintTracker::new(Duration::from_secs(1));
        let a = tracker.fingerprint(b"attack at dawn");
        let b = tracker.fingerprint(b"attack at dusk");
        assert_ne!(a, b);
        assert_eq!(a, tracker.fingerprint(b"attack at dawn"));
    }

    #[test]
    fn sweep_evicts_only_expired_entries() {
        let tracker = FingerprintTracker::new(Duration::from_millis(50));
        assert!(!tracker.is_duplicate(3));
        std::thread::sleep(Duration::from_millis(80));
        assert!(!tracker.is_duplicate(4));

        tracker.sweep();

        // 3 aged out; 4 is still fresh.
        assert!(!tracker.is_duplicate(3));
        assert!(tracker.is_duplicate(4));
    }

    #[test]
    fn entry_is_novel_again_after_expiry_and_sweep() {
        let tracker = FingerprintTracker::new(Duration::from_millis(30));
        assert!(!tracker.is_duplicate(7));
        std::thread::sleep(Duration::from_millis(50));
        tracker.sweep();
        assert!(!tracker.is_duplicate(7));
    }
}
