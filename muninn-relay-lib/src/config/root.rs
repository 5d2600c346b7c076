use std::time::Duration;

use rand::Rng;

use crate::config::Shard;
use crate::error::{RelayError, Result};

/// Run configuration for both the client-side engine and the proxy
/// endpoints. Built from CLI flags; immutable for the run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Game shard; selects the HTTPS endpoint used for bloat measurement
    pub shard: Shard,
    /// Drop paths whose first-selection RTT exceeds factor × lowest RTT
    pub threshold_factor: f64,
    /// Maximum fan-out per payload
    pub max_connections: usize,
    /// Cadence of dynamic path re-selection
    pub update_interval: Duration,
    /// Cadence of down-path probing
    pub probe_interval: Duration,
    /// RTT probe timeout
    pub timeout: Duration,
    /// Fingerprint eviction age and sweep cadence
    pub cleanup_interval: Duration,
    /// Re-select paths periodically instead of freezing the first selection
    pub dynamic: bool,
    /// Cache-busting hex token appended to the bloat URL
    pub rand: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shard: Shard::Na,
            threshold_factor: 1.4,
            max_connections: 2,
            update_interval: Duration::from_secs(30),
            probe_interval: Duration::from_secs(10),
            timeout: Duration::from_secs(1),
            cleanup_interval: Duration::from_secs(1),
            dynamic: false,
            rand: random_hex(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(RelayError::Config(
                "max-connections must be at least 1".into(),
            ));
        }
        if self.threshold_factor < 1.0 {
            return Err(RelayError::Config(format!(
                "threshold-factor must be >= 1.0, got {}",
                self.threshold_factor
            )));
        }
        if self.timeout.is_zero() {
            return Err(RelayError::Config("timeout must be non-zero".into()));
        }
        if self.cleanup_interval.is_zero() {
            return Err(RelayError::Config(
                "cleanup-interval must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// URL the proxy-side bloat probe requests for this shard.
    pub fn bloat_url(&self) -> String {
        format!("https://{}/ping?x={}", self.shard.bloat_host(), self.rand)
    }
}

fn random_hex() -> String {
    format!("{:016x}", rand::rng().random::<u64>())
}
