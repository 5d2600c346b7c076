use std::io::{Error as IoError, ErrorKind};
use std::time::{Duration, Instant};

use tokio::time::timeout;
use tracing::debug;

use crate::error::Result;
use crate::path::Path;

/// RTT recorded for a path that did not answer its ping in time. Large
/// enough to sort such paths behind every live one.
pub const BAD_PING: i64 = 2000;

/// A ping datagram and its reply are exactly this long.
pub const PING_LEN: usize = 8;

const DRAIN_TIMEOUT: Duration = Duration::from_millis(10);

pub fn encode_bloat(ms: u64) -> [u8; PING_LEN] {
    ms.to_be_bytes()
}

pub fn decode_bloat(buf: [u8; PING_LEN]) -> u64 {
    u64::from_be_bytes(buf)
}

/// Sends an 8-byte ping over the path's ping socket and returns the
/// bloat-corrected RTT in milliseconds.
///
/// The reply carries the proxy's measured HTTPS bloat as a big-endian
/// u64; subtracting it approximates the pure UDP round trip, which can
/// come out negative when the bloat estimate overshoots. The whole
/// exchange is bounded by `deadline`; errors and timeouts propagate so
/// the caller can substitute [`BAD_PING`].
pub async fn udping(path: &Path, deadline: Duration) -> Result<i64> {
    let _guard = path.ping_lock().lock().await;
    let sock = path.ping();

    // Drain replies left over from an earlier timed-out ping.
    let mut stale = [0u8; PING_LEN];
    while let Ok(Ok(_)) = timeout(DRAIN_TIMEOUT, sock.recv(&mut stale)).await {}

    let exchange = async {
        let t0 = Instant::now();
        sock.send(&[0u8; PING_LEN]).await?;
        let mut reply = [0u8; PING_LEN];
        let n = sock.recv(&mut reply).await?;
        if n != PING_LEN {
            return Err(IoError::new(
                ErrorKind::InvalidData,
                format!("short ping reply: {n} bytes"),
            ));
        }
        Ok::<_, IoError>((t0.elapsed(), reply))
    };
    let (elapsed, reply) = timeout(deadline, exchange)
        .await
        .map_err(|_| IoError::from(ErrorKind::TimedOut))??;

    let bloat_ms = decode_bloat(reply);
    let rtt_ms = elapsed.as_millis() as i64 - bloat_ms as i64;
    debug!(
        path = %path.label(),
        bloat_ms,
        total_ms = elapsed.as_millis() as u64,
        rtt_ms,
        "udping"
    );
    Ok(rtt_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bloat_roundtrips_through_the_wire_format() {
        for ms in [0u64, 1, 37, 2000, u64::MAX] {
            assert_eq!(decode_bloat(encode_bloat(ms)), ms);
        }
    }

    #[test]
    fn bloat_encoding_is_big_endian() {
        assert_eq!(encode_bloat(1), [0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(encode_bloat(0x0102), [0, 0, 0, 0, 0, 0, 1, 2]);
    }
}
