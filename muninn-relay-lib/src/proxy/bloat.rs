use std::sync::Arc;
use std::time::{Duration, Instant};

use rustls_pki_types::ServerName;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::config::Config;
use crate::error::{RelayError, Result};

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const HTTPS_PORT: u16 = 443;

/// Measures the proxy-side request overhead ("bloat") against the
/// shard's regional HTTPS endpoint: everything a request spends that is
/// not on-wire latency, in milliseconds.
///
///   bloat = total_elapsed − (first_byte − write_done)
///
/// The request is driven by hand over a fresh TLS connection so the two
/// inner timestamps exist: the instant the request bytes are flushed
/// and the instant the first response byte arrives. The connection is
/// not reused and the body is discarded. Clients subtract the echoed
/// bloat from their observed ping RTT to approximate the pure UDP
/// round trip.
pub async fn measure_bloat(cfg: &Config) -> Result<u64> {
    let host = cfg.shard.bloat_host();
    timeout(PROBE_TIMEOUT, probe(host, &cfg.rand))
        .await
        .map_err(|_| {
            RelayError::BloatProbe(format!("timed out after {PROBE_TIMEOUT:?} against {host}"))
        })?
}

async fn probe(host: &'static str, rand: &str) -> Result<u64> {
    let t0 = Instant::now();

    let tcp = TcpStream::connect((host, HTTPS_PORT)).await?;
    let connector = TlsConnector::from(tls_config());
    let server_name = ServerName::try_from(host)
        .map_err(|e| RelayError::BloatProbe(format!("invalid server name {host:?}: {e}")))?;
    let mut stream = connector.connect(server_name, tcp).await?;

    let request = format!(
        "GET /ping?x={rand} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Connection: close\r\n\
         User-Agent: muninn-relay\r\n\
         Accept: */*\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;
    let write_done = Instant::now();

    let mut first = [0u8; 1];
    let n = stream.read(&mut first).await?;
    if n == 0 {
        return Err(RelayError::BloatProbe(
            "connection closed before any response byte".into(),
        ));
    }
    let first_byte = Instant::now();

    // Drain and discard the rest of the response.
    let mut sink = [0u8; 4096];
    loop {
        match stream.read(&mut sink).await {
            Ok(0) => break,
            Ok(_) => continue,
            // Peers that skip close_notify surface as an unexpected EOF.
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
    }

    let total = t0.elapsed();
    let wire_latency = first_byte.duration_since(write_done);
    let bloat = total.saturating_sub(wire_latency);
    debug!(
        host,
        total_ms = total.as_millis() as u64,
        wire_ms = wire_latency.as_millis() as u64,
        bloat_ms = bloat.as_millis() as u64,
        "bloat probe"
    );
    Ok(bloat.as_millis() as u64)
}

fn tls_config() -> Arc<ClientConfig> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    Arc::new(
        ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    )
}
