mod divert;
mod inbound;
mod outbound;
#[cfg(windows)]
mod windivert;
mod wire;

use std::sync::Arc;
use std::thread::JoinHandle;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;

use crate::dedup::FingerprintTracker;
use crate::error::Result;

pub use divert::Diversion;
pub use inbound::run_inbound;
pub use outbound::run_outbound;
pub use wire::udp_payload;

/// Capacity of the intercepted-payload channel feeding the sender.
/// Backpressure otherwise comes from the game's own send rate.
pub const INTERCEPT_BUFFER: usize = 256;

/// Handle over the running interception threads. Stopping shuts both
/// diversion handles down, which unblocks their receive loops.
pub struct Interceptor {
    stoppers: Vec<Box<dyn Fn() + Send + Sync>>,
    threads: Vec<JoinHandle<()>>,
}

impl Interceptor {
    pub fn stop(self) {
        for stop in &self.stoppers {
            stop();
        }
        for thread in self.threads {
            let _ = thread.join();
        }
        debug!("interceptor stopped");
    }
}

/// Opens the outbound and inbound diversion handles for `client_port`
/// and starts their loops on dedicated threads: outbound datagrams are
/// stolen and their payloads forwarded to `payload_tx`; inbound
/// datagrams are deduplicated against `tracker` and reinjected once.
#[cfg(windows)]
pub fn spawn(
    client_port: u16,
    payload_tx: mpsc::Sender<Bytes>,
    tracker: Arc<FingerprintTracker>,
) -> Result<Interceptor> {
    use self::windivert::WinDivertHandle;

    let outbound = Arc::new(WinDivertHandle::outbound(client_port)?);
    let inbound = Arc::new(WinDivertHandle::inbound(client_port)?);

    let out_loop = Arc::clone(&outbound);
    let in_loop = Arc::clone(&inbound);
    let threads = vec![
        std::thread::Builder::new()
            .name("divert-out".into())
            .spawn(move || run_outbound(&*out_loop, payload_tx))?,
        std::thread::Builder::new()
            .name("divert-in".into())
            .spawn(move || run_inbound(&*in_loop, &tracker))?,
    ];
    let stoppers: Vec<Box<dyn Fn() + Send + Sync>> = vec![
        Box::new(move || outbound.shutdown()),
        Box::new(move || inbound.shutdown()),
    ];
    Ok(Interceptor { stoppers, threads })
}

/// Packet diversion needs WinDivert; there is no backend for this
/// platform.
#[cfg(not(windows))]
pub fn spawn(
    client_port: u16,
    _payload_tx: mpsc::Sender<Bytes>,
    _tracker: Arc<FingerprintTracker>,
) -> Result<Interceptor> {
    Err(crate::error::RelayError::Divert(format!(
        "no packet diversion backend on this platform (wanted to divert UDP port {client_port})"
    )))
}
