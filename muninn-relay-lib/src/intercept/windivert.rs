use std::sync::Mutex;

use windivert::address::WinDivertNetworkData;
use windivert::layer::NetworkLayer;
use windivert::prelude::{WinDivertFlags, WinDivertShutdownMode};
use windivert::{packet::WinDivertPacket, WinDivert};

use super::divert::Diversion;
use crate::error::{RelayError, Result};

/// WinDivert-backed diversion handle. Filters are port-scoped so only
/// the game client's flow is touched.
pub struct WinDivertHandle {
    handle: WinDivert<NetworkLayer>,
    // WinDivert shutdown takes the handle mutably; receives run on a
    // different thread and only need &self.
    shutdown: Mutex<bool>,
}

impl WinDivertHandle {
    /// Handle stealing the client's outbound datagrams.
    pub fn outbound(client_port: u16) -> Result<Self> {
        Self::open(&format!(
            "udp.SrcPort == {client_port} and outbound and !loopback"
        ))
    }

    /// Handle capturing datagrams addressed to the client.
    pub fn inbound(client_port: u16) -> Result<Self> {
        Self::open(&format!(
            "udp.DstPort == {client_port} and inbound and !loopback"
        ))
    }

    fn open(filter: &str) -> Result<Self> {
        let handle = WinDivert::network(filter, 0, WinDivertFlags::new())
            .map_err(|e| RelayError::Divert(format!("open failed for filter {filter:?}: {e}")))?;
        Ok(Self {
            handle,
            shutdown: Mutex::new(false),
        })
    }
}

impl Diversion for WinDivertHandle {
    type Meta = WinDivertNetworkData<'static>;

    fn recv(&self, buf: &mut [u8]) -> Result<Option<(usize, Self::Meta)>> {
        match self.handle.recv(Some(buf)) {
            Ok(packet) => {
                let len = packet.data.len();
                Ok(Some((len, packet.address)))
            }
            Err(e) if is_truncation(&e) => Ok(None),
            Err(e) => Err(RelayError::Divert(e.to_string())),
        }
    }

    fn inject(&self, packet: &[u8], meta: &Self::Meta) -> Result<()> {
        let packet = WinDivertPacket::<NetworkLayer> {
            address: meta.clone(),
            data: packet.to_vec().into(),
        };
        self.handle
            .send(&packet)
            .map_err(|e| RelayError::Divert(format!("inject failed: {e}")))?;
        Ok(())
    }

    fn shutdown(&self) {
        let mut done = self.shutdown.lock().unwrap_or_else(|e| e.into_inner());
        if !*done {
            let _ = self.handle.shutdown(WinDivertShutdownMode::Both);
            *done = true;
        }
    }
}

/// The OS truncated the capture; the packet was consumed and the next
/// receive proceeds normally.
fn is_truncation(err: &windivert::error::WinDivertError) -> bool {
    err.to_string().contains("insufficient buffer")
}
