use etherparse::{SlicedPacket, TransportSlice};

/// UDP payload of a diverted IP packet, or `None` when the packet has
/// no parseable UDP layer. Malformed captures are the caller's cue to
/// drop silently.
pub fn udp_payload(packet: &[u8]) -> Option<&[u8]> {
    let sliced = SlicedPacket::from_ip(packet).ok()?;
    match sliced.transport {
        Some(TransportSlice::Udp(udp)) => Some(udp.payload()),
        _ => None,
    }
}
