//! Interception loops against an in-memory diversion double: payload
//! extraction on the outbound side, dedup-and-reinject on the inbound
//! side.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use muninn_relay_lib::intercept::{run_inbound, run_outbound, udp_payload, Diversion};
use muninn_relay_lib::{FingerprintTracker, RelayError, Result};
use tokio::sync::mpsc;

/// Diversion double: yields queued packets, then reports the handle as
/// closed. Injections are recorded.
struct FakeDivert {
    packets: Mutex<VecDeque<Vec<u8>>>,
    injected: Mutex<Vec<Vec<u8>>>,
}

impl FakeDivert {
    fn with_packets(packets: Vec<Vec<u8>>) -> Self {
        Self {
            packets: Mutex::new(packets.into()),
            injected: Mutex::new(Vec::new()),
        }
    }

    fn injected(&self) -> Vec<Vec<u8>> {
        self.injected.lock().expect("lock").clone()
    }
}

impl Diversion for FakeDivert {
    type Meta = ();

    fn recv(&self, buf: &mut [u8]) -> Result<Option<(usize, ())>> {
        match self.packets.lock().expect("lock").pop_front() {
            Some(packet) => {
                buf[..packet.len()].copy_from_slice(&packet);
                Ok(Some((packet.len(), ())))
            }
            None => Err(RelayError::Divert("handle closed".into())),
        }
    }

    fn inject(&self, packet: &[u8], _meta: &()) -> Result<()> {
        self.injected.lock().expect("lock").push(packet.to_vec());
        Ok(())
    }

    fn shutdown(&self) {}
}

fn udp_packet(src: [u8; 4], payload: &[u8]) -> Vec<u8> {
    let builder = etherparse::PacketBuilder::ipv4(src, [192, 168, 0, 7], 64).udp(5000, 5100);
    let mut packet = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut packet, payload).expect("packet");
    packet
}

#[test]
fn outbound_steals_payloads_and_skips_garbage() {
    let divert = FakeDivert::with_packets(vec![
        udp_packet([10, 0, 0, 2], b"hello"),
        b"not an ip packet".to_vec(),
        udp_packet([10, 0, 0, 2], b"world"),
    ]);
    let (payload_tx, mut payload_rx) = mpsc::channel(256);

    run_outbound(&divert, payload_tx);

    assert_eq!(payload_rx.try_recv().expect("first"), &b"hello"[..]);
    assert_eq!(payload_rx.try_recv().expect("second"), &b"world"[..]);
    // Loop ended and dropped its sender.
    assert!(payload_rx.try_recv().is_err());
    // Stealing means nothing was reinjected.
    assert!(divert.injected().is_empty());
}

#[test]
fn inbound_reinjects_each_payload_once() {
    // Same payload from two different sources: content dedup drops the
    // second copy even though the packets differ.
    let first = udp_packet([10, 0, 0, 2], b"state update");
    let second_source = udp_packet([10, 0, 0, 3], b"state update");
    let other = udp_packet([10, 0, 0, 2], b"different");
    let divert = FakeDivert::with_packets(vec![first.clone(), second_source, other.clone()]);
    let tracker = FingerprintTracker::new(Duration::from_secs(60));

    run_inbound(&divert, &tracker);

    assert_eq!(divert.injected(), vec![first, other]);
}

#[test]
fn inbound_drops_unparseable_packets_silently() {
    let divert = FakeDivert::with_packets(vec![b"garbage".to_vec()]);
    let tracker = FingerprintTracker::new(Duration::from_secs(60));

    run_inbound(&divert, &tracker);

    assert!(divert.injected().is_empty());
}

#[test]
fn payload_extraction_matches_what_was_sent() {
    let packet = udp_packet([10, 0, 0, 2], b"snapshot");
    assert_eq!(udp_payload(&packet), Some(&b"snapshot"[..]));
    assert_eq!(udp_payload(b"junk"), None);
}
