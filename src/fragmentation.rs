//! The fragmentation/reassembly codec (§4.1).
//!
//! Splits an opaque blob into fixed-capacity packets for a peer's negotiated
//! MTU, and inversely reassembles inbound packets — which may arrive in any
//! order, and may interleave with packets from unrelated streams — back into
//! the original blob.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use crc32fast::Hasher;

use crate::{
    error::BleuError,
    link::PeerId,
};

/// Size of the packed header: `stream_id (16) + seq (2) + total (2) + checksum (4)`.
pub const HEADER_SIZE: usize = 24;

/// A fixed-header framing unit carrying one slice of an envelope (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub stream_id: u128,
    pub seq: u16,
    pub total: u16,
    pub checksum: u32,
    pub payload: Vec<u8>,
}

impl Packet {
    fn checksum_of(stream_id: u128, seq: u16, total: u16, payload: &[u8]) -> u32 {
        let mut hasher = Hasher::new();
        hasher.update(&stream_id.to_be_bytes());
        hasher.update(&seq.to_be_bytes());
        hasher.update(&total.to_be_bytes());
        hasher.update(&0u32.to_be_bytes()); // checksum field zeroed per §4.1
        hasher.update(payload);
        hasher.finalize()
    }

    fn new(stream_id: u128, seq: u16, total: u16, payload: Vec<u8>) -> Self {
        let checksum = Self::checksum_of(stream_id, seq, total, &payload);
        Self {
            stream_id,
            seq,
            total,
            checksum,
            payload,
        }
    }

    fn is_checksum_valid(&self) -> bool {
        Self::checksum_of(self.stream_id, self.seq, self.total, &self.payload) == self.checksum
    }
}

/// Binary wire layout: `stream_id (16B BE) | seq (2B BE) | total (2B BE) |
/// checksum (4B BE) | payload`. Part of the §6 wire contract.
pub fn pack(packet: &Packet) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + packet.payload.len());
    out.extend_from_slice(&packet.stream_id.to_be_bytes());
    out.extend_from_slice(&packet.seq.to_be_bytes());
    out.extend_from_slice(&packet.total.to_be_bytes());
    out.extend_from_slice(&packet.checksum.to_be_bytes());
    out.extend_from_slice(&packet.payload);
    out
}

/// Inverse of [`pack`]. Rejects undersized or malformed headers.
pub fn unpack(bytes: &[u8]) -> Result<Packet, BleuError> {
    if bytes.len() < HEADER_SIZE {
        return Err(BleuError::InvalidEnvelope(format!(
            "packet too short: {} bytes, header is {HEADER_SIZE}",
            bytes.len()
        )));
    }
    let stream_id = u128::from_be_bytes(bytes[0..16].try_into().unwrap());
    let seq = u16::from_be_bytes(bytes[16..18].try_into().unwrap());
    let total = u16::from_be_bytes(bytes[18..20].try_into().unwrap());
    let checksum = u32::from_be_bytes(bytes[20..24].try_into().unwrap());
    let payload = bytes[HEADER_SIZE..].to_vec();
    Ok(Packet {
        stream_id,
        seq,
        total,
        checksum,
        payload,
    })
}

/// Splits `blob` into packets sized for `mtu`, sharing a fresh `stream_id`.
///
/// Fails only if `mtu` leaves no room for payload after the header.
pub fn fragment(blob: &[u8], mtu: usize) -> Result<Vec<Packet>, BleuError> {
    if mtu <= HEADER_SIZE {
        return Err(BleuError::TransportFailed("mtu too small".into()));
    }
    let cap = mtu - HEADER_SIZE;
    let stream_id = crate::identity::new_stream_id();

    if blob.is_empty() {
        return Ok(vec![Packet::new(stream_id, 0, 1, Vec::new())]);
    }

    let total = blob.len().div_ceil(cap);
    if total > u16::MAX as usize {
        return Err(BleuError::TransportFailed(format!(
            "blob requires {total} packets, exceeds the 16-bit total field"
        )));
    }
    let total = total as u16;

    let packets = blob
        .chunks(cap)
        .enumerate()
        .map(|(i, chunk)| Packet::new(stream_id, i as u16, total, chunk.to_vec()))
        .collect();
    Ok(packets)
}

/// Per-`(peer_id, stream_id)` collection of inbound packets awaiting
/// completion.
struct ReassemblyBuffer {
    total: u16,
    received: HashMap<u16, Vec<u8>>,
    start_time: Instant,
}

impl ReassemblyBuffer {
    fn new(total: u16) -> Self {
        Self {
            total,
            received: HashMap::new(),
            start_time: Instant::now(),
        }
    }

    fn is_complete(&self) -> bool {
        self.received.len() == self.total as usize
    }

    fn assemble(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for seq in 0..self.total {
            if let Some(chunk) = self.received.get(&seq) {
                out.extend_from_slice(chunk);
            }
        }
        out
    }
}

/// Owns every in-flight reassembly buffer for a single runtime instance.
///
/// Keyed by `(peer_id, stream_id)` — `stream_id` alone is already unique in
/// practice (it is a random 128-bit value), but namespacing by peer matches
/// §4.1 literally and keeps one compromised/buggy peer from ever colliding
/// with another peer's stream.
#[derive(Default)]
pub struct Reassembler {
    buffers: HashMap<(PeerId, u128), ReassemblyBuffer>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `packet` and returns the assembled blob once every index in
    /// `[0, total)` has arrived. Malformed or checksum-invalid packets are
    /// discarded silently, per §4.1 — they cannot corrupt other streams
    /// because `stream_id` namespaces them.
    pub fn ingest(&mut self, peer_id: &PeerId, packet: Packet) -> Option<Vec<u8>> {
        if packet.total == 0 || packet.seq >= packet.total {
            tracing::warn!(
                peer = %peer_id,
                stream_id = packet.stream_id,
                seq = packet.seq,
                total = packet.total,
                "discarding packet with invalid seq/total"
            );
            return None;
        }
        if !packet.is_checksum_valid() {
            tracing::warn!(
                peer = %peer_id,
                stream_id = packet.stream_id,
                seq = packet.seq,
                "discarding packet with invalid checksum"
            );
            return None;
        }

        let key = (peer_id.clone(), packet.stream_id);
        let buffer = self
            .buffers
            .entry(key.clone())
            .or_insert_with(|| ReassemblyBuffer::new(packet.total));
        buffer.received.insert(packet.seq, packet.payload);

        if buffer.is_complete() {
            let buffer = self.buffers.remove(&key).unwrap();
            Some(buffer.assemble())
        } else {
            None
        }
    }

    /// Drops the buffer for `(peer_id, stream_id)`, if any. Used when an
    /// RPC timeout fires and the expected response stream must not leak
    /// (§4.4), and when a peer disconnects.
    pub fn discard(&mut self, peer_id: &PeerId, stream_id: u128) {
        self.buffers.remove(&(peer_id.clone(), stream_id));
    }

    /// Drops every buffer associated with `peer_id` (peer disconnect).
    pub fn discard_all_for(&mut self, peer_id: &PeerId) {
        self.buffers.retain(|(p, _), _| p != peer_id);
    }

    /// Periodic sweep (§5): drops buffers older than `max_age`.
    pub fn sweep_expired(&mut self, max_age: Duration) -> usize {
        let before = self.buffers.len();
        self.buffers
            .retain(|_, buf| buf.start_time.elapsed() < max_age);
        before - self.buffers.len()
    }

    #[cfg(test)]
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(name: &str) -> PeerId {
        PeerId::from(name)
    }

    #[test]
    fn fragment_and_reassemble_round_trips_arbitrary_blobs() {
        let blob: Vec<u8> = (0..2000u32).map(|b| (b % 251) as u8).collect();
        let packets = fragment(&blob, 64).unwrap();
        assert!(packets.len() > 1, "mtu of 64 should force multiple packets");

        let mut reassembler = Reassembler::new();
        let p = peer("central");
        let mut out = None;
        for packet in packets {
            let wire = pack(&packet);
            let unpacked = unpack(&wire).unwrap();
            out = reassembler.ingest(&p, unpacked);
        }
        assert_eq!(out.unwrap(), blob);
        assert_eq!(reassembler.buffer_count(), 0);
    }

    #[test]
    fn empty_blob_fragments_to_a_single_empty_packet() {
        let packets = fragment(&[], 64).unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].total, 1);

        let mut reassembler = Reassembler::new();
        let p = peer("central");
        let out = reassembler.ingest(&p, packets.into_iter().next().unwrap());
        assert_eq!(out.unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn mtu_too_small_for_header_is_rejected() {
        assert!(fragment(b"hello", HEADER_SIZE - 1).is_err());
    }

    #[test]
    fn packets_out_of_order_still_reassemble_correctly() {
        let blob = b"the quick brown fox jumps over the lazy dog".to_vec();
        let mut packets = fragment(&blob, HEADER_SIZE + 8).unwrap();
        packets.reverse();

        let mut reassembler = Reassembler::new();
        let p = peer("central");
        let mut out = None;
        for packet in packets {
            out = reassembler.ingest(&p, packet);
        }
        assert_eq!(out.unwrap(), blob);
    }

    #[test]
    fn corrupted_checksum_is_discarded_and_never_completes() {
        let blob = b"hello world".to_vec();
        let mut packets = fragment(&blob, HEADER_SIZE + 4).unwrap();
        for packet in &mut packets {
            packet.checksum ^= 0xFFFF_FFFF;
        }

        let mut reassembler = Reassembler::new();
        let p = peer("central");
        let mut completed = false;
        for packet in packets {
            if reassembler.ingest(&p, packet).is_some() {
                completed = true;
            }
        }
        assert!(!completed, "packets with invalid checksums must never complete a stream");
        assert_eq!(reassembler.buffer_count(), 0);
    }

    #[test]
    fn two_peers_with_colliding_stream_ids_do_not_interfere() {
        let mut reassembler = Reassembler::new();
        let a = peer("alice");
        let b = peer("bob");

        let packet = Packet::new(42, 0, 2, b"part-one-".to_vec());
        assert!(reassembler.ingest(&a, packet.clone()).is_none());
        assert!(reassembler.ingest(&b, packet).is_none());
        assert_eq!(reassembler.buffer_count(), 2);

        reassembler.discard_all_for(&a);
        assert_eq!(reassembler.buffer_count(), 1);
    }

    #[test]
    fn sweep_expired_drops_only_stale_buffers() {
        let mut reassembler = Reassembler::new();
        let p = peer("central");
        reassembler.ingest(&p, Packet::new(7, 0, 2, b"partial".to_vec()));
        assert_eq!(reassembler.buffer_count(), 1);

        assert_eq!(reassembler.sweep_expired(Duration::from_secs(3600)), 0);
        assert_eq!(reassembler.buffer_count(), 1);

        assert_eq!(reassembler.sweep_expired(Duration::from_nanos(0)), 1);
        assert_eq!(reassembler.buffer_count(), 0);
    }
}
