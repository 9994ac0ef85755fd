//! Outbound pixel packet encoding

use std::collections::BTreeSet;

/// Largest payload a single IPv4 UDP datagram can carry
pub const MAX_UDP_PAYLOAD: usize = 65_507;

const SEQUENCE_LEN: usize = 4;

/// New pixel data for one strip
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StripUpdate {
    /// Strip index on the controller
    pub index: u8,
    /// Raw pixel bytes, sent as-is
    pub data: Vec<u8>,
}

impl StripUpdate {
    pub fn new(index: u8, data: Vec<u8>) -> Self {
        Self { index, data }
    }

    fn encoded_len(&self) -> usize {
        1 + self.data.len()
    }
}

/// An encoded packet waiting in a controller's outbound queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    pub sequence_number: u32,
    pub bytes: Vec<u8>,
    /// Strip indices carried by this packet
    pub strips: BTreeSet<u8>,
}

/// Batch strip updates into pixel packets.
///
/// Strips are packed in order, at most `strips_per_packet` per packet (a
/// value of zero is treated as one), and a packet is closed early when the
/// next strip would push it past `max_packet_size`. A strip that is larger
/// than `max_packet_size` on its own still gets a packet to itself.
///
/// `sequence` is incremented once per packet and each packet carries the
/// incremented value, so a fresh counter starts at 1.
pub fn encode_packets(
    strips: &[StripUpdate],
    strips_per_packet: u8,
    max_packet_size: usize,
    sequence: &mut u32,
) -> Vec<PendingMessage> {
    let per_packet = usize::from(strips_per_packet.max(1));
    let mut packets = Vec::new();
    let mut batch: Vec<&StripUpdate> = Vec::with_capacity(per_packet);
    let mut size = SEQUENCE_LEN;

    for strip in strips {
        let full = batch.len() == per_packet;
        let overflow = !batch.is_empty() && size + strip.encoded_len() > max_packet_size;
        if full || overflow {
            packets.push(finish_packet(&batch, size, sequence));
            batch.clear();
            size = SEQUENCE_LEN;
        }
        size += strip.encoded_len();
        batch.push(strip);
    }

    if !batch.is_empty() {
        packets.push(finish_packet(&batch, size, sequence));
    }

    packets
}

fn finish_packet(batch: &[&StripUpdate], size: usize, sequence: &mut u32) -> PendingMessage {
    *sequence = sequence.wrapping_add(1);

    let mut bytes = Vec::with_capacity(size);
    bytes.extend_from_slice(&sequence.to_le_bytes());
    for strip in batch {
        bytes.push(strip.index);
        bytes.extend_from_slice(&strip.data);
    }

    PendingMessage {
        sequence_number: *sequence,
        bytes,
        strips: batch.iter().map(|s| s.index).collect(),
    }
}
