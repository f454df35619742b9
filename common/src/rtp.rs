//! RTP wire format: fixed header, capture-timestamp extension, repair framing.
//!
//! Implements the RFC 3550 fixed header plus one generic header extension
//! carrying the sender-side capture wall clock, which drives end-to-end
//! latency measurement on the receiver. Repair (FEC) packets share the RTP
//! framing and prefix their payload with a [`FecBlockHeader`].

use anyhow::Result;

/// RTP packet version 2 (as per RFC 3550)
const RTP_VERSION: u8 = 2;

/// Fixed header size in bytes (no CSRC list).
const HEADER_LEN: usize = 12;

/// "Defined by profile" value for the capture-timestamp extension.
const CAPTURE_TS_PROFILE: u16 = 0x4354;

/// Extension length in 32-bit words (one 64-bit nanosecond value).
const CAPTURE_TS_WORDS: u16 = 2;

/// RTP packet for audio transmission.
///
/// Carries the fields the receive pipeline routes and orders by: payload
/// type (source vs repair discrimination), sequence, media timestamp, SSRC,
/// and the optional capture timestamp extension.
///
/// # Protocol Details
///
/// - Version: Always 2 (RFC 3550)
/// - Payload Type: configured per stream kind (static L16 or dynamic)
/// - Sequence: Increments by 1 for each packet, wraps at 65535
/// - Timestamp: sender sample units, wraps at 2^32
/// - SSRC: Synchronization source identifier (random per session)
/// - Extension: optional capture wall clock, 64-bit nanoseconds
#[derive(Debug, Clone)]
pub struct RtpPacket {
    // ---
    /// Payload type discriminating source, repair, and control streams
    pub payload_type: u8,

    /// Packet sequence number (wraps at 65535)
    pub sequence: u16,

    /// RTP timestamp in sample units
    pub timestamp: u32,

    /// Synchronization source identifier
    pub ssrc: u32,

    /// Sender capture wall clock, nanoseconds since the Unix epoch
    pub capture_ns: Option<i64>,

    /// Opaque payload bytes
    pub payload: Vec<u8>,
}

impl RtpPacket {
    // ---
    /// Creates a new RTP packet with the given parameters.
    pub fn new(payload_type: u8, sequence: u16, timestamp: u32, ssrc: u32, payload: Vec<u8>) -> Self {
        // ---
        Self {
            payload_type,
            sequence,
            timestamp,
            ssrc,
            capture_ns: None,
            payload,
        }
    }

    /// Attaches a capture wall-clock timestamp, emitted as a header extension.
    pub fn with_capture_ns(mut self, capture_ns: i64) -> Self {
        // ---
        self.capture_ns = Some(capture_ns);
        self
    }

    /// Serializes the RTP packet into wire format.
    ///
    /// # Wire Format
    ///
    /// ```text
    ///  0                   1                   2                   3
    ///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// |V=2|P|X|  CC   |M|     PT      |       sequence number         |
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// |                           timestamp                           |
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// |           synchronization source (SSRC) identifier            |
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// |    0x4354 (capture ext)       |          length = 2           | (X=1)
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// |                   capture nanoseconds (64 bit)                |
    /// +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
    /// |                           payload...                          |
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// ```
    pub fn serialize(&self) -> Result<Vec<u8>> {
        // ---
        let ext_len = if self.capture_ns.is_some() { 4 + 8 } else { 0 };
        let mut buf = Vec::with_capacity(HEADER_LEN + ext_len + self.payload.len());

        // Byte 0: V(2) | P(1) | X(1) | CC(4)
        let x_bit = if self.capture_ns.is_some() { 1 << 4 } else { 0 };
        buf.push((RTP_VERSION << 6) | x_bit);

        // Byte 1: M(1) | PT(7)
        buf.push(self.payload_type & 0x7F);

        buf.extend_from_slice(&self.sequence.to_be_bytes());
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(&self.ssrc.to_be_bytes());

        if let Some(capture) = self.capture_ns {
            buf.extend_from_slice(&CAPTURE_TS_PROFILE.to_be_bytes());
            buf.extend_from_slice(&CAPTURE_TS_WORDS.to_be_bytes());
            buf.extend_from_slice(&capture.to_be_bytes());
        }

        buf.extend_from_slice(&self.payload);

        Ok(buf)
    }

    /// Deserializes an RTP packet from wire format.
    ///
    /// Parses the fixed header, skips any CSRC list, and extracts the
    /// capture-timestamp extension when present. Unknown extensions are
    /// skipped, not rejected.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Packet is smaller than the fixed header plus declared CSRC/extension
    /// - RTP version is not 2
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        // ---
        if data.len() < HEADER_LEN {
            anyhow::bail!("packet too small: {} bytes", data.len());
        }

        let version = (data[0] >> 6) & 0x03;
        if version != RTP_VERSION {
            anyhow::bail!("invalid RTP version: {}", version);
        }

        let has_extension = data[0] & 0x10 != 0;
        let csrc_count = (data[0] & 0x0F) as usize;

        let payload_type = data[1] & 0x7F;
        let sequence = u16::from_be_bytes([data[2], data[3]]);
        let timestamp = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let ssrc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        let mut offset = HEADER_LEN + csrc_count * 4;
        if data.len() < offset {
            anyhow::bail!("packet truncated inside CSRC list");
        }

        let mut capture_ns = None;
        if has_extension {
            if data.len() < offset + 4 {
                anyhow::bail!("packet truncated inside extension header");
            }
            let profile = u16::from_be_bytes([data[offset], data[offset + 1]]);
            let words = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            offset += 4;

            if data.len() < offset + words * 4 {
                anyhow::bail!("packet truncated inside extension body");
            }
            if profile == CAPTURE_TS_PROFILE && words as u16 == CAPTURE_TS_WORDS {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&data[offset..offset + 8]);
                capture_ns = Some(i64::from_be_bytes(raw));
            }
            offset += words * 4;
        }

        let payload = data[offset..].to_vec();

        Ok(Self {
            payload_type,
            sequence,
            timestamp,
            ssrc,
            capture_ns,
            payload,
        })
    }
}

/// Block header prefixed to every repair packet payload.
///
/// Ties a repair packet to the run of source packets it protects:
/// `source_count` source packets starting at (`base_seq`, `base_ts`),
/// followed by `repair_count` repair packets of which this is `repair_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FecBlockHeader {
    // ---
    /// Sequence number of the first source packet in the block
    pub base_seq: u16,

    /// Media timestamp of the first source packet in the block
    pub base_ts: u32,

    /// Number of source packets in the block
    pub source_count: u8,

    /// Number of repair packets in the block
    pub repair_count: u8,

    /// Index of this repair packet within the block, 0-based
    pub repair_index: u8,
}

impl FecBlockHeader {
    // ---
    /// Encoded size in bytes.
    pub const LEN: usize = 10;

    /// Encodes the header followed by the repair bytes.
    pub fn encode(&self, repair_data: &[u8]) -> Vec<u8> {
        // ---
        let mut buf = Vec::with_capacity(Self::LEN + repair_data.len());
        buf.extend_from_slice(&self.base_seq.to_be_bytes());
        buf.extend_from_slice(&self.base_ts.to_be_bytes());
        buf.push(self.source_count);
        buf.push(self.repair_count);
        buf.push(self.repair_index);
        buf.push(0); // reserved
        buf.extend_from_slice(repair_data);
        buf
    }

    /// Splits a repair payload into its header and repair bytes.
    pub fn decode(payload: &[u8]) -> Result<(Self, &[u8])> {
        // ---
        if payload.len() < Self::LEN {
            anyhow::bail!("repair payload too small: {} bytes", payload.len());
        }

        let header = Self {
            base_seq: u16::from_be_bytes([payload[0], payload[1]]),
            base_ts: u32::from_be_bytes([payload[2], payload[3], payload[4], payload[5]]),
            source_count: payload[6],
            repair_count: payload[7],
            repair_index: payload[8],
        };

        if header.source_count == 0 {
            anyhow::bail!("repair block with zero source packets");
        }
        if header.repair_index >= header.repair_count {
            anyhow::bail!(
                "repair index {} out of range for block of {}",
                header.repair_index,
                header.repair_count
            );
        }

        Ok((header, &payload[Self::LEN..]))
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn packet_serializes_header_fields() {
        // ---
        let packet = RtpPacket::new(10, 100, 32000, 0x12345678, vec![1, 2, 3, 4]);
        let serialized = packet.serialize().expect("serialization failed");

        assert_eq!(serialized[0] >> 6, 2); // Version
        assert_eq!(serialized[0] & 0x10, 0); // No extension
        assert_eq!(serialized[1] & 0x7F, 10); // Payload type
        assert_eq!(u16::from_be_bytes([serialized[2], serialized[3]]), 100);
        assert_eq!(&serialized[12..], &[1, 2, 3, 4]);
    }

    #[test]
    fn packet_round_trips() {
        // ---
        let packet = RtpPacket::new(96, 200, 64000, 0xAABBCCDD, vec![5, 6, 7, 8]);
        let serialized = packet.serialize().expect("serialization failed");

        let parsed = RtpPacket::deserialize(&serialized).expect("deserialization failed");

        assert_eq!(parsed.payload_type, 96);
        assert_eq!(parsed.sequence, 200);
        assert_eq!(parsed.timestamp, 64000);
        assert_eq!(parsed.ssrc, 0xAABBCCDD);
        assert_eq!(parsed.capture_ns, None);
        assert_eq!(parsed.payload, vec![5, 6, 7, 8]);
    }

    #[test]
    fn capture_extension_round_trips() {
        // ---
        let capture = 1_700_000_000_123_456_789i64;
        let packet = RtpPacket::new(10, 7, 480, 0x1, vec![9, 9]).with_capture_ns(capture);
        let serialized = packet.serialize().expect("serialization failed");

        assert_eq!(serialized[0] & 0x10, 0x10); // X bit set

        let parsed = RtpPacket::deserialize(&serialized).expect("deserialization failed");
        assert_eq!(parsed.capture_ns, Some(capture));
        assert_eq!(parsed.payload, vec![9, 9]);
    }

    #[test]
    fn unknown_extension_is_skipped() {
        // ---
        let mut data = Vec::new();
        data.push((2 << 6) | 0x10); // V=2, X=1
        data.push(96);
        data.extend_from_slice(&1u16.to_be_bytes());
        data.extend_from_slice(&480u32.to_be_bytes());
        data.extend_from_slice(&0x42u32.to_be_bytes());
        data.extend_from_slice(&0x1111u16.to_be_bytes()); // foreign profile
        data.extend_from_slice(&1u16.to_be_bytes()); // one word
        data.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        data.extend_from_slice(&[1, 2]);

        let parsed = RtpPacket::deserialize(&data).expect("deserialization failed");
        assert_eq!(parsed.capture_ns, None);
        assert_eq!(parsed.payload, vec![1, 2]);
    }

    #[test]
    fn packet_too_small_is_rejected() {
        // ---
        let data = vec![0, 1, 2];
        assert!(RtpPacket::deserialize(&data).is_err());
    }

    #[test]
    fn invalid_version_is_rejected() {
        // ---
        let mut data = vec![0; 12];
        data[0] = 1 << 6; // Version 1 instead of 2
        assert!(RtpPacket::deserialize(&data).is_err());
    }

    #[test]
    fn truncated_extension_is_rejected() {
        // ---
        let mut data = vec![0; 12];
        data[0] = (2 << 6) | 0x10;
        assert!(RtpPacket::deserialize(&data).is_err());
    }

    #[test]
    fn fec_block_header_round_trips() {
        // ---
        let header = FecBlockHeader {
            base_seq: 40,
            base_ts: 19200,
            source_count: 8,
            repair_count: 2,
            repair_index: 1,
        };
        let encoded = header.encode(&[0xAA, 0xBB]);

        let (parsed, repair) = FecBlockHeader::decode(&encoded).expect("decode failed");
        assert_eq!(parsed, header);
        assert_eq!(repair, &[0xAA, 0xBB]);
    }

    #[test]
    fn fec_block_header_rejects_bad_index() {
        // ---
        let header = FecBlockHeader {
            base_seq: 0,
            base_ts: 0,
            source_count: 4,
            repair_count: 2,
            repair_index: 2,
        };
        let encoded = header.encode(&[]);
        assert!(FecBlockHeader::decode(&encoded).is_err());
    }
}
