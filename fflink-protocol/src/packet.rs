//! Binary data packets for the file upload sub-protocol.
//!
//! After `M28` opens a file, chunk data travels in fixed-size binary packets
//! rather than `~` frames:
//!
//! ```text
//! +-------------+----------+------------+--------+------------------+
//! | magic       | counter  | chunk_size | crc32  | data             |
//! | 5A 5A A5 A5 | u32 BE   | u32 BE     | u32 BE | 4096 bytes       |
//! +-------------+----------+------------+--------+------------------+
//! ```
//!
//! The checksum covers the unpadded chunk payload; the payload is then
//! zero-padded to exactly [`CHUNK_SIZE`] bytes. The firmware rejects the
//! whole transfer on a mismatch, so [`chunk_checksum`] is the single place
//! the algorithm lives.

use crate::error::ProtocolError;
use bytes::{BufMut, BytesMut};

/// Magic bytes opening every data packet.
pub const PACKET_MAGIC: [u8; 4] = [0x5A, 0x5A, 0xA5, 0xA5];

/// Fixed packet header size in bytes (4 + 4 + 4 + 4).
pub const PACKET_HEADER_SIZE: usize = 16;

/// Data capacity of one packet; short final chunks are zero-padded to this.
pub const CHUNK_SIZE: usize = 4096;

/// Checksum the firmware validates per chunk: zlib-compatible CRC32 over the
/// unpadded payload.
pub fn chunk_checksum(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// One upload data packet.
#[derive(Debug, Clone)]
pub struct DataPacket<'a> {
    /// Zero-based sequence number of this chunk within the transfer.
    pub counter: u32,
    /// Unpadded chunk payload, at most [`CHUNK_SIZE`] bytes.
    pub data: &'a [u8],
}

impl<'a> DataPacket<'a> {
    pub fn new(counter: u32, data: &'a [u8]) -> Result<Self, ProtocolError> {
        if data.len() > CHUNK_SIZE {
            return Err(ProtocolError::ChunkTooLarge {
                len: data.len(),
                max: CHUNK_SIZE,
            });
        }
        Ok(Self { counter, data })
    }

    /// Encodes the packet: header, payload, zero padding.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(PACKET_HEADER_SIZE + CHUNK_SIZE);
        buf.put_slice(&PACKET_MAGIC);
        buf.put_u32(self.counter);
        buf.put_u32(CHUNK_SIZE as u32);
        buf.put_u32(chunk_checksum(self.data));
        buf.put_slice(self.data);
        buf.put_bytes(0, CHUNK_SIZE - self.data.len());
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_layout() {
        let data = b"G28\r\nG1 X10\r\n";
        let packet = DataPacket::new(3, data).unwrap().encode();

        assert_eq!(packet.len(), PACKET_HEADER_SIZE + CHUNK_SIZE);
        assert_eq!(&packet[0..4], &PACKET_MAGIC);
        assert_eq!(&packet[4..8], &3u32.to_be_bytes());
        assert_eq!(&packet[8..12], &(CHUNK_SIZE as u32).to_be_bytes());
        assert_eq!(&packet[12..16], &chunk_checksum(data).to_be_bytes());
        assert_eq!(&packet[16..16 + data.len()], data);
        // Padding is zeroed
        assert!(packet[16 + data.len()..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_checksum_over_unpadded_data() {
        // Padding must not contaminate the checksum
        let short = b"abc";
        let mut padded = short.to_vec();
        padded.resize(CHUNK_SIZE, 0);
        assert_ne!(chunk_checksum(short), chunk_checksum(&padded));

        let packet = DataPacket::new(0, short).unwrap().encode();
        assert_eq!(&packet[12..16], &chunk_checksum(short).to_be_bytes());
    }

    #[test]
    fn test_known_crc_vector() {
        // zlib CRC32 of "123456789" per the CRC-32/ISO-HDLC check value
        assert_eq!(chunk_checksum(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn test_full_chunk_no_padding() {
        let data = vec![0xAB; CHUNK_SIZE];
        let packet = DataPacket::new(0, &data).unwrap().encode();
        assert_eq!(packet.len(), PACKET_HEADER_SIZE + CHUNK_SIZE);
        assert_eq!(&packet[16..], &data[..]);
    }

    #[test]
    fn test_oversized_chunk_rejected() {
        let data = vec![0; CHUNK_SIZE + 1];
        assert!(matches!(
            DataPacket::new(0, &data),
            Err(ProtocolError::ChunkTooLarge { .. })
        ));
    }
}
