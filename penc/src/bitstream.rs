//! Packet layout produced by entropy coding.
//!
//! Every packet starts with a fixed 28-byte header:
//! - Signature: "PENC" (4 bytes)
//! - Version: 1 (1 byte)
//! - Flags: end of stream (1 byte)
//! - Picture number (8 bytes, big-endian)
//! - PTS (8 bytes, big-endian)
//! - Slice type (1 byte)
//! - QP (1 byte)
//! - Payload size (4 bytes, big-endian)
//!
//! The payload is a run-length coding of the quantized block levels: a
//! sequence of (run length u16 big-endian, level u8) triples.

use crate::error::{EncodeError, Result};
use crate::picture::SliceType;
use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// Packet signature.
pub const PACKET_SIGNATURE: &[u8; 4] = b"PENC";

/// Current packet version.
pub const PACKET_VERSION: u8 = 1;

/// Size of the packet header in bytes.
pub const PACKET_HEADER_SIZE: usize = 28;

/// Flag marking the end-of-stream packet.
pub const FLAG_END_OF_STREAM: u8 = 0x01;

/// Packet header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    pub picture_number: u64,
    pub pts: i64,
    pub slice_type: SliceType,
    pub qp: u8,
    pub end_of_stream: bool,
    /// Payload bytes following the header.
    pub payload_size: u32,
}

impl PacketHeader {
    /// Write the header.
    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(PACKET_SIGNATURE)?;
        writer.write_u8(PACKET_VERSION)?;
        writer.write_u8(if self.end_of_stream { FLAG_END_OF_STREAM } else { 0 })?;
        writer.write_u64::<BigEndian>(self.picture_number)?;
        writer.write_i64::<BigEndian>(self.pts)?;
        writer.write_u8(self.slice_type.code())?;
        writer.write_u8(self.qp)?;
        writer.write_u32::<BigEndian>(self.payload_size)?;
        Ok(())
    }

    /// Parse a header from a reader.
    pub fn parse<R: Read>(reader: &mut R) -> Result<Self> {
        Self::read(reader).map_err(|e| match e {
            ReadError::Io(e) => EncodeError::MalformedPacket(format!("truncated header: {e}")),
            ReadError::Invalid(message) => EncodeError::MalformedPacket(message),
        })
    }

    fn read<R: Read>(reader: &mut R) -> std::result::Result<Self, ReadError> {
        let mut signature = [0u8; 4];
        reader.read_exact(&mut signature)?;
        if &signature != PACKET_SIGNATURE {
            return Err(ReadError::Invalid(format!(
                "bad signature {:?}",
                String::from_utf8_lossy(&signature)
            )));
        }

        let version = reader.read_u8()?;
        if version != PACKET_VERSION {
            return Err(ReadError::Invalid(format!("unsupported version {version}")));
        }

        let flags = reader.read_u8()?;
        let picture_number = reader.read_u64::<BigEndian>()?;
        let pts = reader.read_i64::<BigEndian>()?;
        let code = reader.read_u8()?;
        let slice_type = SliceType::from_code(code)
            .ok_or_else(|| ReadError::Invalid(format!("unknown slice type {code}")))?;
        let qp = reader.read_u8()?;
        let payload_size = reader.read_u32::<BigEndian>()?;

        Ok(Self {
            picture_number,
            pts,
            slice_type,
            qp,
            end_of_stream: flags & FLAG_END_OF_STREAM != 0,
            payload_size,
        })
    }
}

enum ReadError {
    Io(io::Error),
    Invalid(String),
}

impl From<io::Error> for ReadError {
    fn from(e: io::Error) -> Self {
        ReadError::Io(e)
    }
}

/// Append a complete packet (header and run-length payload) to `out`.
pub fn write_packet(header: &PacketHeader, levels: &[u8], out: &mut Vec<u8>) {
    let start = out.len();
    // Writing to a Vec cannot fail.
    let _ = header.write(out);
    let payload_start = out.len();

    let mut rest = levels;
    while let Some(&level) = rest.first() {
        let run = rest
            .iter()
            .take(u16::MAX as usize)
            .take_while(|&&l| l == level)
            .count();
        let _ = out.write_u16::<BigEndian>(run as u16);
        out.push(level);
        rest = &rest[run..];
    }

    let payload_size = (out.len() - payload_start) as u32;
    BigEndian::write_u32(&mut out[start + PACKET_HEADER_SIZE - 4..start + PACKET_HEADER_SIZE], payload_size);
}

/// Parse a complete packet into its header and block levels.
pub fn read_packet(data: &[u8]) -> Result<(PacketHeader, Vec<u8>)> {
    let mut reader = data;
    let header = PacketHeader::parse(&mut reader)?;
    if reader.len() != header.payload_size as usize {
        return Err(EncodeError::MalformedPacket(format!(
            "payload is {} bytes, header says {}",
            reader.len(),
            header.payload_size
        )));
    }
    if reader.len() % 3 != 0 {
        return Err(EncodeError::MalformedPacket("payload is not a sequence of runs".into()));
    }

    let mut levels = Vec::new();
    for run in reader.chunks_exact(3) {
        let count = BigEndian::read_u16(&run[..2]) as usize;
        levels.extend(std::iter::repeat(run[2]).take(count));
    }
    Ok((header, levels))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> PacketHeader {
        PacketHeader {
            picture_number: 5,
            pts: -40,
            slice_type: SliceType::P,
            qp: 27,
            end_of_stream: false,
            payload_size: 0,
        }
    }

    #[test]
    fn test_header_layout() {
        let mut out = Vec::new();
        header().write(&mut out).unwrap();
        assert_eq!(out.len(), PACKET_HEADER_SIZE);
        assert_eq!(&out[..4], b"PENC");
        assert_eq!(out[4], PACKET_VERSION);
        assert_eq!(&out[6..14], &5u64.to_be_bytes());
        assert_eq!(out[22], 1);
        assert_eq!(out[23], 27);
    }

    #[test]
    fn test_packet_run_length_payload() {
        let levels = [3u8, 3, 3, 0, 7, 7];
        let mut out = Vec::new();
        write_packet(&header(), &levels, &mut out);

        assert_eq!(out.len(), PACKET_HEADER_SIZE + 9);
        assert_eq!(&out[PACKET_HEADER_SIZE..], &[0, 3, 3, 0, 1, 0, 0, 2, 7]);

        let (parsed, decoded) = read_packet(&out).unwrap();
        assert_eq!(parsed.payload_size, 9);
        assert_eq!(parsed.picture_number, 5);
        assert_eq!(decoded, levels);
    }

    #[test]
    fn test_long_runs_are_split() {
        let levels = vec![1u8; u16::MAX as usize + 10];
        let mut out = Vec::new();
        write_packet(&header(), &levels, &mut out);
        assert_eq!(out.len(), PACKET_HEADER_SIZE + 6);
        assert_eq!(read_packet(&out).unwrap().1.len(), levels.len());
    }

    #[test]
    fn test_rejects_bad_packets() {
        assert!(read_packet(b"PENC").is_err());
        assert!(read_packet(&[0u8; PACKET_HEADER_SIZE]).is_err());

        let mut out = Vec::new();
        write_packet(&header(), &[1, 2], &mut out);
        out.pop();
        assert!(matches!(read_packet(&out), Err(EncodeError::MalformedPacket(_))));
    }
}
