//! Packet codec.
//!
//! Every packet is a 15-byte little-endian header followed by
//! `payload_size` raw bytes:
//!
//! ```text
//! timestamp_ms:u32 payload_size:u16 packet_type:u32 field_a:u32 field_b:u8
//! ```
//!
//! `field_a`/`field_b` mean universe/sync-flag for data packets and
//! channel-mask/reserved for sync packets. Any other `packet_type` decodes
//! to [`PacketKind::Unknown`] with the raw fields preserved, so a reader can
//! step over it by `payload_size` and keep going.

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use serde::Serialize;
use std::io::{self, Read, Write};
use thiserror::Error;

pub const PACKET_HEADER_SIZE: usize = 15;
pub const PACKET_TYPE_DATA:   u32   = 0;
pub const PACKET_TYPE_SYNC:   u32   = 1;
/// `payload_size` is a u16 on disk.
pub const MAX_PAYLOAD_SIZE:   usize = u16::MAX as usize;
/// Default sync mask: release every output channel.
pub const ALL_CHANNELS:       u32   = 0xFFFF_FFFF;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PacketError {
    #[error("payload of {len} bytes exceeds the {}-byte packet limit", MAX_PAYLOAD_SIZE)]
    PayloadTooLarge { len: usize },
    #[error("sync packets carry no payload (got {len} bytes)")]
    SyncPayload { len: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PacketKind {
    /// Channel data for one universe. `sync` holds it until the next sync packet.
    Data { universe: u32, sync: bool },
    /// Releases held data for the channels set in `channel_mask`.
    Sync { channel_mask: u32, reserved: bool },
    /// A packet type this build does not know.
    Unknown { packet_type: u32, field_a: u32, field_b: u8 },
}

impl PacketKind {
    pub fn packet_type(&self) -> u32 {
        match *self {
            PacketKind::Data { .. }                 => PACKET_TYPE_DATA,
            PacketKind::Sync { .. }                 => PACKET_TYPE_SYNC,
            PacketKind::Unknown { packet_type, .. } => packet_type,
        }
    }

    fn fields(&self) -> (u32, u8) {
        match *self {
            PacketKind::Data { universe, sync }              => (universe, sync as u8),
            PacketKind::Sync { channel_mask, reserved }      => (channel_mask, reserved as u8),
            PacketKind::Unknown { field_a, field_b, .. }     => (field_a, field_b),
        }
    }

    fn from_fields(packet_type: u32, field_a: u32, field_b: u8) -> Self {
        match packet_type {
            PACKET_TYPE_DATA => PacketKind::Data { universe: field_a, sync: field_b != 0 },
            PACKET_TYPE_SYNC => PacketKind::Sync { channel_mask: field_a, reserved: field_b != 0 },
            _                => PacketKind::Unknown { packet_type, field_a, field_b },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PacketHeader {
    pub timestamp_ms: u32,
    pub payload_size: u16,
    pub kind:         PacketKind,
}

impl PacketHeader {
    /// Total on-disk length of the packet including its payload.
    pub fn encoded_len(&self) -> u64 {
        PACKET_HEADER_SIZE as u64 + self.payload_size as u64
    }

    pub fn to_bytes(&self) -> [u8; PACKET_HEADER_SIZE] {
        let (field_a, field_b) = self.kind.fields();
        let mut out = [0u8; PACKET_HEADER_SIZE];
        LittleEndian::write_u32(&mut out[0..4], self.timestamp_ms);
        LittleEndian::write_u16(&mut out[4..6], self.payload_size);
        LittleEndian::write_u32(&mut out[6..10], self.kind.packet_type());
        LittleEndian::write_u32(&mut out[10..14], field_a);
        out[14] = field_b;
        out
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.to_bytes())
    }

    /// Decodes a header. The caller is responsible for consuming exactly
    /// `payload_size` bytes afterwards.
    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let timestamp_ms = reader.read_u32::<LittleEndian>()?;
        let payload_size = reader.read_u16::<LittleEndian>()?;
        let packet_type  = reader.read_u32::<LittleEndian>()?;
        let field_a      = reader.read_u32::<LittleEndian>()?;
        let field_b      = reader.read_u8()?;
        Ok(Self {
            timestamp_ms,
            payload_size,
            kind: PacketKind::from_fields(packet_type, field_a, field_b),
        })
    }
}

/// Build the header for `payload`, rejecting payloads the u16 size field
/// cannot describe.
pub fn packet_header(timestamp_ms: u32, kind: PacketKind, payload: &[u8]) -> Result<PacketHeader, PacketError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(PacketError::PayloadTooLarge { len: payload.len() });
    }
    if matches!(kind, PacketKind::Sync { .. }) && !payload.is_empty() {
        return Err(PacketError::SyncPayload { len: payload.len() });
    }
    Ok(PacketHeader {
        timestamp_ms,
        payload_size: payload.len() as u16,
        kind,
    })
}

/// Encode a complete packet (header + payload) into a fresh buffer.
pub fn encode_packet(timestamp_ms: u32, kind: PacketKind, payload: &[u8]) -> Result<Vec<u8>, PacketError> {
    let header = packet_header(timestamp_ms, kind, payload)?;
    let mut out = Vec::with_capacity(PACKET_HEADER_SIZE + payload.len());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}
