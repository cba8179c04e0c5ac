//! Data section scanner.
//!
//! Walks the packets from `data_offset` strictly by each header's
//! `payload_size`, never trusting a packet count from anywhere else. The
//! payload is read and discarded so the cursor moves forward without
//! seeking. Unknown packet types are stepped over the same way and counted
//! on their own.

use std::collections::BTreeMap;
use std::io::{self, Read, Seek, SeekFrom};

use serde::Serialize;

use crate::packet::{PacketHeader, PacketKind, PACKET_HEADER_SIZE};
use crate::verify::{FormatError, Inconsistency};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PacketStats {
    pub data:      usize,
    pub sync:      usize,
    pub unknown:   usize,
    pub universes: usize,
}

impl PacketStats {
    pub fn total(&self) -> usize {
        self.data + self.sync + self.unknown
    }
}

/// One decoded packet and where it starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PacketRecord {
    pub offset: u64,
    pub header: PacketHeader,
}

#[derive(Debug, Default)]
pub struct DataScan {
    pub stats:          PacketStats,
    /// Start offset of every packet, in file order.
    pub offsets:        Vec<u64>,
    /// Full listing; only filled when requested.
    pub packets:        Vec<PacketRecord>,
    /// Data packet timestamps per universe, in file order.
    pub universes:      BTreeMap<u32, Vec<u32>>,
    /// Largest timestamp over every packet kind.
    pub max_timestamp:  u32,
    /// Where the cursor stopped.
    pub scan_end:       u64,
    pub issues:         Vec<Inconsistency>,
}

/// Scan packets in `[start, end)`. Reading stops early at `file_len`; a
/// packet that would run past the end of the file is a [`FormatError`].
pub fn scan_data<R: Read + Seek>(
    reader:         &mut R,
    start:          u64,
    end:            u64,
    file_len:       u64,
    record_packets: bool,
) -> Result<DataScan, FormatError> {
    reader.seek(SeekFrom::Start(start))?;

    let limit = end.min(file_len);
    let mut scan = DataScan { scan_end: start, ..Default::default() };
    let mut previous_ts: Option<u32> = None;
    let mut cursor = start;

    while cursor < limit {
        let offset = cursor;
        let header = match PacketHeader::read(&mut *reader) {
            Ok(h) => h,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(FormatError::TruncatedPacket {
                    offset,
                    needed: PACKET_HEADER_SIZE as u64,
                    available: file_len.saturating_sub(offset),
                });
            }
            Err(e) => return Err(e.into()),
        };

        // Discard the payload.
        let want = header.payload_size as u64;
        let got  = io::copy(&mut reader.by_ref().take(want), &mut io::sink())?;
        if got < want {
            return Err(FormatError::TruncatedPacket {
                offset,
                needed: header.encoded_len(),
                available: file_len.saturating_sub(offset),
            });
        }
        cursor += header.encoded_len();

        if let Some(prev) = previous_ts {
            if header.timestamp_ms < prev {
                scan.issues.push(Inconsistency::TimestampRegression {
                    offset,
                    previous_ms:  prev,
                    timestamp_ms: header.timestamp_ms,
                });
            }
        }
        previous_ts = Some(header.timestamp_ms);
        scan.max_timestamp = scan.max_timestamp.max(header.timestamp_ms);

        match header.kind {
            PacketKind::Data { universe, .. } => {
                scan.stats.data += 1;
                scan.universes.entry(universe).or_default().push(header.timestamp_ms);
            }
            PacketKind::Sync { .. } => {
                scan.stats.sync += 1;
                if header.payload_size != 0 {
                    scan.issues.push(Inconsistency::SyncPayload {
                        offset,
                        payload_size: header.payload_size,
                    });
                }
            }
            PacketKind::Unknown { packet_type, .. } => {
                log::debug!("unknown packet type {packet_type} at {offset:#010x}, skipping {want} bytes");
                scan.stats.unknown += 1;
            }
        }

        scan.offsets.push(offset);
        if record_packets {
            scan.packets.push(PacketRecord { offset, header });
        }
    }

    scan.stats.universes = scan.universes.len();
    scan.scan_end = cursor;
    if cursor != end {
        scan.issues.push(Inconsistency::DataMisaligned { section_end: end, scan_end: cursor });
    }
    Ok(scan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::encode_packet;
    use std::io::Cursor;

    fn data(ts: u32, universe: u32, len: usize) -> Vec<u8> {
        encode_packet(ts, PacketKind::Data { universe, sync: false }, &vec![0x55; len]).unwrap()
    }

    #[test]
    fn classifies_and_groups_by_universe() {
        let mut bytes = Vec::new();
        bytes.extend(data(0, 1, 3));
        bytes.extend(data(0, 2, 0));
        bytes.extend(encode_packet(0, PacketKind::Sync { channel_mask: 1, reserved: true }, &[]).unwrap());
        bytes.extend(data(33, 1, 5));
        let len = bytes.len() as u64;

        let scan = scan_data(&mut Cursor::new(&bytes), 0, len, len, true).unwrap();
        assert_eq!(scan.stats, PacketStats { data: 3, sync: 1, unknown: 0, universes: 2 });
        assert_eq!(scan.offsets, vec![0, 18, 33, 48]);
        assert_eq!(scan.universes[&1], vec![0, 33]);
        assert_eq!(scan.packets.len(), 4);
        assert_eq!(scan.scan_end, len);
        assert!(scan.issues.is_empty());
    }

    #[test]
    fn unknown_type_is_skipped_by_payload_size() {
        let mut bytes = Vec::new();
        bytes.extend(encode_packet(0, PacketKind::Unknown { packet_type: 99, field_a: 0, field_b: 0 }, &[9; 4]).unwrap());
        bytes.extend(data(1, 0, 2));
        let len = bytes.len() as u64;

        let scan = scan_data(&mut Cursor::new(&bytes), 0, len, len, false).unwrap();
        assert_eq!(scan.stats.unknown, 1);
        assert_eq!(scan.stats.data, 1);
        assert_eq!(scan.stats.sync, 0);
        assert_eq!(scan.offsets, vec![0, 19]);
        assert!(scan.packets.is_empty());
    }

    #[test]
    fn regression_and_sync_payload_are_recorded() {
        let mut bytes = Vec::new();
        bytes.extend(data(100, 0, 0));
        bytes.extend(data(50, 0, 0));
        let mut sync = encode_packet(60, PacketKind::Sync { channel_mask: 1, reserved: true }, &[]).unwrap();
        sync[4] = 2;
        sync.extend([0, 0]);
        bytes.extend(sync);
        let len = bytes.len() as u64;

        let scan = scan_data(&mut Cursor::new(&bytes), 0, len, len, false).unwrap();
        assert_eq!(scan.issues, vec![
            Inconsistency::TimestampRegression { offset: 15, previous_ms: 100, timestamp_ms: 50 },
            Inconsistency::SyncPayload { offset: 30, payload_size: 2 },
        ]);
        assert_eq!(scan.max_timestamp, 100);
    }

    #[test]
    fn section_end_inside_a_packet() {
        let bytes = data(0, 0, 10);
        let scan = scan_data(&mut Cursor::new(&bytes), 0, 20, bytes.len() as u64, false).unwrap();
        assert_eq!(scan.scan_end, 25);
        assert_eq!(scan.issues, vec![Inconsistency::DataMisaligned { section_end: 20, scan_end: 25 }]);
    }

    #[test]
    fn payload_past_eof_is_fatal() {
        let mut bytes = data(0, 0, 10);
        bytes.truncate(20);
        let err = scan_data(&mut Cursor::new(&bytes), 0, 25, 20, false).unwrap_err();
        assert!(matches!(err, FormatError::TruncatedPacket { offset: 0, needed: 25, available: 20 }));
    }

    #[test]
    fn header_past_eof_is_fatal() {
        let bytes = data(0, 0, 0);
        let err = scan_data(&mut Cursor::new(&bytes[..10]), 0, 15, 10, false).unwrap_err();
        assert!(matches!(err, FormatError::TruncatedPacket { offset: 0, needed: 15, available: 10 }));
    }
}
