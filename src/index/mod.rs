//! Sparse time index.
//!
//! # Building
//! [`TimeIndexBuilder`] holds a single threshold, starting at 0. A packet
//! whose timestamp reaches the threshold gets its file offset recorded and
//! the threshold moves forward by one interval (1000 ms by default). Only
//! one entry is emitted per packet: after a long gap the threshold lags
//! behind and the next few packets each qualify in turn.
//!
//! # Validation
//! [`walk_spans`] merges the stored entries against the packet offsets the
//! data scan recorded. The section end is appended as a sentinel so the last
//! span has a bound. Each entry must name the packet the merge cursor is
//! sitting on; a match against some later packet is still misaligned.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{self, Read, Write};

/// Default spacing between index thresholds.
pub const INDEX_INTERVAL_MS:     u32   = 1000;
pub const TIME_INDEX_ENTRY_SIZE: usize = 4;

// ── Builder ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TimeIndexBuilder {
    interval_ms:       u32,
    next_threshold_ms: u64,
    entries:           Vec<u32>,
}

impl Default for TimeIndexBuilder {
    fn default() -> Self {
        Self::with_interval(INDEX_INTERVAL_MS)
    }
}

impl TimeIndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interval(interval_ms: u32) -> Self {
        Self {
            interval_ms:       interval_ms.max(1),
            next_threshold_ms: 0,
            entries:           Vec::new(),
        }
    }

    /// Offer the packet about to be written at `offset`. Returns `true` when
    /// it was recorded as an index entry.
    pub fn observe(&mut self, timestamp_ms: u32, offset: u32) -> bool {
        if (timestamp_ms as u64) < self.next_threshold_ms {
            return false;
        }
        self.next_threshold_ms += self.interval_ms as u64;
        self.entries.push(offset);
        log::debug!(
            "time index entry #{} at {offset:#010x} (t={timestamp_ms} ms, next threshold {} ms)",
            self.entries.len() - 1,
            self.next_threshold_ms,
        );
        true
    }

    pub fn next_threshold_ms(&self) -> u64 {
        self.next_threshold_ms
    }

    pub fn entries(&self) -> &[u32] {
        &self.entries
    }

    /// On-disk size of the section this builder will produce.
    pub fn encoded_len(&self) -> usize {
        self.entries.len() * TIME_INDEX_ENTRY_SIZE
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        for &offset in &self.entries {
            writer.write_u32::<LittleEndian>(offset)?;
        }
        Ok(())
    }
}

/// Read `count` consecutive entries.
pub fn read_entries<R: Read>(mut reader: R, count: usize) -> io::Result<Vec<u32>> {
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        entries.push(reader.read_u32::<LittleEndian>()?);
    }
    Ok(entries)
}

// ── Span walk ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum SpanIssue {
    /// This entry's offset is larger than the next one.
    OutOfOrder,
    /// The entry does not name the packet at the merge cursor.
    /// `cursor_offset` is `None` when every packet was already consumed.
    NotAligned { cursor_offset: Option<u64> },
    /// The span's end bound falls inside its last packet.
    EndsMidPacket { packet_end: u64 },
}

impl std::fmt::Display for SpanIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpanIssue::OutOfOrder => write!(f, "(out of order)"),
            SpanIssue::NotAligned { .. } => write!(f, "(does not point to packet)"),
            SpanIssue::EndsMidPacket { .. } => write!(f, "(ends mid-packet)"),
        }
    }
}

/// Byte range between two consecutive index bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Span {
    pub offset:  u64,
    /// `next - offset`; negative when the entries are out of order.
    pub size:    i64,
    pub packets: usize,
    pub issues:  Vec<SpanIssue>,
}

impl Span {
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SpanWalk {
    pub spans:             Vec<Span>,
    /// Packets that no span covers (before the first entry or, with no
    /// entries at all, every packet).
    pub unindexed_packets: usize,
}

/// Validate `entries` against the packet start offsets recorded by the data
/// scan.
///
/// * `packet_offsets` — ascending packet start offsets, in file order.
/// * `scan_end`       — where the data scan cursor stopped (end of the last packet).
/// * `section_end`    — `data_offset + data_size`, used as the final bound.
///
/// Single forward pass over both lists.
pub fn walk_spans(entries: &[u32], packet_offsets: &[u64], scan_end: u64, section_end: u64) -> SpanWalk {
    let mut bounds: Vec<u64> = entries.iter().map(|&e| e as u64).collect();
    bounds.push(section_end);

    let mut spans     = Vec::with_capacity(entries.len());
    let mut cursor    = 0usize;
    let mut unindexed = 0usize;

    for pair in bounds.windows(2) {
        let (start, end) = (pair[0], pair[1]);
        let mut issues = Vec::new();

        if start > end {
            issues.push(SpanIssue::OutOfOrder);
        }

        let at_cursor = packet_offsets.get(cursor).copied();
        if at_cursor != Some(start) {
            issues.push(SpanIssue::NotAligned { cursor_offset: at_cursor });
        }

        // Packets the index skipped over.
        while cursor < packet_offsets.len() && packet_offsets[cursor] < start {
            cursor    += 1;
            unindexed += 1;
        }

        let first = cursor;
        while cursor < packet_offsets.len() && packet_offsets[cursor] < end {
            cursor += 1;
        }
        let packets = cursor - first;

        if packets > 0 {
            // Packets are back to back: the last one ends where the next starts.
            let packet_end = packet_offsets.get(cursor).copied().unwrap_or(scan_end);
            if packet_end > end {
                issues.push(SpanIssue::EndsMidPacket { packet_end });
            }
        }

        for issue in &issues {
            log::warn!("time index span at {start:#010x}: {issue}");
        }

        spans.push(Span {
            offset: start,
            size:   end as i64 - start as i64,
            packets,
            issues,
        });
    }

    unindexed += packet_offsets.len() - cursor;
    SpanWalk { spans, unindexed_packets: unindexed }
}
