//! Structural verifier.
//!
//! [`verify`] runs the stages in order, each depending on the last:
//!
//! 1. Prelude: magic and `total_size` must match the real file. Failure is
//!    a [`FormatError`] and nothing else is attempted.
//! 2. Header at `header_offset`, plus section bounds/overlap checks.
//! 3. Data section scan (see [`scanner`]).
//! 4. Time index read, with the data section end appended as a sentinel.
//! 5. Span walk against the scanned packet offsets.
//!
//! Everything after stage 1 is non-fatal: problems are collected as
//! [`Inconsistency`] values in the returned [`VerificationReport`] next to
//! whatever statistics could still be computed. Only a packet running past
//! the end of the file aborts, since the cursor has nowhere left to go.

pub mod scanner;

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use serde::Serialize;
use thiserror::Error;

use crate::header::{overlaps, Header, HEADER_SIZE};
use crate::index::{read_entries, walk_spans, Span, TIME_INDEX_ENTRY_SIZE};
use crate::prelude::{Prelude, MAGIC, PRELUDE_OFFSET, PRELUDE_SIZE};
use crate::stats::{self, InsufficientSamples, TimingStats};

pub use scanner::{PacketRecord, PacketStats};

// ── Errors ───────────────────────────────────────────────────────────────────

/// Fatal: the file is not self-consistent, so no offset in it can be trusted.
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("file is {actual} bytes, too short for a {}-byte prelude", PRELUDE_SIZE)]
    TooShort { actual: u64 },
    #[error("bad magic: expected {:02x?}, got {found:02x?}", MAGIC)]
    BadMagic { found: [u8; 8] },
    #[error("bad size: prelude declares {declared} bytes, file has {actual}")]
    SizeMismatch { declared: u32, actual: u64 },
    #[error("header at {header_offset:#010x} runs past end of file ({total_size} bytes)")]
    HeaderOutOfBounds { header_offset: u32, total_size: u64 },
    #[error("packet at {offset:#010x} needs {needed} bytes, only {available} left in file")]
    TruncatedPacket { offset: u64, needed: u64, available: u64 },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    Prelude,
    Header,
    Data,
    TimeIndex,
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Section::Prelude   => "prelude",
            Section::Header    => "header",
            Section::Data      => "data",
            Section::TimeIndex => "time index",
        })
    }
}

/// Non-fatal structural problem. Recorded, then the scan carries on.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Inconsistency {
    #[error("{section} section {start:#010x}..{end:#010x} exceeds file size {total_size}")]
    SectionOutOfBounds { section: Section, start: u64, end: u64, total_size: u64 },
    #[error("{a} section overlaps {b} section")]
    SectionOverlap { a: Section, b: Section },
    #[error("data scan stopped at {scan_end:#010x}, section ends at {section_end:#010x}")]
    DataMisaligned { section_end: u64, scan_end: u64 },
    #[error("packet at {offset:#010x} goes back in time ({timestamp_ms} ms after {previous_ms} ms)")]
    TimestampRegression { offset: u64, previous_ms: u32, timestamp_ms: u32 },
    #[error("sync packet at {offset:#010x} carries a {payload_size}-byte payload")]
    SyncPayload { offset: u64, payload_size: u16 },
    #[error("time index size {size} is not a multiple of {}", TIME_INDEX_ENTRY_SIZE)]
    RaggedTimeIndex { size: u32 },
    #[error("first time index entry {entry:?} does not point to data start {data_offset:#010x}")]
    FirstEntryNotAtDataStart { entry: Option<u32>, data_offset: u32 },
    #[error("header duration {header_ms} ms, largest packet timestamp {observed_ms} ms")]
    DurationMismatch { header_ms: u32, observed_ms: u32 },
    #[error("{count} packet(s) not covered by any time index span")]
    UnindexedPackets { count: usize },
}

// ── Options / report ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// Keep every decoded packet header in the report (needed for dumps).
    pub record_packets: bool,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self { record_packets: true }
    }
}

#[derive(Debug, Serialize)]
pub struct VerificationReport {
    pub prelude:           Prelude,
    pub header:            Header,
    pub packet_stats:      PacketStats,
    /// Data packet timestamps per universe, in append order.
    pub universes:         BTreeMap<u32, Vec<u32>>,
    pub timing:            BTreeMap<u32, Result<TimingStats, InsufficientSamples>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub packets:           Vec<PacketRecord>,
    #[serde(skip)]
    pub packet_offsets:    Vec<u64>,
    pub time_index:        Vec<u32>,
    pub spans:             Vec<Span>,
    pub unindexed_packets: usize,
    pub issues:            Vec<Inconsistency>,
}

impl VerificationReport {
    /// No recorded inconsistencies and every span checks out.
    pub fn is_consistent(&self) -> bool {
        self.issues.is_empty() && self.spans.iter().all(Span::is_ok)
    }

    pub fn bad_spans(&self) -> usize {
        self.spans.iter().filter(|s| !s.is_ok()).count()
    }
}

// ── Entry points ─────────────────────────────────────────────────────────────

/// Open `path` read-only and verify it.
pub fn verify_file<P: AsRef<Path>>(path: P, opts: &VerifyOptions) -> Result<VerificationReport, FormatError> {
    let file = File::open(path.as_ref())?;
    log::debug!("verifying {}", path.as_ref().display());
    verify(BufReader::new(file), opts)
}

pub fn verify<R: Read + Seek>(mut reader: R, opts: &VerifyOptions) -> Result<VerificationReport, FormatError> {
    let total_size = reader.seek(SeekFrom::End(0))?;

    // 1. Prelude
    if total_size < PRELUDE_SIZE as u64 {
        return Err(FormatError::TooShort { actual: total_size });
    }
    reader.seek(SeekFrom::Start(PRELUDE_OFFSET))?;
    let prelude = Prelude::read(&mut reader)?;
    if !prelude.has_valid_magic() {
        return Err(FormatError::BadMagic { found: prelude.magic });
    }
    if prelude.total_size as u64 != total_size {
        return Err(FormatError::SizeMismatch { declared: prelude.total_size, actual: total_size });
    }
    // TODO: define and check the checksum and version fields once the format pins them down.

    // 2. Header
    let header_start = prelude.header_offset as u64;
    if header_start + HEADER_SIZE as u64 > total_size {
        return Err(FormatError::HeaderOutOfBounds { header_offset: prelude.header_offset, total_size });
    }
    reader.seek(SeekFrom::Start(header_start))?;
    let header = Header::read(&mut reader)?;
    log::debug!("header {header:?}");

    let mut issues = check_sections(&prelude, &header, total_size);

    // 3. Data
    let data = header.data_range();
    let scan = scanner::scan_data(&mut reader, data.start, data.end, total_size, opts.record_packets)?;
    issues.extend(scan.issues.iter().cloned());

    if scan.max_timestamp != header.duration_ms {
        issues.push(Inconsistency::DurationMismatch {
            header_ms:   header.duration_ms,
            observed_ms: scan.max_timestamp,
        });
    }

    // 4. Time index
    if header.time_index_size as usize % TIME_INDEX_ENTRY_SIZE != 0 {
        issues.push(Inconsistency::RaggedTimeIndex { size: header.time_index_size });
    }
    let ti = header.time_index_range();
    let readable = ti.end.min(total_size).saturating_sub(ti.start);
    let count = readable as usize / TIME_INDEX_ENTRY_SIZE;
    reader.seek(SeekFrom::Start(ti.start.min(total_size)))?;
    let time_index = read_entries(&mut reader, count)?;

    if !scan.offsets.is_empty() && time_index.first() != Some(&header.data_offset) {
        issues.push(Inconsistency::FirstEntryNotAtDataStart {
            entry:       time_index.first().copied(),
            data_offset: header.data_offset,
        });
    }

    // 5. Spans
    let walk = walk_spans(&time_index, &scan.offsets, scan.scan_end, data.end);
    if walk.unindexed_packets > 0 {
        issues.push(Inconsistency::UnindexedPackets { count: walk.unindexed_packets });
    }

    for issue in &issues {
        log::warn!("{issue}");
    }

    let timing = scan.universes
        .iter()
        .map(|(&universe, ts)| (universe, stats::compute(ts)))
        .collect();

    Ok(VerificationReport {
        prelude,
        header,
        packet_stats:      scan.stats,
        universes:         scan.universes,
        timing,
        packets:           scan.packets,
        packet_offsets:    scan.offsets,
        time_index,
        spans:             walk.spans,
        unindexed_packets: walk.unindexed_packets,
        issues,
    })
}

/// Every section must lie inside the file and no two may share a byte.
fn check_sections(prelude: &Prelude, header: &Header, total_size: u64) -> Vec<Inconsistency> {
    let header_start = prelude.header_offset as u64;
    let sections = [
        (Section::Prelude,   PRELUDE_OFFSET..PRELUDE_SIZE as u64),
        (Section::Header,    header_start..header_start + HEADER_SIZE as u64),
        (Section::Data,      header.data_range()),
        (Section::TimeIndex, header.time_index_range()),
    ];

    let mut issues = Vec::new();
    for (section, range) in &sections {
        if range.end > total_size {
            issues.push(Inconsistency::SectionOutOfBounds {
                section:    *section,
                start:      range.start,
                end:        range.end,
                total_size,
            });
        }
    }
    for (i, (a, ra)) in sections.iter().enumerate() {
        for (b, rb) in &sections[i + 1..] {
            if overlaps(ra, rb) {
                issues.push(Inconsistency::SectionOverlap { a: *a, b: *b });
            }
        }
    }
    issues
}
