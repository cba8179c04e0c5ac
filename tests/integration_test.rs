use ledpattern::index::{SpanIssue, TIME_INDEX_ENTRY_SIZE};
use ledpattern::io_stream::{PatternWriter, WriteError};
use ledpattern::packet::PacketKind;
use ledpattern::verify::{verify, verify_file, FormatError, Inconsistency, Section, VerifyOptions};
use ledpattern::Header;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Cursor;
use tempfile::NamedTempFile;

fn write_in_memory(build: impl FnOnce(&mut PatternWriter<Cursor<Vec<u8>>>)) -> Vec<u8> {
    let mut writer = PatternWriter::new(Cursor::new(Vec::new())).unwrap();
    build(&mut writer);
    writer.into_inner().unwrap().into_inner()
}

fn verify_bytes(bytes: &[u8]) -> Result<ledpattern::VerificationReport, FormatError> {
    verify(Cursor::new(bytes), &VerifyOptions::default())
}

fn header_of(bytes: &[u8]) -> Header {
    Header::read(Cursor::new(&bytes[24..44])).unwrap()
}

#[test]
fn test_write_and_verify_roundtrip() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();

    let mut expected: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
    {
        let mut writer = PatternWriter::create(&path).unwrap();
        for t in (0..3_000).step_by(40) {
            for universe in [1u32, 5, 9] {
                writer.append_data(t, universe, universe == 5, &vec![universe as u8; 170]).unwrap();
                expected.entry(universe).or_default().push(t);
            }
            writer.append_sync(t).unwrap();
        }
        writer.finalize().unwrap();
    }

    let report = verify_file(&path, &VerifyOptions::default()).unwrap();
    assert!(report.is_consistent(), "issues: {:?}", report.issues);
    assert_eq!(report.packet_stats.data, 75 * 3);
    assert_eq!(report.packet_stats.sync, 75);
    assert_eq!(report.packet_stats.unknown, 0);
    assert_eq!(report.packet_stats.universes, 3);
    assert_eq!(report.universes, expected);
    assert_eq!(report.header.duration_ms, 2_960);
    assert_eq!(report.time_index.len(), 3);

    let timing = report.timing[&5].as_ref().unwrap();
    assert_eq!(timing.count, 75);
    assert_eq!(timing.mean_ms, 40.0);
    assert_eq!(timing.fps, Some(25.0));

    assert!(report.packets.iter().any(|p| p.header.kind == PacketKind::Data { universe: 5, sync: true }));
}

#[test]
fn test_universe_timing_statistics() {
    let bytes = write_in_memory(|w| {
        for t in [0, 100, 200, 300] {
            w.append_data(t, 7, false, &[0xFF; 3]).unwrap();
        }
        w.append_data(50, 8, false, &[]).unwrap();
    });
    let report = verify_bytes(&bytes).unwrap();

    let seven = report.timing[&7].as_ref().unwrap();
    assert_eq!(seven.mean_ms, 100.0);
    assert_eq!(seven.stdev_ms, Some(0.0));
    assert_eq!(seven.fps, Some(10.0));

    // One sample: reported, not silently dropped.
    assert_eq!(report.timing[&8].as_ref().unwrap_err().count, 1);
    // The universe-8 packet at 50 ms follows one at 300 ms.
    assert!(report.issues.contains(&Inconsistency::TimestampRegression {
        offset: 44 + 4 * 18,
        previous_ms: 300,
        timestamp_ms: 50,
    }));
}

#[test]
fn test_finalize_exactly_once() {
    let temp_file = NamedTempFile::new().unwrap();
    let mut writer = PatternWriter::create(temp_file.path()).unwrap();
    writer.append_sync(0).unwrap();
    writer.finalize().unwrap();
    assert!(matches!(writer.finalize(), Err(WriteError::Finalized)));
    assert!(matches!(writer.append_sync(1), Err(WriteError::Finalized)));
    drop(writer);

    let report = verify_file(temp_file.path(), &VerifyOptions::default()).unwrap();
    assert!(report.is_consistent());
    assert_eq!(report.packet_stats.sync, 1);
}

#[test]
fn test_drop_finalizes_open_writer() {
    let temp_file = NamedTempFile::new().unwrap();
    {
        let mut writer = PatternWriter::create(temp_file.path()).unwrap();
        writer.append_data(0, 1, false, b"abc").unwrap();
        writer.append_data(1_500, 1, false, b"def").unwrap();
    }

    let report = verify_file(temp_file.path(), &VerifyOptions::default()).unwrap();
    assert!(report.is_consistent());
    assert_eq!(report.universes[&1], vec![0, 1_500]);
    assert_eq!(report.time_index.len(), 2);
}

#[test]
fn test_abandoned_writer_fails_verification() {
    let mut writer = PatternWriter::new(Cursor::new(Vec::new())).unwrap();
    writer.append_sync(0).unwrap();
    let bytes = writer.abandon().unwrap().into_inner();

    assert!(matches!(verify_bytes(&bytes), Err(FormatError::BadMagic { .. })));
}

#[test]
fn test_truncated_file_is_format_error() {
    let temp_file = NamedTempFile::new().unwrap();
    {
        let mut writer = PatternWriter::create(temp_file.path()).unwrap();
        for t in 0..50 {
            writer.append_data(t * 10, 0, false, &[1; 64]).unwrap();
        }
        writer.finalize().unwrap();
    }
    let full = std::fs::metadata(temp_file.path()).unwrap().len();
    OpenOptions::new().write(true).open(temp_file.path()).unwrap().set_len(full - 100).unwrap();

    match verify_file(temp_file.path(), &VerifyOptions::default()) {
        Err(FormatError::SizeMismatch { declared, actual }) => {
            assert_eq!(declared as u64, full);
            assert_eq!(actual, full - 100);
        }
        other => panic!("expected SizeMismatch, got {other:?}"),
    }
}

#[test]
fn test_tiny_and_foreign_files() {
    assert!(matches!(verify_bytes(b"_LED"), Err(FormatError::TooShort { actual: 4 })));
    assert!(matches!(verify_bytes(&[0u8; 64]), Err(FormatError::BadMagic { .. })));
}

#[test]
fn test_unknown_packet_type_is_skipped() {
    let bytes = write_in_memory(|w| {
        w.append_data(0, 2, false, &[1, 2]).unwrap();
        w.append_packet(10, PacketKind::Unknown { packet_type: 99, field_a: 0, field_b: 0 }, &[7; 4]).unwrap();
        w.append_data(20, 2, false, &[3, 4]).unwrap();
        w.append_sync(20).unwrap();
    });
    let report = verify_bytes(&bytes).unwrap();

    assert!(report.is_consistent());
    assert_eq!(report.packet_stats.data, 2);
    assert_eq!(report.packet_stats.sync, 1);
    assert_eq!(report.packet_stats.unknown, 1);
    assert_eq!(report.packet_offsets, vec![44, 61, 80, 97]);
    assert_eq!(report.universes[&2], vec![0, 20]);
}

#[test]
fn test_index_density_for_steady_stream() {
    for (delta, duration, expected_entries) in [(33u32, 10_000u32, 10usize), (250, 4_000, 4), (1_000, 5_000, 5)] {
        let bytes = write_in_memory(|w| {
            for t in (0..duration).step_by(delta as usize) {
                w.append_sync(t).unwrap();
            }
        });
        let report = verify_bytes(&bytes).unwrap();
        assert!(report.is_consistent());
        assert_eq!(report.time_index.len(), expected_entries, "delta {delta}");
    }
}

#[test]
fn test_sparse_stream_catches_up_one_entry_per_packet() {
    let bytes = write_in_memory(|w| {
        for t in [0, 4_000, 4_010, 4_020, 4_030, 4_040] {
            w.append_sync(t).unwrap();
        }
    });
    let report = verify_bytes(&bytes).unwrap();
    // 0 -> threshold 1000; 4000 -> 2000; 4010 -> 3000; 4020 -> 4000; 4030 -> 5000.
    assert_eq!(report.time_index, vec![44, 59, 74, 89, 104]);
    assert!(report.spans[..4].iter().all(|s| s.packets == 1));
    assert_eq!(report.spans[4].packets, 2);
}

#[test]
fn test_misaligned_index_entry_is_recorded() {
    let mut bytes = write_in_memory(|w| {
        for t in (0..3_000).step_by(100) {
            w.append_data(t, 0, false, &[0; 20]).unwrap();
        }
    });
    let header = header_of(&bytes);
    // Point the second entry 3 bytes into its packet.
    let at = header.time_index_offset as usize + TIME_INDEX_ENTRY_SIZE;
    let entry = u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap());
    bytes[at..at + 4].copy_from_slice(&(entry + 3).to_le_bytes());

    let report = verify_bytes(&bytes).unwrap();
    assert!(!report.is_consistent());
    assert_eq!(report.spans.len(), 3);
    assert!(matches!(report.spans[0].issues[..], [SpanIssue::EndsMidPacket { .. }]));
    assert_eq!(
        report.spans[1].issues,
        vec![SpanIssue::NotAligned { cursor_offset: Some(entry as u64 + 35) }],
    );
    assert!(report.spans[2].is_ok());
    // The scan itself is untouched.
    assert_eq!(report.packet_stats.data, 30);
}

#[test]
fn test_out_of_order_index_entries() {
    let mut bytes = write_in_memory(|w| {
        for t in (0..3_000).step_by(500) {
            w.append_sync(t).unwrap();
        }
    });
    let header = header_of(&bytes);
    let start = header.time_index_offset as usize;
    // Swap entries 1 and 2.
    let (a, b) = (start + 4, start + 8);
    let first: [u8; 4] = bytes[a..a + 4].try_into().unwrap();
    bytes.copy_within(b..b + 4, a);
    bytes[b..b + 4].copy_from_slice(&first);

    let report = verify_bytes(&bytes).unwrap();
    assert_eq!(report.spans.len(), 3);
    assert!(report.spans[1].issues.contains(&SpanIssue::OutOfOrder));
    let counted: usize = report.spans.iter().map(|s| s.packets).sum();
    assert_eq!(counted + report.unindexed_packets, 6);
}

#[test]
fn test_header_inconsistencies_are_not_fatal() {
    let mut bytes = write_in_memory(|w| {
        w.append_data(0, 3, false, &[9; 8]).unwrap();
        w.append_data(700, 3, false, &[9; 8]).unwrap();
    });
    // duration_ms lives at the start of the header.
    bytes[24..28].copy_from_slice(&5_000u32.to_le_bytes());
    // Move the time index inside the data section.
    let header = header_of(&bytes);
    bytes[36..40].copy_from_slice(&(header.data_offset + 10).to_le_bytes());

    let report = verify_bytes(&bytes).unwrap();
    assert!(report.issues.contains(&Inconsistency::DurationMismatch { header_ms: 5_000, observed_ms: 700 }));
    assert!(report.issues.iter().any(|i| matches!(
        i,
        Inconsistency::SectionOverlap { a: Section::Data, b: Section::TimeIndex },
    )));
    assert!(report.issues.iter().any(|i| matches!(i, Inconsistency::FirstEntryNotAtDataStart { .. })));
    assert_eq!(report.universes[&3], vec![0, 700]);
}

#[test]
fn test_report_serializes_to_json() {
    let bytes = write_in_memory(|w| {
        w.append_data(0, 1, false, &[1]).unwrap();
        w.append_sync(0).unwrap();
    });
    let report = verify_bytes(&bytes).unwrap();
    let json: serde_json::Value = serde_json::to_value(&report).unwrap();

    assert_eq!(json["packet_stats"]["data"], 1);
    assert_eq!(json["packets"][1]["header"]["kind"]["type"], "sync");
    assert_eq!(json["timing"]["1"]["Err"]["count"], 1);
}

#[test]
fn test_oversized_time_index_is_clamped() {
    let mut bytes = write_in_memory(|w| {
        for t in (0..2_500).step_by(250) {
            w.append_sync(t).unwrap();
        }
    });
    let header = header_of(&bytes);
    assert_eq!(header.time_index_size, 12);
    // time_index_size is the last header field; claim 6 bytes past EOF.
    bytes[40..44].copy_from_slice(&18u32.to_le_bytes());

    let report = verify_bytes(&bytes).unwrap();
    let start = header.time_index_offset as u64;
    assert!(report.issues.contains(&Inconsistency::SectionOutOfBounds {
        section:    Section::TimeIndex,
        start,
        end:        start + 18,
        total_size: bytes.len() as u64,
    }));
    assert!(report.issues.contains(&Inconsistency::RaggedTimeIndex { size: 18 }));
    // Only the entries that exist in the file are read.
    assert_eq!(report.time_index, vec![44, 44 + 4 * 15, 44 + 8 * 15]);
    assert!(report.spans.iter().all(|s| s.is_ok()));
    assert_eq!(report.packet_stats.sync, 10);
}

proptest! {
    #[test]
    fn prop_index_is_monotonic_and_aligned(
        deltas in proptest::collection::vec((0u32..2_500, 0u32..4), 1..150),
    ) {
        let mut expected_entries = 0usize;
        let mut threshold = 0u64;
        let bytes = write_in_memory(|w| {
            let mut t = 0u32;
            for &(delta, universe) in &deltas {
                t += delta;
                if t as u64 >= threshold {
                    threshold += 1_000;
                    expected_entries += 1;
                }
                w.append_data(t, universe, false, &[0; 5]).unwrap();
            }
        });
        let report = verify_bytes(&bytes).unwrap();

        prop_assert!(report.is_consistent(), "issues: {:?}", report.issues);
        prop_assert_eq!(report.time_index.len(), expected_entries);
        prop_assert!(report.time_index.len() <= deltas.len());
        prop_assert!(report.time_index.windows(2).all(|w| w[0] < w[1]));
        for entry in &report.time_index {
            prop_assert!(report.packet_offsets.contains(&(*entry as u64)));
        }
        let counted: usize = report.spans.iter().map(|s| s.packets).sum();
        prop_assert_eq!(counted, deltas.len());
    }
}
