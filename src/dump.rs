//! Plain-text rendering of a [`VerificationReport`].

use std::io::{self, Write};

use crate::packet::PacketKind;
use crate::prelude::PRELUDE_OFFSET;
use crate::verify::VerificationReport;

/// Which optional listings to include.
#[derive(Debug, Clone, Copy, Default)]
pub struct DumpOptions {
    pub packets: bool,
    pub spans:   bool,
}

impl DumpOptions {
    pub fn everything() -> Self {
        Self { packets: true, spans: true }
    }
}

pub fn render<W: Write>(report: &VerificationReport, opts: DumpOptions, mut out: W) -> io::Result<()> {
    let p = &report.prelude;
    let h = &report.header;

    writeln!(out, "== FILE DUMP ==")?;
    writeln!(
        out,
        "{:08x} Prelude checksum:{:04x} version:{} header_offset:{:08x} size:{}",
        PRELUDE_OFFSET, p.checksum, p.version, p.header_offset, p.total_size,
    )?;
    writeln!(
        out,
        "{:08x} Header duration_ms:{} data_offset:{:08x} data_size:{} time_index_offset:{:08x} time_index_size:{}",
        p.header_offset, h.duration_ms, h.data_offset, h.data_size, h.time_index_offset, h.time_index_size,
    )?;

    if opts.packets {
        writeln!(out)?;
        writeln!(out, "== PACKET LISTING ==")?;
        for rec in &report.packets {
            let ts = rec.header.timestamp_ms;
            let size = rec.header.payload_size;
            match rec.header.kind {
                PacketKind::Data { universe, sync } => writeln!(
                    out,
                    "{:08x} Data packet, timestamp:{ts} universe:{universe} sync:{sync} data_size:{size}",
                    rec.offset,
                )?,
                PacketKind::Sync { channel_mask, reserved } => writeln!(
                    out,
                    "{:08x} Sync packet, timestamp:{ts} channels:{channel_mask:08x} reserved:{reserved}",
                    rec.offset,
                )?,
                PacketKind::Unknown { packet_type, field_a, field_b } => writeln!(
                    out,
                    "{:08x} Unknown packet, timestamp:{ts} type:{packet_type} A:{field_a} B:{field_b} data_size:{size}",
                    rec.offset,
                )?,
            }
        }
    }

    let s = &report.packet_stats;
    writeln!(out)?;
    writeln!(out, "== PACKET STATISTICS ==")?;
    writeln!(
        out,
        "data_packets:{} sync_packets:{} unknown_packets:{} universes:{}",
        s.data, s.sync, s.unknown, s.universes,
    )?;

    writeln!(out)?;
    writeln!(out, "== PER-UNIVERSE STATISTICS ==")?;
    for (universe, timing) in &report.timing {
        match timing {
            Ok(t) => writeln!(
                out,
                "universe:{universe} count:{} fps:{} mean:{:.2} standard_deviation:{}",
                t.count,
                fmt_opt(t.fps),
                t.mean_ms,
                fmt_opt(t.stdev_ms),
            )?,
            Err(e) => writeln!(out, "universe:{universe} count:{} {e}", e.count)?,
        }
    }

    if opts.spans {
        writeln!(out)?;
        writeln!(out, "== TIME INDEX LISTING ==")?;
        for span in &report.spans {
            write!(out, "offset:{:08x} span:{} packets:{}", span.offset, span.size, span.packets)?;
            for issue in &span.issues {
                write!(out, " {issue}")?;
            }
            writeln!(out)?;
        }
    }

    if !report.issues.is_empty() {
        writeln!(out)?;
        writeln!(out, "== STRUCTURAL ISSUES ==")?;
        for issue in &report.issues {
            writeln!(out, "{issue}")?;
        }
    }
    Ok(())
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|x| format!("{x:.2}")).unwrap_or_else(|| "n/a".into())
}
