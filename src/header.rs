use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{self, Read, Write};
use std::ops::Range;

pub const HEADER_SIZE: usize = 20;

/// File header, located at `Prelude::header_offset`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Header {
    /// Largest timestamp seen across all packets.
    pub duration_ms:       u32,
    pub data_offset:       u32,
    pub data_size:         u32,
    pub time_index_offset: u32,
    pub time_index_size:   u32,
}

impl Header {
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(self.duration_ms)?;
        writer.write_u32::<LittleEndian>(self.data_offset)?;
        writer.write_u32::<LittleEndian>(self.data_size)?;
        writer.write_u32::<LittleEndian>(self.time_index_offset)?;
        writer.write_u32::<LittleEndian>(self.time_index_size)?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        Ok(Self {
            duration_ms:       reader.read_u32::<LittleEndian>()?,
            data_offset:       reader.read_u32::<LittleEndian>()?,
            data_size:         reader.read_u32::<LittleEndian>()?,
            time_index_offset: reader.read_u32::<LittleEndian>()?,
            time_index_size:   reader.read_u32::<LittleEndian>()?,
        })
    }

    // Ranges are u64 so that offset + size never wraps.

    pub fn data_range(&self) -> Range<u64> {
        let start = self.data_offset as u64;
        start..start + self.data_size as u64
    }

    pub fn time_index_range(&self) -> Range<u64> {
        let start = self.time_index_offset as u64;
        start..start + self.time_index_size as u64
    }
}

/// True when the two half-open ranges share at least one byte.
pub fn overlaps(a: &Range<u64>, b: &Range<u64>) -> bool {
    a.start < b.end && b.start < a.end
}
