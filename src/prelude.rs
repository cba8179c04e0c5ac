//! Fixed 24-byte prelude at offset 0.
//!
//! ```text
//! magic[8] checksum:u32 version:u32 header_offset:u32 total_size:u32
//! ```
//!
//! `checksum` and `version` are reserved: written as given, read back
//! verbatim, never enforced.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{self, Read, Write};

pub const MAGIC: &[u8; 8] = b"\x5FLED\r\n\x1A\n";
pub const PRELUDE_OFFSET: u64 = 0;
pub const PRELUDE_SIZE: usize = 24;
/// Value written into the reserved `version` field.
pub const FORMAT_VERSION: u32 = 0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Prelude {
    pub magic:         [u8; 8],
    pub checksum:      u32,
    pub version:       u32,
    pub header_offset: u32,
    pub total_size:    u32,
}

impl Prelude {
    pub fn new(header_offset: u32, total_size: u32) -> Self {
        Self {
            magic: *MAGIC,
            checksum: 0,
            version: FORMAT_VERSION,
            header_offset,
            total_size,
        }
    }

    pub fn has_valid_magic(&self) -> bool {
        &self.magic == MAGIC
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.magic)?;
        writer.write_u32::<LittleEndian>(self.checksum)?;
        writer.write_u32::<LittleEndian>(self.version)?;
        writer.write_u32::<LittleEndian>(self.header_offset)?;
        writer.write_u32::<LittleEndian>(self.total_size)?;
        Ok(())
    }

    /// Reads the raw fields. Magic and size are checked by the verifier,
    /// which knows the real file length.
    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        Ok(Self {
            magic,
            checksum:      reader.read_u32::<LittleEndian>()?,
            version:       reader.read_u32::<LittleEndian>()?,
            header_offset: reader.read_u32::<LittleEndian>()?,
            total_size:    reader.read_u32::<LittleEndian>()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn layout_is_24_bytes_magic_first() {
        let mut buf = Vec::new();
        Prelude::new(24, 1000).write(&mut buf).unwrap();
        assert_eq!(buf.len(), PRELUDE_SIZE);
        assert_eq!(&buf[..8], &[0x5F, b'L', b'E', b'D', b'\r', b'\n', 0x1A, b'\n']);
        assert_eq!(&buf[16..20], &24u32.to_le_bytes());
        assert_eq!(&buf[20..24], &1000u32.to_le_bytes());

        let back = Prelude::read(Cursor::new(&buf)).unwrap();
        assert!(back.has_valid_magic());
        assert_eq!(back.version, FORMAT_VERSION);
    }

    #[test]
    fn short_input_is_an_io_error() {
        let err = Prelude::read(Cursor::new(&MAGIC[..])).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
