//! Streaming pattern writer.
//!
//! [`PatternWriter`] reserves zeroed space for the prelude and header, then
//! appends packets back to back while the [`TimeIndexBuilder`] notes which
//! packet offsets start a new second. `finalize()` writes the time index
//! after the data section and patches the header and prelude in place.
//!
//! ```text
//! 0    Prelude   (24 B, backfilled)
//! 24   Header    (20 B, backfilled)
//! 44   Data      packets ...
//! ..   Time index u32 offsets ...
//! ```
//!
//! A writer that is dropped while still open finalizes itself; use
//! [`PatternWriter::abandon`] to skip that and leave the placeholder
//! prelude behind. An I/O error while appending or finalizing leaves the
//! writer [`WriterState::Failed`]: later calls are refused and nothing is
//! finalized on drop, so a half-written stream never gets a valid prelude.
//! Writing to a temporary path and renaming on success is the caller's
//! business.

use std::fs::File;
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::Path;
use thiserror::Error;

use crate::header::{Header, HEADER_SIZE};
use crate::index::{TimeIndexBuilder, INDEX_INTERVAL_MS};
use crate::packet::{packet_header, PacketError, PacketHeader, PacketKind, ALL_CHANNELS};
use crate::prelude::{Prelude, FORMAT_VERSION, PRELUDE_OFFSET, PRELUDE_SIZE};

#[derive(Error, Debug)]
pub enum WriteError {
    #[error(transparent)]
    Packet(#[from] PacketError),
    #[error("writer is already finalized")]
    Finalized,
    #[error("writer failed on an earlier write and cannot continue")]
    Failed,
    #[error("offset {0} does not fit the 32-bit file layout")]
    OffsetOverflow(u64),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── WriterOptions ────────────────────────────────────────────────────────────

/// Configuration for [`PatternWriter::with_options`].
#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Stored in the prelude's reserved `version` field.
    pub version:           u32,
    pub index_interval_ms: u32,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            version:           FORMAT_VERSION,
            index_interval_ms: INDEX_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Writing,
    Finalized,
    Abandoned,
    /// An earlier write hit an I/O error; the stream position is unknown.
    Failed,
}

// ── Writer ───────────────────────────────────────────────────────────────────

pub struct PatternWriter<W: Write + Seek> {
    // Only `None` after `into_inner`/`abandon` moved it out.
    writer:        Option<W>,
    state:         WriterState,
    version:       u32,
    header_offset: u32,
    data_offset:   u32,
    position:      u64,
    duration_ms:   u32,
    packets:       u64,
    time_index:    TimeIndexBuilder,
}

impl PatternWriter<BufWriter<File>> {
    /// Create (or truncate) `path` and start writing a pattern into it.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, WriteError> {
        Self::create_with_options(path, WriterOptions::default())
    }

    pub fn create_with_options<P: AsRef<Path>>(path: P, opts: WriterOptions) -> Result<Self, WriteError> {
        let file = File::create(path.as_ref())?;
        log::debug!("writing pattern to {}", path.as_ref().display());
        Self::with_options(BufWriter::new(file), opts)
    }

    /// Finalize, sync to disk and release the file handle.
    pub fn close(mut self) -> Result<Header, WriteError> {
        let header = self.finalize()?;
        let file = self
            .into_inner()?
            .into_inner()
            .map_err(io::IntoInnerError::into_error)?;
        file.sync_all()?;
        Ok(header)
    }
}

impl<W: Write + Seek> PatternWriter<W> {
    pub fn new(writer: W) -> Result<Self, WriteError> {
        Self::with_options(writer, WriterOptions::default())
    }

    pub fn with_options(mut writer: W, opts: WriterOptions) -> Result<Self, WriteError> {
        // Prelude and header depend on the final layout; reserve them now.
        writer.seek(SeekFrom::Start(PRELUDE_OFFSET))?;
        writer.write_all(&[0u8; PRELUDE_SIZE])?;
        let header_offset = PRELUDE_SIZE as u32;
        writer.write_all(&[0u8; HEADER_SIZE])?;
        let data_offset = header_offset + HEADER_SIZE as u32;

        Ok(Self {
            writer:        Some(writer),
            state:         WriterState::Writing,
            version:       opts.version,
            header_offset,
            data_offset,
            position:      data_offset as u64,
            duration_ms:   0,
            packets:       0,
            time_index:    TimeIndexBuilder::with_interval(opts.index_interval_ms),
        })
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    /// Largest timestamp appended so far.
    pub fn duration_ms(&self) -> u32 {
        self.duration_ms
    }

    pub fn packet_count(&self) -> u64 {
        self.packets
    }

    pub fn time_index(&self) -> &TimeIndexBuilder {
        &self.time_index
    }

    // ── Appending ────────────────────────────────────────────────────────────

    /// Append channel data for one universe.
    pub fn append_data(&mut self, timestamp_ms: u32, universe: u32, sync: bool, payload: &[u8]) -> Result<(), WriteError> {
        self.append_packet(timestamp_ms, PacketKind::Data { universe, sync }, payload)
    }

    /// Append a sync packet releasing every channel.
    pub fn append_sync(&mut self, timestamp_ms: u32) -> Result<(), WriteError> {
        self.append_sync_masked(timestamp_ms, ALL_CHANNELS)
    }

    pub fn append_sync_masked(&mut self, timestamp_ms: u32, channel_mask: u32) -> Result<(), WriteError> {
        self.append_packet(timestamp_ms, PacketKind::Sync { channel_mask, reserved: true }, &[])
    }

    /// Append any packet kind. Nothing is written if the packet cannot be
    /// encoded.
    pub fn append_packet(&mut self, timestamp_ms: u32, kind: PacketKind, payload: &[u8]) -> Result<(), WriteError> {
        self.ensure_writing()?;
        let header = packet_header(timestamp_ms, kind, payload)?;
        let offset = self.position;
        let end    = offset + header.encoded_len();
        if end > u32::MAX as u64 {
            return Err(WriteError::OffsetOverflow(end));
        }

        let w = self.writer.as_mut().ok_or(WriteError::Finalized)?;
        if let Err(e) = write_packet(w, &header, payload) {
            self.fail(offset);
            return Err(e.into());
        }

        self.time_index.observe(timestamp_ms, offset as u32);
        self.position    = end;
        self.packets    += 1;
        self.duration_ms = self.duration_ms.max(timestamp_ms);
        Ok(())
    }

    // ── Finalization ─────────────────────────────────────────────────────────

    /// Write the time index, then patch the header and prelude. Must be
    /// called exactly once; a second call returns [`WriteError::Finalized`].
    pub fn finalize(&mut self) -> Result<Header, WriteError> {
        self.ensure_writing()?;
        let time_index_offset = self.position;
        let eof = time_index_offset + self.time_index.encoded_len() as u64;
        if eof > u32::MAX as u64 {
            return Err(WriteError::OffsetOverflow(eof));
        }

        match self.write_trailer(time_index_offset, eof) {
            Ok(header) => {
                self.state = WriterState::Finalized;
                log::info!(
                    "finalized pattern: {} packets, {} index entries, {} ms, {} bytes",
                    self.packets,
                    self.time_index.entries().len(),
                    self.duration_ms,
                    eof,
                );
                Ok(header)
            }
            Err(e) => {
                self.fail(time_index_offset);
                Err(e.into())
            }
        }
    }

    /// Time index, then header and prelude patched in place.
    fn write_trailer(&mut self, time_index_offset: u64, eof: u64) -> io::Result<Header> {
        let w = self.writer.as_mut().ok_or_else(|| io::Error::new(io::ErrorKind::Other, "writer already taken"))?;
        self.time_index.write(&mut *w)?;

        let header = Header {
            duration_ms:       self.duration_ms,
            data_offset:       self.data_offset,
            data_size:         time_index_offset as u32 - self.data_offset,
            time_index_offset: time_index_offset as u32,
            time_index_size:   (eof - time_index_offset) as u32,
        };
        w.seek(SeekFrom::Start(self.header_offset as u64))?;
        header.write(&mut *w)?;

        let mut prelude = Prelude::new(self.header_offset, eof as u32);
        prelude.version = self.version;
        w.seek(SeekFrom::Start(PRELUDE_OFFSET))?;
        prelude.write(&mut *w)?;

        // Leave the cursor at EOF so a recovered inner writer appends nothing
        // over the index.
        w.seek(SeekFrom::Start(eof))?;
        w.flush()?;
        Ok(header)
    }

    fn ensure_writing(&self) -> Result<(), WriteError> {
        match self.state {
            WriterState::Writing => Ok(()),
            WriterState::Failed  => Err(WriteError::Failed),
            WriterState::Finalized | WriterState::Abandoned => Err(WriteError::Finalized),
        }
    }

    fn fail(&mut self, offset: u64) {
        self.state = WriterState::Failed;
        log::error!("write failed at {offset:#010x}; pattern writer is unusable");
    }

    /// Finalize if still open and hand back the underlying writer.
    pub fn into_inner(mut self) -> Result<W, WriteError> {
        if self.state == WriterState::Writing {
            self.finalize()?;
        }
        self.writer.take().ok_or(WriteError::Finalized)
    }

    /// Drop the writer without finalizing. The output keeps its zeroed
    /// prelude and will fail verification.
    pub fn abandon(mut self) -> Option<W> {
        self.state = WriterState::Abandoned;
        log::debug!("abandoned pattern writer after {} packets", self.packets);
        self.writer.take()
    }
}

fn write_packet<W: Write>(w: &mut W, header: &PacketHeader, payload: &[u8]) -> io::Result<()> {
    header.write(&mut *w)?;
    w.write_all(payload)
}

impl<W: Write + Seek> Drop for PatternWriter<W> {
    fn drop(&mut self) {
        if self.state != WriterState::Writing || self.writer.is_none() {
            return;
        }
        log::warn!("pattern writer dropped without finalize(); finalizing now");
        if let Err(e) = self.finalize() {
            log::error!("finalize on drop failed: {e}");
        }
    }
}
