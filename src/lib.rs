pub mod prelude;
pub mod header;
pub mod packet;
pub mod index;
pub mod io_stream;
pub mod verify;
pub mod stats;
pub mod dump;
pub mod generate;

pub use prelude::{Prelude, MAGIC};
pub use header::Header;
pub use packet::{PacketHeader, PacketKind, encode_packet};
pub use index::{TimeIndexBuilder, Span, SpanIssue};
pub use io_stream::{PatternWriter, WriterOptions, WriteError};
pub use verify::{verify, verify_file, FormatError, Inconsistency, VerificationReport, VerifyOptions};
pub use stats::{TimingStats, InsufficientSamples};
