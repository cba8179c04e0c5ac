//! Synthetic test pattern: every universe gets one frame per interval,
//! followed by a sync packet releasing all channels.

use std::io::{Seek, Write};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::io_stream::{PatternWriter, WriteError};

#[derive(Debug, Clone)]
pub struct TestPattern {
    pub duration_ms:       u32,
    pub frame_interval_ms: u32,
    pub universes:         u32,
    /// Payload sizes are drawn uniformly from `0..max_payload`.
    pub max_payload:       usize,
    pub seed:              u64,
}

impl Default for TestPattern {
    fn default() -> Self {
        Self {
            duration_ms:       10_000,
            frame_interval_ms: 33,
            universes:         3,
            max_payload:       512,
            seed:              0,
        }
    }
}

impl TestPattern {
    /// Frames in `0..duration_ms`, stepping by `frame_interval_ms`.
    pub fn frame_times(&self) -> impl Iterator<Item = u32> {
        (0..self.duration_ms).step_by(self.frame_interval_ms.max(1) as usize)
    }

    /// Append the pattern. Does not finalize.
    pub fn write_into<W: Write + Seek>(&self, writer: &mut PatternWriter<W>) -> Result<(), WriteError> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut payload = Vec::with_capacity(self.max_payload);

        for t in self.frame_times() {
            for universe in 0..self.universes {
                let len = if self.max_payload == 0 { 0 } else { rng.gen_range(0..self.max_payload) };
                payload.clear();
                payload.extend((0..len).map(|_| rng.gen::<u8>()));
                writer.append_data(t, universe, false, &payload)?;
            }
            writer.append_sync(t)?;
        }
        log::debug!(
            "generated {} frames across {} universes",
            self.frame_times().count(),
            self.universes,
        );
        Ok(())
    }
}
