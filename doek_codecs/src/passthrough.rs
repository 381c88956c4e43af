use std::ops::RangeInclusive;

use doek_core::codec::{EffortLevels, GenericCodec};
use doek_core::format::CODEC_PASSTHROUGH;
use doek_core::Result;

/// No-op codec: output equals input at every level.
///
/// Nothing it produces is ever smaller than the block, so every non-empty
/// block is stored Raw. Useful for checking framing independently of any
/// real compressor, and for data that is already compressed.
pub struct PassThroughCodec;

impl GenericCodec for PassThroughCodec {
    fn id(&self) -> u8 {
        CODEC_PASSTHROUGH
    }

    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn default_levels(&self) -> EffortLevels {
        EffortLevels::new(0, 0, 0)
    }

    fn level_range(&self) -> RangeInclusive<i32> {
        0..=0
    }

    fn compress(&self, raw: &[u8], _level: i32) -> Result<Vec<u8>> {
        Ok(raw.to_vec())
    }

    fn decompress(&self, compressed: &[u8]) -> Result<Vec<u8>> {
        Ok(compressed.to_vec())
    }
}
