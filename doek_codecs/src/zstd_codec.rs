use std::ops::RangeInclusive;

use doek_core::codec::{EffortLevels, GenericCodec};
use doek_core::format::CODEC_ZSTD;
use doek_core::{Error, Result};

/// Zstandard codec.
///
/// Every call produces a standalone frame, so a block decodes without touching
/// its neighbours. The frame records its own content size.
pub struct ZstdCodec;

impl GenericCodec for ZstdCodec {
    fn id(&self) -> u8 {
        CODEC_ZSTD
    }

    fn name(&self) -> &'static str {
        "zstd"
    }

    fn default_levels(&self) -> EffortLevels {
        EffortLevels::new(1, 6, 19)
    }

    fn level_range(&self) -> RangeInclusive<i32> {
        1..=22
    }

    fn compress(&self, raw: &[u8], level: i32) -> Result<Vec<u8>> {
        zstd::bulk::compress(raw, level).map_err(|e| Error::codec(self.name(), e))
    }

    fn decompress(&self, compressed: &[u8]) -> Result<Vec<u8>> {
        zstd::decode_all(compressed).map_err(|e| Error::codec(self.name(), e))
    }
}
