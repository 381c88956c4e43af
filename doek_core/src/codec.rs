use std::ops::RangeInclusive;

use crate::error::Result;

/// Codec-native compression levels used by the three compressing strategies.
///
/// FastGeneric uses `fast`, TransformedGeneric uses `balanced` and
/// AggressiveGeneric uses `max`. The numbers are passed to the codec verbatim,
/// so their meaning depends on the codec (zlib 0–9, zstd 1–22).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffortLevels {
    pub fast: i32,
    pub balanced: i32,
    pub max: i32,
}

impl EffortLevels {
    pub const fn new(fast: i32, balanced: i32, max: i32) -> Self {
        Self {
            fast,
            balanced,
            max,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, i32)> {
        [("fast", self.fast), ("balanced", self.balanced), ("max", self.max)].into_iter()
    }
}

/// Byte-level lossless compressor used as a primitive by the block encoder.
///
/// Each `GenericCodec` implementation:
/// - Is identified by a stable numeric `id()` stored in the last magic byte of
///   the container header.
/// - Must compress and decompress each buffer independently. No state may be
///   carried between calls; blocks are decoded in isolation.
pub trait GenericCodec: Send + Sync {
    /// Stable codec ID stored in the container header.
    fn id(&self) -> u8;

    /// Human-readable codec name for logs and CLI display.
    fn name(&self) -> &'static str;

    /// Levels used when the engine configuration does not override them.
    fn default_levels(&self) -> EffortLevels;

    /// Levels the codec accepts; the engine rejects configurations outside it.
    fn level_range(&self) -> RangeInclusive<i32>;

    /// Compress `raw` at the codec-native `level`.
    fn compress(&self, raw: &[u8], level: i32) -> Result<Vec<u8>>;

    /// Reverse [`compress`](GenericCodec::compress). Fails with
    /// [`Error::Codec`](crate::Error::Codec) on malformed input.
    fn decompress(&self, compressed: &[u8]) -> Result<Vec<u8>>;
}
