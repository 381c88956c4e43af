use std::io::{Read, Write};
use std::ops::RangeInclusive;

use doek_core::codec::{EffortLevels, GenericCodec};
use doek_core::format::CODEC_ZLIB;
use doek_core::{Error, Result};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

/// zlib (DEFLATE with a zlib wrapper) codec.
///
/// The default codec of the container; its id makes the magic `DKS\0`.
/// Levels 1, 6 and 9 back the fast, balanced and max strategies.
pub struct ZlibCodec;

impl GenericCodec for ZlibCodec {
    fn id(&self) -> u8 {
        CODEC_ZLIB
    }

    fn name(&self) -> &'static str {
        "zlib"
    }

    fn default_levels(&self) -> EffortLevels {
        EffortLevels::new(1, 6, 9)
    }

    fn level_range(&self) -> RangeInclusive<i32> {
        0..=9
    }

    fn compress(&self, raw: &[u8], level: i32) -> Result<Vec<u8>> {
        let level = u32::try_from(level)
            .ok()
            .filter(|l| *l <= 9)
            .ok_or_else(|| Error::codec(self.name(), format!("level {level} outside 0..=9")))?;
        let mut encoder = ZlibEncoder::new(
            Vec::with_capacity(raw.len() / 2 + 64),
            Compression::new(level),
        );
        encoder
            .write_all(raw)
            .map_err(|e| Error::codec(self.name(), e))?;
        encoder.finish().map_err(|e| Error::codec(self.name(), e))
    }

    fn decompress(&self, compressed: &[u8]) -> Result<Vec<u8>> {
        let mut raw = Vec::new();
        ZlibDecoder::new(compressed)
            .read_to_end(&mut raw)
            .map_err(|e| Error::codec(self.name(), e))?;
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_levels_do_not_grow_repetitive_input() {
        let raw: Vec<u8> = b"the quick brown fox ".iter().copied().cycle().take(8192).collect();
        let fast = ZlibCodec.compress(&raw, 1).unwrap();
        let max = ZlibCodec.compress(&raw, 9).unwrap();
        assert!(max.len() <= fast.len());
        assert_eq!(ZlibCodec.decompress(&max).unwrap(), raw);
    }

    #[test]
    fn garbage_is_a_codec_error() {
        let err = ZlibCodec.decompress(b"definitely not zlib").unwrap_err();
        assert!(matches!(err, Error::Codec { codec: "zlib", .. }));
    }

    #[test]
    fn out_of_range_level_is_rejected() {
        assert!(ZlibCodec.compress(b"abc", 12).is_err());
        assert!(ZlibCodec.compress(b"abc", -1).is_err());
    }
}
