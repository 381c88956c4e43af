use crate::error::{Error, Result};

/// First three magic bytes of every DOEK container. The fourth byte is the
/// generic codec id, so a zlib container starts with `DKS\0`.
pub const MAGIC_PREFIX: &[u8; 3] = b"DKS";

/// Container format version. Any other value is rejected on decode.
pub const FORMAT_VERSION: u8 = 13;

/// Fixed size of the container header in bytes.
///   magic[4] + version:u8 + original_size:u64 = 4 + 1 + 8 = 13
pub const HEADER_SIZE: usize = 13;

/// Size of the length prefix in front of every record.
///   payload_len:u32 + params_len:u32 = 8
pub const RECORD_HEADER_SIZE: usize = 8;

/// Default block size: 256 KB.
pub const DEFAULT_BLOCK_SIZE: usize = 256 * 1024;

/// Default transform row width.
pub const DEFAULT_DIMENSION_LEVELS: usize = 16;

/// Default transform output scale.
pub const DEFAULT_OUTPUT_SCALE: u8 = 255;

/// Default spread of the field phases, as a fraction of pi.
pub const DEFAULT_FIELD_STRENGTH: f64 = 0.95;

/// Extension appended by `Engine::compress` when no output path is given.
pub const EXTENSION: &str = "doek";

// ── Codec IDs ──────────────────────────────────────────────────────────────

pub const CODEC_ZLIB: u8 = 0;
pub const CODEC_ZSTD: u8 = 1;
pub const CODEC_PASSTHROUGH: u8 = 2;

// ── Strategy tags ──────────────────────────────────────────────────────────

/// One-byte discriminator written in front of every non-empty payload.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StrategyTag {
    FastGeneric = 0x00,
    TransformedGeneric = 0x01,
    AggressiveGeneric = 0x02,
    Raw = 0x03,
}

impl StrategyTag {
    /// Every tag, in the order the encoder tries them.
    pub const PRIORITY: [StrategyTag; 4] = [
        StrategyTag::FastGeneric,
        StrategyTag::TransformedGeneric,
        StrategyTag::AggressiveGeneric,
        StrategyTag::Raw,
    ];

    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0x00 => Ok(StrategyTag::FastGeneric),
            0x01 => Ok(StrategyTag::TransformedGeneric),
            0x02 => Ok(StrategyTag::AggressiveGeneric),
            0x03 => Ok(StrategyTag::Raw),
            other => Err(Error::Format(format!("unknown strategy tag 0x{other:02x}"))),
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Short name used in logs and metrics.
    pub fn label(self) -> &'static str {
        match self {
            StrategyTag::FastGeneric => "fast",
            StrategyTag::TransformedGeneric => "transformed",
            StrategyTag::AggressiveGeneric => "aggressive",
            StrategyTag::Raw => "raw",
        }
    }
}

// ── Header ─────────────────────────────────────────────────────────────────

/// Decoded representation of the 13-byte container header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHeader {
    pub codec_id: u8,
    pub version: u8,
    /// Total number of bytes the records decode to.
    pub original_size: u64,
}

impl ContainerHeader {
    pub fn new(codec_id: u8, original_size: u64) -> Self {
        Self {
            codec_id,
            version: FORMAT_VERSION,
            original_size,
        }
    }

    pub fn magic(&self) -> [u8; 4] {
        [MAGIC_PREFIX[0], MAGIC_PREFIX[1], MAGIC_PREFIX[2], self.codec_id]
    }

    /// Serialize to exactly `HEADER_SIZE` bytes.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[..4].copy_from_slice(&self.magic());
        buf[4] = self.version;
        buf[5..13].copy_from_slice(&self.original_size.to_le_bytes());
        buf
    }

    /// Deserialize from `HEADER_SIZE` bytes, checking magic and version.
    pub fn from_bytes(buf: &[u8; HEADER_SIZE]) -> Result<Self> {
        if &buf[..3] != MAGIC_PREFIX {
            return Err(Error::Format(
                "invalid magic bytes, not a DOEK container".into(),
            ));
        }
        let version = buf[4];
        if version != FORMAT_VERSION {
            return Err(Error::Format(format!(
                "incompatible version {version} (this build reads version {FORMAT_VERSION})"
            )));
        }
        let mut size = [0u8; 8];
        size.copy_from_slice(&buf[5..13]);
        Ok(Self {
            codec_id: buf[3],
            version,
            original_size: u64::from_le_bytes(size),
        })
    }
}

// ── Record prefix ──────────────────────────────────────────────────────────

/// Length prefix of one framed block record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordHeader {
    /// Tag byte plus strategy body.
    pub payload_len: u32,
    /// Serialized [`TransformParams`], zero when absent.
    pub params_len: u32,
}

impl RecordHeader {
    pub fn to_bytes(&self) -> [u8; RECORD_HEADER_SIZE] {
        let mut buf = [0u8; RECORD_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.payload_len.to_le_bytes());
        buf[4..8].copy_from_slice(&self.params_len.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; RECORD_HEADER_SIZE]) -> Self {
        Self {
            payload_len: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            params_len: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }
}

// ── Transform parameters ───────────────────────────────────────────────────

/// Which transform branch a row went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowClass {
    /// Dispersion at or below the block mean: linear rescale.
    Low,
    /// Dispersion above the block mean: phase rotation and quadratic curve.
    High,
}

/// Fixed part of the serialized parameters.
///   seed:u64 + width:u16 + pad:u16 + output_scale:u8
///   + field_strength:f64 + row_count:u32 = 8 + 2 + 2 + 1 + 8 + 4 = 25
pub const TRANSFORM_PARAMS_FIXED_SIZE: usize = 25;

/// Everything needed to regenerate the field and invert a transformed block.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformParams {
    pub seed: u64,
    /// Row width the block was reshaped to.
    pub width: u16,
    /// Zero bytes appended to complete the final row.
    pub pad: u16,
    pub output_scale: u8,
    pub field_strength: f64,
    /// Per-row branch taken on encode; its length is the row count.
    pub mask: Vec<RowClass>,
}

impl TransformParams {
    pub fn row_count(&self) -> usize {
        self.mask.len()
    }

    /// Number of bytes the transformed rows occupy, padding included.
    pub fn padded_len(&self) -> usize {
        self.mask.len() * self.width as usize
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mask_len = self.mask.len().div_ceil(8);
        let mut buf = Vec::with_capacity(TRANSFORM_PARAMS_FIXED_SIZE + mask_len);
        buf.extend_from_slice(&self.seed.to_le_bytes());
        buf.extend_from_slice(&self.width.to_le_bytes());
        buf.extend_from_slice(&self.pad.to_le_bytes());
        buf.push(self.output_scale);
        buf.extend_from_slice(&self.field_strength.to_bits().to_le_bytes());
        buf.extend_from_slice(&(self.mask.len() as u32).to_le_bytes());

        // One bit per row, LSB first; a set bit marks a high-dispersion row.
        let mut packed = vec![0u8; mask_len];
        for (i, class) in self.mask.iter().enumerate() {
            if *class == RowClass::High {
                packed[i / 8] |= 1 << (i % 8);
            }
        }
        buf.extend_from_slice(&packed);
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < TRANSFORM_PARAMS_FIXED_SIZE {
            return Err(Error::Format(format!(
                "transform params truncated: {} bytes, need at least {}",
                buf.len(),
                TRANSFORM_PARAMS_FIXED_SIZE
            )));
        }
        let u16_at = |at: usize| u16::from_le_bytes([buf[at], buf[at + 1]]);
        let mut word = [0u8; 8];

        word.copy_from_slice(&buf[0..8]);
        let seed = u64::from_le_bytes(word);
        let width = u16_at(8);
        let pad = u16_at(10);
        let output_scale = buf[12];
        word.copy_from_slice(&buf[13..21]);
        let field_strength = f64::from_bits(u64::from_le_bytes(word));
        let row_count = u32::from_le_bytes([buf[21], buf[22], buf[23], buf[24]]) as usize;

        if width == 0 || pad >= width {
            return Err(Error::Format(format!(
                "transform params carry invalid shape: width {width}, pad {pad}"
            )));
        }
        if output_scale == 0 {
            return Err(Error::Format("transform params carry output scale 0".into()));
        }
        if !(field_strength > 0.0 && field_strength <= 1.0) {
            return Err(Error::Format(format!(
                "transform params carry field strength {field_strength} outside (0, 1]"
            )));
        }

        let packed = &buf[TRANSFORM_PARAMS_FIXED_SIZE..];
        if packed.len() != row_count.div_ceil(8) {
            return Err(Error::Format(format!(
                "transform mask holds {} bytes but {} rows need {}",
                packed.len(),
                row_count,
                row_count.div_ceil(8)
            )));
        }
        let mask = (0..row_count)
            .map(|i| {
                if packed[i / 8] & (1 << (i % 8)) != 0 {
                    RowClass::High
                } else {
                    RowClass::Low
                }
            })
            .collect();

        Ok(Self {
            seed,
            width,
            pad,
            output_scale,
            field_strength,
            mask,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_is_little_endian() {
        let header = ContainerHeader::new(CODEC_ZLIB, 0x0102_0304);
        let bytes = header.to_bytes();
        assert_eq!(&bytes[..4], b"DKS\0");
        assert_eq!(bytes[4], FORMAT_VERSION);
        assert_eq!(&bytes[5..9], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(ContainerHeader::from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn header_rejects_bad_magic_and_version() {
        let mut bytes = ContainerHeader::new(CODEC_ZSTD, 10).to_bytes();
        bytes[0] ^= 0xff;
        assert!(ContainerHeader::from_bytes(&bytes).unwrap_err().is_format());

        let mut bytes = ContainerHeader::new(CODEC_ZSTD, 10).to_bytes();
        bytes[4] = FORMAT_VERSION - 1;
        let err = ContainerHeader::from_bytes(&bytes).unwrap_err();
        assert!(err.to_string().contains("incompatible version"), "got: {err}");
    }

    #[test]
    fn strategy_tags_match_wire_values() {
        for tag in StrategyTag::PRIORITY {
            assert_eq!(StrategyTag::from_byte(tag.as_byte()).unwrap(), tag);
        }
        assert_eq!(StrategyTag::Raw.as_byte(), 0x03);
        assert!(StrategyTag::from_byte(0x04).is_err());
    }

    #[test]
    fn params_pack_mask_lsb_first() {
        let params = TransformParams {
            seed: 7,
            width: 16,
            pad: 3,
            output_scale: 255,
            field_strength: 0.95,
            mask: vec![
                RowClass::High,
                RowClass::Low,
                RowClass::Low,
                RowClass::High,
                RowClass::Low,
                RowClass::Low,
                RowClass::Low,
                RowClass::Low,
                RowClass::High,
            ],
        };
        let bytes = params.to_bytes();
        assert_eq!(bytes.len(), TRANSFORM_PARAMS_FIXED_SIZE + 2);
        assert_eq!(bytes[TRANSFORM_PARAMS_FIXED_SIZE], 0b0000_1001);
        assert_eq!(bytes[TRANSFORM_PARAMS_FIXED_SIZE + 1], 0b0000_0001);
        assert_eq!(TransformParams::from_bytes(&bytes).unwrap(), params);
        assert_eq!(params.padded_len(), 9 * 16);
    }

    #[test]
    fn params_reject_inconsistent_mask_length() {
        let params = TransformParams {
            seed: 1,
            width: 4,
            pad: 0,
            output_scale: 255,
            field_strength: 0.5,
            mask: vec![RowClass::Low; 10],
        };
        let mut bytes = params.to_bytes();
        bytes.push(0);
        assert!(TransformParams::from_bytes(&bytes).unwrap_err().is_format());
        assert!(TransformParams::from_bytes(&bytes[..10]).is_err());
    }
}
