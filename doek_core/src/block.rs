//! Per-block strategy selection and its inverse dispatch.
//!
//! Strategies are tried in a fixed priority order and the first one that
//! meets its size bar wins:
//!
//! | tag    | strategy           | accepted when           |
//! |--------|--------------------|-------------------------|
//! | `0x00` | FastGeneric        | `len < 0.5 · B`         |
//! | `0x01` | TransformedGeneric | `len < 0.7 · B`, verified |
//! | `0x02` | AggressiveGeneric  | `len < B`               |
//! | `0x03` | Raw                | always                  |
//!
//! `len` is the codec output length, `B` the raw block length.

use std::time::Instant;

use tracing::{debug, warn};

use crate::chunker::ParallelChunker;
use crate::codec::{EffortLevels, GenericCodec};
use crate::error::{Error, Result};
use crate::format::{StrategyTag, TransformParams};
use crate::metrics::{FallbackEvent, FallbackKind, Metrics, Operation};
use crate::transform::{Field, ReversibleTransform};

pub const FAST_RATIO: f64 = 0.5;
pub const TRANSFORMED_RATIO: f64 = 0.7;
pub const AGGRESSIVE_RATIO: f64 = 1.0;

/// The stored form of one block.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedBlock {
    pub strategy: StrategyTag,
    /// Tag byte followed by the strategy body. Empty only for an empty block.
    pub payload: Vec<u8>,
    /// Present exactly when `strategy` is TransformedGeneric.
    pub params: Option<TransformParams>,
}

impl EncodedBlock {
    fn tagged(strategy: StrategyTag, body: &[u8], params: Option<TransformParams>) -> Self {
        let mut payload = Vec::with_capacity(body.len() + 1);
        payload.push(strategy.as_byte());
        payload.extend_from_slice(body);
        Self {
            strategy,
            payload,
            params,
        }
    }
}

#[inline]
fn meets(encoded_len: usize, block_len: usize, ratio: f64) -> bool {
    (encoded_len as f64) < block_len as f64 * ratio
}

/// Chooses a strategy per block. Holds configuration only.
pub struct BlockEncoder<'a> {
    codec: &'a dyn GenericCodec,
    levels: EffortLevels,
    transform: &'a ReversibleTransform,
    chunker: &'a ParallelChunker,
}

impl<'a> BlockEncoder<'a> {
    pub fn new(
        codec: &'a dyn GenericCodec,
        levels: EffortLevels,
        transform: &'a ReversibleTransform,
        chunker: &'a ParallelChunker,
    ) -> Self {
        Self {
            codec,
            levels,
            transform,
            chunker,
        }
    }

    /// Encode block `index`. Never fails: every non-terminal strategy error is
    /// recorded in `metrics` and the next strategy is tried, down to Raw.
    pub fn encode(&self, index: u64, block: &[u8], seed: u64, metrics: &mut Metrics) -> EncodedBlock {
        if block.is_empty() {
            return EncodedBlock {
                strategy: StrategyTag::Raw,
                payload: Vec::new(),
                params: None,
            };
        }

        let started = Instant::now();
        let encoded = self.select(index, block, seed, metrics);
        metrics.record_block(Operation::Encode(encoded.strategy), started.elapsed());
        debug!(
            block = index,
            strategy = encoded.strategy.label(),
            raw = block.len(),
            stored = encoded.payload.len(),
            "block encoded"
        );
        encoded
    }

    fn select(&self, index: u64, block: &[u8], seed: u64, metrics: &mut Metrics) -> EncodedBlock {
        let fallback = |strategy: StrategyTag, kind: FallbackKind, detail: String, m: &mut Metrics| {
            warn!(
                block = index,
                strategy = strategy.label(),
                kind = kind.label(),
                %detail,
                "strategy abandoned"
            );
            m.record_fallback(&FallbackEvent {
                block_index: index,
                strategy,
                kind,
                detail,
            });
        };

        match self.codec.compress(block, self.levels.fast) {
            Ok(body) if meets(body.len(), block.len(), FAST_RATIO) => {
                return EncodedBlock::tagged(StrategyTag::FastGeneric, &body, None);
            }
            Ok(_) => {}
            Err(e) => fallback(
                StrategyTag::FastGeneric,
                FallbackKind::CodecFailed,
                e.to_string(),
                metrics,
            ),
        }

        match self.try_transformed(block, seed, metrics) {
            Ok(Some((body, params))) => {
                return EncodedBlock::tagged(StrategyTag::TransformedGeneric, &body, Some(params));
            }
            Ok(None) => {}
            Err((kind, e)) => fallback(
                StrategyTag::TransformedGeneric,
                kind,
                e.to_string(),
                metrics,
            ),
        }

        match self.codec.compress(block, self.levels.max) {
            Ok(body) if meets(body.len(), block.len(), AGGRESSIVE_RATIO) => {
                return EncodedBlock::tagged(StrategyTag::AggressiveGeneric, &body, None);
            }
            Ok(_) => {}
            Err(e) => fallback(
                StrategyTag::AggressiveGeneric,
                FallbackKind::CodecFailed,
                e.to_string(),
                metrics,
            ),
        }

        EncodedBlock::tagged(StrategyTag::Raw, block, None)
    }

    /// Transform, compress, and verify by decoding the candidate before it is
    /// committed. `Ok(None)` means the candidate was valid but too large.
    fn try_transformed(
        &self,
        block: &[u8],
        seed: u64,
        metrics: &mut Metrics,
    ) -> std::result::Result<Option<(Vec<u8>, TransformParams)>, (FallbackKind, Error)> {
        let as_transform = |e: Error| (FallbackKind::TransformFailed, e);
        let as_codec = |e: Error| (FallbackKind::CodecFailed, e);

        let started = Instant::now();
        let field = self.transform.generate(block.len(), seed).map_err(as_transform)?;
        let applied = self.transform.apply(&field, block, self.chunker);
        metrics.record_transform(started.elapsed(), applied.as_ref().ok().map(|t| &t.stats));
        let transformed = applied.map_err(as_transform)?;

        let body = self
            .codec
            .compress(&transformed.data, self.levels.balanced)
            .map_err(as_codec)?;
        if !meets(body.len(), block.len(), TRANSFORMED_RATIO) {
            field.collapse();
            return Ok(None);
        }

        let restored = self.codec.decompress(&body).map_err(as_codec)?;
        let restored = self
            .transform
            .invert(&field, &restored, &transformed.mask, transformed.pad, self.chunker)
            .map_err(as_transform)?;
        field.collapse();
        if restored != block {
            return Err((
                FallbackKind::VerifyFailed,
                Error::Transform("trial decode did not reproduce the block".into()),
            ));
        }

        let params = TransformParams {
            seed,
            width: self.transform.width() as u16,
            pad: transformed.pad as u16,
            output_scale: self.transform.output_scale(),
            field_strength: self.transform.strength(),
            mask: transformed.mask,
        };
        Ok(Some((body, params)))
    }
}

/// Reverses [`BlockEncoder`] by dispatching on the leading tag byte.
pub struct BlockDecoder<'a> {
    codec: &'a dyn GenericCodec,
    chunker: &'a ParallelChunker,
}

impl<'a> BlockDecoder<'a> {
    pub fn new(codec: &'a dyn GenericCodec, chunker: &'a ParallelChunker) -> Self {
        Self { codec, chunker }
    }

    /// Decode one stored record. Any failure is fatal and carries the block
    /// index and the stage that failed.
    pub fn decode(
        &self,
        index: u64,
        payload: &[u8],
        params: Option<&TransformParams>,
        metrics: &mut Metrics,
    ) -> Result<Vec<u8>> {
        let Some((&tag_byte, body)) = payload.split_first() else {
            if params.is_some() {
                return Err(Error::Format("empty record carries transform params".into())
                    .in_block(index, "dispatch"));
            }
            return Ok(Vec::new());
        };

        let started = Instant::now();
        let tag = StrategyTag::from_byte(tag_byte).map_err(|e| e.in_block(index, "dispatch"))?;
        if params.is_some() && tag != StrategyTag::TransformedGeneric {
            return Err(Error::Format(format!(
                "{} record unexpectedly carries transform params",
                tag.label()
            ))
            .in_block(index, "dispatch"));
        }

        let raw = match tag {
            StrategyTag::FastGeneric | StrategyTag::AggressiveGeneric => self
                .codec
                .decompress(body)
                .map_err(|e| e.in_block(index, "decompress"))?,
            StrategyTag::TransformedGeneric => {
                let params = params.ok_or_else(|| {
                    Error::Format("transformed record is missing transform params".into())
                        .in_block(index, "dispatch")
                })?;
                let transformed = self
                    .codec
                    .decompress(body)
                    .map_err(|e| e.in_block(index, "decompress"))?;
                let inverted = Instant::now();
                let raw = self
                    .invert(&transformed, params)
                    .map_err(|e| e.in_block(index, "invert"))?;
                metrics.record_transform(inverted.elapsed(), None);
                raw
            }
            StrategyTag::Raw => body.to_vec(),
        };

        metrics.record_block(Operation::Decode(tag), started.elapsed());
        Ok(raw)
    }

    fn invert(&self, transformed: &[u8], params: &TransformParams) -> Result<Vec<u8>> {
        if transformed.len() != params.padded_len() {
            return Err(Error::Format(format!(
                "transformed body holds {} bytes, params describe {}",
                transformed.len(),
                params.padded_len()
            )));
        }
        let transform = ReversibleTransform::from_params(params)?;
        let field = Field::generate(
            (params.row_count(), transform.width()),
            params.seed,
            transform.strength(),
        )?;
        let raw = transform.invert(
            &field,
            transformed,
            &params.mask,
            params.pad as usize,
            self.chunker,
        );
        field.collapse();
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::RowClass;

    /// Run-length codec: `(count, byte)` pairs, which makes the strategy
    /// thresholds easy to steer from test data.
    struct RleCodec;

    impl GenericCodec for RleCodec {
        fn id(&self) -> u8 {
            250
        }
        fn name(&self) -> &'static str {
            "rle"
        }
        fn default_levels(&self) -> EffortLevels {
            EffortLevels::new(1, 2, 3)
        }
        fn level_range(&self) -> std::ops::RangeInclusive<i32> {
            1..=3
        }
        fn compress(&self, raw: &[u8], _level: i32) -> Result<Vec<u8>> {
            let mut out = Vec::new();
            let mut iter = raw.iter().peekable();
            while let Some(&b) = iter.next() {
                let mut n = 1u8;
                while n < 255 && iter.peek() == Some(&&b) {
                    iter.next();
                    n += 1;
                }
                out.push(n);
                out.push(b);
            }
            Ok(out)
        }
        fn decompress(&self, compressed: &[u8]) -> Result<Vec<u8>> {
            if compressed.len() % 2 != 0 {
                return Err(Error::codec("rle", "odd length"));
            }
            Ok(compressed
                .chunks_exact(2)
                .flat_map(|p| std::iter::repeat(p[1]).take(p[0] as usize))
                .collect())
        }
    }

    /// Fails every compression, so only Raw can succeed.
    struct BrokenCodec;

    impl GenericCodec for BrokenCodec {
        fn id(&self) -> u8 {
            251
        }
        fn name(&self) -> &'static str {
            "broken"
        }
        fn default_levels(&self) -> EffortLevels {
            EffortLevels::new(0, 0, 0)
        }
        fn level_range(&self) -> std::ops::RangeInclusive<i32> {
            0..=0
        }
        fn compress(&self, _raw: &[u8], _level: i32) -> Result<Vec<u8>> {
            Err(Error::codec("broken", "always fails"))
        }
        fn decompress(&self, _compressed: &[u8]) -> Result<Vec<u8>> {
            Err(Error::codec("broken", "always fails"))
        }
    }

    #[derive(Clone, Copy)]
    enum Fault {
        None,
        DropLastByte,
        FlipFirstByte,
    }

    /// RLE that refuses the fast level and can damage what it decompresses.
    struct FaultyCodec(Fault);

    impl GenericCodec for FaultyCodec {
        fn id(&self) -> u8 {
            252
        }
        fn name(&self) -> &'static str {
            "faulty"
        }
        fn default_levels(&self) -> EffortLevels {
            EffortLevels::new(1, 2, 3)
        }
        fn level_range(&self) -> std::ops::RangeInclusive<i32> {
            1..=3
        }
        fn compress(&self, raw: &[u8], level: i32) -> Result<Vec<u8>> {
            if level == 1 {
                return Err(Error::codec("faulty", "fast level unavailable"));
            }
            RleCodec.compress(raw, level)
        }
        fn decompress(&self, compressed: &[u8]) -> Result<Vec<u8>> {
            let mut raw = RleCodec.decompress(compressed)?;
            match self.0 {
                Fault::None => {}
                Fault::DropLastByte => {
                    raw.pop();
                }
                Fault::FlipFirstByte => raw[0] ^= 0x01,
            }
            Ok(raw)
        }
    }

    fn fixture() -> (ReversibleTransform, ParallelChunker) {
        (
            ReversibleTransform::new(16, 255, 0.95).unwrap(),
            ParallelChunker::new(2).unwrap(),
        )
    }

    fn roundtrip(codec: &dyn GenericCodec, block: &[u8]) -> (EncodedBlock, Metrics) {
        let (transform, chunker) = fixture();
        let encoder = BlockEncoder::new(codec, codec.default_levels(), &transform, &chunker);
        let decoder = BlockDecoder::new(codec, &chunker);
        let mut metrics = Metrics::new();
        let encoded = encoder.encode(0, block, 1234, &mut metrics);
        let decoded = decoder
            .decode(0, &encoded.payload, encoded.params.as_ref(), &mut metrics)
            .unwrap();
        assert_eq!(decoded, block);
        (encoded, metrics)
    }

    #[test]
    fn compressible_block_uses_fast_strategy() {
        let block = vec![0u8; 4096];
        let (encoded, metrics) = roundtrip(&RleCodec, &block);
        assert_eq!(encoded.strategy, StrategyTag::FastGeneric);
        assert_eq!(encoded.payload[0], 0x00);
        assert!(encoded.params.is_none());
        assert_eq!(metrics.strategy_usage(StrategyTag::FastGeneric), 1);
    }

    #[test]
    fn incompressible_block_falls_back_to_raw() {
        let block: Vec<u8> = (0..=255u8).collect();
        let (encoded, _) = roundtrip(&RleCodec, &block);
        assert_eq!(encoded.strategy, StrategyTag::Raw);
        assert_eq!(encoded.payload[0], 0x03);
        assert_eq!(&encoded.payload[1..], block.as_slice());
    }

    #[test]
    fn codec_failures_are_recorded_not_raised() {
        let block = vec![7u8; 1000];
        let (encoded, metrics) = roundtrip(&BrokenCodec, &block);
        assert_eq!(encoded.strategy, StrategyTag::Raw);
        assert_eq!(metrics.fallback_count(FallbackKind::CodecFailed), 3);
    }

    #[test]
    fn transformed_strategy_is_committed_after_verify() {
        let block = vec![0u8; 4096];
        let (encoded, metrics) = roundtrip(&FaultyCodec(Fault::None), &block);
        assert_eq!(encoded.strategy, StrategyTag::TransformedGeneric);
        assert_eq!(encoded.payload[0], 0x01);
        let params = encoded.params.expect("transformed block carries params");
        assert_eq!(params.seed, 1234);
        assert_eq!(params.row_count(), 256);
        assert_eq!(metrics.fallback_count(FallbackKind::CodecFailed), 1);
        assert_eq!(metrics.strategy_usage(StrategyTag::TransformedGeneric), 1);
    }

    fn encode_only(codec: &dyn GenericCodec, block: &[u8]) -> (EncodedBlock, Metrics) {
        let (transform, chunker) = fixture();
        let encoder = BlockEncoder::new(codec, codec.default_levels(), &transform, &chunker);
        let mut metrics = Metrics::new();
        let encoded = encoder.encode(9, block, 1234, &mut metrics);
        (encoded, metrics)
    }

    #[test]
    fn failed_inverse_is_recorded_as_transform_failure() {
        let (encoded, metrics) = encode_only(&FaultyCodec(Fault::DropLastByte), &[0u8; 4096]);
        assert_eq!(encoded.strategy, StrategyTag::AggressiveGeneric);
        assert_eq!(metrics.fallback_count(FallbackKind::TransformFailed), 1);
        assert_eq!(metrics.fallback_count(FallbackKind::VerifyFailed), 0);

        let event = &metrics.fallback_events[1];
        assert_eq!(event.block_index, 9);
        assert_eq!(event.strategy, StrategyTag::TransformedGeneric);
        assert_eq!(event.kind, FallbackKind::TransformFailed);
    }

    #[test]
    fn wrong_trial_output_is_recorded_as_verify_failure() {
        let (encoded, metrics) = encode_only(&FaultyCodec(Fault::FlipFirstByte), &[0u8; 4096]);
        assert_eq!(encoded.strategy, StrategyTag::AggressiveGeneric);
        assert!(encoded.params.is_none());
        assert_eq!(metrics.fallback_count(FallbackKind::VerifyFailed), 1);
        assert_eq!(metrics.fallback_count(FallbackKind::TransformFailed), 0);
        assert_eq!(metrics.fallback_events.len(), 2);
    }

    #[test]
    fn empty_block_has_no_tag() {
        let (encoded, metrics) = roundtrip(&RleCodec, &[]);
        assert_eq!(encoded.strategy, StrategyTag::Raw);
        assert!(encoded.payload.is_empty());
        assert_eq!(metrics.blocks_encoded, 0);
    }

    #[test]
    fn transformed_record_round_trips_through_decoder() {
        let (transform, chunker) = fixture();
        let block: Vec<u8> = (0..1000u32).map(|i| (i % 256) as u8).collect();
        let field = transform.generate(block.len(), 99).unwrap();
        let applied = transform.apply(&field, &block, &chunker).unwrap();
        field.collapse();

        let params = TransformParams {
            seed: 99,
            width: 16,
            pad: applied.pad as u16,
            output_scale: 255,
            field_strength: 0.95,
            mask: applied.mask.clone(),
        };
        let mut payload = vec![StrategyTag::TransformedGeneric.as_byte()];
        payload.extend(RleCodec.compress(&applied.data, 2).unwrap());

        let decoder = BlockDecoder::new(&RleCodec, &chunker);
        let mut metrics = Metrics::new();
        let decoded = decoder.decode(4, &payload, Some(&params), &mut metrics).unwrap();
        assert_eq!(decoded, block);
        assert_eq!(metrics.transform_times.count, 1);

        // A flipped mask bit selects the wrong inverse branch.
        let mut wrong = params.clone();
        wrong.mask[0] = match wrong.mask[0] {
            RowClass::High => RowClass::Low,
            RowClass::Low => RowClass::High,
        };
        let decoded = decoder.decode(4, &payload, Some(&wrong), &mut metrics).unwrap();
        assert_ne!(decoded, block);
    }

    #[test]
    fn decoder_rejects_unknown_tag_and_misplaced_params() {
        let (_, chunker) = fixture();
        let decoder = BlockDecoder::new(&RleCodec, &chunker);
        let mut metrics = Metrics::new();

        let err = decoder.decode(2, &[0x09, 1, 2], None, &mut metrics).unwrap_err();
        assert!(err.is_format());
        assert!(matches!(err, Error::Block { index: 2, stage: "dispatch", .. }));

        let err = decoder
            .decode(2, &[StrategyTag::TransformedGeneric.as_byte(), 1, 0], None, &mut metrics)
            .unwrap_err();
        assert!(err.is_format());
    }

    #[test]
    fn corrupt_codec_body_is_fatal() {
        let (_, chunker) = fixture();
        let decoder = BlockDecoder::new(&RleCodec, &chunker);
        let err = decoder
            .decode(0, &[0x00, 1, 2, 3], None, &mut Metrics::new())
            .unwrap_err();
        assert!(matches!(err.root(), Error::Codec { .. }));
        assert!(matches!(err, Error::Block { stage: "decompress", .. }));
    }

    #[test]
    fn thresholds_are_strict() {
        assert!(meets(49, 100, FAST_RATIO));
        assert!(!meets(50, 100, FAST_RATIO));
        assert!(meets(69, 100, TRANSFORMED_RATIO));
        assert!(!meets(100, 100, AGGRESSIVE_RATIO));
    }
}
