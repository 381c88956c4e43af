/// End-to-end tests over real files and the bundled codecs.
///
/// Covers the round-trip law for awkward lengths, header validation before
/// any output is written, truncation, codec mismatch, and determinism of the
/// produced container across worker counts.
use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use doek_codecs::{PassThroughCodec, ZlibCodec, ZstdCodec};
use doek_core::format::{DEFAULT_BLOCK_SIZE, FORMAT_VERSION, HEADER_SIZE};
use doek_core::{
    inspect, ContainerHeader, ContainerReader, EffortLevels, Engine, EngineConfig, Error,
    FallbackKind, GenericCodec, StrategyTag,
};
use proptest::prelude::*;

/// Generate `len` deterministic bytes using a simple LCG.
fn pseudo_random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = seed;
    (0..len)
        .map(|_| {
            rng = rng
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (rng >> 56) as u8
        })
        .collect()
}

/// Generate `len` highly compressible bytes (repeating pattern).
fn compressible_bytes(len: usize) -> Vec<u8> {
    let pattern = b"the quick brown fox jumps over the lazy dog. ";
    (0..len).map(|i| pattern[i % pattern.len()]).collect()
}

// ── helpers ───────────────────────────────────────────────────────────────

fn config(block_size: usize) -> EngineConfig {
    EngineConfig::default()
        .with_block_size(block_size)
        .with_worker_count(4)
        .with_seed(0x5EED)
}

fn zlib_engine(block_size: usize) -> Engine {
    Engine::new(config(block_size), Arc::new(ZlibCodec)).unwrap()
}

fn round_trip_file(engine: &mut Engine, dir: &Path, data: &[u8]) -> Vec<u8> {
    let input = dir.join("input.bin");
    fs::write(&input, data).unwrap();
    let packed = engine.compress(&input, None).unwrap();
    let restored = dir.join("restored.bin");
    engine.decompress(&packed, Some(&restored)).unwrap();
    fs::read(restored).unwrap()
}

fn encode_to_vec(engine: &mut Engine, data: &[u8]) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    engine.encode(data, &mut out).unwrap();
    out.into_inner()
}

fn strategies(container: &[u8]) -> Vec<Option<StrategyTag>> {
    let mut reader = ContainerReader::open(container).unwrap();
    reader
        .record_infos()
        .unwrap()
        .into_iter()
        .map(|r| r.strategy)
        .collect()
}

// ── round trips ───────────────────────────────────────────────────────────

#[test]
fn test_roundtrip_awkward_lengths() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = zlib_engine(4096);
    // Not a multiple of the block size nor of the row width.
    for len in [0usize, 1, 15, 17, 4095, 4096, 4097, 3 * 4096 + 7] {
        let data = compressible_bytes(len);
        assert_eq!(round_trip_file(&mut engine, dir.path(), &data), data, "len {len}");
        let data = pseudo_random_bytes(len, len as u64);
        assert_eq!(round_trip_file(&mut engine, dir.path(), &data), data, "len {len}");
    }
}

#[test]
fn test_roundtrip_zstd_mixed_content() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = Engine::new(config(8192), Arc::new(ZstdCodec)).unwrap();
    let mut data = compressible_bytes(20_000);
    data.extend(pseudo_random_bytes(20_000, 99));
    data.extend((0..20_000u32).map(|i| (i / 64) as u8));
    assert_eq!(round_trip_file(&mut engine, dir.path(), &data), data);
}

#[test]
fn test_zero_stream_spans_two_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("zeros.bin");
    fs::write(&input, vec![0u8; 300_000]).unwrap();

    let mut engine = zlib_engine(262_144);
    let packed = engine.compress(&input, None).unwrap();
    assert_eq!(packed, dir.path().join("zeros.bin.doek"));

    let inspection = inspect(&packed).unwrap();
    assert_eq!(inspection.header.original_size, 300_000);
    assert_eq!(inspection.records.len(), 2);
    for record in &inspection.records {
        assert_eq!(record.strategy, Some(StrategyTag::FastGeneric));
    }

    fs::remove_file(&input).unwrap();
    let restored = engine.decompress(&packed, None).unwrap();
    assert_eq!(restored, input);
    assert_eq!(fs::read(&restored).unwrap(), vec![0u8; 300_000]);
}

#[test]
fn test_empty_file_has_header_only() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("empty");
    fs::write(&input, b"").unwrap();

    let mut engine = zlib_engine(1024);
    let packed = engine.compress(&input, None).unwrap();
    let bytes = fs::read(&packed).unwrap();
    assert_eq!(bytes.len(), HEADER_SIZE);
    assert_eq!(&bytes[..4], b"DKS\0");
    assert_eq!(bytes[4], FORMAT_VERSION);

    let inspection = inspect(&packed).unwrap();
    assert_eq!(inspection.header.original_size, 0);
    assert!(inspection.records.is_empty());

    let restored = dir.path().join("restored");
    engine.decompress(&packed, Some(&restored)).unwrap();
    assert_eq!(fs::read(restored).unwrap().len(), 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_stream_roundtrip(
        data in prop::collection::vec(any::<u8>(), 0..3000),
        block_size in 1usize..1024,
        width in 1usize..40,
    ) {
        let config = config(block_size).with_dimension_levels(width).with_worker_count(3);
        let mut engine = Engine::new(config, Arc::new(ZlibCodec)).unwrap();
        let container = encode_to_vec(&mut engine, &data);
        let mut restored = Vec::new();
        engine.decode(&container[..], &mut restored).unwrap();
        prop_assert_eq!(restored, data);
    }
}

// ── header validation and corruption ──────────────────────────────────────

#[test]
fn test_bad_magic_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = zlib_engine(1024);
    let input = dir.path().join("data");
    fs::write(&input, compressible_bytes(5000)).unwrap();
    let packed = engine.compress(&input, None).unwrap();

    let mut bytes = fs::read(&packed).unwrap();
    bytes[0] ^= 0xFF;
    fs::write(&packed, &bytes).unwrap();

    let out = dir.path().join("never");
    let err = engine.decompress(&packed, Some(&out)).unwrap_err();
    assert!(err.is_format(), "got {err}");
    assert!(!out.exists(), "no output file may be created");
}

#[test]
fn test_version_mismatch_is_format_error() {
    let mut engine = zlib_engine(1024);
    let mut container = encode_to_vec(&mut engine, b"hello hello hello");
    container[4] = FORMAT_VERSION + 1;

    let mut out = Vec::new();
    let err = engine.decode(&container[..], &mut out).unwrap_err();
    assert!(err.is_format());
    assert!(out.is_empty());
}

#[test]
fn test_truncated_container_is_size_mismatch() {
    let mut engine = zlib_engine(1024);
    let data = pseudo_random_bytes(5000, 3);
    let container = encode_to_vec(&mut engine, &data);

    // Cut inside the last record, then exactly after the header.
    for cut in [container.len() - 10, HEADER_SIZE] {
        let mut out = Vec::new();
        let err = engine.decode(&container[..cut], &mut out).unwrap_err();
        assert!(err.is_size_mismatch(), "cut {cut}: got {err}");
    }
}

#[test]
fn test_oversized_declared_length_is_size_mismatch() {
    let mut engine = zlib_engine(1024);
    let mut container = encode_to_vec(&mut engine, &compressible_bytes(3000));
    let header = ContainerHeader::new(ZlibCodec.id(), 3001);
    container[..HEADER_SIZE].copy_from_slice(&header.to_bytes());

    let mut out = Vec::new();
    let err = engine.decode(&container[..], &mut out).unwrap_err();
    assert!(matches!(
        err.root(),
        Error::SizeMismatch {
            expected: 3001,
            actual: 3000
        }
    ));
}

#[test]
fn test_undersized_declared_length_is_format_error() {
    let mut engine = zlib_engine(1024);
    let mut container = encode_to_vec(&mut engine, &compressible_bytes(3000));
    let header = ContainerHeader::new(ZlibCodec.id(), 2500);
    container[..HEADER_SIZE].copy_from_slice(&header.to_bytes());

    let mut out = Vec::new();
    let err = engine.decode(&container[..], &mut out).unwrap_err();
    assert!(err.is_format(), "got {err}");
}

#[test]
fn test_unknown_strategy_tag_names_the_block() {
    let mut engine = zlib_engine(1024);
    let mut container = encode_to_vec(&mut engine, &compressible_bytes(1500));
    // First payload byte of record 0 is its tag.
    container[HEADER_SIZE + 8] = 0x7F;

    let mut out = Vec::new();
    let err = engine.decode(&container[..], &mut out).unwrap_err();
    assert!(err.is_format());
    assert!(matches!(
        err,
        Error::Block {
            index: 0,
            stage: "dispatch",
            ..
        }
    ));
}

#[test]
fn test_codec_mismatch_is_format_error() {
    let mut zlib = zlib_engine(1024);
    let container = encode_to_vec(&mut zlib, &compressible_bytes(2000));

    let mut zstd = Engine::new(config(1024), Arc::new(ZstdCodec)).unwrap();
    let mut out = Vec::new();
    let err = zstd.decode(&container[..], &mut out).unwrap_err();
    assert!(err.is_format());
    assert!(out.is_empty());
}

// ── strategy selection and determinism ────────────────────────────────────

#[test]
fn test_compressible_blocks_choose_fast() {
    let mut engine = zlib_engine(4096);
    let container = encode_to_vec(&mut engine, &compressible_bytes(4 * 4096));
    assert_eq!(strategies(&container), vec![Some(StrategyTag::FastGeneric); 4]);
    assert_eq!(engine.metrics().strategy_usage(StrategyTag::FastGeneric), 4);
}

#[test]
fn test_incompressible_blocks_fall_back_to_raw() {
    let mut engine = zlib_engine(4096);
    let container = encode_to_vec(&mut engine, &pseudo_random_bytes(2 * 4096, 11));
    assert_eq!(strategies(&container), vec![Some(StrategyTag::Raw); 2]);
    assert_eq!(engine.metrics().fallback_count(FallbackKind::CodecFailed), 0);
}

#[test]
fn test_passthrough_codec_stores_raw() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = Engine::new(config(1000), Arc::new(PassThroughCodec)).unwrap();
    let data = compressible_bytes(2500);
    assert_eq!(round_trip_file(&mut engine, dir.path(), &data), data);

    let inspection = inspect(&dir.path().join("input.bin.doek")).unwrap();
    assert_eq!(&inspection.header.to_bytes()[..4], b"DKS\x02");
    assert!(inspection
        .records
        .iter()
        .all(|r| r.strategy == Some(StrategyTag::Raw)));
}

#[test]
fn test_fixed_seed_is_reproducible() {
    let data: Vec<u8> = (0..50_000u32).map(|i| ((i * i) >> 7) as u8).collect();
    let a = encode_to_vec(&mut zlib_engine(8192), &data);
    let b = encode_to_vec(&mut zlib_engine(8192), &data);
    assert_eq!(a, b);
}

#[test]
fn test_worker_count_does_not_change_output() {
    let data: Vec<u8> = (0..40_000u32)
        .map(|i| ((i % 251) ^ (i >> 5)) as u8)
        .collect();
    let containers: Vec<Vec<u8>> = [1usize, 2, 8]
        .iter()
        .map(|&workers| {
            let config = config(8192).with_worker_count(workers);
            let mut engine = Engine::new(config, Arc::new(ZlibCodec)).unwrap();
            encode_to_vec(&mut engine, &data)
        })
        .collect();
    assert_eq!(containers[0], containers[1]);
    assert_eq!(containers[0], containers[2]);
}

/// Zlib that refuses its fast level, so every block has to earn a
/// transformed record or fall further.
struct SlowZlib;

impl GenericCodec for SlowZlib {
    fn id(&self) -> u8 {
        200
    }
    fn name(&self) -> &'static str {
        "slow-zlib"
    }
    fn default_levels(&self) -> EffortLevels {
        ZlibCodec.default_levels()
    }
    fn level_range(&self) -> std::ops::RangeInclusive<i32> {
        ZlibCodec.level_range()
    }
    fn compress(&self, raw: &[u8], level: i32) -> doek_core::Result<Vec<u8>> {
        if level == self.default_levels().fast {
            return Err(Error::codec("slow-zlib", "fast level disabled"));
        }
        ZlibCodec.compress(raw, level)
    }
    fn decompress(&self, compressed: &[u8]) -> doek_core::Result<Vec<u8>> {
        ZlibCodec.decompress(compressed)
    }
}

#[test]
fn test_transformed_records_round_trip_through_files() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = Engine::new(config(16 * 1024), Arc::new(SlowZlib)).unwrap();
    let data = vec![0u8; 32 * 1024];
    assert_eq!(round_trip_file(&mut engine, dir.path(), &data), data);

    let inspection = inspect(&dir.path().join("input.bin.doek")).unwrap();
    assert_eq!(inspection.records.len(), 2);
    for record in &inspection.records {
        assert_eq!(record.strategy, Some(StrategyTag::TransformedGeneric));
        assert!(record.params_len > 0);
        assert!(record.rows_high.is_some());
    }

    let metrics = engine.metrics();
    assert_eq!(metrics.strategy_usage(StrategyTag::TransformedGeneric), 2);
    assert_eq!(metrics.fallback_count(FallbackKind::CodecFailed), 2);
    assert_eq!(metrics.fallback_count(FallbackKind::VerifyFailed), 0);
    let blocks: Vec<u64> = metrics.fallback_events.iter().map(|e| e.block_index).collect();
    assert_eq!(blocks, vec![0, 1]);
}

#[test]
fn test_default_engine_transforms_low_entropy_noise() {
    // Four bits of noise per byte: too dense for the fast bar, loose enough
    // for the transformed one.
    let data: Vec<u8> = pseudo_random_bytes(2 * DEFAULT_BLOCK_SIZE, 42)
        .into_iter()
        .map(|b| b >> 4)
        .collect();
    let mut engine = Engine::new(
        EngineConfig::default().with_seed(0x5EED),
        Arc::new(ZlibCodec),
    )
    .unwrap();

    let container = encode_to_vec(&mut engine, &data);
    assert_eq!(
        strategies(&container),
        vec![Some(StrategyTag::TransformedGeneric); 2]
    );
    let mut reader = ContainerReader::open(&container[..]).unwrap();
    assert!(reader.record_infos().unwrap().iter().all(|r| r.params_len > 0));

    let mut restored = Vec::new();
    engine.decode(&container[..], &mut restored).unwrap();
    assert_eq!(restored, data);
    assert_eq!(
        engine.get_metrics().method_usage.get("decode_transformed"),
        Some(&2)
    );
}

// ── configuration and metrics ─────────────────────────────────────────────

#[test]
fn test_config_validation() {
    let codec: Arc<dyn GenericCodec> = Arc::new(ZlibCodec);
    let bad = [
        EngineConfig::default().with_block_size(0),
        EngineConfig::default().with_dimension_levels(0),
        EngineConfig::default().with_dimension_levels(5000),
        EngineConfig::default().with_output_scale(0),
        EngineConfig::default().with_field_strength(0.0),
        EngineConfig::default().with_field_strength(1.5),
        EngineConfig::default().with_worker_count(0),
        EngineConfig::default().with_effort(EffortLevels::new(1, 6, 12)),
    ];
    for config in bad {
        let err = Engine::new(config.clone(), codec.clone()).err();
        assert!(
            matches!(err, Some(Error::Config(_))),
            "{config:?} should be rejected"
        );
    }
    assert!(Engine::new(EngineConfig::default(), codec).is_ok());
}

#[test]
fn test_metrics_snapshot_accumulates() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = zlib_engine(4096);
    let data = compressible_bytes(3 * 4096);
    round_trip_file(&mut engine, dir.path(), &data);
    round_trip_file(&mut engine, dir.path(), &data);

    let snapshot = engine.get_metrics();
    assert_eq!(snapshot.blocks_processed, 6);
    assert!(snapshot.compression_ratio > 0.0 && snapshot.compression_ratio < 50.0);
    assert_eq!(snapshot.method_usage.get("fast"), Some(&6));
    assert_eq!(snapshot.method_usage.get("decode_fast"), Some(&6));
    assert!(snapshot.fallbacks.is_empty());
    assert_eq!(engine.metrics().bytes_restored, 2 * data.len() as u64);
}

#[test]
fn test_decompress_default_path_requires_extension() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = zlib_engine(1024);
    let input = dir.path().join("data.bin");
    fs::write(&input, compressible_bytes(100)).unwrap();
    let packed = engine.compress(&input, None).unwrap();

    let renamed = dir.path().join("data.packed");
    fs::rename(&packed, &renamed).unwrap();
    let err = engine.decompress(&renamed, None).unwrap_err();
    assert!(matches!(err, Error::Config(_)));

    let out = dir.path().join("explicit.bin");
    engine.decompress(&renamed, Some(&out)).unwrap();
    assert_eq!(fs::read(out).unwrap(), compressible_bytes(100));
}
