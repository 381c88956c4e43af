//! Timing, strategy-usage and transform-effect accounting.
//!
//! Nothing here influences what gets written. Every accumulator merges with an
//! associative, commutative `merge`, so per-chunk and per-call values can be
//! combined in any order: transform workers return their own
//! [`TransformStats`], each container call returns its own [`Metrics`], and the
//! engine folds those into its lifetime total.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::format::StrategyTag;

/// Most fallback events kept individually; counts are never capped.
pub const MAX_FALLBACK_EVENTS: usize = 64;

/// Per-chunk transform counters, merged after the gather.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformStats {
    pub rows_high: u64,
    pub rows_low: u64,
    pub bytes: u64,
    /// Sum of `|transformed - input|` over every byte.
    pub abs_diff: u64,
}

impl TransformStats {
    pub fn merge(&mut self, other: &TransformStats) {
        self.rows_high += other.rows_high;
        self.rows_low += other.rows_low;
        self.bytes += other.bytes;
        self.abs_diff += other.abs_diff;
    }

    /// Mean absolute change per byte.
    pub fn field_strength(&self) -> f64 {
        if self.bytes == 0 {
            0.0
        } else {
            self.abs_diff as f64 / self.bytes as f64
        }
    }
}

/// Count, sum and extremes of a series of samples.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Summary {
    pub count: u64,
    pub total: f64,
    pub min: f64,
    pub max: f64,
}

impl Summary {
    pub fn record(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.total += value;
    }

    pub fn merge(&mut self, other: &Summary) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = *other;
            return;
        }
        self.count += other.count;
        self.total += other.total;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total / self.count as f64
        }
    }
}

/// Which side of the pipeline a block timing belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    Encode(StrategyTag),
    Decode(StrategyTag),
}

impl Operation {
    pub fn label(&self) -> String {
        match self {
            Operation::Encode(tag) => tag.label().to_string(),
            Operation::Decode(tag) => format!("decode_{}", tag.label()),
        }
    }
}

/// Why a strategy was abandoned during encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackKind {
    /// The generic codec returned an error.
    CodecFailed,
    /// Field generation or the forward transform failed.
    TransformFailed,
    /// The trial decode did not reproduce the block.
    VerifyFailed,
}

impl FallbackKind {
    pub fn label(&self) -> &'static str {
        match self {
            FallbackKind::CodecFailed => "codec_failed",
            FallbackKind::TransformFailed => "transform_failed",
            FallbackKind::VerifyFailed => "verify_failed",
        }
    }
}

/// A swallowed encode error, recorded instead of dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackEvent {
    pub block_index: u64,
    pub strategy: StrategyTag,
    pub kind: FallbackKind,
    pub detail: String,
}

/// Mutable accumulator for one call or, inside the engine, for its lifetime.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    pub compression_time: Duration,
    pub decompression_time: Duration,
    pub blocks_encoded: u64,
    pub blocks_decoded: u64,
    /// Input bytes consumed by compression.
    pub bytes_in: u64,
    /// Container bytes produced by compression, header and framing included.
    pub bytes_out: u64,
    /// Bytes reconstructed by decompression.
    pub bytes_restored: u64,
    /// Per-block wall time in seconds, keyed by direction and strategy.
    pub block_times: BTreeMap<Operation, Summary>,
    /// Wall time of the forward and inverse transform, in seconds.
    pub transform_times: Summary,
    /// Per-block mean absolute change introduced by the transform.
    pub field_strength: Summary,
    pub transform_stats: TransformStats,
    pub fallbacks: BTreeMap<(StrategyTag, FallbackKind), u64>,
    /// The earliest events by block index, at most [`MAX_FALLBACK_EVENTS`].
    pub fallback_events: Vec<FallbackEvent>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_block(&mut self, op: Operation, elapsed: Duration) {
        match op {
            Operation::Encode(_) => self.blocks_encoded += 1,
            Operation::Decode(_) => self.blocks_decoded += 1,
        }
        self.block_times
            .entry(op)
            .or_default()
            .record(elapsed.as_secs_f64());
    }

    pub fn record_transform(&mut self, elapsed: Duration, stats: Option<&TransformStats>) {
        self.transform_times.record(elapsed.as_secs_f64());
        if let Some(stats) = stats {
            self.field_strength.record(stats.field_strength());
            self.transform_stats.merge(stats);
        }
    }

    pub fn record_fallback(&mut self, event: &FallbackEvent) {
        *self
            .fallbacks
            .entry((event.strategy, event.kind))
            .or_default() += 1;
        self.keep_events(std::slice::from_ref(event));
    }

    fn keep_events(&mut self, events: &[FallbackEvent]) {
        self.fallback_events.extend_from_slice(events);
        self.fallback_events.sort_by(|a, b| {
            a.block_index
                .cmp(&b.block_index)
                .then(a.strategy.cmp(&b.strategy))
                .then(a.kind.cmp(&b.kind))
                .then_with(|| a.detail.cmp(&b.detail))
        });
        self.fallback_events.truncate(MAX_FALLBACK_EVENTS);
    }

    pub fn fallback_count(&self, kind: FallbackKind) -> u64 {
        self.fallbacks
            .iter()
            .filter(|((_, k), _)| *k == kind)
            .map(|(_, n)| *n)
            .sum()
    }

    /// Number of blocks encoded with `tag`.
    pub fn strategy_usage(&self, tag: StrategyTag) -> u64 {
        self.block_times
            .get(&Operation::Encode(tag))
            .map_or(0, |s| s.count)
    }

    pub fn merge(&mut self, other: &Metrics) {
        self.compression_time += other.compression_time;
        self.decompression_time += other.decompression_time;
        self.blocks_encoded += other.blocks_encoded;
        self.blocks_decoded += other.blocks_decoded;
        self.bytes_in += other.bytes_in;
        self.bytes_out += other.bytes_out;
        self.bytes_restored += other.bytes_restored;
        for (op, summary) in &other.block_times {
            self.block_times.entry(*op).or_default().merge(summary);
        }
        self.transform_times.merge(&other.transform_times);
        self.field_strength.merge(&other.field_strength);
        self.transform_stats.merge(&other.transform_stats);
        for (key, n) in &other.fallbacks {
            *self.fallbacks.entry(*key).or_default() += n;
        }
        self.keep_events(&other.fallback_events);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        const MB: f64 = 1024.0 * 1024.0;
        let per_sec = |bytes: u64, t: Duration| {
            let secs = t.as_secs_f64();
            if secs > 0.0 {
                bytes as f64 / MB / secs
            } else {
                0.0
            }
        };

        let mut fallbacks = BTreeMap::new();
        for ((_, kind), n) in &self.fallbacks {
            *fallbacks.entry(kind.label().to_string()).or_insert(0) += n;
        }

        MetricsSnapshot {
            compression_time: self.compression_time.as_secs_f64(),
            decompression_time: self.decompression_time.as_secs_f64(),
            total_time: (self.compression_time + self.decompression_time).as_secs_f64(),
            compression_speed: per_sec(self.bytes_in, self.compression_time),
            decompression_speed: per_sec(self.bytes_restored, self.decompression_time),
            blocks_processed: self.blocks_encoded,
            compression_ratio: if self.bytes_in > 0 {
                self.bytes_out as f64 / self.bytes_in as f64 * 100.0
            } else {
                0.0
            },
            average_times: self
                .block_times
                .iter()
                .map(|(op, s)| (op.label(), s.mean()))
                .collect(),
            method_usage: self
                .block_times
                .iter()
                .map(|(op, s)| (op.label(), s.count))
                .collect(),
            cpu: CpuMetrics {
                total_cpu_time: self.transform_times.total,
                avg_cpu_time: self.transform_times.mean(),
                cpu_operations: self.transform_times.count,
            },
            field: FieldMetrics {
                avg_field_strength: self.field_strength.mean(),
                max_field_strength: self.field_strength.max,
                min_field_strength: self.field_strength.min,
                rows_high: self.transform_stats.rows_high,
                rows_low: self.transform_stats.rows_low,
            },
            fallbacks,
            fallback_events: self
                .fallback_events
                .iter()
                .map(|e| FallbackRecord {
                    block_index: e.block_index,
                    strategy: e.strategy.label().to_string(),
                    kind: e.kind.label().to_string(),
                    detail: e.detail.clone(),
                })
                .collect(),
        }
    }
}

/// Transform timing totals, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuMetrics {
    pub total_cpu_time: f64,
    pub avg_cpu_time: f64,
    pub cpu_operations: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMetrics {
    pub avg_field_strength: f64,
    pub max_field_strength: f64,
    pub min_field_strength: f64,
    pub rows_high: u64,
    pub rows_low: u64,
}

/// Immutable, serializable view of [`Metrics`]. Times are in seconds, speeds
/// in MB/s and the ratio in percent of the input size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub compression_time: f64,
    pub decompression_time: f64,
    pub total_time: f64,
    pub compression_speed: f64,
    pub decompression_speed: f64,
    pub blocks_processed: u64,
    pub compression_ratio: f64,
    pub average_times: BTreeMap<String, f64>,
    pub method_usage: BTreeMap<String, u64>,
    pub cpu: CpuMetrics,
    pub field: FieldMetrics,
    pub fallbacks: BTreeMap<String, u64>,
    pub fallback_events: Vec<FallbackRecord>,
}

/// One fallback event as reported in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackRecord {
    pub block_index: u64,
    pub strategy: String,
    pub kind: String,
    pub detail: String,
}
