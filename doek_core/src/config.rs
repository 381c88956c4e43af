use crate::codec::{EffortLevels, GenericCodec};
use crate::error::{Error, Result};
use crate::format::{
    DEFAULT_BLOCK_SIZE, DEFAULT_DIMENSION_LEVELS, DEFAULT_FIELD_STRENGTH, DEFAULT_OUTPUT_SCALE,
};
use crate::transform::MAX_ROW_WIDTH;

/// Largest accepted block size. Record lengths are `u32` and a stored Raw
/// block is one tag byte longer than its input.
pub const MAX_BLOCK_SIZE: usize = 1 << 30;

/// Number of worker threads used when none is configured.
pub fn available_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Construction-time settings for an [`Engine`](crate::Engine).
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Raw bytes per block; the final block may be shorter.
    pub block_size: usize,
    /// Transform row width.
    pub dimension_levels: usize,
    /// Transform output scale; forced odd before use.
    pub output_scale: u8,
    /// Spread of the field phases as a fraction of pi, in `(0, 1]`.
    pub field_strength: f64,
    /// Size of the long-lived transform worker pool.
    pub worker_count: usize,
    /// Codec levels per strategy; `None` uses the codec's defaults.
    pub effort: Option<EffortLevels>,
    /// Seed for the per-block seed generator; `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            dimension_levels: DEFAULT_DIMENSION_LEVELS,
            output_scale: DEFAULT_OUTPUT_SCALE,
            field_strength: DEFAULT_FIELD_STRENGTH,
            worker_count: available_workers(),
            effort: None,
            seed: None,
        }
    }
}

impl EngineConfig {
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_dimension_levels(mut self, dimension_levels: usize) -> Self {
        self.dimension_levels = dimension_levels;
        self
    }

    pub fn with_output_scale(mut self, output_scale: u8) -> Self {
        self.output_scale = output_scale;
        self
    }

    pub fn with_field_strength(mut self, field_strength: f64) -> Self {
        self.field_strength = field_strength;
        self
    }

    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_effort(mut self, effort: EffortLevels) -> Self {
        self.effort = Some(effort);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// The levels this configuration uses with `codec`.
    pub fn effort_for(&self, codec: &dyn GenericCodec) -> EffortLevels {
        self.effort.unwrap_or_else(|| codec.default_levels())
    }

    /// Check every setting, including effort levels against `codec`.
    pub fn validate(&self, codec: &dyn GenericCodec) -> Result<()> {
        if self.block_size == 0 || self.block_size > MAX_BLOCK_SIZE {
            return Err(Error::Config(format!(
                "block size {} outside 1..={MAX_BLOCK_SIZE}",
                self.block_size
            )));
        }
        if self.dimension_levels == 0 || self.dimension_levels > MAX_ROW_WIDTH {
            return Err(Error::Config(format!(
                "dimension levels {} outside 1..={MAX_ROW_WIDTH}",
                self.dimension_levels
            )));
        }
        if self.output_scale == 0 {
            return Err(Error::Config("output scale must be in 1..=255".into()));
        }
        if !(self.field_strength > 0.0 && self.field_strength <= 1.0) {
            return Err(Error::Config(format!(
                "field strength {} outside (0, 1]",
                self.field_strength
            )));
        }
        if self.worker_count == 0 {
            return Err(Error::Config("worker count must be at least 1".into()));
        }
        let range = codec.level_range();
        for (name, level) in self.effort_for(codec).iter() {
            if !range.contains(&level) {
                return Err(Error::Config(format!(
                    "{name} level {level} outside {}..={} for codec {}",
                    range.start(),
                    range.end(),
                    codec.name()
                )));
            }
        }
        Ok(())
    }
}
