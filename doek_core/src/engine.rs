use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use crate::chunker::ParallelChunker;
use crate::codec::{EffortLevels, GenericCodec};
use crate::config::EngineConfig;
use crate::container::Container;
use crate::error::{Error, Result};
use crate::format::{ContainerHeader, EXTENSION};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::reader::{ContainerReader, RecordInfo};
use crate::transform::ReversibleTransform;

/// Compresses and decompresses DOEK containers.
///
/// An engine owns its worker pool, its seed generator and its lifetime
/// metrics. The pool is sized once here and shared by every block of every
/// call; metrics only reset when a new engine is constructed.
pub struct Engine {
    config: EngineConfig,
    codec: Arc<dyn GenericCodec>,
    levels: EffortLevels,
    transform: ReversibleTransform,
    chunker: ParallelChunker,
    seeds: StdRng,
    metrics: Metrics,
}

impl Engine {
    pub fn new(config: EngineConfig, codec: Arc<dyn GenericCodec>) -> Result<Self> {
        config.validate(codec.as_ref())?;
        let levels = config.effort_for(codec.as_ref());
        let transform = ReversibleTransform::new(
            config.dimension_levels,
            config.output_scale,
            config.field_strength,
        )
        .map_err(|e| Error::Config(e.to_string()))?;
        let chunker = ParallelChunker::new(config.worker_count)?;
        let seeds = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        info!(
            codec = codec.name(),
            block_size = config.block_size,
            workers = config.worker_count,
            "engine ready"
        );
        Ok(Self {
            config,
            codec,
            levels,
            transform,
            chunker,
            seeds,
            metrics: Metrics::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn codec(&self) -> &Arc<dyn GenericCodec> {
        &self.codec
    }

    /// Encode everything `input` yields into a container written to `output`.
    ///
    /// Returns the metrics of this call; they are also merged into the
    /// engine's lifetime metrics.
    pub fn encode<R: Read, W: Write + Seek>(&mut self, input: R, output: W) -> Result<Metrics> {
        let started = Instant::now();
        let container = Container::new(
            self.codec.as_ref(),
            self.levels,
            &self.transform,
            &self.chunker,
            self.config.block_size,
        );
        let (_, mut metrics) = container.encode(input, output, &mut self.seeds)?;
        metrics.compression_time = started.elapsed();
        self.metrics.merge(&metrics);
        Ok(metrics)
    }

    /// Decode the container in `input` into `output`.
    ///
    /// The header is validated before anything is written. A failure after
    /// that leaves whatever was already written in `output`.
    pub fn decode<R: Read, W: Write>(&mut self, input: R, output: W) -> Result<Metrics> {
        let started = Instant::now();
        let mut metrics = self.container().decode(input, output)?;
        metrics.decompression_time = started.elapsed();
        self.metrics.merge(&metrics);
        Ok(metrics)
    }

    /// Compress the file at `input`. Without `output` the container is written
    /// next to it with a `.doek` extension appended. Returns the output path.
    pub fn compress(&mut self, input: &Path, output: Option<&Path>) -> Result<PathBuf> {
        let output = match output {
            Some(path) => path.to_path_buf(),
            None => {
                let mut name = input.as_os_str().to_owned();
                name.push(".");
                name.push(EXTENSION);
                PathBuf::from(name)
            }
        };

        let src = BufReader::new(File::open(input)?);
        let dst = BufWriter::new(File::create(&output)?);
        let metrics = self.encode(src, dst)?;

        info!(
            input = %input.display(),
            output = %output.display(),
            raw = metrics.bytes_in,
            stored = metrics.bytes_out,
            blocks = metrics.blocks_encoded,
            elapsed_ms = metrics.compression_time.as_millis() as u64,
            "compressed"
        );
        Ok(output)
    }

    /// Decompress the container at `input`. Without `output` the `.doek`
    /// extension is stripped; an input without it is then rejected.
    pub fn decompress(&mut self, input: &Path, output: Option<&Path>) -> Result<PathBuf> {
        let output = match output {
            Some(path) => path.to_path_buf(),
            None => {
                if input.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                    return Err(Error::Config(format!(
                        "{} does not end in .{EXTENSION}; give an explicit output path",
                        input.display()
                    )));
                }
                input.with_extension("")
            }
        };

        let started = Instant::now();
        let container = self.container();
        let reader = container.open(BufReader::new(File::open(input)?))?;
        let dst = BufWriter::new(File::create(&output)?);
        let mut metrics = container.decode_from(reader, dst)?;
        metrics.decompression_time = started.elapsed();
        self.metrics.merge(&metrics);

        info!(
            input = %input.display(),
            output = %output.display(),
            restored = metrics.bytes_restored,
            blocks = metrics.blocks_decoded,
            elapsed_ms = metrics.decompression_time.as_millis() as u64,
            "decompressed"
        );
        Ok(output)
    }

    /// Lifetime metrics of this engine.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn get_metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    fn container(&self) -> Container<'_> {
        Container::new(
            self.codec.as_ref(),
            self.levels,
            &self.transform,
            &self.chunker,
            self.config.block_size,
        )
    }
}

/// Header and record layout of a container, read without decoding.
#[derive(Debug, Clone)]
pub struct Inspection {
    pub header: ContainerHeader,
    pub records: Vec<RecordInfo>,
    /// Container bytes walked, header and framing included.
    pub container_size: u64,
}

pub fn inspect(path: &Path) -> Result<Inspection> {
    let mut reader = ContainerReader::open(BufReader::new(File::open(path)?))?;
    let records = reader.record_infos()?;
    Ok(Inspection {
        header: *reader.header(),
        records,
        container_size: reader.bytes_consumed(),
    })
}

/// Read only the header of the container at `path`.
pub fn read_header(path: &Path) -> Result<ContainerHeader> {
    let reader = ContainerReader::open(BufReader::new(File::open(path)?))?;
    Ok(*reader.header())
}
