use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use doek_codecs::{codec_by_id, codec_by_name};
use doek_core::config::available_workers;
use doek_core::format::{
    DEFAULT_BLOCK_SIZE, DEFAULT_DIMENSION_LEVELS, DEFAULT_FIELD_STRENGTH, DEFAULT_OUTPUT_SCALE,
};
use doek_core::{inspect, read_header, EffortLevels, Engine, EngineConfig, GenericCodec};

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "doek",
    about = "Adaptive block compression: compress, decompress, and inspect DOEK containers",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress a file into a DOEK container
    Compress {
        /// Source file
        input: PathBuf,
        /// Destination container (default: <input>.doek)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Codec to use: zlib | zstd | passthrough
        #[arg(short, long, default_value = "zlib")]
        codec: String,
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Restore the original bytes from a DOEK container
    Decompress {
        /// Source container
        input: PathBuf,
        /// Destination file (default: <input> without .doek)
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Print the header and record layout of a container
    Inspect {
        /// Container to inspect
        file: PathBuf,
        /// Print one line per record
        #[arg(long)]
        records: bool,
    },
}

#[derive(Args)]
struct EngineArgs {
    /// Raw bytes per block
    #[arg(short, long, default_value_t = DEFAULT_BLOCK_SIZE)]
    block_size: usize,
    /// Transform row width
    #[arg(long, default_value_t = DEFAULT_DIMENSION_LEVELS)]
    dimension_levels: usize,
    /// Transform output scale (1-255, forced odd)
    #[arg(long, default_value_t = DEFAULT_OUTPUT_SCALE)]
    output_scale: u8,
    /// Spread of the field phases as a fraction of pi, in (0, 1]
    #[arg(long, default_value_t = DEFAULT_FIELD_STRENGTH)]
    field_strength: f64,
    /// Transform worker threads (default: available parallelism)
    #[arg(short, long)]
    workers: Option<usize>,
    /// Codec level for the fast strategy
    #[arg(long)]
    fast_level: Option<i32>,
    /// Codec level for the transformed strategy
    #[arg(long)]
    balanced_level: Option<i32>,
    /// Codec level for the aggressive strategy
    #[arg(long)]
    max_level: Option<i32>,
    /// Fixed seed for per-block transform seeds, for reproducible output
    #[arg(long)]
    seed: Option<u64>,
    /// Print the metrics snapshot after the operation
    #[arg(long)]
    stats: bool,
    /// Print the metrics snapshot as JSON (implies --stats)
    #[arg(long)]
    json: bool,
}

impl EngineArgs {
    fn config(&self, codec: &dyn GenericCodec) -> EngineConfig {
        let defaults = codec.default_levels();
        let mut config = EngineConfig::default()
            .with_block_size(self.block_size)
            .with_dimension_levels(self.dimension_levels)
            .with_output_scale(self.output_scale)
            .with_field_strength(self.field_strength)
            .with_worker_count(self.workers.unwrap_or_else(available_workers))
            .with_effort(EffortLevels::new(
                self.fast_level.unwrap_or(defaults.fast),
                self.balanced_level.unwrap_or(defaults.balanced),
                self.max_level.unwrap_or(defaults.max),
            ));
        if let Some(seed) = self.seed {
            config = config.with_seed(seed);
        }
        config
    }
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn human_bytes(n: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.2} {}", v, UNITS[unit])
    }
}

fn build_engine(args: &EngineArgs, codec: Arc<dyn GenericCodec>) -> anyhow::Result<Engine> {
    let config = args.config(codec.as_ref());
    Engine::new(config, codec).context("configuring engine")
}

fn print_stats(engine: &Engine, args: &EngineArgs) -> anyhow::Result<()> {
    let snapshot = engine.get_metrics();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }
    if !args.stats {
        return Ok(());
    }
    println!("  blocks      : {}", snapshot.blocks_processed);
    println!("  ratio       : {:.2}%", snapshot.compression_ratio);
    println!(
        "  compress    : {:.3}s ({:.2} MB/s)",
        snapshot.compression_time, snapshot.compression_speed
    );
    println!(
        "  decompress  : {:.3}s ({:.2} MB/s)",
        snapshot.decompression_time, snapshot.decompression_speed
    );
    for (method, count) in &snapshot.method_usage {
        let avg = snapshot.average_times.get(method).copied().unwrap_or(0.0);
        println!("  {:<18}: {:>6} blocks, avg {:.3}ms", method, count, avg * 1000.0);
    }
    println!(
        "  transform   : {} ops, {:.3}s cpu",
        snapshot.cpu.cpu_operations, snapshot.cpu.total_cpu_time
    );
    println!(
        "  field       : avg {:.2}, rows high/low {}/{}",
        snapshot.field.avg_field_strength, snapshot.field.rows_high, snapshot.field.rows_low
    );
    for (kind, count) in &snapshot.fallbacks {
        println!("  fallback    : {} x{}", kind, count);
    }
    for event in &snapshot.fallback_events {
        println!(
            "    block {:>6} {} {}: {}",
            event.block_index, event.strategy, event.kind, event.detail
        );
    }
    Ok(())
}

// ── Subcommand implementations ─────────────────────────────────────────────

fn run_compress(
    input: PathBuf,
    output: Option<PathBuf>,
    codec_name: &str,
    args: &EngineArgs,
) -> anyhow::Result<()> {
    let codec = codec_by_name(codec_name)?;
    let mut engine = build_engine(args, codec)?;

    let written = engine
        .compress(&input, output.as_deref())
        .with_context(|| format!("compressing {:?}", input))?;

    let metrics = engine.metrics();
    eprintln!("  codec       : {}", engine.codec().name());
    eprintln!("  block size  : {}", human_bytes(engine.config().block_size as u64));
    eprintln!("  blocks      : {}", metrics.blocks_encoded);
    eprintln!("  raw size    : {}", human_bytes(metrics.bytes_in));
    eprintln!("  compressed  : {}", human_bytes(metrics.bytes_out));
    eprintln!("  output      : {:?}", written);
    print_stats(&engine, args)
}

fn run_decompress(input: PathBuf, output: Option<PathBuf>, args: &EngineArgs) -> anyhow::Result<()> {
    // The codec comes from the container, not from the command line.
    let header = read_header(&input).with_context(|| format!("reading header of {:?}", input))?;
    let codec = codec_by_id(header.codec_id)?;
    let mut engine = build_engine(args, codec)?;

    let written = engine
        .decompress(&input, output.as_deref())
        .with_context(|| format!("decompressing {:?}", input))?;

    let metrics = engine.metrics();
    eprintln!("  blocks      : {}", metrics.blocks_decoded);
    eprintln!("  raw size    : {}", human_bytes(metrics.bytes_restored));
    eprintln!("  output      : {:?}", written);
    print_stats(&engine, args)
}

fn run_inspect(file: &Path, show_records: bool) -> anyhow::Result<()> {
    let inspection = inspect(file).with_context(|| format!("inspecting {:?}", file))?;
    let header = inspection.header;
    let codec_name = codec_by_id(header.codec_id)
        .map(|c| c.name())
        .unwrap_or("unknown");
    let file_size = std::fs::metadata(file)?.len();

    println!("=== DOEK container: {:?} ===", file);
    println!();
    println!("  format version : {}", header.version);
    println!("  codec          : {} (id={})", codec_name, header.codec_id);
    println!("  records        : {}", inspection.records.len());
    println!("  raw size       : {}", human_bytes(header.original_size));
    println!("  file on disk   : {}", human_bytes(file_size));
    if header.original_size > 0 {
        println!(
            "  ratio          : {:.2}%",
            file_size as f64 / header.original_size as f64 * 100.0
        );
    }
    if inspection.container_size < file_size {
        println!(
            "  trailing bytes : {}",
            file_size - inspection.container_size
        );
    }

    if show_records {
        println!();
        println!(
            "  {:>8}  {:>12}  {:>12}  {:>10}  {:>10}",
            "record", "strategy", "payload", "params", "rows high"
        );
        println!("  {}", "-".repeat(60));
        for r in &inspection.records {
            println!(
                "  {:>8}  {:>12}  {:>12}  {:>10}  {:>10}",
                r.index,
                r.strategy.map_or("empty", |s| s.label()),
                human_bytes(u64::from(r.payload_len)),
                r.params_len,
                r.rows_high.map_or_else(|| "-".to_string(), |n| n.to_string()),
            );
        }
    }
    Ok(())
}

// ── Entry point ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Compress {
            input,
            output,
            codec,
            engine,
        } => run_compress(input, output, &codec, &engine),
        Commands::Decompress {
            input,
            output,
            engine,
        } => run_decompress(input, output, &engine),
        Commands::Inspect { file, records } => run_inspect(&file, records),
    };
    if let Err(err) = &result {
        error!(error = %format!("{err:#}"), "command failed");
    }
    result
}
