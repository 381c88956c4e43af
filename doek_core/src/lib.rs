pub mod block;
pub mod chunker;
pub mod codec;
pub mod config;
pub mod container;
pub mod engine;
pub mod error;
pub mod format;
pub mod metrics;
pub mod reader;
pub mod transform;
pub mod writer;

pub use block::{BlockDecoder, BlockEncoder, EncodedBlock};
pub use chunker::{Chunk, ParallelChunker};
pub use codec::{EffortLevels, GenericCodec};
pub use config::EngineConfig;
pub use container::Container;
pub use engine::{inspect, read_header, Engine, Inspection};
pub use error::{Error, Result};
pub use format::{
    ContainerHeader, RecordHeader, RowClass, StrategyTag, TransformParams, FORMAT_VERSION,
    HEADER_SIZE, MAGIC_PREFIX,
};
pub use metrics::{
    FallbackEvent, FallbackKind, FallbackRecord, Metrics, MetricsSnapshot, TransformStats,
};
pub use reader::{ContainerReader, Record, RecordInfo};
pub use transform::{Field, ReversibleTransform};
pub use writer::ContainerWriter;
