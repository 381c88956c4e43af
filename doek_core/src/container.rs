//! Stream-level framing: header, block windows, records.

use std::io::{self, Read, Seek, Write};

use rand::RngCore;

use crate::block::{BlockDecoder, BlockEncoder};
use crate::chunker::ParallelChunker;
use crate::codec::{EffortLevels, GenericCodec};
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::reader::ContainerReader;
use crate::transform::ReversibleTransform;
use crate::writer::ContainerWriter;

/// Encodes and decodes whole containers over arbitrary streams.
///
/// Borrows everything it needs; nothing outlives one call except what is
/// returned in [`Metrics`].
pub struct Container<'a> {
    codec: &'a dyn GenericCodec,
    levels: EffortLevels,
    transform: &'a ReversibleTransform,
    chunker: &'a ParallelChunker,
    block_size: usize,
}

impl<'a> Container<'a> {
    pub fn new(
        codec: &'a dyn GenericCodec,
        levels: EffortLevels,
        transform: &'a ReversibleTransform,
        chunker: &'a ParallelChunker,
        block_size: usize,
    ) -> Self {
        Self {
            codec,
            levels,
            transform,
            chunker,
            block_size,
        }
    }

    /// Read `input` in block-sized windows and write a complete container to
    /// `output`. Per-block transform seeds are drawn from `seeds`.
    pub fn encode<R: Read, W: Write + Seek>(
        &self,
        mut input: R,
        output: W,
        seeds: &mut dyn RngCore,
    ) -> Result<(W, Metrics)> {
        let encoder = BlockEncoder::new(self.codec, self.levels, self.transform, self.chunker);
        let mut writer =
            ContainerWriter::new(output, self.codec.id(), encoder, seeds, self.block_size)?;

        let mut buf = vec![0u8; self.block_size];
        loop {
            let n = match input.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            writer.write(&buf[..n])?;
        }
        writer.finish()
    }

    /// Validate the header of `input` against this container's codec.
    /// Nothing is written before this succeeds.
    pub fn open<R: Read>(&self, input: R) -> Result<ContainerReader<R>> {
        let reader = ContainerReader::open(input)?;
        let codec_id = reader.header().codec_id;
        if codec_id != self.codec.id() {
            return Err(Error::Format(format!(
                "codec mismatch: container uses codec {codec_id} but engine has {} (id {})",
                self.codec.name(),
                self.codec.id()
            )));
        }
        Ok(reader)
    }

    /// Decode every record of an opened container into `output`.
    pub fn decode_from<R: Read, W: Write>(
        &self,
        mut reader: ContainerReader<R>,
        mut output: W,
    ) -> Result<Metrics> {
        let mut metrics = Metrics::new();
        let decoder = BlockDecoder::new(self.codec, self.chunker);
        metrics.bytes_restored = reader.decode_into(&decoder, &mut output, &mut metrics)?;
        Ok(metrics)
    }

    /// Validate the header of `input`, then decode it into `output`.
    pub fn decode<R: Read, W: Write>(&self, input: R, output: W) -> Result<Metrics> {
        let reader = self.open(input)?;
        self.decode_from(reader, output)
    }
}
