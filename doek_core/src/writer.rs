use std::io::{Seek, SeekFrom, Write};

use rand::RngCore;

use crate::block::BlockEncoder;
use crate::error::Result;
use crate::format::{ContainerHeader, RecordHeader, HEADER_SIZE, RECORD_HEADER_SIZE};
use crate::metrics::Metrics;

/// Streaming writer for DOEK containers.
///
/// # Write contract
/// Call [`write`](Self::write) any number of times with arbitrary-sized byte
/// slices. The writer accumulates data and encodes a block whenever
/// `block_size` bytes have been gathered. Call [`finish`](Self::finish) to
/// encode the trailing partial block and write back the final header.
///
/// # Format layout written
/// ```text
/// [HEADER: 13 bytes placeholder]
/// [RECORD 0] [RECORD 1] ... [RECORD N-1]   ← blocks in input order
/// ← seek back to 0, overwrite header with the real original_size
/// ```
///
/// Blocks are encoded strictly one after another; only the transform inside a
/// single block fans out over the worker pool.
pub struct ContainerWriter<'e, W: Write + Seek> {
    out: W,
    codec_id: u8,
    encoder: BlockEncoder<'e>,
    seeds: &'e mut dyn RngCore,
    block_size: usize,
    /// Pending raw bytes not yet encoded into a block.
    pending: Vec<u8>,
    blocks: u64,
    original_size: u64,
    metrics: Metrics,
}

impl<'e, W: Write + Seek> ContainerWriter<'e, W> {
    /// Start a container at the current position of `out`.
    pub fn new(
        mut out: W,
        codec_id: u8,
        encoder: BlockEncoder<'e>,
        seeds: &'e mut dyn RngCore,
        block_size: usize,
    ) -> Result<Self> {
        // Zeroed placeholder: an unfinished container fails the magic check.
        out.write_all(&[0u8; HEADER_SIZE])?;
        let mut metrics = Metrics::new();
        metrics.bytes_out = HEADER_SIZE as u64;
        Ok(Self {
            out,
            codec_id,
            encoder,
            seeds,
            block_size,
            pending: Vec::with_capacity(block_size),
            blocks: 0,
            original_size: 0,
            metrics,
        })
    }

    /// Buffer `data` and encode complete blocks as they fill up.
    pub fn write(&mut self, mut data: &[u8]) -> Result<()> {
        self.original_size += data.len() as u64;
        while !data.is_empty() {
            // Full blocks straight from the caller's slice skip the copy.
            if self.pending.is_empty() && data.len() >= self.block_size {
                let (block, rest) = data.split_at(self.block_size);
                self.flush_block(block)?;
                data = rest;
                continue;
            }
            let take = (self.block_size - self.pending.len()).min(data.len());
            self.pending.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.pending.len() == self.block_size {
                let block = std::mem::take(&mut self.pending);
                self.flush_block(&block)?;
                self.pending = block;
                self.pending.clear();
            }
        }
        Ok(())
    }

    /// Encode `block` and append it as one framed record.
    fn flush_block(&mut self, block: &[u8]) -> Result<()> {
        let index = self.blocks;
        let seed = self.seeds.next_u64();
        let encoded = self.encoder.encode(index, block, seed, &mut self.metrics);
        let params = encoded.params.as_ref().map(|p| p.to_bytes()).unwrap_or_default();

        let record = RecordHeader {
            payload_len: encoded.payload.len() as u32,
            params_len: params.len() as u32,
        };
        self.out.write_all(&record.to_bytes())?;
        self.out.write_all(&encoded.payload)?;
        self.out.write_all(&params)?;

        self.metrics.bytes_out += (RECORD_HEADER_SIZE + encoded.payload.len() + params.len()) as u64;
        self.blocks += 1;
        Ok(())
    }

    /// Encode any buffered tail, seal the header, and flush.
    ///
    /// Returns the output stream and the metrics for this container.
    pub fn finish(mut self) -> Result<(W, Metrics)> {
        if !self.pending.is_empty() {
            let remaining = std::mem::take(&mut self.pending);
            self.flush_block(&remaining)?;
        }

        let header = ContainerHeader::new(self.codec_id, self.original_size);
        let end = self.out.stream_position()?;
        self.out.seek(SeekFrom::Start(end - self.metrics.bytes_out))?;
        self.out.write_all(&header.to_bytes())?;
        self.out.seek(SeekFrom::Start(end))?;
        self.out.flush()?;

        self.metrics.bytes_in = self.original_size;
        Ok((self.out, self.metrics))
    }
}
