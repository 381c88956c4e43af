use std::io::{self, Read, Write};

use tracing::debug;

use crate::block::BlockDecoder;
use crate::error::{Error, Result};
use crate::format::{
    ContainerHeader, RecordHeader, RowClass, StrategyTag, TransformParams, HEADER_SIZE,
    RECORD_HEADER_SIZE,
};
use crate::metrics::Metrics;

/// One framed record as stored on disk.
#[derive(Debug, Clone)]
pub struct Record {
    pub index: u64,
    pub header: RecordHeader,
    pub payload: Vec<u8>,
    pub params: Option<TransformParams>,
}

impl Record {
    /// Strategy of a non-empty record.
    pub fn strategy(&self) -> Option<StrategyTag> {
        self.payload
            .first()
            .and_then(|&b| StrategyTag::from_byte(b).ok())
    }
}

/// Summary of a record, for inspection without decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordInfo {
    pub index: u64,
    pub strategy: Option<StrategyTag>,
    pub payload_len: u32,
    pub params_len: u32,
    /// High-dispersion rows, for transformed records.
    pub rows_high: Option<usize>,
}

/// Sequential reader for DOEK containers.
///
/// # Open sequence
/// 1. Read the 13-byte header (magic, version, original size).
/// 2. Read records front to back until the decoded output reaches the
///    declared original size.
///
/// Nothing is written anywhere before the header has been validated.
pub struct ContainerReader<R: Read> {
    input: R,
    header: ContainerHeader,
    next_index: u64,
    /// Container bytes consumed so far, header included.
    consumed: u64,
}

impl<R: Read> ContainerReader<R> {
    pub fn open(mut input: R) -> Result<Self> {
        let mut buf = [0u8; HEADER_SIZE];
        let n = read_full(&mut input, &mut buf)?;
        if n < HEADER_SIZE {
            return Err(Error::Format(format!(
                "container too short for header: {n} of {HEADER_SIZE} bytes"
            )));
        }
        let header = ContainerHeader::from_bytes(&buf)?;
        Ok(Self {
            input,
            header,
            next_index: 0,
            consumed: HEADER_SIZE as u64,
        })
    }

    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    pub fn bytes_consumed(&self) -> u64 {
        self.consumed
    }

    /// Read the next framed record. `Ok(None)` at a clean end of input; an
    /// input that stops inside a record is an error.
    pub fn next_record(&mut self) -> Result<Option<Record>> {
        let index = self.next_index;
        let mut prefix = [0u8; RECORD_HEADER_SIZE];
        match read_full(&mut self.input, &mut prefix)? {
            0 => return Ok(None),
            RECORD_HEADER_SIZE => {}
            n => {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("record prefix truncated after {n} bytes"),
                ))
                .in_block(index, "framing"))
            }
        }
        let header = RecordHeader::from_bytes(&prefix);

        let payload = self.read_exact_len(header.payload_len, index, "payload")?;
        let params = if header.params_len > 0 {
            let raw = self.read_exact_len(header.params_len, index, "params")?;
            Some(TransformParams::from_bytes(&raw).map_err(|e| e.in_block(index, "framing"))?)
        } else {
            None
        };

        self.consumed += (RECORD_HEADER_SIZE as u64)
            + u64::from(header.payload_len)
            + u64::from(header.params_len);
        self.next_index += 1;
        Ok(Some(Record {
            index,
            header,
            payload,
            params,
        }))
    }

    /// Decode records into `out` until `original_size` bytes are written.
    ///
    /// Output already written is not rolled back on failure.
    pub fn decode_into<W: Write>(
        &mut self,
        decoder: &BlockDecoder<'_>,
        out: &mut W,
        metrics: &mut Metrics,
    ) -> Result<u64> {
        let expected = self.header.original_size;
        let mut decoded = 0u64;

        while decoded < expected {
            let record = match self.next_record() {
                Ok(Some(record)) => record,
                Ok(None) => {
                    return Err(Error::SizeMismatch {
                        expected,
                        actual: decoded,
                    })
                }
                Err(e) if is_truncation(&e) => {
                    return Err(Error::SizeMismatch {
                        expected,
                        actual: decoded,
                    }
                    .in_block(self.next_index, "framing"))
                }
                Err(e) => return Err(e),
            };

            let block = decoder.decode(
                record.index,
                &record.payload,
                record.params.as_ref(),
                metrics,
            )?;
            if block.is_empty() {
                return Err(Error::Format("record decodes to zero bytes".into())
                    .in_block(record.index, "framing"));
            }
            if decoded + block.len() as u64 > expected {
                return Err(Error::Format(format!(
                    "record overruns declared size: {} + {} > {expected}",
                    decoded,
                    block.len()
                ))
                .in_block(record.index, "framing"));
            }

            out.write_all(&block)?;
            decoded += block.len() as u64;
            debug!(
                block = record.index,
                strategy = record.strategy().map_or("empty", StrategyTag::label),
                restored = block.len(),
                "block decoded"
            );
        }

        out.flush()?;
        Ok(decoded)
    }

    /// Walk every remaining record without decoding payloads.
    pub fn record_infos(&mut self) -> Result<Vec<RecordInfo>> {
        let mut infos = Vec::new();
        while let Some(record) = self.next_record()? {
            infos.push(RecordInfo {
                index: record.index,
                strategy: record.strategy(),
                payload_len: record.header.payload_len,
                params_len: record.header.params_len,
                rows_high: record
                    .params
                    .as_ref()
                    .map(|p| p.mask.iter().filter(|c| **c == RowClass::High).count()),
            });
        }
        Ok(infos)
    }

    fn read_exact_len(&mut self, len: u32, index: u64, what: &'static str) -> Result<Vec<u8>> {
        // Grow with the data actually present so a corrupt length cannot force
        // a huge allocation.
        let mut buf = Vec::new();
        (&mut self.input).take(u64::from(len)).read_to_end(&mut buf)?;
        if buf.len() != len as usize {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("record {what} truncated: {} of {len} bytes", buf.len()),
            ))
            .in_block(index, "framing"));
        }
        Ok(buf)
    }
}

/// Fill `buf` as far as the input allows; returns the number of bytes read.
fn read_full<R: Read>(input: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn is_truncation(err: &Error) -> bool {
    matches!(err.root(), Error::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
}
