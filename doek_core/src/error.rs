//! Error type shared by every stage of the DOEK pipeline.
//!
//! Encode-time errors raised inside non-terminal strategies never reach the
//! caller: the encoder records them as fallback events and moves on. Decode-time
//! errors always propagate, wrapped in [`Error::Block`] so the caller can see
//! which record and which stage failed.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Bad magic, unsupported version, or a malformed record.
    #[error("format error: {0}")]
    Format(String),

    /// The input ended before the declared original size was reconstructed.
    #[error("size mismatch: header declares {expected} bytes but only {actual} could be decoded")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("codec {codec} failed: {msg}")]
    Codec { codec: &'static str, msg: String },

    #[error("transform error: {0}")]
    Transform(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("block {index} failed during {stage}: {source}")]
    Block {
        index: u64,
        stage: &'static str,
        #[source]
        source: Box<Error>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn codec(codec: &'static str, err: impl std::fmt::Display) -> Self {
        Error::Codec {
            codec,
            msg: err.to_string(),
        }
    }

    /// Wrap `self` with the block index and pipeline stage it came from.
    pub fn in_block(self, index: u64, stage: &'static str) -> Self {
        Error::Block {
            index,
            stage,
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping any [`Error::Block`] wrappers.
    pub fn root(&self) -> &Error {
        match self {
            Error::Block { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_format(&self) -> bool {
        matches!(self.root(), Error::Format(_))
    }

    pub fn is_size_mismatch(&self) -> bool {
        matches!(self.root(), Error::SizeMismatch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_unwraps_nested_block_context() {
        let err = Error::Format("bad tag".into())
            .in_block(3, "dispatch")
            .in_block(3, "decode");
        assert!(err.is_format());
        assert!(!err.is_size_mismatch());
        let msg = err.to_string();
        assert!(msg.contains("block 3"), "got: {msg}");
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
