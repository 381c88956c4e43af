mod passthrough;
mod zlib_codec;
mod zstd_codec;

pub use passthrough::PassThroughCodec;
pub use zlib_codec::ZlibCodec;
pub use zstd_codec::ZstdCodec;

use std::sync::Arc;

use doek_core::format::{CODEC_PASSTHROUGH, CODEC_ZLIB, CODEC_ZSTD};
use doek_core::{Error, GenericCodec, Result};

/// Resolve a codec from the id stored in a container's magic.
///
/// Used when opening an existing container so the engine is built with the
/// codec that wrote it.
pub fn codec_by_id(id: u8) -> Result<Arc<dyn GenericCodec>> {
    match id {
        CODEC_ZLIB => Ok(Arc::new(ZlibCodec)),
        CODEC_ZSTD => Ok(Arc::new(ZstdCodec)),
        CODEC_PASSTHROUGH => Ok(Arc::new(PassThroughCodec)),
        _ => Err(Error::Format(format!(
            "unknown codec id {id}; supported: 0 (zlib), 1 (zstd), 2 (passthrough)"
        ))),
    }
}

/// Resolve a codec from its CLI name.
pub fn codec_by_name(name: &str) -> Result<Arc<dyn GenericCodec>> {
    match name {
        "zlib" => codec_by_id(CODEC_ZLIB),
        "zstd" => codec_by_id(CODEC_ZSTD),
        "passthrough" => codec_by_id(CODEC_PASSTHROUGH),
        _ => Err(Error::Config(format!(
            "unknown codec {name:?}; expected zlib, zstd or passthrough"
        ))),
    }
}
