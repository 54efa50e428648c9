pub mod chunk;
pub mod codec;
mod error;
pub mod metadata;
pub mod zstandard;

pub use zarrs;

pub use error::{Error, Result};
pub use zstandard::{ZstandardCodec, ZstandardCompression};
