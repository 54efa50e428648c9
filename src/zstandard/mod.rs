//! Zstandard compression for N5 chunks.
//!
//! [ZstandardCompression] is the configuration as stored in dataset metadata
//! under `"type": "zstd"`; [ZstandardCodec] applies it to bytes through an
//! injected [ZstdEngine] and [BufferPool].
//!
//! Encoded chunks are plain zstd frames which always declare their content size,
//! so any zstd decoder can size its output buffer up front.

mod config;
pub mod engine;
pub mod pool;
mod stream;

use std::io::{Read, Write};
use std::sync::Arc;

pub use config::{ZSTD_CLEVEL_DEFAULT, ZstandardCompression, ZstandardCompressionBuilder};
pub use engine::{Libzstd, ZstdEngine, ZstdStrategy};
pub use pool::{BufferPool, NoPool, PooledBuffer, RecyclingBufferPool};
pub use stream::{ZstdReader, ZstdWriter};

/// The name of this compression in N5 metadata.
pub const IDENTIFIER: &str = "zstd";

/// Compresses and decompresses whole chunks.
///
/// Holds no per-call state, so one codec can serve any number of threads;
/// each call creates and drops its own engine context.
#[derive(Debug, Clone)]
pub struct ZstandardCodec {
    config: ZstandardCompression,
    engine: Arc<dyn ZstdEngine>,
    pool: Arc<dyn BufferPool>,
}

impl ZstandardCodec {
    /// Codec using the bundled zstd library and no buffer pooling.
    pub fn new(config: ZstandardCompression) -> Self {
        Self::with_engine(config, Arc::new(Libzstd), Arc::new(NoPool))
    }

    pub fn with_engine(
        config: ZstandardCompression,
        engine: Arc<dyn ZstdEngine>,
        pool: Arc<dyn BufferPool>,
    ) -> Self {
        Self {
            config,
            engine,
            pool,
        }
    }

    /// Replace the buffer pool.
    pub fn with_pool(mut self, pool: Arc<dyn BufferPool>) -> Self {
        self.pool = pool;
        self
    }

    /// Use a fresh [RecyclingBufferPool] if `use_recycling`, otherwise [NoPool].
    pub fn with_recycling_buffer_pool(self, use_recycling: bool) -> Self {
        if use_recycling {
            self.with_pool(Arc::new(RecyclingBufferPool::default()))
        } else {
            self.with_pool(Arc::new(NoPool))
        }
    }

    pub fn configuration(&self) -> &ZstandardCompression {
        &self.config
    }

    pub fn buffer_pool(&self) -> &Arc<dyn BufferPool> {
        &self.pool
    }

    /// Compress `input` into a single frame.
    pub fn encode(&self, input: &[u8]) -> crate::Result<Vec<u8>> {
        let parameters = self.config.compress_parameters()?;
        log::debug!(
            "zstd level {} with {:?}{}",
            parameters.level,
            parameters.parameters,
            if parameters.dictionary.is_some() {
                " and dictionary"
            } else {
                ""
            }
        );
        let mut context = self.engine.compressor(&parameters)?;
        let mut buffer = PooledBuffer::acquire(&self.pool, 0)?;
        context.compress(input, &mut buffer)?;
        log::trace!("zstd encoded {} bytes to {}", input.len(), buffer.len());
        Ok(buffer.into_vec())
    }

    /// Decompress `input`.
    ///
    /// `decoded_length` is only used to size the output buffer;
    /// the result is whatever the frames contain.
    pub fn decode(&self, input: &[u8], decoded_length: usize) -> crate::Result<Vec<u8>> {
        let parameters = self.config.decompress_parameters();
        let mut context = self.engine.decompressor(&parameters)?;
        let hint = capacity_hint(input, decoded_length);
        let mut buffer = match PooledBuffer::acquire(&self.pool, hint) {
            Ok(buffer) => buffer,
            Err(e) => {
                log::debug!("zstd could not preallocate {hint} bytes: {e}");
                PooledBuffer::acquire(&self.pool, 0)?
            }
        };
        context.decompress(input, &mut buffer)?;
        if buffer.len() != decoded_length {
            log::debug!(
                "zstd decoded {} bytes, expected {decoded_length}",
                buffer.len()
            );
        }
        log::trace!("zstd decoded {} bytes to {}", input.len(), buffer.len());
        Ok(buffer.into_vec())
    }

    /// Compressing writer over `writer`.
    pub fn writer<W: Write>(&self, writer: W) -> crate::Result<ZstdWriter<W>> {
        ZstdWriter::new(writer, self.config.clone())
    }

    /// Decompressing reader over `reader`.
    pub fn reader<R: Read>(&self, reader: R) -> crate::Result<ZstdReader<R>> {
        ZstdReader::new(reader, &self.config)
    }
}

/// Largest up-front allocation made on the strength of the caller's length alone.
const MAX_PREALLOCATION: usize = 64 << 20;

/// Initial output capacity for decoding `input`.
///
/// `decoded_length` is bounded by the size a lone frame declares, or by
/// [MAX_PREALLOCATION] when there is no such declaration.
fn capacity_hint(input: &[u8], decoded_length: usize) -> usize {
    let declared = zstd::zstd_safe::get_frame_content_size(input)
        .ok()
        .flatten()
        .filter(|_| {
            zstd::zstd_safe::find_frame_compressed_size(input).is_ok_and(|len| len == input.len())
        });
    match declared {
        Some(size) => decoded_length.min(usize::try_from(size).unwrap_or(usize::MAX)),
        None => decoded_length.min(MAX_PREALLOCATION),
    }
}

impl From<ZstandardCompression> for ZstandardCodec {
    fn from(value: ZstandardCompression) -> Self {
        Self::new(value)
    }
}
