//! The compression engine seen by the adapter.
//!
//! The adapter decides *which* parameters to apply; an engine applies them to a
//! context scoped to one call. [Libzstd] binds this to the reference C library
//! through the `zstd` crate.
//!
//! See the [zstd manual](https://facebook.github.io/zstd/zstd_manual.html) for
//! the meaning of each parameter.

use std::fmt::Debug;
use std::io::Read;

use zstd::bulk::{Compressor, Decompressor};
use zstd::stream::raw::{CParameter, DParameter};
use zstd::zstd_safe;

/// Match-finding strategy, numbered as in `zstd.h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ZstdStrategy {
    Fast = 1,
    DFast = 2,
    Greedy = 3,
    Lazy = 4,
    Lazy2 = 5,
    BtLazy2 = 6,
    BtOpt = 7,
    BtUltra = 8,
    BtUltra2 = 9,
}

impl TryFrom<u32> for ZstdStrategy {
    type Error = crate::Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        let s = match value {
            1 => Self::Fast,
            2 => Self::DFast,
            3 => Self::Greedy,
            4 => Self::Lazy,
            5 => Self::Lazy2,
            6 => Self::BtLazy2,
            7 => Self::BtOpt,
            8 => Self::BtUltra,
            9 => Self::BtUltra2,
            n => {
                return Err(crate::Error::configuration(format!(
                    "unknown strategy {n}, expected 1..=9"
                )));
            }
        };
        Ok(s)
    }
}

impl ZstdStrategy {
    fn as_zstd(self) -> zstd_safe::Strategy {
        match self {
            Self::Fast => zstd_safe::Strategy::ZSTD_fast,
            Self::DFast => zstd_safe::Strategy::ZSTD_dfast,
            Self::Greedy => zstd_safe::Strategy::ZSTD_greedy,
            Self::Lazy => zstd_safe::Strategy::ZSTD_lazy,
            Self::Lazy2 => zstd_safe::Strategy::ZSTD_lazy2,
            Self::BtLazy2 => zstd_safe::Strategy::ZSTD_btlazy2,
            Self::BtOpt => zstd_safe::Strategy::ZSTD_btopt,
            Self::BtUltra => zstd_safe::Strategy::ZSTD_btultra,
            Self::BtUltra2 => zstd_safe::Strategy::ZSTD_btultra2,
        }
    }
}

/// A single compression parameter to apply to a fresh context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressParameter {
    WindowLog(u32),
    EnableLongDistanceMatching(bool),
    HashLog(u32),
    ChainLog(u32),
    SearchLog(u32),
    MinMatch(u32),
    TargetLength(u32),
    Strategy(ZstdStrategy),
    NbWorkers(u32),
    /// Only honoured when `NbWorkers` is at least 1.
    JobSize(u32),
    /// Only honoured when `NbWorkers` is at least 1.
    OverlapLog(u32),
    ChecksumFlag(bool),
    ContentSizeFlag(bool),
}

impl CompressParameter {
    fn as_zstd(self) -> CParameter {
        match self {
            Self::WindowLog(n) => CParameter::WindowLog(n),
            Self::EnableLongDistanceMatching(b) => CParameter::EnableLongDistanceMatching(b),
            Self::HashLog(n) => CParameter::HashLog(n),
            Self::ChainLog(n) => CParameter::ChainLog(n),
            Self::SearchLog(n) => CParameter::SearchLog(n),
            Self::MinMatch(n) => CParameter::MinMatch(n),
            Self::TargetLength(n) => CParameter::TargetLength(n),
            Self::Strategy(s) => CParameter::Strategy(s.as_zstd()),
            Self::NbWorkers(n) => CParameter::NbWorkers(n),
            Self::JobSize(n) => CParameter::JobSize(n),
            Self::OverlapLog(n) => CParameter::OverlapSizeLog(n),
            Self::ChecksumFlag(b) => CParameter::ChecksumFlag(b),
            Self::ContentSizeFlag(b) => CParameter::ContentSizeFlag(b),
        }
    }
}

/// A single decompression parameter to apply to a fresh context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecompressParameter {
    WindowLogMax(u32),
}

impl DecompressParameter {
    fn as_zstd(self) -> DParameter {
        match self {
            Self::WindowLogMax(n) => DParameter::WindowLogMax(n),
        }
    }
}

/// Everything needed to set up one compression context.
#[derive(Debug, Clone, Default)]
pub struct CompressParameters<'a> {
    pub level: i32,
    pub parameters: Vec<CompressParameter>,
    pub dictionary: Option<&'a [u8]>,
}

/// Everything needed to set up one decompression context.
#[derive(Debug, Clone, Default)]
pub struct DecompressParameters<'a> {
    pub parameters: Vec<DecompressParameter>,
    pub dictionary: Option<&'a [u8]>,
}

/// A compression context, released when dropped.
pub trait CompressContext {
    /// Compress all of `src` as a single frame into `dst`, which must be empty.
    fn compress(&mut self, src: &[u8], dst: &mut Vec<u8>) -> crate::Result<()>;
}

/// A decompression context, released when dropped.
pub trait DecompressContext {
    /// Decompress every frame in `src` into `dst`, which must be empty.
    fn decompress(&mut self, src: &[u8], dst: &mut Vec<u8>) -> crate::Result<()>;
}

/// Provider of scoped compression and decompression contexts.
///
/// Contexts are never shared between calls.
pub trait ZstdEngine: Debug + Send + Sync {
    fn compressor<'a>(
        &self,
        parameters: &CompressParameters<'a>,
    ) -> crate::Result<Box<dyn CompressContext + 'a>>;

    fn decompressor<'a>(
        &self,
        parameters: &DecompressParameters<'a>,
    ) -> crate::Result<Box<dyn DecompressContext + 'a>>;
}

/// The reference zstd library.
#[derive(Debug, Clone, Copy, Default)]
pub struct Libzstd;

impl ZstdEngine for Libzstd {
    fn compressor<'a>(
        &self,
        parameters: &CompressParameters<'a>,
    ) -> crate::Result<Box<dyn CompressContext + 'a>> {
        check_level(parameters.level)?;
        let mut context = match parameters.dictionary {
            Some(dict) => Compressor::with_dictionary(parameters.level, dict),
            None => Compressor::new(parameters.level),
        }
        .map_err(|e| crate::Error::Resource(format!("compression context: {e}")))?;
        for p in &parameters.parameters {
            context
                .set_parameter(p.as_zstd())
                .map_err(|e| crate::Error::configuration(format!("{p:?}: {e}")))?;
        }
        Ok(Box::new(LibzstdCompressor { context }))
    }

    fn decompressor<'a>(
        &self,
        parameters: &DecompressParameters<'a>,
    ) -> crate::Result<Box<dyn DecompressContext + 'a>> {
        let mut context = match parameters.dictionary {
            Some(dict) => Decompressor::with_dictionary(dict),
            None => Decompressor::new(),
        }
        .map_err(|e| crate::Error::Resource(format!("decompression context: {e}")))?;
        for p in &parameters.parameters {
            context
                .set_parameter(p.as_zstd())
                .map_err(|e| crate::Error::configuration(format!("{p:?}: {e}")))?;
        }
        Ok(Box::new(LibzstdDecompressor {
            context,
            parameters: parameters.clone(),
        }))
    }
}

struct LibzstdCompressor {
    context: Compressor<'static>,
}

impl CompressContext for LibzstdCompressor {
    fn compress(&mut self, src: &[u8], dst: &mut Vec<u8>) -> crate::Result<()> {
        dst.reserve(zstd_safe::compress_bound(src.len()));
        self.context
            .compress_to_buffer(src, dst)
            .map_err(|e| crate::Error::Encode(e.to_string()))?;
        Ok(())
    }
}

struct LibzstdDecompressor<'a> {
    context: Decompressor<'static>,
    parameters: DecompressParameters<'a>,
}

impl DecompressContext for LibzstdDecompressor<'_> {
    fn decompress(&mut self, src: &[u8], dst: &mut Vec<u8>) -> crate::Result<()> {
        // one-shot decompression does not check the frame window against WindowLogMax
        if !self.parameters.parameters.is_empty() {
            return self.decompress_stream(src, dst);
        }
        match single_frame_content_size(src)? {
            Some(size) => {
                let size = usize::try_from(size).map_err(|_| {
                    crate::Error::Resource(format!("frame content size {size} exceeds memory"))
                })?;
                dst.try_reserve(size).map_err(|e| {
                    crate::Error::Resource(format!("could not allocate {size} bytes: {e}"))
                })?;
                self.context
                    .decompress_to_buffer(src, dst)
                    .map_err(|e| crate::Error::Decode(e.to_string()))?;
                Ok(())
            }
            None => self.decompress_stream(src, dst),
        }
    }
}

impl LibzstdDecompressor<'_> {
    /// Slower path for inputs of unknown size or with several frames.
    fn decompress_stream(&self, src: &[u8], dst: &mut Vec<u8>) -> crate::Result<()> {
        let mut decoder = open_decoder(src, &self.parameters)?;
        decoder
            .read_to_end(dst)
            .map_err(|e| crate::Error::Decode(e.to_string()))?;
        Ok(())
    }
}

/// Content size of `src` if it is exactly one frame which declares its size.
fn single_frame_content_size(src: &[u8]) -> crate::Result<Option<u64>> {
    let frame_len = zstd_safe::find_frame_compressed_size(src)
        .map_err(|code| crate::Error::Decode(zstd_safe::get_error_name(code).to_string()))?;
    if frame_len != src.len() {
        return Ok(None);
    }
    let size = zstd_safe::get_frame_content_size(src)
        .map_err(|_| crate::Error::Decode("could not read frame header".into()))?;
    Ok(size)
}

/// Streaming decoder over `reader` configured with `parameters`.
pub(crate) fn open_decoder<R: Read>(
    reader: R,
    parameters: &DecompressParameters<'_>,
) -> crate::Result<zstd::stream::read::Decoder<'static, std::io::BufReader<R>>> {
    let reader = std::io::BufReader::new(reader);
    let mut decoder = zstd::stream::read::Decoder::with_dictionary(
        reader,
        parameters.dictionary.unwrap_or_default(),
    )
    .map_err(|e| crate::Error::Resource(format!("decompression context: {e}")))?;
    for p in &parameters.parameters {
        decoder
            .set_parameter(p.as_zstd())
            .map_err(|e| crate::Error::configuration(format!("{p:?}: {e}")))?;
    }
    Ok(decoder)
}

/// Streaming encoder over `writer` configured with `parameters`.
/// Reject levels the library would otherwise silently clamp.
fn check_level(level: i32) -> crate::Result<()> {
    let levels = zstd::compression_level_range();
    if levels.contains(&level) {
        Ok(())
    } else {
        Err(crate::Error::configuration(format!(
            "level {level} outside {}..={}",
            levels.start(),
            levels.end()
        )))
    }
}

pub(crate) fn open_encoder<W: std::io::Write>(
    writer: W,
    parameters: &CompressParameters<'_>,
) -> crate::Result<zstd::stream::write::Encoder<'static, W>> {
    check_level(parameters.level)?;
    let mut encoder = zstd::stream::write::Encoder::with_dictionary(
        writer,
        parameters.level,
        parameters.dictionary.unwrap_or_default(),
    )
    .map_err(|e| crate::Error::Resource(format!("compression context: {e}")))?;
    for p in &parameters.parameters {
        // the size of a streamed frame is not known up front
        if matches!(p, CompressParameter::ContentSizeFlag(_)) {
            continue;
        }
        encoder
            .set_parameter(p.as_zstd())
            .map_err(|e| crate::Error::configuration(format!("{p:?}: {e}")))?;
    }
    Ok(encoder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_from_number() {
        assert_eq!(ZstdStrategy::try_from(1).unwrap(), ZstdStrategy::Fast);
        assert_eq!(ZstdStrategy::try_from(9).unwrap(), ZstdStrategy::BtUltra2);
        assert!(matches!(
            ZstdStrategy::try_from(10),
            Err(crate::Error::Configuration(_))
        ));
        assert!(ZstdStrategy::try_from(0).is_err());
    }

    #[test]
    fn libzstd_single_frame() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(20);
        let params = CompressParameters {
            level: 3,
            parameters: vec![CompressParameter::ContentSizeFlag(true)],
            dictionary: None,
        };
        let mut compressed = Vec::new();
        Libzstd
            .compressor(&params)
            .unwrap()
            .compress(&data, &mut compressed)
            .unwrap();
        assert_eq!(
            zstd_safe::get_frame_content_size(&compressed).unwrap(),
            Some(data.len() as u64)
        );

        let mut out = Vec::new();
        Libzstd
            .decompressor(&DecompressParameters::default())
            .unwrap()
            .decompress(&compressed, &mut out)
            .unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn libzstd_concatenated_frames() {
        let mut compressed = zstd::encode_all(&b"first frame "[..], 3).unwrap();
        compressed.extend(zstd::encode_all(&b"second frame"[..], 3).unwrap());

        let mut out = Vec::new();
        Libzstd
            .decompressor(&DecompressParameters::default())
            .unwrap()
            .decompress(&compressed, &mut out)
            .unwrap();
        assert_eq!(out, b"first frame second frame");
    }

    #[test]
    fn libzstd_rejects_garbage() {
        let mut out = Vec::new();
        let err = Libzstd
            .decompressor(&DecompressParameters::default())
            .unwrap()
            .decompress(b"definitely not zstd", &mut out)
            .unwrap_err();
        assert!(err.is_corrupt_input());
    }

    #[test]
    fn libzstd_rejects_bad_parameter() {
        let params = CompressParameters {
            level: 3,
            parameters: vec![CompressParameter::WindowLog(100)],
            dictionary: None,
        };
        assert!(matches!(
            Libzstd.compressor(&params),
            Err(crate::Error::Configuration(_))
        ));
    }

    #[test]
    fn libzstd_rejects_level_out_of_range() {
        for level in [*zstd::compression_level_range().end() + 1, i32::MIN] {
            let params = CompressParameters {
                level,
                parameters: Vec::new(),
                dictionary: None,
            };
            assert!(matches!(
                Libzstd.compressor(&params),
                Err(crate::Error::Configuration(_))
            ));
        }
        let params = CompressParameters {
            level: *zstd::compression_level_range().end(),
            parameters: Vec::new(),
            dictionary: None,
        };
        assert!(Libzstd.compressor(&params).is_ok());
    }
}
