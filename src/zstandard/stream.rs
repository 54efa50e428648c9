//! Streaming compression, for callers which produce or consume chunks incrementally.

use std::io::{self, Read, Write};

use zstd::stream::read::Decoder;
use zstd::stream::write::Encoder;

use super::ZstandardCompression;
use super::engine::{open_decoder, open_encoder};

/// Compressing writer.
///
/// Output is one zstd frame, or one frame per flush if
/// [ZstandardCompression::close_frame_on_flush] is set.
/// Call [ZstdWriter::finish] to close the last frame and get the inner writer back;
/// dropping the writer without finishing leaves the last frame incomplete.
pub struct ZstdWriter<W: Write> {
    encoder: Option<Encoder<'static, W>>,
    config: ZstandardCompression,
    /// Whether anything has been written to the current frame.
    frame_open: bool,
}

impl<W: Write> ZstdWriter<W> {
    pub(crate) fn new(writer: W, config: ZstandardCompression) -> crate::Result<Self> {
        let encoder = open_encoder(writer, &config.compress_parameters()?)?;
        Ok(Self {
            encoder: Some(encoder),
            config,
            frame_open: false,
        })
    }

    fn encoder(&mut self) -> io::Result<&mut Encoder<'static, W>> {
        self.encoder
            .as_mut()
            .ok_or_else(|| io::Error::other("zstd writer used after a failed frame close"))
    }

    /// Finish the current frame and start a new one on the same writer.
    fn close_frame(&mut self) -> io::Result<()> {
        let Some(encoder) = self.encoder.take() else {
            return Err(io::Error::other("zstd writer used after a failed frame close"));
        };
        let mut writer = encoder.finish()?;
        writer.flush()?;
        let parameters = self.config.compress_parameters()?;
        self.encoder = Some(open_encoder(writer, &parameters)?);
        self.frame_open = false;
        log::trace!("closed zstd frame on flush");
        Ok(())
    }

    pub fn get_ref(&self) -> Option<&W> {
        self.encoder.as_ref().map(Encoder::get_ref)
    }

    /// Close the last frame and return the inner writer.
    pub fn finish(mut self) -> crate::Result<W> {
        let encoder = self
            .encoder
            .take()
            .ok_or_else(|| crate::Error::Encode("zstd writer already failed".into()))?;
        encoder
            .finish()
            .map_err(|e| crate::Error::Encode(e.to_string()))
    }
}

impl<W: Write> Write for ZstdWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.encoder()?.write(buf)?;
        self.frame_open |= n > 0;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.config.close_frame_on_flush() && self.frame_open {
            self.close_frame()
        } else {
            self.encoder()?.flush()
        }
    }
}

/// Decompressing reader over one or more concatenated zstd frames.
pub struct ZstdReader<R: Read> {
    decoder: Decoder<'static, io::BufReader<R>>,
}

impl<R: Read> ZstdReader<R> {
    pub(crate) fn new(reader: R, config: &ZstandardCompression) -> crate::Result<Self> {
        let decoder = open_decoder(reader, &config.decompress_parameters())?;
        Ok(Self { decoder })
    }

    pub fn into_inner(self) -> R {
        self.decoder.finish().into_inner()
    }
}

impl<R: Read> Read for ZstdReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.decoder.read(buf)
    }
}
