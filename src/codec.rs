use std::borrow::Cow;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use zarrs::array::CodecChain;
use zarrs::array::codec::BytesCodec;
use zarrs::metadata::v3::MetadataV3;
use zarrs::plugin::PluginCreateError;
use zarrs_codec::{
    ArrayCodecTraits, ArrayToBytesCodecTraits, Codec, CodecError, CodecPluginV3, CodecTraits,
    CodecTraitsV3,
};

use crate::chunk::{N5ChunkHeader, N5ChunkMode};
use crate::metadata::N5Compression;
use crate::zstandard::ZstandardCodec;

zarrs::plugin::impl_extension_aliases!(N5Codec, v3: "zarrs.n5", ["zarrs.n5", "n5"]);
inventory::submit! {
    CodecPluginV3::new::<N5Codec>()
}

/// Whole-chunk N5 codec: header, big-endian elements, optional zstd compression.
#[derive(Debug, Clone)]
pub struct N5Codec {
    /// The N5 representation of the compression.
    n5_compression: N5Compression,
    /// Present if the chunks are zstd-compressed.
    compressor: Option<ZstandardCodec>,
    /// Always a single big-endian bytes codec.
    codecs: CodecChain,
}

impl N5Codec {
    pub fn new(compression: N5Compression) -> Self {
        let compressor = compression.zstd().cloned().map(ZstandardCodec::new);
        Self {
            n5_compression: compression,
            compressor,
            codecs: CodecChain::new(vec![], Arc::new(BytesCodec::big()), vec![]),
        }
    }

    /// Use a specific zstd codec, e.g. one with a buffer pool.
    pub fn with_zstd(codec: ZstandardCodec) -> Self {
        Self {
            n5_compression: N5Compression::Zstd(codec.configuration().clone()),
            compressor: Some(codec),
            codecs: CodecChain::new(vec![], Arc::new(BytesCodec::big()), vec![]),
        }
    }

    pub fn new_with_configuration(
        configuration: &N5CodecConfiguration,
    ) -> Result<Self, PluginCreateError> {
        Ok(Self::new(configuration.compression.clone()))
    }

    pub fn compression(&self) -> &N5Compression {
        &self.n5_compression
    }

    /// Prefix `element_bytes` (big-endian, column-major) with a default-mode
    /// header for `shape` and compress the payload.
    pub fn encode_chunk(&self, element_bytes: &[u8], shape: &[u32]) -> crate::Result<Vec<u8>> {
        let header = N5ChunkHeader::new(shape.to_vec());
        let payload = match &self.compressor {
            Some(zstd) => Cow::Owned(zstd.encode(element_bytes)?),
            None => Cow::Borrowed(element_bytes),
        };
        let mut out = Vec::with_capacity(header.data_offset() + payload.len());
        header.write_to(&mut out)?;
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Parse the header of `chunk` and decompress its payload.
    ///
    /// `element_size` is the size of one element, used to size the output.
    pub fn decode_chunk(
        &self,
        chunk: &[u8],
        element_size: usize,
    ) -> crate::Result<(N5ChunkHeader, Vec<u8>)> {
        let header = N5ChunkHeader::from_bytes(chunk)?;
        let payload = &chunk[header.data_offset()..];
        let bytes = match &self.compressor {
            Some(zstd) => {
                let expected = header
                    .num_elements()
                    .and_then(|n| usize::try_from(n).ok())
                    .and_then(|n| n.checked_mul(element_size))
                    .unwrap_or(0);
                zstd.decode(payload, expected)?
            }
            None => payload.to_vec(),
        };
        Ok((header, bytes))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct N5CodecConfiguration {
    pub compression: N5Compression,
}

impl CodecTraitsV3 for N5Codec {
    fn create(metadata: &MetadataV3) -> Result<zarrs_codec::Codec, zarrs::plugin::PluginCreateError>
    where
        Self: Sized,
    {
        let configuration = metadata.to_typed_configuration()?;
        let codec = Arc::new(N5Codec::new_with_configuration(&configuration)?);
        Ok(Codec::ArrayToBytes(codec))
    }
}

impl CodecTraits for N5Codec {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn configuration(
        &self,
        _version: zarrs::plugin::ZarrVersion,
        _options: &zarrs_codec::CodecMetadataOptions,
    ) -> Option<zarrs::metadata::Configuration> {
        let config = N5CodecConfiguration {
            compression: self.n5_compression.clone(),
        };
        let val = serde_json::to_value(config).expect("N5 compression should be serializable");
        let serde_json::Value::Object(map) = val else {
            panic!("N5 compression should serialize to a JSON object");
        };
        Some(map.into())
    }

    fn partial_decoder_capability(&self) -> zarrs_codec::PartialDecoderCapability {
        zarrs_codec::PartialDecoderCapability {
            partial_read: false,
            partial_decode: false,
        }
    }

    fn partial_encoder_capability(&self) -> zarrs_codec::PartialEncoderCapability {
        zarrs_codec::PartialEncoderCapability {
            partial_encode: false,
        }
    }
}

impl ArrayCodecTraits for N5Codec {
    fn recommended_concurrency(
        &self,
        _shape: &[std::num::NonZeroU64],
        _data_type: &zarrs::array::DataType,
    ) -> Result<zarrs_codec::RecommendedConcurrency, zarrs_codec::CodecError> {
        Ok(zarrs_codec::RecommendedConcurrency::new_maximum(1))
    }
}

impl ArrayToBytesCodecTraits for N5Codec {
    fn into_dyn(self: Arc<Self>) -> Arc<dyn ArrayToBytesCodecTraits> {
        self
    }

    fn encoded_representation(
        &self,
        shape: &[std::num::NonZeroU64],
        data_type: &zarrs::array::DataType,
        _fill_value: &zarrs::array::FillValue,
    ) -> Result<zarrs_codec::BytesRepresentation, zarrs_codec::CodecError> {
        let header_len = (2 + 2 + 4 * shape.len()) as u64;
        let Some(fs) = data_type.fixed_size() else {
            return Ok(zarrs_codec::BytesRepresentation::UnboundedSize);
        };
        let too_large = || {
            zarrs_codec::CodecError::Other(format!("n5 chunk of shape {shape:?} is too large"))
        };
        let data_len = shape
            .iter()
            .try_fold(fs as u64, |acc, n| acc.checked_mul(n.get()))
            .ok_or_else(too_large)?;
        let ret = match &self.compressor {
            None => zarrs_codec::BytesRepresentation::FixedSize(
                header_len.checked_add(data_len).ok_or_else(too_large)?,
            ),
            Some(_) => {
                let data_len = usize::try_from(data_len).map_err(|_| too_large())?;
                let bound = zstd::zstd_safe::compress_bound(data_len);
                if bound == 0 && data_len != 0 {
                    return Err(too_large());
                }
                zarrs_codec::BytesRepresentation::BoundedSize(
                    header_len.checked_add(bound as u64).ok_or_else(too_large)?,
                )
            }
        };
        Ok(ret)
    }

    fn encode<'a>(
        &self,
        bytes: zarrs_codec::ArrayBytes<'a>,
        shape: &[std::num::NonZeroU64],
        data_type: &zarrs::array::DataType,
        fill_value: &zarrs::array::FillValue,
        options: &zarrs_codec::CodecOptions,
    ) -> Result<zarrs_codec::ArrayBytesRaw<'a>, zarrs_codec::CodecError> {
        let element_bytes = self
            .codecs
            .encode(bytes, shape, data_type, fill_value, options)?;
        let shape_u32 = n5_shape(shape)?;
        let chunk = self
            .encode_chunk(&element_bytes, &shape_u32)
            .map_err(|e| CodecError::Other(format!("N5 chunk could not be encoded: {e}")))?;
        Ok(Cow::Owned(chunk))
    }

    fn decode<'a>(
        &self,
        bytes: zarrs_codec::ArrayBytesRaw<'a>,
        shape: &[std::num::NonZeroU64],
        data_type: &zarrs::array::DataType,
        fill_value: &zarrs::array::FillValue,
        options: &zarrs_codec::CodecOptions,
    ) -> Result<zarrs_codec::ArrayBytes<'a>, zarrs_codec::CodecError> {
        let element_size = data_type.fixed_size().unwrap_or(1);
        let (header, payload) = self
            .decode_chunk(&bytes, element_size)
            .map_err(|e| CodecError::Other(format!("N5 chunk could not be decoded: {e}")))?;

        if !matches!(header.mode, N5ChunkMode::Default) {
            return Err(zarrs_codec::CodecError::Other(format!(
                "unsupported N5 chunk mode: {:?}",
                header.mode
            )));
        }

        // shape should be identical because the regular bounded chunk grid
        // should take care of edge chunks
        let shape_u32 = n5_shape(shape)?;
        if header.shape != shape_u32 {
            return Err(zarrs_codec::CodecError::Other(format!(
                "N5 chunk header has shape {:?}, expected {:?}",
                header.shape, shape,
            )));
        }

        self.codecs.decode(
            Cow::Owned(payload),
            shape,
            data_type,
            fill_value,
            options,
        )
    }
}

/// Zarr (C order) chunk shape to N5 (F order) header shape.
fn n5_shape(shape: &[std::num::NonZeroU64]) -> Result<Vec<u32>, CodecError> {
    shape
        .iter()
        .rev()
        .map(|n| {
            u32::try_from(n.get())
                .map_err(|_| CodecError::Other(format!("chunk dimension {n} too large for N5")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU64;

    use super::*;
    use crate::zstandard::ZstandardCompression;

    fn big_endian_u16(values: &[u16]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_be_bytes()).collect()
    }

    #[test]
    fn zstd_chunk_round_trip() {
        let codec = N5Codec::new(N5Compression::Zstd(
            ZstandardCompression::builder()
                .level(5)
                .use_checksums(true)
                .build(),
        ));
        let values: Vec<u16> = (0..200).map(|i| i % 17).collect();
        let elements = big_endian_u16(&values);

        let chunk = codec.encode_chunk(&elements, &[20, 10]).unwrap();
        assert_eq!(&chunk[..4], &[0, 0, 0, 2]);
        // payload is a zstd frame
        assert_eq!(&chunk[12..16], &[0x28, 0xb5, 0x2f, 0xfd]);

        let (header, decoded) = codec.decode_chunk(&chunk, 2).unwrap();
        assert_eq!(header.shape(), &[20, 10]);
        assert_eq!(decoded, elements);
    }

    #[test]
    fn pooled_zstd_chunk_round_trip() {
        let zstd = ZstandardCodec::new(ZstandardCompression::new(1)).with_recycling_buffer_pool(true);
        let codec = N5Codec::with_zstd(zstd);
        assert_eq!(codec.compression().zstd().unwrap().level(), 1);

        let elements = big_endian_u16(&[7; 64]);
        for _ in 0..3 {
            let chunk = codec.encode_chunk(&elements, &[8, 8]).unwrap();
            assert!(chunk.len() < 12 + elements.len());
            let (_, decoded) = codec.decode_chunk(&chunk, 2).unwrap();
            assert_eq!(decoded, elements);
        }
    }

    #[test]
    fn raw_chunk_round_trip() {
        let codec = N5Codec::new(N5Compression::Raw);
        let elements = big_endian_u16(&[1, 2, 3, 4]);
        let chunk = codec.encode_chunk(&elements, &[4]).unwrap();
        assert_eq!(chunk.len(), 8 + elements.len());
        let (_, decoded) = codec.decode_chunk(&chunk, 2).unwrap();
        assert_eq!(decoded, elements);
    }

    #[test]
    fn corrupt_zstd_payload() {
        let codec = N5Codec::new(N5Compression::Zstd(ZstandardCompression::default()));
        let mut chunk = Vec::new();
        N5ChunkHeader::new(vec![4]).write_to(&mut chunk).unwrap();
        chunk.extend_from_slice(b"not a frame");
        let err = codec.decode_chunk(&chunk, 1).unwrap_err();
        assert!(err.is_corrupt_input());
    }

    #[test]
    fn oversized_header_shape_decodes() {
        let zstd = ZstandardCompression::default();
        let codec = N5Codec::new(N5Compression::Zstd(zstd.clone()));
        let header = N5ChunkHeader::new(vec![u32::MAX; 3]);
        let mut chunk = Vec::new();
        header.write_to(&mut chunk).unwrap();
        let payload = big_endian_u16(&[1, 2, 3]);
        chunk.extend(ZstandardCodec::new(zstd).encode(&payload).unwrap());

        let (decoded_header, bytes) = codec.decode_chunk(&chunk, 2).unwrap();
        assert_eq!(decoded_header, header);
        assert_eq!(bytes, payload);
    }

    #[test]
    fn oversized_shape_representation() {
        let shape = [NonZeroU64::new(u64::MAX / 2).unwrap(); 3];
        let data_type = zarrs::array::data_type::uint16();
        let fill_value = zarrs::array::FillValue::from(0u16);
        for compression in [
            N5Compression::Raw,
            N5Compression::Zstd(ZstandardCompression::default()),
        ] {
            let codec = N5Codec::new(compression);
            assert!(
                codec
                    .encoded_representation(&shape, &data_type, &fill_value)
                    .is_err()
            );
        }

        let shape = [NonZeroU64::new(4).unwrap(); 2];
        let raw = N5Codec::new(N5Compression::Raw)
            .encoded_representation(&shape, &data_type, &fill_value)
            .unwrap();
        assert!(matches!(
            raw,
            zarrs_codec::BytesRepresentation::FixedSize(44)
        ));
    }

    #[test]
    fn configuration_json() {
        let configuration: N5CodecConfiguration = serde_json::from_str(
            r#"{"compression": {"type": "zstd", "level": 7, "windowLog": 22}}"#,
        )
        .unwrap();
        let codec = N5Codec::new_with_configuration(&configuration).unwrap();
        let zstd = codec.compression().zstd().unwrap();
        assert_eq!(zstd.level(), 7);
        assert_eq!(zstd.window_log(), 22);
        assert!(codec.compressor.is_some());
    }
}
