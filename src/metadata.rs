use serde::{Deserialize, Serialize};

use crate::zstandard::ZstandardCompression;

/// Representation of N5 dataset metadata, as found in `attributes.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct N5ArrayMetadata {
    /// N5 version; present if this is a hierarchy root.
    #[serde(rename = "n5", default, skip_serializing_if = "Option::is_none")]
    pub n5_version: Option<String>,
    /// Array shape. Note that N5 uses F order, so the dimensions are reversed compared to Zarr.
    pub dimensions: Vec<u64>,
    /// Chunk shape. Note that N5 uses F order, so the dimensions are reversed compared to Zarr.
    pub block_size: Vec<u64>,
    /// Data type as a string.
    pub data_type: String,
    /// Chunk compression configuration.
    #[serde(default)]
    pub compression: N5Compression,
    /// Unstructured attributes.
    #[serde(flatten)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl N5ArrayMetadata {
    pub fn from_json(bytes: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_json(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Size in bytes of one element of [Self::data_type].
    pub fn data_type_size(&self) -> crate::Result<usize> {
        data_type_size(&self.data_type)
    }

    /// Uncompressed size in bytes of a full chunk.
    pub fn chunk_byte_len(&self) -> crate::Result<usize> {
        let element_size = self.data_type_size()?;
        self.block_size
            .iter()
            .try_fold(element_size as u64, |acc, &n| acc.checked_mul(n))
            .and_then(|len| usize::try_from(len).ok())
            .ok_or_else(|| crate::Error::general(format!("chunk too large: {:?}", self.block_size)))
    }
}

pub(crate) fn data_type_size(data_type: &str) -> crate::Result<usize> {
    let size = match data_type {
        "uint8" | "int8" => 1,
        "uint16" | "int16" => 2,
        "uint32" | "int32" | "float32" => 4,
        "uint64" | "int64" | "float64" => 8,
        s => return Err(crate::Error::general(format!("unsupported data type: {s}"))),
    };
    Ok(size)
}

/// N5 chunk compression configuration.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum N5Compression {
    /// Uncompressed.
    #[default]
    Raw,
    /// Zstandard; see [ZstandardCompression] for the parameters.
    Zstd(ZstandardCompression),
}

impl N5Compression {
    pub fn zstd(&self) -> Option<&ZstandardCompression> {
        match self {
            N5Compression::Raw => None,
            N5Compression::Zstd(c) => Some(c),
        }
    }
}

impl From<ZstandardCompression> for N5Compression {
    fn from(value: ZstandardCompression) -> Self {
        Self::Zstd(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ATTRIBUTES: &str = r#"{
    "dimensions": [100, 200],
    "blockSize": [10, 20],
    "dataType": "uint16",
    "compression": {
        "type": "zstd",
        "level": 5,
        "useChecksums": true,
        "nbWorkers": 4
    },
    "resolution": [4, 4]
}"#;

    #[test]
    fn parse_zstd_attributes() {
        let meta = N5ArrayMetadata::from_json(ATTRIBUTES.as_bytes()).unwrap();
        let zstd = meta.compression.zstd().expect("zstd compression");
        assert_eq!(zstd.level(), 5);
        assert!(zstd.use_checksums());
        assert_eq!(zstd.nb_workers(), 4);
        assert_eq!(meta.attributes["resolution"], serde_json::json!([4, 4]));
        assert_eq!(meta.chunk_byte_len().unwrap(), 400);
    }

    #[test]
    fn write_then_reopen_drops_workers() {
        let meta = N5ArrayMetadata::from_json(ATTRIBUTES.as_bytes()).unwrap();
        let reopened = N5ArrayMetadata::from_json(&meta.to_json().unwrap()).unwrap();
        let zstd = reopened.compression.zstd().unwrap();
        assert_eq!(zstd.level(), 5);
        assert!(zstd.use_checksums());
        assert_eq!(zstd.nb_workers(), 0);
        assert_eq!(reopened.attributes, meta.attributes);
    }

    #[test]
    fn compression_json() {
        let raw: N5Compression = serde_json::from_str(r#"{"type": "raw"}"#).unwrap();
        assert_eq!(raw, N5Compression::Raw);

        let zstd: N5Compression = serde_json::from_str(r#"{"type": "zstd"}"#).unwrap();
        assert_eq!(zstd, N5Compression::Zstd(ZstandardCompression::default()));
        assert_eq!(
            serde_json::to_value(&zstd).unwrap(),
            serde_json::json!({"type": "zstd", "level": 3})
        );

        let unsupported: Result<N5Compression, _> =
            serde_json::from_str(r#"{"type": "blosc"}"#);
        assert!(unsupported.is_err());
    }

    #[test]
    fn missing_compression_is_raw() {
        let meta = N5ArrayMetadata::from_json(
            br#"{"dimensions": [1], "blockSize": [1], "dataType": "float64"}"#,
        )
        .unwrap();
        assert_eq!(meta.compression, N5Compression::Raw);
        assert_eq!(meta.chunk_byte_len().unwrap(), 8);
    }

    #[test]
    fn oversized_block_is_an_error() {
        let meta = N5ArrayMetadata::from_json(
            br#"{"dimensions": [1, 1, 1], "blockSize": [4294967296, 4294967296, 4294967296], "dataType": "uint8"}"#,
        )
        .unwrap();
        assert!(matches!(meta.chunk_byte_len(), Err(crate::Error::General(_))));
    }
}
