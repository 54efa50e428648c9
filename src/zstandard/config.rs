use serde::{Deserialize, Serialize};

use super::engine::{
    CompressParameter, CompressParameters, DecompressParameter, DecompressParameters,
    ZstdStrategy,
};

/// Default compression level from `zstd.h`.
///
/// Some libraries, such as numcodecs, default to 1 instead.
pub const ZSTD_CLEVEL_DEFAULT: i32 = 3;

/// Zstandard compression configuration for an N5 dataset.
///
/// Zero (or `false`, or no dictionary) means "use the engine default" for every
/// field except the level. Build one with [ZstandardCompression::builder], or
/// deserialize it from the `compression` object of a dataset's `attributes.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ZstandardCompressionMetadata", into = "ZstandardCompressionMetadata")]
pub struct ZstandardCompression {
    level: i32,
    nb_workers: u32,
    window_log: u32,
    hash_log: u32,
    chain_log: u32,
    search_log: u32,
    min_match: u32,
    target_length: u32,
    strategy: u32,
    job_size: u32,
    overlap_log: u32,
    use_checksums: bool,
    close_frame_on_flush: bool,
    dictionary: Option<Vec<u8>>,
    /// Whether any field other than the level was given explicitly.
    advanced_parameters_set: bool,
}

impl Default for ZstandardCompression {
    fn default() -> Self {
        Self::new(ZSTD_CLEVEL_DEFAULT)
    }
}

impl ZstandardCompression {
    /// Configuration with the given level and every other field at its default.
    pub fn new(level: i32) -> Self {
        Self {
            level,
            nb_workers: 0,
            window_log: 0,
            hash_log: 0,
            chain_log: 0,
            search_log: 0,
            min_match: 0,
            target_length: 0,
            strategy: 0,
            job_size: 0,
            overlap_log: 0,
            use_checksums: false,
            close_frame_on_flush: false,
            dictionary: None,
            advanced_parameters_set: false,
        }
    }

    pub fn builder() -> ZstandardCompressionBuilder {
        ZstandardCompressionBuilder::default()
    }

    /// Builder starting from this configuration.
    pub fn to_builder(&self) -> ZstandardCompressionBuilder {
        ZstandardCompressionBuilder {
            inner: self.clone(),
        }
    }

    /// Compression level. Normally 1 to 22; negative levels trade ratio for speed.
    pub fn level(&self) -> i32 {
        self.level
    }

    /// Number of worker threads; 0 compresses on the calling thread.
    ///
    /// Not persisted in dataset metadata.
    pub fn nb_workers(&self) -> u32 {
        self.nb_workers
    }

    /// Maximum back-reference distance, as a power of 2.
    pub fn window_log(&self) -> u32 {
        self.window_log
    }

    /// Size of the initial hash table, as a power of 2.
    pub fn hash_log(&self) -> u32 {
        self.hash_log
    }

    /// Size of the chained match-search table, as a power of 2.
    pub fn chain_log(&self) -> u32 {
        self.chain_log
    }

    /// Number of search attempts, as a power of 2.
    pub fn search_log(&self) -> u32 {
        self.search_log
    }

    pub fn min_match(&self) -> u32 {
        self.min_match
    }

    /// Meaning depends on the strategy.
    pub fn target_length(&self) -> u32 {
        self.target_length
    }

    /// `ZSTD_strategy` number; see [ZstdStrategy].
    pub fn strategy(&self) -> u32 {
        self.strategy
    }

    /// Bytes per compression job. Only used when [Self::nb_workers] is at least 1.
    pub fn job_size(&self) -> u32 {
        self.job_size
    }

    /// Overlap between jobs, as a fraction of the window size.
    /// Only used when [Self::nb_workers] is at least 1.
    pub fn overlap_log(&self) -> u32 {
        self.overlap_log
    }

    pub fn use_checksums(&self) -> bool {
        self.use_checksums
    }

    /// Whether streamed output closes the frame on every flush.
    pub fn close_frame_on_flush(&self) -> bool {
        self.close_frame_on_flush
    }

    pub fn dictionary(&self) -> Option<&[u8]> {
        self.dictionary.as_deref()
    }

    pub fn advanced_parameters_set(&self) -> bool {
        self.advanced_parameters_set
    }

    /// Parameters for a compression context.
    ///
    /// The level is always applied, as is the content size flag.
    /// Other fields are only applied when advanced parameters were set,
    /// and then only if they differ from their defaults.
    pub fn compress_parameters(&self) -> crate::Result<CompressParameters<'_>> {
        let mut parameters = vec![CompressParameter::ContentSizeFlag(true)];
        if self.advanced_parameters_set {
            let p = &mut parameters;
            push_nonzero(p, self.nb_workers, CompressParameter::NbWorkers);
            if self.window_log != 0 {
                p.push(CompressParameter::EnableLongDistanceMatching(true));
                p.push(CompressParameter::WindowLog(self.window_log));
            }
            push_nonzero(p, self.hash_log, CompressParameter::HashLog);
            push_nonzero(p, self.chain_log, CompressParameter::ChainLog);
            push_nonzero(p, self.search_log, CompressParameter::SearchLog);
            push_nonzero(p, self.min_match, CompressParameter::MinMatch);
            push_nonzero(p, self.target_length, CompressParameter::TargetLength);
            if self.strategy != 0 {
                p.push(CompressParameter::Strategy(ZstdStrategy::try_from(
                    self.strategy,
                )?));
            }
            push_nonzero(p, self.job_size, CompressParameter::JobSize);
            push_nonzero(p, self.overlap_log, CompressParameter::OverlapLog);
            // raw-content dictionaries carry no ID, so a checksum is the only way
            // a decoder notices it was given the wrong one
            if self.use_checksums || self.dictionary.is_some() {
                p.push(CompressParameter::ChecksumFlag(true));
            }
        }
        Ok(CompressParameters {
            level: self.level,
            parameters,
            dictionary: self.dictionary(),
        })
    }

    /// Parameters for a decompression context.
    ///
    /// A zero window log leaves the engine's own limit in place.
    pub fn decompress_parameters(&self) -> DecompressParameters<'_> {
        let mut parameters = Vec::new();
        push_nonzero(
            &mut parameters,
            self.window_log,
            DecompressParameter::WindowLogMax,
        );
        DecompressParameters {
            parameters,
            dictionary: self.dictionary(),
        }
    }
}

fn push_nonzero<P>(parameters: &mut Vec<P>, value: u32, f: impl FnOnce(u32) -> P) {
    if value != 0 {
        parameters.push(f(value));
    }
}

/// Builder for [ZstandardCompression].
///
/// Calling any setter other than [Self::level] marks the configuration as
/// having advanced parameters, even if the value set is the default.
#[derive(Debug, Clone, Default)]
pub struct ZstandardCompressionBuilder {
    inner: ZstandardCompression,
}

macro_rules! advanced_setter {
    ($(#[$meta:meta])* $name:ident: $ty:ty) => {
        $(#[$meta])*
        pub fn $name(mut self, $name: $ty) -> Self {
            self.inner.$name = $name;
            self.inner.advanced_parameters_set = true;
            self
        }
    };
}

impl ZstandardCompressionBuilder {
    pub fn level(mut self, level: i32) -> Self {
        self.inner.level = level;
        self
    }

    advanced_setter!(nb_workers: u32);
    advanced_setter!(window_log: u32);
    advanced_setter!(hash_log: u32);
    advanced_setter!(chain_log: u32);
    advanced_setter!(search_log: u32);
    advanced_setter!(min_match: u32);
    advanced_setter!(target_length: u32);
    advanced_setter!(
        /// Raw `ZSTD_strategy` number; unknown values are rejected at encode time.
        strategy: u32
    );
    advanced_setter!(job_size: u32);
    advanced_setter!(overlap_log: u32);
    advanced_setter!(use_checksums: bool);
    advanced_setter!(close_frame_on_flush: bool);

    pub fn dictionary(mut self, dictionary: impl Into<Vec<u8>>) -> Self {
        self.inner.dictionary = Some(dictionary.into());
        self.inner.advanced_parameters_set = true;
        self
    }

    pub fn build(self) -> ZstandardCompression {
        self.inner
    }
}

/// Serialized form of [ZstandardCompression], inside an N5 `compression` object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ZstandardCompressionMetadata {
    #[serde(default = "default_level")]
    level: i32,
    /// Accepted but never written; only affects encoding speed.
    #[serde(default, skip_serializing)]
    nb_workers: Option<u32>,
    #[serde(default, skip_serializing_if = "is_unset")]
    window_log: Option<u32>,
    #[serde(default, skip_serializing_if = "is_unset")]
    hash_log: Option<u32>,
    #[serde(default, skip_serializing_if = "is_unset")]
    chain_log: Option<u32>,
    #[serde(default, skip_serializing_if = "is_unset")]
    search_log: Option<u32>,
    #[serde(default, skip_serializing_if = "is_unset")]
    min_match: Option<u32>,
    #[serde(default, skip_serializing_if = "is_unset")]
    target_length: Option<u32>,
    #[serde(default, skip_serializing_if = "is_unset")]
    strategy: Option<u32>,
    #[serde(default, skip_serializing_if = "is_unset")]
    job_size: Option<u32>,
    #[serde(default, skip_serializing_if = "is_unset")]
    overlap_log: Option<u32>,
    #[serde(default, skip_serializing_if = "is_unset")]
    use_checksums: Option<bool>,
    #[serde(default, skip_serializing_if = "is_unset")]
    close_frame_on_flush: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64_bytes")]
    dict: Option<Vec<u8>>,
}

fn default_level() -> i32 {
    ZSTD_CLEVEL_DEFAULT
}

fn is_unset<T: Default + PartialEq>(value: &Option<T>) -> bool {
    value.as_ref().is_none_or(|v| *v == T::default())
}

fn nonzero<T: Default + PartialEq>(value: T) -> Option<T> {
    (value != T::default()).then_some(value)
}

impl From<ZstandardCompressionMetadata> for ZstandardCompression {
    fn from(value: ZstandardCompressionMetadata) -> Self {
        let advanced_parameters_set = value.nb_workers.is_some()
            || value.window_log.is_some()
            || value.hash_log.is_some()
            || value.chain_log.is_some()
            || value.search_log.is_some()
            || value.min_match.is_some()
            || value.target_length.is_some()
            || value.strategy.is_some()
            || value.job_size.is_some()
            || value.overlap_log.is_some()
            || value.use_checksums.is_some()
            || value.close_frame_on_flush.is_some()
            || value.dict.is_some();
        Self {
            level: value.level,
            nb_workers: value.nb_workers.unwrap_or_default(),
            window_log: value.window_log.unwrap_or_default(),
            hash_log: value.hash_log.unwrap_or_default(),
            chain_log: value.chain_log.unwrap_or_default(),
            search_log: value.search_log.unwrap_or_default(),
            min_match: value.min_match.unwrap_or_default(),
            target_length: value.target_length.unwrap_or_default(),
            strategy: value.strategy.unwrap_or_default(),
            job_size: value.job_size.unwrap_or_default(),
            overlap_log: value.overlap_log.unwrap_or_default(),
            use_checksums: value.use_checksums.unwrap_or_default(),
            close_frame_on_flush: value.close_frame_on_flush.unwrap_or_default(),
            dictionary: value.dict,
            advanced_parameters_set,
        }
    }
}

impl From<ZstandardCompression> for ZstandardCompressionMetadata {
    fn from(value: ZstandardCompression) -> Self {
        Self {
            level: value.level,
            nb_workers: None,
            window_log: nonzero(value.window_log),
            hash_log: nonzero(value.hash_log),
            chain_log: nonzero(value.chain_log),
            search_log: nonzero(value.search_log),
            min_match: nonzero(value.min_match),
            target_length: nonzero(value.target_length),
            strategy: nonzero(value.strategy),
            job_size: nonzero(value.job_size),
            overlap_log: nonzero(value.overlap_log),
            use_checksums: nonzero(value.use_checksums),
            close_frame_on_flush: nonzero(value.close_frame_on_flush),
            dict: value.dictionary,
        }
    }
}

mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(
        value: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let Some(s) = Option::<String>::deserialize(deserializer)? else {
            return Ok(None);
        };
        STANDARD
            .decode(s)
            .map(Some)
            .map_err(|e| serde::de::Error::custom(format!("invalid base64 dictionary: {e}")))
    }
}
