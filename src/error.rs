pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    General(String),
    /// A configuration value was rejected before any data was processed.
    #[error("invalid zstd configuration: {0}")]
    Configuration(String),
    /// The engine failed while compressing.
    #[error("zstd compression failed: {0}")]
    Encode(String),
    /// The input could not be decompressed: malformed frame, checksum mismatch,
    /// window too large, or the wrong dictionary.
    #[error("zstd decompression failed: {0}")]
    Decode(String),
    /// A context or buffer could not be acquired.
    #[error("zstd resource unavailable: {0}")]
    Resource(String),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Wrapped(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    pub fn general(message: impl Into<String>) -> Self {
        Self::General(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn wrap(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Wrapped(Box::new(error))
    }

    /// Whether this error describes bad input data rather than a fault in the caller's setup.
    pub fn is_corrupt_input(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}

impl From<Error> for std::io::Error {
    fn from(value: Error) -> Self {
        match value {
            Error::Io(e) => e,
            Error::Decode(_) => std::io::Error::new(std::io::ErrorKind::InvalidData, value),
            Error::Configuration(_) => std::io::Error::new(std::io::ErrorKind::InvalidInput, value),
            Error::Resource(_) => std::io::Error::new(std::io::ErrorKind::OutOfMemory, value),
            e => std::io::Error::other(e),
        }
    }
}
