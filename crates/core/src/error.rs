use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("index file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("embedding dimension {actual} does not match collection dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("store request failed: {0}")]
    Request(String),
}

impl StoreError {
    pub(crate) fn backend(backend: impl Into<String>, details: impl Into<String>) -> Self {
        Self::BackendResponse {
            backend: backend.into(),
            details: details.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown vector store type: {0}")]
    UnknownBackend(String),

    #[error("{backend} requires `{field}` (set it in the config or environment)")]
    MissingCredential { backend: String, field: String },

    #[error("invalid value for `{field}`: {details}")]
    InvalidValue { field: String, details: String },

    #[error("could not read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("backend setup failed: {0}")]
    Connect(#[from] StoreError),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
