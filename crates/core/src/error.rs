use thiserror::Error;

/// Failures raised by the persistence backends.
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

    #[error("store request failed: {0}")]
    Request(String),

    #[error("document not found: {0}")]
    DocumentNotFound(String),
}

/// Failures raised by the external providers (embedding, answer generation).
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{provider} returned status {status}")]
    Status { provider: String, status: String },

    #[error("malformed {provider} response: {details}")]
    Malformed { provider: String, details: String },
}

/// Failures on the indexing path. The lifecycle controller is the only place
/// these turn into a document status transition.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("file missing: {0}")]
    MissingFile(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("unsupported content kind: {0}")]
    UnsupportedContentKind(String),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("no chunks could be extracted")]
    NoChunksExtracted,

    #[error("no chunks could be persisted")]
    NothingPersisted,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Failures on the query path. Unavailability is deliberately distinct from
/// an empty result set so callers can tell an outage from a miss.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("search unavailable: {0}")]
    SearchUnavailable(String),

    #[error("answer generation unavailable: {0}")]
    AnswerUnavailable(String),
}
