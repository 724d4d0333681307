//! Provider-neutral error taxonomy (C10)
//!
//! Every provider adapter wraps its native transport/SDK errors into one of the
//! seven categories below, preserving the original as a nested cause. Nothing in
//! this crate silently swallows an error or fabricates a success on failure.

use thiserror::Error;

/// Result type alias used throughout the engine.
pub type Result<T> = std::result::Result<T, EngineError>;

/// The seven provider-neutral error categories of spec §7.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Invalid or missing credentials. Not retried.
    #[error("authentication error: {0}")]
    Auth(String),

    /// Parse failures, contract violations, bad parameters. Not retried.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Unknown model or resource. Not retried.
    #[error("not found: {0}")]
    NotFound(String),

    /// Provider rate limit hit. Retried with backoff, bounded by `max_retries`.
    #[error("rate limit exceeded: {0}")]
    RateLimit(String),

    /// Transport or deadline-exceeded timeout. Retried, same policy as `RateLimit`.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Provider 5xx. Retried, same policy as `RateLimit`.
    #[error("provider server error: {0}")]
    Server(String),

    /// Fallback category for anything that doesn't fit the above. Not retried.
    #[error("error: {0}")]
    Generic(String),

    /// JSON (de)serialization failure, most often while normalising a fingerprint
    /// or parsing a strict-JSON model response.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transport-level failure from the HTTP client itself.
    #[error("http client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Local I/O failure (disk cache read/write).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// The category of an [`EngineError`], used for retry policy and HTTP status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Auth,
    InvalidRequest,
    NotFound,
    RateLimit,
    Timeout,
    Server,
    Generic,
}

impl EngineError {
    /// Classify this error into one of the seven spec categories.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Auth(_) => ErrorKind::Auth,
            EngineError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::RateLimit(_) => ErrorKind::RateLimit,
            EngineError::Timeout(_) => ErrorKind::Timeout,
            EngineError::Server(_) => ErrorKind::Server,
            EngineError::Generic(_) => ErrorKind::Generic,
            EngineError::Serialization(_) => ErrorKind::InvalidRequest,
            EngineError::HttpClient(e) if e.is_timeout() => ErrorKind::Timeout,
            EngineError::HttpClient(_) => ErrorKind::Server,
            EngineError::Io(_) => ErrorKind::Generic,
        }
    }

    /// Whether the documented retry policy applies (RateLimit and Timeout are the
    /// only categories retried "with backoff" per spec §7; Server is retried too,
    /// with the same bounded-by-`max_retries` policy).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::RateLimit | ErrorKind::Timeout | ErrorKind::Server
        )
    }

    /// HTTP status code an external adapter would surface for this category.
    pub fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::Auth => 401,
            ErrorKind::InvalidRequest => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::RateLimit => 429,
            ErrorKind::Timeout => 504,
            ErrorKind::Server => 502,
            ErrorKind::Generic => 502,
        }
    }

    /// Structured payload shape from spec §7: `{message, type, code, provider, details?}`.
    pub fn to_payload(&self, provider: &str) -> ErrorPayload {
        ErrorPayload {
            message: self.to_string(),
            error_type: format!("{:?}", self.kind()),
            code: self.http_status(),
            provider: provider.to_string(),
            details: None,
        }
    }
}

/// Structured error payload surfaced by the engine, per spec §7.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
    pub code: u16,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}
