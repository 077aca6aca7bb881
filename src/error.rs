//! Error types for the drive upload engine

use thiserror::Error;

/// Result type alias for upload operations
pub type Result<T> = std::result::Result<T, UploadError>;

/// Error types that can occur while uploading a file
#[derive(Error, Debug, Clone)]
pub enum UploadError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Local precondition violation for a chunk; never sent over the wire
    #[error("Invalid chunk range: {0}")]
    InvalidRange(String),

    /// Session creation failed; `status` is `None` when no response arrived
    #[error(
        "Upload session could not be created ({}): {body}",
        .status.map_or_else(|| "no response".to_string(), |s| format!("status {}", s))
    )]
    SessionError { status: Option<u16>, body: String },

    #[error("Requested range not satisfiable: {0}")]
    RangeNotSatisfiable(String),

    #[error("Upload session expired: {0}")]
    SessionExpired(String),

    #[error("Chunk upload failed: {0}")]
    OtherFailure(String),

    #[error("Chunk {start}-{end} failed after {attempts} attempts: {source}")]
    ChunkFailed {
        start: u64,
        end: u64,
        attempts: usize,
        #[source]
        source: Box<UploadError>,
    },

    /// All bytes were acknowledged but the file ID lookup failed
    #[error("Upload bytes succeeded, metadata fetch failed: {message}")]
    MetadataFetchError { status: Option<u16>, message: String },

    #[error("Integrity mismatch: local hash {local}, remote hash {remote}")]
    IntegrityMismatch { local: String, remote: String },

    #[error("Remote hash unavailable after {attempts} attempts: {message}")]
    HashUnavailable { attempts: usize, message: String },

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Local file error: {0}")]
    LocalFile(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Unexpected HTTP status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Upload cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<std::io::Error> for UploadError {
    fn from(err: std::io::Error) -> Self {
        UploadError::IoError(err.to_string())
    }
}

impl UploadError {
    /// Determine if this error is worth another attempt on the same chunk
    ///
    /// Range and session errors are retryable too, but only after the
    /// session has been renewed; see [`UploadError::requires_session_renewal`].
    pub fn should_retry(&self) -> bool {
        match self {
            UploadError::RangeNotSatisfiable(_) => true,
            UploadError::SessionExpired(_) => true,
            UploadError::OtherFailure(_) => true,
            UploadError::IoError(_) => true,
            UploadError::HttpError(_) => true,
            UploadError::UnexpectedStatus { status, .. } => *status == 429 || *status >= 500,

            // Precondition and terminal failures
            UploadError::InvalidRange(_) => false,
            UploadError::ConfigError(_) => false,
            UploadError::SessionError { .. } => false,
            UploadError::ChunkFailed { .. } => false,
            UploadError::LocalFile(_) => false,
            UploadError::ParseError(_) => false,
            UploadError::AuthError(_) => false,
            UploadError::Cancelled => false,
            UploadError::InternalError(_) => false,

            // Follow-up lookups have their own retry loops
            UploadError::MetadataFetchError { .. } => false,
            UploadError::IntegrityMismatch { .. } => false,
            UploadError::HashUnavailable { .. } => false,
        }
    }

    /// Whether the current upload session must be replaced before retrying
    pub fn requires_session_renewal(&self) -> bool {
        matches!(
            self,
            UploadError::RangeNotSatisfiable(_) | UploadError::SessionExpired(_)
        )
    }

    /// Whether the file's bytes are known to be stored remotely despite the error
    ///
    /// True for failures that happen after every chunk was acknowledged:
    /// the file ID lookup, the remote hash lookup and an integrity mismatch.
    pub fn bytes_stored(&self) -> bool {
        matches!(
            self,
            UploadError::MetadataFetchError { .. }
                | UploadError::HashUnavailable { .. }
                | UploadError::IntegrityMismatch { .. }
        )
    }

    /// Create a SessionError, optionally carrying the HTTP status
    pub fn session_error(status: Option<u16>, body: impl Into<String>) -> Self {
        UploadError::SessionError {
            status,
            body: body.into(),
        }
    }

    /// Create a MetadataFetchError, optionally carrying the HTTP status
    pub fn metadata_fetch_error(status: Option<u16>, message: impl Into<String>) -> Self {
        UploadError::MetadataFetchError {
            status,
            message: message.into(),
        }
    }

    /// Create an error from an unexpected HTTP status code
    pub fn from_http_status(status: u16, body: impl Into<String>) -> Self {
        UploadError::UnexpectedStatus {
            status,
            body: body.into(),
        }
    }

    /// HTTP status code carried by this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            UploadError::SessionError { status, .. } => *status,
            UploadError::UnexpectedStatus { status, .. } => Some(*status),
            UploadError::MetadataFetchError { status, .. } => *status,
            _ => None,
        }
    }
}
