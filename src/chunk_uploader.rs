//! Chunk uploader
//!
//! Sends one byte range to an upload session and classifies the response.

use crate::error::{Result, UploadError};
use crate::graph_client::read_body;
use crate::models::ChunkRange;
use bytes::Bytes;
use http::header::{CONTENT_RANGE, CONTENT_TYPE};
use http::StatusCode;
use reqwest::Client;
use tracing::{debug, warn};

/// Marker in a 409 body meaning the upload session was invalidated
///
/// Matching on the body text is a compatibility shim for the current error
/// format; the status code alone does not distinguish it from other conflicts.
pub const SESSION_INVALIDATED_MARKER: &str = "resourceModified";

/// Classified result of a single chunk PUT
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// The server accepted the chunk (200, 201 or 202)
    Success { status: u16 },
    /// The session expects a different offset (416)
    RangeNotSatisfiable { body: String },
    /// The session is no longer valid (409 with the invalidation marker)
    SessionExpired { body: String },
    /// Anything else, including transport failures; retryable on the same session
    OtherFailure { status: Option<u16>, message: String },
}

impl ChunkOutcome {
    /// Classify an HTTP response status and body
    pub fn classify(status: StatusCode, body: &str) -> Self {
        match status {
            StatusCode::OK | StatusCode::CREATED | StatusCode::ACCEPTED => ChunkOutcome::Success {
                status: status.as_u16(),
            },
            StatusCode::RANGE_NOT_SATISFIABLE => ChunkOutcome::RangeNotSatisfiable {
                body: body.to_string(),
            },
            StatusCode::CONFLICT if body.contains(SESSION_INVALIDATED_MARKER) => {
                ChunkOutcome::SessionExpired {
                    body: body.to_string(),
                }
            }
            other => ChunkOutcome::OtherFailure {
                status: Some(other.as_u16()),
                message: format!("upload failed: status {}, response: {}", other.as_u16(), body),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ChunkOutcome::Success { .. })
    }

    /// Whether the session must be replaced before the next attempt
    pub fn requires_session_renewal(&self) -> bool {
        matches!(
            self,
            ChunkOutcome::RangeNotSatisfiable { .. } | ChunkOutcome::SessionExpired { .. }
        )
    }

    /// The error this outcome represents, or `None` for success
    pub fn into_error(self) -> Option<UploadError> {
        match self {
            ChunkOutcome::Success { .. } => None,
            ChunkOutcome::RangeNotSatisfiable { body } => Some(UploadError::RangeNotSatisfiable(body)),
            ChunkOutcome::SessionExpired { body } => Some(UploadError::SessionExpired(body)),
            ChunkOutcome::OtherFailure { message, .. } => Some(UploadError::OtherFailure(message)),
        }
    }
}

/// Validate a chunk before it is sent
///
/// Requires `start <= end < total_size` and `data_len == end - start + 1`.
pub fn validate_chunk(data_len: usize, start: u64, end: u64, total_size: u64) -> Result<()> {
    if start > end || end >= total_size {
        return Err(UploadError::InvalidRange(format!(
            "start={}, end={}, total={}",
            start, end, total_size
        )));
    }

    let expected = end - start + 1;
    if data_len as u64 != expected {
        return Err(UploadError::InvalidRange(format!(
            "chunk size mismatch: got {} bytes, expected {} bytes",
            data_len, expected
        )));
    }

    Ok(())
}

/// Uploads single chunks to a session's upload URL
#[derive(Clone)]
pub struct ChunkUploader {
    http: Client,
}

impl ChunkUploader {
    /// Create a new ChunkUploader sharing the given HTTP client
    pub fn new(http: Client) -> Self {
        ChunkUploader { http }
    }

    /// PUT one chunk to `upload_url`
    ///
    /// # Arguments
    /// * `upload_url` - The session's pre-authorized upload URL
    /// * `data` - The chunk's bytes
    /// * `start` - Offset of the first byte in the whole file
    /// * `end` - Offset of the last byte in the whole file (inclusive)
    /// * `total_size` - Size of the whole file
    ///
    /// # Returns
    /// * `Ok(ChunkOutcome)` for every response, and for transport failures
    /// * `Err(UploadError::InvalidRange)` without any network call when the
    ///   range or data length is inconsistent
    pub async fn put_chunk(
        &self,
        upload_url: &str,
        data: Bytes,
        start: u64,
        end: u64,
        total_size: u64,
    ) -> Result<ChunkOutcome> {
        validate_chunk(data.len(), start, end, total_size)?;

        let content_range = ChunkRange { start, end }.to_content_range(total_size);
        debug!("PUT chunk {}", content_range);

        // The upload URL is pre-authorized; no bearer token is sent
        let response = match self
            .http
            .put(upload_url)
            .header(CONTENT_RANGE, content_range.as_str())
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Chunk {} request failed: {}", content_range, e);
                return Ok(ChunkOutcome::OtherFailure {
                    status: None,
                    message: format!("failed to upload chunk: {}", e),
                });
            }
        };

        let status = response.status();
        let body = if matches!(status, StatusCode::OK | StatusCode::CREATED | StatusCode::ACCEPTED) {
            String::new()
        } else {
            read_body(response).await
        };

        let outcome = ChunkOutcome::classify(status, &body);
        if !outcome.is_success() {
            debug!("Chunk {} rejected: {:?}", content_range, outcome);
        }
        Ok(outcome)
    }
}
