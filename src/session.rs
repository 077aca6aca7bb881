//! Upload session management
//!
//! Opens the server-side session that tracks a multi-request upload, and
//! opens replacements when the server reports the current one invalid.

use crate::error::{Result, UploadError};
use crate::graph_client::{read_body, GraphClient};
use crate::models::UploadSession;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What the server does when a file already exists at the remote path
///
/// Applied once, when the session is created; chunk requests never carry it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictBehavior {
    /// Overwrite the existing file
    #[default]
    Replace,
    /// Keep the existing file and store the upload under a new name
    Rename,
    /// Reject the upload
    Fail,
}

impl ConflictBehavior {
    /// Value of the `@microsoft.graph.conflictBehavior` annotation
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictBehavior::Replace => "replace",
            ConflictBehavior::Rename => "rename",
            ConflictBehavior::Fail => "fail",
        }
    }
}

#[derive(Deserialize)]
struct CreateSessionResponse {
    #[serde(rename = "uploadUrl", default)]
    upload_url: Option<String>,
    #[serde(rename = "expirationDateTime", default)]
    expiration: Option<String>,
}

/// Creates upload sessions against the remote drive
pub struct SessionManager {
    client: Arc<GraphClient>,
    conflict_behavior: ConflictBehavior,
}

impl SessionManager {
    /// Create a new SessionManager
    ///
    /// # Arguments
    /// * `client` - Shared drive API client
    /// * `conflict_behavior` - Sent with every session request
    pub fn new(client: Arc<GraphClient>, conflict_behavior: ConflictBehavior) -> Self {
        SessionManager {
            client,
            conflict_behavior,
        }
    }

    pub fn conflict_behavior(&self) -> ConflictBehavior {
        self.conflict_behavior
    }

    /// Open a new upload session for `remote_path`
    ///
    /// # Returns
    /// * `Ok(UploadSession)` holding the server-issued upload URL
    /// * `Err(UploadError::SessionError)` on any non-2xx response, with the
    ///   status code and response body, and on transport failures or a
    ///   response without a usable `uploadUrl`
    pub async fn open_session(&self, remote_path: &str) -> Result<UploadSession> {
        let upload_url = self.request_upload_url(remote_path).await?;
        info!("Upload session created for path={}", remote_path);
        Ok(UploadSession::new(upload_url))
    }

    /// Open a session that replaces `stale`
    ///
    /// The stale session's URL is dropped; the replacement carries the next
    /// generation number.
    pub async fn renew_session(&self, remote_path: &str, stale: &UploadSession) -> Result<UploadSession> {
        let upload_url = self.request_upload_url(remote_path).await?;
        let renewed = stale.replaced_by(upload_url);
        info!(
            "Upload session renewed for path={} (generation {} -> {})",
            remote_path, stale.generation, renewed.generation
        );
        Ok(renewed)
    }

    async fn request_upload_url(&self, remote_path: &str) -> Result<String> {
        let url = self.client.item_url(remote_path, Some("createUploadSession"))?;
        let token = self.client.ensure_token_valid().await?;

        let body = json!({
            "item": {
                "@microsoft.graph.conflictBehavior": self.conflict_behavior.as_str(),
            }
        });

        debug!(
            "Requesting upload session: path={}, conflict_behavior={}",
            remote_path,
            self.conflict_behavior.as_str()
        );

        let response = self
            .client
            .http()
            .post(url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| UploadError::session_error(None, format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = read_body(response).await;
            warn!(
                "Upload session request failed for path={}: status={}",
                remote_path, status
            );
            return Err(UploadError::session_error(Some(status.as_u16()), body));
        }

        let parsed: CreateSessionResponse = response.json().await.map_err(|e| {
            UploadError::session_error(
                Some(status.as_u16()),
                format!("malformed upload session response: {}", e),
            )
        })?;

        if let Some(expiration) = &parsed.expiration {
            debug!("Upload session expires at {}", expiration);
        }

        parsed
            .upload_url
            .filter(|url| !url.is_empty())
            .ok_or_else(|| {
                UploadError::session_error(
                    Some(status.as_u16()),
                    "uploadUrl missing from upload session response",
                )
            })
    }
}
