//! Shared HTTP client for the remote drive API
//!
//! Owns the reqwest client (with its bounded timeout), the OAuth2 token state
//! and the URL layout of drive items. The session manager, chunk uploader and
//! integrity verifier all go through one `GraphClient`.

use crate::config::RemoteConfig;
use crate::error::{Result, UploadError};
use crate::models::DriveItem;
use crate::session::ConflictBehavior;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{Client, Response, Url};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Response bodies quoted in errors are cut to this many bytes
const MAX_ERROR_BODY: usize = 2048;

#[derive(Debug, Clone)]
struct TokenState {
    access_token: String,
    refresh_token: String,
    expiry: Option<DateTime<Utc>>,
}

impl TokenState {
    fn is_valid(&self, now: DateTime<Utc>) -> bool {
        if self.access_token.is_empty() {
            return false;
        }
        match self.expiry {
            Some(expiry) => now < expiry,
            None => true,
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Deserialize)]
struct ItemHashes {
    #[serde(rename = "quickXorHash", default)]
    quick_xor_hash: Option<String>,
}

#[derive(Deserialize)]
struct ItemFile {
    #[serde(default)]
    hashes: Option<ItemHashes>,
}

#[derive(Deserialize)]
struct ItemWithFile {
    #[serde(default)]
    file: Option<ItemFile>,
}

/// Client for the Microsoft Graph drive API
pub struct GraphClient {
    http: Client,
    remote: RemoteConfig,
    token: Mutex<TokenState>,
}

impl GraphClient {
    /// Create a new GraphClient
    ///
    /// # Arguments
    /// * `remote` - Credentials and endpoints of the remote drive
    /// * `timeout` - Client-level timeout applied to every request
    pub fn new(remote: RemoteConfig, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| UploadError::HttpError(format!("Failed to create HTTP client: {}", e)))?;

        let token = TokenState {
            access_token: remote.access_token.clone(),
            refresh_token: remote.refresh_token.clone(),
            expiry: remote.token_expiry,
        };

        Ok(GraphClient {
            http,
            remote,
            token: Mutex::new(token),
        })
    }

    /// The underlying HTTP client, shared with the chunk uploader
    pub fn http(&self) -> &Client {
        &self.http
    }

    pub fn remote(&self) -> &RemoteConfig {
        &self.remote
    }

    /// Return a valid access token, refreshing it first if it has expired
    ///
    /// The token lock is held for the duration of a refresh so concurrent
    /// callers wait for one refresh instead of racing several.
    pub async fn ensure_token_valid(&self) -> Result<String> {
        let mut token = self.token.lock().await;

        if token.is_valid(Utc::now()) {
            return Ok(token.access_token.clone());
        }

        if token.refresh_token.is_empty() {
            return Err(UploadError::AuthError(
                "access token expired and no refresh token is configured".to_string(),
            ));
        }

        info!("Access token expired, refreshing");
        let response = self
            .http
            .post(&self.remote.token_endpoint)
            .form(&[
                ("client_id", self.remote.client_id.as_str()),
                ("client_secret", self.remote.client_secret.as_str()),
                ("refresh_token", token.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| UploadError::AuthError(format!("Token refresh request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = read_body(response).await;
            warn!("Token refresh failed: status={}", status);
            return Err(UploadError::AuthError(format!(
                "failed to refresh token, status: {}, response: {}",
                status.as_u16(),
                body
            )));
        }

        let refreshed: TokenResponse = response
            .json()
            .await
            .map_err(|e| UploadError::AuthError(format!("Failed to parse token response: {}", e)))?;

        token.access_token = refreshed.access_token;
        if let Some(refresh_token) = refreshed.refresh_token {
            token.refresh_token = refresh_token;
        }
        token.expiry = refreshed
            .expires_in
            .and_then(|secs| expiry_after(Utc::now(), secs));

        debug!("Access token refreshed, expiry={:?}", token.expiry);
        Ok(token.access_token.clone())
    }

    /// Build a URL below the configured drive
    ///
    /// Each segment is percent-encoded on its own.
    pub fn drive_url<I, S>(&self, segments: I) -> Result<Url>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut url = Url::parse(&self.remote.graph_endpoint).map_err(|e| {
            UploadError::ConfigError(format!(
                "Invalid graph endpoint '{}': {}",
                self.remote.graph_endpoint, e
            ))
        })?;

        {
            let mut path = url.path_segments_mut().map_err(|_| {
                UploadError::ConfigError(format!(
                    "Graph endpoint '{}' cannot be a base URL",
                    self.remote.graph_endpoint
                ))
            })?;
            path.pop_if_empty();
            if self.remote.drive_id.is_empty() {
                path.extend(["me", "drive"]);
            } else {
                path.extend(["drives", self.remote.drive_id.as_str()]);
            }
            path.extend(segments);
        }

        Ok(url)
    }

    /// Build the path-addressed URL of a drive item
    ///
    /// `root:/a/b.bin` addresses the item itself; with an `action` the URL
    /// becomes `root:/a/b.bin:/{action}`.
    pub fn item_url(&self, remote_path: &str, action: Option<&str>) -> Result<Url> {
        let mut segments = vec!["root:".to_string()];
        segments.extend(
            remote_path
                .split('/')
                .filter(|part| !part.is_empty())
                .map(str::to_string),
        );

        if segments.len() == 1 {
            return Err(UploadError::ConfigError(
                "remote path must not be empty".to_string(),
            ));
        }

        if let Some(action) = action {
            if let Some(last) = segments.last_mut() {
                last.push(':');
            }
            segments.push(action.to_string());
        }

        self.drive_url(segments)
    }

    /// Look up the metadata of the item at `remote_path`
    pub async fn get_item(&self, remote_path: &str) -> Result<DriveItem> {
        let url = self.item_url(remote_path, None)?;
        let token = self.ensure_token_valid().await?;

        debug!("Fetching item metadata for path={}", remote_path);
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| UploadError::HttpError(format!("Failed to fetch file metadata: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = read_body(response).await;
            return Err(UploadError::from_http_status(status.as_u16(), body));
        }

        response
            .json::<DriveItem>()
            .await
            .map_err(|e| UploadError::ParseError(format!("Failed to parse metadata: {}", e)))
    }

    /// Fetch the identifier of the uploaded file
    ///
    /// Every failure is reported as [`UploadError::MetadataFetchError`] so the
    /// caller can tell it apart from a transfer failure.
    pub async fn get_file_id(&self, remote_path: &str) -> Result<String> {
        let item = self
            .get_item(remote_path)
            .await
            .map_err(|e| UploadError::metadata_fetch_error(e.status(), e.to_string()))?;

        if item.id.is_empty() {
            return Err(UploadError::metadata_fetch_error(
                None,
                "file ID not found in metadata",
            ));
        }

        info!("Resolved file ID for path={}: {}", remote_path, item.id);
        Ok(item.id)
    }

    /// Fetch the QuickXorHash the remote service computed for `file_id`
    pub async fn get_quick_xor_hash(&self, file_id: &str) -> Result<String> {
        let url = self.drive_url(["items", file_id])?;
        let token = self.ensure_token_valid().await?;

        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| UploadError::HttpError(format!("Failed to fetch file metadata: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = read_body(response).await;
            return Err(UploadError::from_http_status(status.as_u16(), body));
        }

        let item: ItemWithFile = response
            .json()
            .await
            .map_err(|e| UploadError::ParseError(format!("Failed to parse metadata: {}", e)))?;

        item.file
            .and_then(|file| file.hashes)
            .and_then(|hashes| hashes.quick_xor_hash)
            .filter(|hash| !hash.is_empty())
            .ok_or_else(|| UploadError::ParseError("quickXorHash not found in metadata".to_string()))
    }

    /// Create an empty file at `remote_path` with a single content PUT
    ///
    /// Upload sessions cannot carry a zero-length body, so empty files take
    /// this path instead.
    pub async fn create_empty_file(
        &self,
        remote_path: &str,
        conflict_behavior: ConflictBehavior,
    ) -> Result<DriveItem> {
        let mut url = self.item_url(remote_path, Some("content"))?;
        url.query_pairs_mut()
            .append_pair("@microsoft.graph.conflictBehavior", conflict_behavior.as_str());
        let token = self.ensure_token_valid().await?;

        info!("Creating empty file at path={}", remote_path);
        let response = self
            .http
            .put(url)
            .bearer_auth(token)
            .header(http::header::CONTENT_TYPE, "application/octet-stream")
            .body(Vec::new())
            .send()
            .await
            .map_err(|e| UploadError::HttpError(format!("Failed to create empty file: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = read_body(response).await;
            return Err(UploadError::from_http_status(status.as_u16(), body));
        }

        response
            .json::<DriveItem>()
            .await
            .map_err(|e| UploadError::ParseError(format!("Failed to parse created item: {}", e)))
    }
}

/// Read a response body for diagnostics, truncated to a bounded size
pub(crate) async fn read_body(response: Response) -> String {
    match response.text().await {
        Ok(mut body) => {
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            body
        }
        Err(e) => format!("<unreadable body: {}>", e),
    }
}

/// Expiry instant `expires_in` seconds after `now`
///
/// `None` when the server's value does not fit a timestamp; the token is then
/// treated as having no known expiry.
fn expiry_after(now: DateTime<Utc>, expires_in: i64) -> Option<DateTime<Utc>> {
    let lifetime = ChronoDuration::try_seconds(expires_in);
    if lifetime.is_none() {
        warn!("Ignoring out-of-range token lifetime: expires_in={}", expires_in);
    }
    lifetime.and_then(|lifetime| now.checked_add_signed(lifetime))
}
