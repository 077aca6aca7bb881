//! Configuration management for the drive upload engine

use crate::coordinator::{BackoffStrategy, RetryPolicy};
use crate::error::{Result, UploadError};
use crate::session::ConflictBehavior;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Largest chunk size accepted from the user; larger values are capped
pub const MAX_USER_CHUNK_SIZE: u64 = 10 * 1024 * 1024;

/// Top-level configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Remote drive credentials and endpoints
    pub remote: RemoteConfig,

    /// Upload tuning
    #[serde(default)]
    pub policy: UploadPolicy,
}

/// Credentials and endpoints of one remote drive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default)]
    pub client_id: String,

    #[serde(default)]
    pub client_secret: String,

    #[serde(default)]
    pub access_token: String,

    #[serde(default)]
    pub refresh_token: String,

    /// Expiry of `access_token`; unknown expiry is treated as still valid
    #[serde(default)]
    pub token_expiry: Option<DateTime<Utc>>,

    /// Drive to upload into; empty means the signed-in user's drive
    #[serde(default)]
    pub drive_id: String,

    /// Folder every remote path is placed under
    #[serde(default)]
    pub root_folder: String,

    /// Public base URL used to build download links
    #[serde(default)]
    pub base_url: String,

    /// Graph API endpoint (default: "https://graph.microsoft.com/v1.0")
    #[serde(default = "default_graph_endpoint")]
    pub graph_endpoint: String,

    /// OAuth2 token endpoint used for the refresh-token grant
    #[serde(default = "default_token_endpoint")]
    pub token_endpoint: String,
}

/// Tuning for one upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadPolicy {
    /// Chunk size in bytes; 0 selects a size from the file size tiers
    #[serde(default)]
    pub chunk_size: u64,

    /// Number of parallel chunk workers (default: 1)
    ///
    /// A single worker keeps one chunk in flight per session, which avoids
    /// spurious range conflicts at the cost of throughput.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Total attempts per chunk (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Delay between chunk attempts in milliseconds (default: 5000)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// How the delay grows between attempts (default: fixed)
    #[serde(default)]
    pub backoff: BackoffStrategy,

    /// Attempts to fetch the remote hash (default: 5)
    #[serde(default = "default_hash_retries")]
    pub hash_retries: usize,

    /// Delay between remote hash attempts in milliseconds (default: 10000)
    #[serde(default = "default_hash_retry_delay_ms")]
    pub hash_retry_delay_ms: u64,

    /// Whether to compare content hashes after upload (default: true)
    #[serde(default = "default_true")]
    pub verify_hash: bool,

    /// What the server does when the remote path already exists
    #[serde(default)]
    pub conflict_behavior: ConflictBehavior,

    /// Client-level timeout for every HTTP request in milliseconds (default: 120000)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_graph_endpoint() -> String {
    "https://graph.microsoft.com/v1.0".to_string()
}

fn default_token_endpoint() -> String {
    "https://login.microsoftonline.com/common/oauth2/v2.0/token".to_string()
}

fn default_worker_count() -> usize {
    1
}

fn default_max_retries() -> usize {
    3
}

fn default_retry_delay_ms() -> u64 {
    5_000
}

fn default_hash_retries() -> usize {
    5
}

fn default_hash_retry_delay_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    120_000
}

fn default_true() -> bool {
    true
}

impl Default for RemoteConfig {
    fn default() -> Self {
        RemoteConfig {
            client_id: String::new(),
            client_secret: String::new(),
            access_token: String::new(),
            refresh_token: String::new(),
            token_expiry: None,
            drive_id: String::new(),
            root_folder: String::new(),
            base_url: String::new(),
            graph_endpoint: default_graph_endpoint(),
            token_endpoint: default_token_endpoint(),
        }
    }
}

impl Default for UploadPolicy {
    fn default() -> Self {
        UploadPolicy {
            chunk_size: 0,
            worker_count: default_worker_count(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            backoff: BackoffStrategy::default(),
            hash_retries: default_hash_retries(),
            hash_retry_delay_ms: default_hash_retry_delay_ms(),
            verify_hash: default_true(),
            conflict_behavior: ConflictBehavior::default(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl UploadConfig {
    /// Load configuration from a YAML file
    ///
    /// # Returns
    /// * `Ok(UploadConfig)` if loading and validation succeed
    /// * `Err(UploadError)` if the file cannot be read or the config is invalid
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            UploadError::ConfigError(format!("Failed to read config file: {}", e))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: UploadConfig = serde_yaml::from_str(content).map_err(|e| {
            UploadError::ConfigError(format!("Failed to parse config file: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.remote.validate()?;
        self.policy.validate()
    }
}

impl RemoteConfig {
    /// Validate the remote configuration
    ///
    /// # Validation Rules
    /// - either an access token or a refresh token must be present
    /// - a refresh token requires a client_id
    /// - endpoints must be absolute http(s) URLs
    pub fn validate(&self) -> Result<()> {
        if self.access_token.is_empty() && self.refresh_token.is_empty() {
            return Err(UploadError::ConfigError(
                "remote needs an access_token or a refresh_token".to_string(),
            ));
        }

        if !self.refresh_token.is_empty() && self.client_id.is_empty() {
            return Err(UploadError::ConfigError(
                "client_id is required to refresh tokens".to_string(),
            ));
        }

        for (name, endpoint) in [
            ("graph_endpoint", &self.graph_endpoint),
            ("token_endpoint", &self.token_endpoint),
        ] {
            let url = reqwest::Url::parse(endpoint).map_err(|e| {
                UploadError::ConfigError(format!("Invalid {} '{}': {}", name, endpoint, e))
            })?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(UploadError::ConfigError(format!(
                    "{} must use http or https, got '{}'",
                    name, endpoint
                )));
            }
        }

        Ok(())
    }

    /// Join the configured root folder with a caller-supplied remote path
    pub fn full_remote_path(&self, remote_path: &str) -> String {
        let root = self.root_folder.trim_matches('/');
        let path = remote_path.trim_matches('/');
        if root.is_empty() {
            path.to_string()
        } else {
            format!("{}/{}", root, path)
        }
    }

    /// Public download link for a remote path, if a base URL is configured
    ///
    /// The link is relative to the root folder, so `remote_path` is the
    /// caller's path without the root folder prefix.
    pub fn download_url(&self, remote_path: &str) -> Option<String> {
        if self.base_url.is_empty() {
            return None;
        }
        let path = remote_path.trim_matches('/').replace('\\', "/").replace(' ', "%20");
        Some(format!("{}/{}", self.base_url.trim_end_matches('/'), path))
    }
}

impl UploadPolicy {
    /// Validate the policy
    ///
    /// # Validation Rules
    /// - worker_count, max_retries and hash_retries must be > 0
    /// - request_timeout_ms must be > 0
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(UploadError::ConfigError(
                "worker_count must be greater than 0".to_string(),
            ));
        }

        if self.max_retries == 0 {
            return Err(UploadError::ConfigError(
                "max_retries must be greater than 0".to_string(),
            ));
        }

        if self.hash_retries == 0 {
            return Err(UploadError::ConfigError(
                "hash_retries must be greater than 0".to_string(),
            ));
        }

        if self.request_timeout_ms == 0 {
            return Err(UploadError::ConfigError(
                "request_timeout_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Resolve the chunk size for a file of `total_size` bytes
    ///
    /// Zero selects the tiered size; user values above
    /// [`MAX_USER_CHUNK_SIZE`] are capped.
    pub fn effective_chunk_size(&self, total_size: u64) -> u64 {
        match self.chunk_size {
            0 => crate::chunk_planner::chunk_size_for(total_size),
            size if size > MAX_USER_CHUNK_SIZE => {
                warn!(
                    "Reducing chunk size from {} to {} bytes for reliability",
                    size, MAX_USER_CHUNK_SIZE
                );
                MAX_USER_CHUNK_SIZE
            }
            size => size,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.retry_delay_ms),
            self.backoff,
        )
    }

    pub fn hash_retry_delay(&self) -> Duration {
        Duration::from_millis(self.hash_retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
