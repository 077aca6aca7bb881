//! Upload facade
//!
//! [`DriveUploader`] wires the session manager, coordinator and integrity
//! verifier together for one remote drive and turns a finished transfer into
//! an [`UploadOutcome`].

use crate::config::{RemoteConfig, UploadConfig, UploadPolicy};
use crate::coordinator::{check_local_file, CancelHandle, UploadCoordinator};
use crate::error::{Result, UploadError};
use crate::graph_client::GraphClient;
use crate::integrity::{ContentHasher, IntegrityVerifier};
use crate::metrics::{MetricsSnapshot, UploadMetrics};
use crate::models::{IntegrityResult, ProgressEvent, UploadTarget};
use crate::progress::ProgressSink;
use crate::session::SessionManager;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Result of the post-upload hash comparison
#[derive(Debug, Clone)]
pub enum Verification {
    /// Hash verification was turned off
    Skipped,
    /// Both hashes were obtained; `matched` tells whether they agree
    Verified(IntegrityResult),
    /// The comparison could not be made; the bytes are still stored
    Unavailable(UploadError),
}

impl Verification {
    /// True only for a completed comparison whose hashes agree
    pub fn is_match(&self) -> bool {
        matches!(self, Verification::Verified(result) if result.matched)
    }
}

/// A successful upload
///
/// Verification problems are reported here and never turn a stored upload
/// into an error.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub file_id: String,
    /// Remote path including the configured root folder
    pub remote_path: String,
    pub download_url: Option<String>,
    pub bytes_uploaded: u64,
    pub metrics: MetricsSnapshot,
    pub verification: Verification,
}

/// Uploads local files to one remote drive
pub struct DriveUploader {
    client: Arc<GraphClient>,
    cancel: CancelHandle,
    hasher: Option<Arc<dyn ContentHasher>>,
}

impl DriveUploader {
    /// Create an uploader for `remote`
    ///
    /// `request_timeout` bounds every HTTP request the uploader makes.
    pub fn new(remote: RemoteConfig, request_timeout: Duration) -> Result<Self> {
        remote.validate()?;
        let client = GraphClient::new(remote, request_timeout)?;
        Ok(DriveUploader {
            client: Arc::new(client),
            cancel: CancelHandle::new(),
            hasher: None,
        })
    }

    /// Create an uploader from a loaded configuration file
    pub fn from_config(config: &UploadConfig) -> Result<Self> {
        config.validate()?;
        Self::new(config.remote.clone(), config.policy.request_timeout())
    }

    /// Replace the local hasher used for verification
    pub fn with_hasher(mut self, hasher: Arc<dyn ContentHasher>) -> Self {
        self.hasher = Some(hasher);
        self
    }

    /// Handle that stops uploads started by this uploader from claiming new chunks
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn client(&self) -> &Arc<GraphClient> {
        &self.client
    }

    /// Upload `target` according to `policy`
    ///
    /// # Returns
    /// * `Ok(UploadOutcome)` once every byte is stored and the file ID is known
    /// * `Err(UploadError)` for transfer failures, or
    ///   `Err(UploadError::MetadataFetchError)` when the bytes were stored but
    ///   the file ID could not be resolved
    pub async fn upload(
        &self,
        target: &UploadTarget,
        policy: &UploadPolicy,
        sink: Option<Box<dyn ProgressSink>>,
    ) -> Result<UploadOutcome> {
        policy.validate()?;

        let remote = self.client.remote();
        let remote_path = remote.full_remote_path(&target.remote_path);
        if remote_path.is_empty() {
            return Err(UploadError::ConfigError("remote path must not be empty".to_string()));
        }

        let transfer_target = UploadTarget {
            remote_path: remote_path.clone(),
            ..target.clone()
        };

        let metrics = Arc::new(UploadMetrics::new());
        let (file_id, bytes_uploaded) = if target.total_size == 0 {
            let file_id = self.upload_empty(target, &remote_path, policy, sink).await?;
            (file_id, 0)
        } else {
            let sessions = Arc::new(SessionManager::new(
                Arc::clone(&self.client),
                policy.conflict_behavior,
            ));
            let coordinator = UploadCoordinator::new(
                Arc::clone(&self.client),
                sessions,
                policy.retry_policy(),
                policy.worker_count,
            )
            .with_metrics(Arc::clone(&metrics))
            .with_cancel_handle(self.cancel.clone());

            let chunk_size = policy.effective_chunk_size(target.total_size);
            let report = coordinator.run(&transfer_target, chunk_size, sink).await?;
            (report.file_id, report.bytes_uploaded)
        };

        info!("File uploaded successfully: {} (id {})", remote_path, file_id);

        let download_url = remote.download_url(&target.remote_path);
        if let Some(url) = &download_url {
            info!("Download URL: {}", url);
        }

        let verification = if policy.verify_hash {
            self.verify(target, &file_id, policy).await
        } else {
            info!("Skipping hash verification");
            Verification::Skipped
        };

        Ok(UploadOutcome {
            file_id,
            remote_path,
            download_url,
            bytes_uploaded,
            metrics: metrics.get_stats(),
            verification,
        })
    }

    /// Empty files cannot go through an upload session; create them directly
    async fn upload_empty(
        &self,
        target: &UploadTarget,
        remote_path: &str,
        policy: &UploadPolicy,
        sink: Option<Box<dyn ProgressSink>>,
    ) -> Result<String> {
        check_local_file(&target.local_path).await?;
        if self.cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let item = self
            .client
            .create_empty_file(remote_path, policy.conflict_behavior)
            .await?;

        if let Some(mut sink) = sink {
            sink.on_progress(ProgressEvent {
                bytes_uploaded: 0,
                total_size: 0,
            });
        }

        if item.id.is_empty() {
            return self.client.get_file_id(remote_path).await;
        }
        Ok(item.id)
    }

    async fn verify(&self, target: &UploadTarget, file_id: &str, policy: &UploadPolicy) -> Verification {
        let mut verifier = IntegrityVerifier::new(
            Arc::clone(&self.client),
            policy.hash_retries,
            policy.hash_retry_delay(),
        );
        if let Some(hasher) = &self.hasher {
            verifier = verifier.with_hasher(Arc::clone(hasher));
        }

        match verifier.verify(&target.local_path, file_id).await {
            Ok(result) => Verification::Verified(result),
            Err(e) => {
                warn!("Could not verify file integrity: {}", e);
                Verification::Unavailable(e)
            }
        }
    }
}
