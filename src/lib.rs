//! Drive Upload
//!
//! A chunked upload engine for Microsoft Graph drives (OneDrive and
//! SharePoint document libraries).
//!
//! # Overview
//!
//! Large files cannot be sent in a single request. The engine opens an upload
//! session for the remote path, splits the local file into byte ranges and
//! PUTs each range to the session's upload URL with a `Content-Range` header.
//! When the server reports that the session has diverged or expired, the
//! session is replaced and the chunk is retried against the new one. Once
//! every byte is acknowledged the remote file ID is resolved and, optionally,
//! the local QuickXorHash is compared with the one the service computed.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use drive_upload::{DriveUploader, LogProgressSink, UploadConfig, UploadTarget};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = UploadConfig::from_file("drive_upload.yaml")?;
//! let uploader = DriveUploader::from_config(&config)?;
//!
//! let target = UploadTarget::from_local("backup.tar", "backups/backup.tar")?;
//! let outcome = uploader
//!     .upload(&target, &config.policy, Some(Box::new(LogProgressSink::default())))
//!     .await?;
//!
//! println!("Uploaded {} as {}", outcome.remote_path, outcome.file_id);
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`ChunkPlanner`]: Splits a file size into contiguous chunk ranges
//! - [`SessionManager`]: Opens and renews upload sessions
//! - [`ChunkUploader`]: PUTs one chunk and classifies the response
//! - [`UploadCoordinator`]: Runs the worker pool, retries and session renewal
//! - [`IntegrityVerifier`]: Compares local and remote content hashes
//! - [`DriveUploader`]: Ties the pieces together for one remote drive
//!
//! # Configuration
//!
//! Configuration is loaded from a YAML file:
//!
//! ```yaml
//! remote:
//!   client_id: "00000000-0000-0000-0000-000000000000"
//!   refresh_token: "..."
//!   root_folder: "uploads"
//!   base_url: "https://example.sharepoint.com/personal/me/Documents"
//! policy:
//!   chunk_size: 0          # pick from the file size
//!   worker_count: 1        # one chunk in flight per session
//!   max_retries: 3         # attempts per chunk
//!   retry_delay_ms: 5000
//!   conflict_behavior: replace
//! ```
//!
//! See [`UploadConfig`] for all options.

pub mod chunk_planner;
pub mod chunk_uploader;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod graph_client;
pub mod integrity;
pub mod metrics;
pub mod models;
pub mod progress;
pub mod session;
pub mod uploader;

// Re-export commonly used types
pub use chunk_planner::{ChunkPlanner, ChunkRanges};
pub use chunk_uploader::{ChunkOutcome, ChunkUploader};
pub use config::{RemoteConfig, UploadConfig, UploadPolicy};
pub use coordinator::{BackoffStrategy, CancelHandle, RetryPolicy, TransferReport, UploadCoordinator};
pub use error::{Result, UploadError};
pub use graph_client::GraphClient;
pub use integrity::{ContentHasher, IntegrityVerifier, QuickXorHasher};
pub use metrics::{MetricsSnapshot, UploadMetrics};
pub use models::{ChunkRange, DriveItem, IntegrityResult, ProgressEvent, UploadSession, UploadTarget};
pub use progress::{LogProgressSink, ProgressSink};
pub use session::{ConflictBehavior, SessionManager};
pub use uploader::{DriveUploader, UploadOutcome, Verification};
