//! Upload coordinator
//!
//! Drives every planned range through the chunk uploader with a pool of
//! workers. Each chunk moves through `Pending -> InFlight -> Succeeded`, or
//! through `Retrying` back to `InFlight` until its attempts run out and it
//! becomes `Failed`.
//!
//! Shared state (acknowledged bytes, first error, current session, progress
//! sink) lives in one [`TransferState`] behind a single mutex. The lock is
//! held only while that state changes, never across a network call.

use crate::chunk_planner::{ChunkPlanner, ChunkRanges};
use crate::chunk_uploader::ChunkUploader;
use crate::error::{Result, UploadError};
use crate::graph_client::GraphClient;
use crate::metrics::{MetricsSnapshot, UploadMetrics};
use crate::models::{ChunkRange, ProgressEvent, UploadSession, UploadTarget};
use crate::progress::ProgressSink;
use crate::session::SessionManager;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Largest multiplier applied by exponential backoff
const MAX_BACKOFF_SHIFT: u32 = 6;

/// How the delay between attempts grows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// The same delay before every retry
    #[default]
    Fixed,
    /// The delay doubles after every attempt, up to 64 times the base
    Exponential,
}

/// Retry policy for chunk uploads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per chunk, including the first one
    pub max_attempts: usize,
    /// Base delay between attempts
    pub delay: Duration,
    pub backoff: BackoffStrategy,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, delay: Duration, backoff: BackoffStrategy) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            delay,
            backoff,
        }
    }

    /// Check if another attempt is allowed after `attempts` have been made
    pub fn should_retry(&self, attempts: usize) -> bool {
        attempts < self.max_attempts
    }

    /// Get the delay to wait after attempt number `attempt` (1-based) failed
    pub fn backoff_duration(&self, attempt: usize) -> Duration {
        match self.backoff {
            BackoffStrategy::Fixed => self.delay,
            BackoffStrategy::Exponential => {
                let shift = (attempt.saturating_sub(1) as u32).min(MAX_BACKOFF_SHIFT);
                self.delay.saturating_mul(1u32 << shift)
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::new(3, Duration::from_secs(5), BackoffStrategy::Fixed)
    }
}

/// Handle for stopping an upload from another task
///
/// Cancelling stops workers from claiming new ranges. Requests already in
/// flight complete or time out on their own.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Mutable state shared by all workers of one transfer
pub struct TransferState {
    total_size: u64,
    bytes_uploaded: u64,
    last_error: Option<UploadError>,
    session: UploadSession,
    sink: Option<Box<dyn ProgressSink>>,
}

impl TransferState {
    pub fn new(total_size: u64, session: UploadSession, sink: Option<Box<dyn ProgressSink>>) -> Self {
        TransferState {
            total_size,
            bytes_uploaded: 0,
            last_error: None,
            session,
            sink,
        }
    }

    pub fn bytes_uploaded(&self) -> u64 {
        self.bytes_uploaded
    }

    pub fn session(&self) -> &UploadSession {
        &self.session
    }

    pub fn last_error(&self) -> Option<&UploadError> {
        self.last_error.as_ref()
    }

    /// Add an acknowledged chunk and publish progress
    ///
    /// The sink runs inside this call, so it sees events one at a time and
    /// in non-decreasing order.
    pub fn record_success(&mut self, bytes: u64) -> ProgressEvent {
        self.bytes_uploaded += bytes;
        let event = ProgressEvent {
            bytes_uploaded: self.bytes_uploaded,
            total_size: self.total_size,
        };
        if let Some(sink) = self.sink.as_mut() {
            sink.on_progress(event);
        }
        event
    }

    /// Record a terminal failure; returns `false` if an earlier one already won
    pub fn record_failure(&mut self, err: UploadError) -> bool {
        if let Some(first) = &self.last_error {
            warn!("Suppressed failure after first error ({}): {}", first, err);
            return false;
        }
        error!("Upload failed: {}", err);
        self.last_error = Some(err);
        true
    }

    /// Install `renewed` unless another worker already moved past `stale_generation`
    fn replace_session(&mut self, stale_generation: u64, renewed: UploadSession) -> bool {
        if self.session.generation != stale_generation {
            return false;
        }
        self.session = renewed;
        true
    }
}

/// Result of a completed transfer
#[derive(Debug, Clone)]
pub struct TransferReport {
    pub file_id: String,
    pub bytes_uploaded: u64,
    pub metrics: MetricsSnapshot,
}

/// Coordinates a chunked upload across a pool of workers
pub struct UploadCoordinator {
    client: Arc<GraphClient>,
    sessions: Arc<SessionManager>,
    uploader: ChunkUploader,
    retry_policy: RetryPolicy,
    worker_count: usize,
    metrics: Arc<UploadMetrics>,
    cancel: CancelHandle,
}

impl UploadCoordinator {
    /// Create a new UploadCoordinator
    ///
    /// # Arguments
    /// * `client` - Drive API client; its HTTP client is shared with the chunk uploader
    /// * `sessions` - Opens and renews upload sessions
    /// * `retry_policy` - Attempts and delays per chunk
    /// * `worker_count` - Number of chunks in flight at once (at least 1)
    pub fn new(
        client: Arc<GraphClient>,
        sessions: Arc<SessionManager>,
        retry_policy: RetryPolicy,
        worker_count: usize,
    ) -> Self {
        let uploader = ChunkUploader::new(client.http().clone());
        UploadCoordinator {
            client,
            sessions,
            uploader,
            retry_policy,
            worker_count: worker_count.max(1),
            metrics: Arc::new(UploadMetrics::new()),
            cancel: CancelHandle::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<UploadMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_cancel_handle(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn metrics(&self) -> &Arc<UploadMetrics> {
        &self.metrics
    }

    /// Upload `target` in chunks of `chunk_size` bytes
    ///
    /// # Returns
    /// * `Ok(TransferReport)` once every chunk is acknowledged and the file ID
    ///   has been resolved
    /// * `Err(UploadError::ChunkFailed)` (or another transfer error) for the
    ///   first terminal failure
    /// * `Err(UploadError::MetadataFetchError)` if all bytes were stored but
    ///   the file ID lookup failed
    pub async fn run(
        &self,
        target: &UploadTarget,
        chunk_size: u64,
        sink: Option<Box<dyn ProgressSink>>,
    ) -> Result<TransferReport> {
        if target.total_size == 0 {
            return Err(UploadError::InvalidRange(
                "an upload session needs at least one byte".to_string(),
            ));
        }

        let planner = ChunkPlanner::new(chunk_size)?;
        let ranges = planner.plan(target.total_size);
        let total_chunks = planner.total_chunks(target.total_size);

        // Fail fast before a session exists
        check_local_file(&target.local_path).await?;
        if self.cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let session = self.sessions.open_session(&target.remote_path).await?;
        self.metrics.record_session_opened();

        let workers = self.worker_count.min(usize::try_from(total_chunks).unwrap_or(usize::MAX));
        info!(
            "Uploading {} ({} bytes) to {} in {} chunks of {} bytes with {} worker(s)",
            target.local_path.display(),
            target.total_size,
            target.remote_path,
            total_chunks,
            planner.chunk_size(),
            workers
        );

        let ctx = Arc::new(WorkerContext {
            sessions: Arc::clone(&self.sessions),
            uploader: self.uploader.clone(),
            retry_policy: self.retry_policy.clone(),
            metrics: Arc::clone(&self.metrics),
            cancel: self.cancel.clone(),
            local_path: target.local_path.clone(),
            remote_path: target.remote_path.clone(),
            total_size: target.total_size,
            ranges: Mutex::new(ranges),
            state: Mutex::new(TransferState::new(target.total_size, session, sink)),
            renewal: tokio::sync::Mutex::new(()),
            halted: AtomicBool::new(false),
        });

        let mut tasks = JoinSet::new();
        for worker_id in 0..workers {
            let ctx = Arc::clone(&ctx);
            tasks.spawn(async move { ctx.run_worker(worker_id).await });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                ctx.fail(UploadError::InternalError(format!("Worker task failed: {}", e)));
            }
        }

        let bytes_uploaded = {
            let mut state = ctx.lock_state();
            if let Some(err) = state.last_error.take() {
                return Err(err);
            }
            state.bytes_uploaded
        };

        if self.cancel.is_cancelled() && bytes_uploaded < target.total_size {
            warn!(
                "Upload cancelled after {} of {} bytes",
                bytes_uploaded, target.total_size
            );
            return Err(UploadError::Cancelled);
        }

        if bytes_uploaded != target.total_size {
            return Err(UploadError::InternalError(format!(
                "acknowledged {} bytes but the file has {}",
                bytes_uploaded, target.total_size
            )));
        }

        info!("All {} chunks uploaded ({} bytes)", total_chunks, bytes_uploaded);

        let file_id = self.client.get_file_id(&target.remote_path).await?;

        Ok(TransferReport {
            file_id,
            bytes_uploaded,
            metrics: self.metrics.get_stats(),
        })
    }
}

pub(crate) async fn check_local_file(path: &Path) -> Result<()> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(()),
        Ok(_) => Err(UploadError::LocalFile(format!(
            "{} is not a regular file",
            path.display()
        ))),
        Err(e) => Err(UploadError::LocalFile(format!(
            "cannot access {}: {}",
            path.display(),
            e
        ))),
    }
}

/// Everything a worker task needs, shared through an `Arc`
struct WorkerContext {
    sessions: Arc<SessionManager>,
    uploader: ChunkUploader,
    retry_policy: RetryPolicy,
    metrics: Arc<UploadMetrics>,
    cancel: CancelHandle,
    local_path: PathBuf,
    remote_path: String,
    total_size: u64,
    ranges: Mutex<ChunkRanges>,
    state: Mutex<TransferState>,
    // Serializes renewals so one stale session is replaced once
    renewal: tokio::sync::Mutex<()>,
    // Set on the first terminal failure
    halted: AtomicBool,
}

impl WorkerContext {
    fn lock_state(&self) -> MutexGuard<'_, TransferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    fn fail(&self, err: UploadError) {
        self.halted.store(true, Ordering::SeqCst);
        self.lock_state().record_failure(err);
    }

    /// Claim the next pending range, or `None` once exhausted, halted or cancelled
    fn next_range(&self) -> Option<ChunkRange> {
        if self.is_halted() || self.cancel.is_cancelled() {
            return None;
        }
        self.ranges
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next()
    }

    async fn run_worker(&self, worker_id: usize) {
        let mut file = match File::open(&self.local_path).await {
            Ok(file) => file,
            Err(e) => {
                self.fail(UploadError::LocalFile(format!(
                    "cannot open {}: {}",
                    self.local_path.display(),
                    e
                )));
                return;
            }
        };

        while let Some(range) = self.next_range() {
            debug!("Worker {} claimed chunk {}-{}", worker_id, range.start, range.end);
            if let Err(e) = self.upload_chunk(&mut file, range).await {
                self.metrics.record_chunk_failed();
                self.fail(e);
            }
        }

        debug!("Worker {} finished", worker_id);
    }

    /// Upload one chunk, retrying and renewing the session as its outcomes require
    async fn upload_chunk(&self, file: &mut File, range: ChunkRange) -> Result<()> {
        let mut data: Option<Bytes> = None;
        let mut attempt = 0;

        loop {
            attempt += 1;

            let (upload_url, generation) = {
                let state = self.lock_state();
                (state.session().upload_url.clone(), state.session().generation)
            };

            let error = match self.load_chunk(file, range, &mut data).await {
                Ok(bytes) => {
                    let started = Instant::now();
                    let outcome = self
                        .uploader
                        .put_chunk(&upload_url, bytes, range.start, range.end, self.total_size)
                        .await?;
                    self.metrics.record_chunk_attempt(started.elapsed());

                    match outcome.into_error() {
                        None => {
                            self.lock_state().record_success(range.size());
                            self.metrics.record_chunk_uploaded(range.size());
                            debug!(
                                "Chunk {}-{} uploaded on attempt {}",
                                range.start, range.end, attempt
                            );
                            return Ok(());
                        }
                        Some(error) => error,
                    }
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    return Err(UploadError::LocalFile(format!(
                        "{} disappeared during upload: {}",
                        self.local_path.display(),
                        e
                    )));
                }
                Err(e) => UploadError::OtherFailure(format!(
                    "failed to read chunk {}-{}: {}",
                    range.start, range.end, e
                )),
            };

            if !error.should_retry() || !self.retry_policy.should_retry(attempt) {
                return Err(UploadError::ChunkFailed {
                    start: range.start,
                    end: range.end,
                    attempts: attempt,
                    source: Box::new(error),
                });
            }

            if self.is_halted() {
                debug!(
                    "Abandoning chunk {}-{} after the upload failed: {}",
                    range.start, range.end, error
                );
                return Ok(());
            }

            warn!(
                "Error uploading chunk {}-{} (attempt {}/{}): {}",
                range.start, range.end, attempt, self.retry_policy.max_attempts, error
            );
            self.metrics.record_retry();

            if error.requires_session_renewal() {
                if let Err(e) = self.renew_session(generation).await {
                    warn!("Failed to create new upload session: {}", e);
                }
            }

            sleep(self.retry_policy.backoff_duration(attempt)).await;
        }
    }

    /// Read the chunk once and reuse it on later attempts
    async fn load_chunk(
        &self,
        file: &mut File,
        range: ChunkRange,
        cached: &mut Option<Bytes>,
    ) -> std::io::Result<Bytes> {
        if let Some(bytes) = cached {
            return Ok(bytes.clone());
        }

        file.seek(SeekFrom::Start(range.start)).await?;
        let mut buf = vec![0u8; range.size() as usize];
        file.read_exact(&mut buf).await?;

        let bytes = Bytes::from(buf);
        *cached = Some(bytes.clone());
        Ok(bytes)
    }

    /// Replace the session that was current at `stale_generation`
    ///
    /// Workers that saw the same stale session queue on the renewal lock; the
    /// first one renews and the rest find a newer generation and return.
    async fn renew_session(&self, stale_generation: u64) -> Result<()> {
        let _guard = self.renewal.lock().await;

        let stale = {
            let state = self.lock_state();
            if state.session().generation != stale_generation {
                debug!(
                    "Session generation {} already renewed to {}",
                    stale_generation,
                    state.session().generation
                );
                return Ok(());
            }
            state.session().clone()
        };

        let renewed = self.sessions.renew_session(&self.remote_path, &stale).await?;
        if self.lock_state().replace_session(stale_generation, renewed) {
            self.metrics.record_session_renewal();
        }
        Ok(())
    }
}
