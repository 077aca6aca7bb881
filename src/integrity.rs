//! Post-upload integrity verification
//!
//! Hashes the local file and compares it with the hash the remote service
//! computed for the uploaded item. The remote hash can lag behind the upload,
//! so fetching it is retried with a fixed delay. A confirmed mismatch is
//! reported as-is and never retried.

use crate::error::{Result, UploadError};
use crate::graph_client::GraphClient;
use crate::models::IntegrityResult;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

const WIDTH_IN_BITS: usize = 160;
const SHIFT: usize = 11;
const CELL_BITS: usize = 64;
const CELLS: usize = (WIDTH_IN_BITS - 1) / CELL_BITS + 1;
const DIGEST_LEN: usize = (WIDTH_IN_BITS - 1) / 8 + 1;
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Computes a content hash of a local file
///
/// Implementations run on a blocking thread.
pub trait ContentHasher: Send + Sync {
    /// Name of the hash, used in log lines
    fn name(&self) -> &'static str;

    fn hash_file(&self, path: &Path) -> Result<String>;
}

/// Streaming QuickXorHash state
///
/// Bytes are XORed into a 160-bit register, each byte shifted 11 bits further
/// than the previous one (wrapping around). The total length is XORed into
/// the last 8 bytes of the digest.
#[derive(Debug, Clone, Default)]
pub struct QuickXorHash {
    data: [u64; CELLS],
    length_so_far: u64,
    shift_so_far: usize,
}

impl QuickXorHash {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, bytes: &[u8]) {
        let mut cell = self.shift_so_far / CELL_BITS;
        let mut offset = self.shift_so_far % CELL_BITS;
        let iterations = bytes.len().min(WIDTH_IN_BITS);

        for i in 0..iterations {
            let is_last_cell = cell == CELLS - 1;
            let bits_in_cell = if is_last_cell {
                WIDTH_IN_BITS % CELL_BITS
            } else {
                CELL_BITS
            };

            // Bytes 160 positions apart land on the same bit offset
            let xored = bytes[i..]
                .iter()
                .step_by(WIDTH_IN_BITS)
                .fold(0u8, |acc, b| acc ^ b);

            if offset <= bits_in_cell - 8 {
                self.data[cell] ^= u64::from(xored) << offset;
            } else {
                let next = if is_last_cell { 0 } else { cell + 1 };
                let low = bits_in_cell - offset;
                self.data[cell] ^= u64::from(xored) << offset;
                self.data[next] ^= u64::from(xored) >> low;
            }

            offset += SHIFT;
            while offset >= bits_in_cell {
                cell = if is_last_cell { 0 } else { cell + 1 };
                offset -= bits_in_cell;
            }
        }

        self.shift_so_far = (self.shift_so_far + SHIFT * (bytes.len() % WIDTH_IN_BITS)) % WIDTH_IN_BITS;
        self.length_so_far += bytes.len() as u64;
    }

    /// Produce the 20-byte digest
    pub fn finalize(&self) -> [u8; DIGEST_LEN] {
        let mut digest = [0u8; DIGEST_LEN];
        for (i, cell) in self.data.iter().enumerate() {
            let start = i * 8;
            let end = (start + 8).min(DIGEST_LEN);
            digest[start..end].copy_from_slice(&cell.to_le_bytes()[..end - start]);
        }

        let length = self.length_so_far.to_le_bytes();
        let base = WIDTH_IN_BITS / 8 - length.len();
        for (i, b) in length.iter().enumerate() {
            digest[base + i] ^= b;
        }
        digest
    }

    /// Digest in the base64 form used by the remote service
    pub fn finalize_base64(&self) -> String {
        STANDARD.encode(self.finalize())
    }
}

/// [`ContentHasher`] producing base64 QuickXorHash digests
#[derive(Debug, Clone, Copy, Default)]
pub struct QuickXorHasher;

impl ContentHasher for QuickXorHasher {
    fn name(&self) -> &'static str {
        "QuickXorHash"
    }

    fn hash_file(&self, path: &Path) -> Result<String> {
        let file = File::open(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => {
                UploadError::LocalFile(format!("{} not found: {}", path.display(), e))
            }
            _ => UploadError::IoError(format!("cannot open {}: {}", path.display(), e)),
        })?;

        let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut hash = QuickXorHash::new();
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hash.update(&buf[..n]);
        }

        Ok(hash.finalize_base64())
    }
}

/// Compares local and remote content hashes after an upload
pub struct IntegrityVerifier {
    client: Arc<GraphClient>,
    hasher: Arc<dyn ContentHasher>,
    hash_retries: usize,
    retry_delay: Duration,
}

impl IntegrityVerifier {
    /// Create a verifier using [`QuickXorHasher`]
    ///
    /// # Arguments
    /// * `client` - Drive API client used to fetch the remote hash
    /// * `hash_retries` - Total fetch attempts (at least 1)
    /// * `retry_delay` - Fixed delay between fetch attempts
    pub fn new(client: Arc<GraphClient>, hash_retries: usize, retry_delay: Duration) -> Self {
        IntegrityVerifier {
            client,
            hasher: Arc::new(QuickXorHasher),
            hash_retries: hash_retries.max(1),
            retry_delay,
        }
    }

    pub fn with_hasher(mut self, hasher: Arc<dyn ContentHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    /// Hash `local_path` and compare it with the remote hash of `remote_file_id`
    ///
    /// # Returns
    /// * `Ok(IntegrityResult)` once both hashes are known; `matched` tells
    ///   whether they agree
    /// * `Err(UploadError::HashUnavailable)` if the remote hash could not be
    ///   fetched within `hash_retries` attempts
    /// * `Err(UploadError::LocalFile)` or `Err(UploadError::IoError)` if the
    ///   local file could not be hashed
    pub async fn verify(&self, local_path: &Path, remote_file_id: &str) -> Result<IntegrityResult> {
        info!("Verifying file integrity of {}", local_path.display());

        let local_hash = self.local_hash(local_path.to_path_buf()).await?;
        let remote_hash = self.remote_hash_with_retry(remote_file_id).await?;

        let result = IntegrityResult::new(local_hash, remote_hash);
        if result.matched {
            info!("{} match: file integrity verified", self.hasher.name());
        } else {
            warn!(
                "{} mismatch: local={}, remote={}",
                self.hasher.name(),
                result.local_hash,
                result.remote_hash
            );
        }
        Ok(result)
    }

    async fn local_hash(&self, path: PathBuf) -> Result<String> {
        let hasher = Arc::clone(&self.hasher);
        tokio::task::spawn_blocking(move || hasher.hash_file(&path))
            .await
            .map_err(|e| UploadError::InternalError(format!("Hash task failed: {}", e)))?
    }

    async fn remote_hash_with_retry(&self, file_id: &str) -> Result<String> {
        let mut last_error = None;

        for attempt in 1..=self.hash_retries {
            match self.client.get_quick_xor_hash(file_id).await {
                Ok(hash) => return Ok(hash),
                Err(e) => {
                    warn!(
                        "Attempt {}/{}: Failed to retrieve remote {}: {}",
                        attempt,
                        self.hash_retries,
                        self.hasher.name(),
                        e
                    );
                    last_error = Some(e);
                }
            }

            if attempt < self.hash_retries {
                sleep(self.retry_delay).await;
            }
        }

        Err(UploadError::HashUnavailable {
            attempts: self.hash_retries,
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempt made".to_string()),
        })
    }
}
