//! Core data models for the drive upload engine

use crate::error::{Result, UploadError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// A contiguous byte span of the file uploaded in one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkRange {
    /// Starting byte offset (inclusive)
    pub start: u64,
    /// Ending byte offset (inclusive)
    pub end: u64,
}

impl ChunkRange {
    /// Create a new ChunkRange
    ///
    /// # Arguments
    /// * `start` - Starting byte offset (inclusive)
    /// * `end` - Ending byte offset (inclusive)
    ///
    /// # Returns
    /// * `Ok(ChunkRange)` if the range is valid
    /// * `Err(UploadError)` if start > end
    pub fn new(start: u64, end: u64) -> Result<Self> {
        if start > end {
            return Err(UploadError::InvalidRange(format!(
                "start ({}) must be <= end ({})",
                start, end
            )));
        }
        Ok(ChunkRange { start, end })
    }

    /// Get the size of this range in bytes
    pub fn size(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Check that this range lies inside a file of `total_size` bytes
    pub fn fits_within(&self, total_size: u64) -> bool {
        self.start <= self.end && self.end < total_size
    }

    /// Format the `Content-Range` header value for this chunk
    ///
    /// # Returns
    /// A string in the format "bytes start-end/total"
    pub fn to_content_range(&self, total_size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total_size)
    }
}

/// The file being uploaded and where it goes
///
/// `total_size` is read once when the target is built; later changes to the
/// local file are not detected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub local_path: PathBuf,
    pub remote_path: String,
    pub total_size: u64,
}

impl UploadTarget {
    pub fn new(local_path: impl Into<PathBuf>, remote_path: impl Into<String>, total_size: u64) -> Self {
        UploadTarget {
            local_path: local_path.into(),
            remote_path: remote_path.into(),
            total_size,
        }
    }

    /// Build a target from a local file, reading its size from the filesystem
    pub fn from_local(local_path: impl AsRef<Path>, remote_path: impl Into<String>) -> Result<Self> {
        let local_path = local_path.as_ref();
        let metadata = std::fs::metadata(local_path).map_err(|e| {
            UploadError::LocalFile(format!("{}: {}", local_path.display(), e))
        })?;

        if !metadata.is_file() {
            return Err(UploadError::LocalFile(format!(
                "{} is not a regular file",
                local_path.display()
            )));
        }

        Ok(UploadTarget::new(local_path, remote_path, metadata.len()))
    }
}

/// A server-side upload session
///
/// Sessions are replaced, never mutated. `generation` increases by one on
/// every renewal so workers can tell whether the session they used is stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    pub upload_url: String,
    pub created_at: SystemTime,
    pub generation: u64,
}

impl UploadSession {
    pub fn new(upload_url: impl Into<String>) -> Self {
        UploadSession {
            upload_url: upload_url.into(),
            created_at: SystemTime::now(),
            generation: 0,
        }
    }

    /// Build the session that replaces this one
    pub fn replaced_by(&self, upload_url: impl Into<String>) -> Self {
        UploadSession {
            upload_url: upload_url.into(),
            created_at: SystemTime::now(),
            generation: self.generation + 1,
        }
    }
}

/// Cumulative progress, emitted once per acknowledged chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub bytes_uploaded: u64,
    pub total_size: u64,
}

impl ProgressEvent {
    /// Completed fraction in percent (0.0 to 100.0)
    pub fn percent(&self) -> f64 {
        if self.total_size == 0 {
            100.0
        } else {
            (self.bytes_uploaded as f64 / self.total_size as f64) * 100.0
        }
    }
}

/// Outcome of comparing the local and remote content hashes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityResult {
    pub local_hash: String,
    pub remote_hash: String,
    pub matched: bool,
}

impl IntegrityResult {
    pub fn new(local_hash: impl Into<String>, remote_hash: impl Into<String>) -> Self {
        let local_hash = local_hash.into();
        let remote_hash = remote_hash.into();
        let matched = local_hash == remote_hash;
        IntegrityResult {
            local_hash,
            remote_hash,
            matched,
        }
    }

    /// Convert a mismatch into an [`UploadError::IntegrityMismatch`]
    pub fn into_result(self) -> Result<IntegrityResult> {
        if self.matched {
            Ok(self)
        } else {
            Err(UploadError::IntegrityMismatch {
                local: self.local_hash,
                remote: self.remote_hash,
            })
        }
    }
}

/// An item in the remote drive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveItem {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_chunk_range_new() {
        let range = ChunkRange::new(0, 1023).unwrap();
        assert_eq!(range.start, 0);
        assert_eq!(range.end, 1023);
        assert_eq!(range.size(), 1024);
    }

    #[test]
    fn test_chunk_range_invalid() {
        let result = ChunkRange::new(100, 50);
        assert!(matches!(result, Err(UploadError::InvalidRange(_))));
    }

    #[test]
    fn test_chunk_range_content_range() {
        let range = ChunkRange::new(4_000_000, 7_999_999).unwrap();
        assert_eq!(
            range.to_content_range(10_000_000),
            "bytes 4000000-7999999/10000000"
        );
    }

    #[test]
    fn test_chunk_range_fits_within() {
        let range = ChunkRange::new(0, 99).unwrap();
        assert!(range.fits_within(100));
        assert!(!range.fits_within(99));
    }

    #[test]
    fn test_session_replacement_bumps_generation() {
        let first = UploadSession::new("https://upload.example/1");
        let second = first.replaced_by("https://upload.example/2");
        assert_eq!(first.generation, 0);
        assert_eq!(second.generation, 1);
        assert_ne!(first.upload_url, second.upload_url);
    }

    #[test]
    fn test_integrity_result_matching() {
        let matched = IntegrityResult::new("AAA", "AAA");
        assert!(matched.matched);
        assert!(matched.into_result().is_ok());

        let mismatched = IntegrityResult::new("AAA", "BBB");
        assert!(!mismatched.matched);
        assert!(matches!(
            mismatched.into_result(),
            Err(UploadError::IntegrityMismatch { .. })
        ));
    }

    #[test]
    fn test_progress_percent() {
        let event = ProgressEvent {
            bytes_uploaded: 25,
            total_size: 100,
        };
        assert_eq!(event.percent(), 25.0);
    }

    #[test]
    fn test_upload_target_from_local() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[7u8; 300]).unwrap();

        let target = UploadTarget::from_local(file.path(), "backups/data.bin").unwrap();
        assert_eq!(target.total_size, 300);
        assert_eq!(target.remote_path, "backups/data.bin");
    }

    #[test]
    fn test_upload_target_missing_file() {
        let result = UploadTarget::from_local("/definitely/not/here.bin", "x.bin");
        assert!(matches!(result, Err(UploadError::LocalFile(_))));
    }
}
