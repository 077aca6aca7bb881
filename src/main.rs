//! Drive Upload command line
//!
//! Uploads one local file to a remote drive using a YAML configuration file.

use anyhow::{Context, Result};
use drive_upload::{DriveUploader, LogProgressSink, UploadConfig, UploadTarget, Verification};
use std::env;
use tracing::{error, info, warn};

/// Main entry point
///
/// # Usage
/// ```bash
/// drive-upload <config.yaml> <local-file> [remote-path]
/// ```
///
/// The remote path defaults to the local file name. Ctrl-C stops new chunks
/// from being scheduled; chunks already in flight are allowed to finish.
#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    if let Err(e) = run().await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let mut args = env::args().skip(1);
    let config_path = args
        .next()
        .unwrap_or_else(|| "drive_upload.yaml".to_string());
    let local_path = args
        .next()
        .context("usage: drive-upload <config.yaml> <local-file> [remote-path]")?;

    info!("Loading configuration from: {}", config_path);
    let config = UploadConfig::from_file(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    let remote_path = match args.next() {
        Some(path) => path,
        None => std::path::Path::new(&local_path)
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .context("cannot derive a remote path from the local file name")?,
    };

    let target = UploadTarget::from_local(&local_path, remote_path)
        .with_context(|| format!("Cannot upload {}", local_path))?;

    let policy = &config.policy;
    info!("Configuration loaded successfully");
    info!("  - File size: {} bytes", target.total_size);
    info!("  - Chunk size: {} bytes", policy.effective_chunk_size(target.total_size));
    info!("  - Workers: {}", policy.worker_count);
    info!("  - Max attempts per chunk: {}", policy.max_retries);
    info!("  - Conflict behavior: {}", policy.conflict_behavior.as_str());

    let uploader = DriveUploader::from_config(&config)?;

    let cancel = uploader.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; finishing chunks in flight");
            cancel.cancel();
        }
    });

    let outcome = uploader
        .upload(&target, policy, Some(Box::new(LogProgressSink::default())))
        .await
        .context("File upload failed")?;

    info!(
        "Uploaded {} bytes to {} (file ID {})",
        outcome.bytes_uploaded, outcome.remote_path, outcome.file_id
    );
    info!(
        "Chunk attempts: {}, retries: {}, session renewals: {}",
        outcome.metrics.chunk_attempts, outcome.metrics.retries, outcome.metrics.session_renewals
    );

    match &outcome.verification {
        Verification::Skipped => {}
        Verification::Verified(result) if result.matched => info!("File integrity verified"),
        Verification::Verified(result) => warn!(
            "Integrity check failed: local {} does not match remote {}",
            result.local_hash, result.remote_hash
        ),
        Verification::Unavailable(e) => warn!("Integrity check unavailable: {}", e),
    }

    Ok(())
}
