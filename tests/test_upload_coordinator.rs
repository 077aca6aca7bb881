//! Integration tests for UploadCoordinator against a mock drive API

use drive_upload::coordinator::{BackoffStrategy, RetryPolicy, UploadCoordinator};
use drive_upload::progress::ProgressSink;
use drive_upload::{
    ConflictBehavior, GraphClient, ProgressEvent, RemoteConfig, SessionManager, UploadError,
    UploadTarget,
};
use serde_json::json;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::NamedTempFile;
use wiremock::matchers::{header, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SESSION_PATH: &str = "/me/drive/root:/backups/data.bin:/createUploadSession";
const ITEM_PATH: &str = "/me/drive/root:/backups/data.bin";
const REMOTE_PATH: &str = "backups/data.bin";

fn graph_client(server: &MockServer) -> Arc<GraphClient> {
    let remote = RemoteConfig {
        access_token: "test-token".to_string(),
        graph_endpoint: server.uri(),
        ..Default::default()
    };
    Arc::new(GraphClient::new(remote, Duration::from_secs(5)).unwrap())
}

fn coordinator(server: &MockServer, max_attempts: usize, workers: usize) -> UploadCoordinator {
    let client = graph_client(server);
    let sessions = Arc::new(SessionManager::new(Arc::clone(&client), ConflictBehavior::Replace));
    let policy = RetryPolicy::new(max_attempts, Duration::from_millis(1), BackoffStrategy::Fixed);
    UploadCoordinator::new(client, sessions, policy, workers)
}

fn local_file(size: usize) -> (NamedTempFile, UploadTarget) {
    let mut file = NamedTempFile::new().unwrap();
    let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    file.write_all(&data).unwrap();
    file.flush().unwrap();
    let target = UploadTarget::new(file.path(), REMOTE_PATH, size as u64);
    (file, target)
}

/// Mount a session endpoint handing out `{uri}/upload/session-{n}`
async fn mount_sessions(server: &MockServer) -> Arc<AtomicUsize> {
    let counter = Arc::new(AtomicUsize::new(0));
    let counter_clone = counter.clone();
    let uri = server.uri();

    Mock::given(method("POST"))
        .and(path(SESSION_PATH))
        .respond_with(move |_req: &wiremock::Request| {
            let n = counter_clone.fetch_add(1, Ordering::SeqCst);
            ResponseTemplate::new(200).set_body_json(json!({
                "uploadUrl": format!("{}/upload/session-{}", uri, n),
                "expirationDateTime": "2030-01-01T00:00:00Z"
            }))
        })
        .mount(server)
        .await;

    counter
}

async fn mount_file_id(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(ITEM_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "FILE123",
            "name": "data.bin"
        })))
        .mount(server)
        .await;
}

fn collecting_sink() -> (Arc<Mutex<Vec<u64>>>, Box<dyn ProgressSink>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let seen = events.clone();
    let sink = move |event: ProgressEvent| seen.lock().unwrap().push(event.bytes_uploaded);
    (events, Box::new(sink))
}

#[tokio::test]
async fn test_all_chunks_succeed_first_time() {
    let server = MockServer::start().await;
    let sessions = mount_sessions(&server).await;
    mount_file_id(&server).await;

    let puts = Arc::new(AtomicUsize::new(0));
    let puts_clone = puts.clone();
    Mock::given(method("PUT"))
        .and(path_regex(r"^/upload/session-\d+$"))
        .respond_with(move |_req: &wiremock::Request| {
            puts_clone.fetch_add(1, Ordering::SeqCst);
            ResponseTemplate::new(202)
        })
        .mount(&server)
        .await;

    let (_file, target) = local_file(10);
    let (events, sink) = collecting_sink();

    let report = coordinator(&server, 3, 1)
        .run(&target, 4, Some(sink))
        .await
        .unwrap();

    assert_eq!(report.file_id, "FILE123");
    assert_eq!(report.bytes_uploaded, 10);
    assert_eq!(report.metrics.retries, 0);
    assert_eq!(report.metrics.chunk_attempts, 3);
    assert_eq!(report.metrics.session_renewals, 0);
    assert_eq!(puts.load(Ordering::SeqCst), 3);
    assert_eq!(sessions.load(Ordering::SeqCst), 1);
    assert_eq!(*events.lock().unwrap(), vec![4, 8, 10]);
}

#[tokio::test]
async fn test_chunks_carry_content_range() {
    let server = MockServer::start().await;
    mount_sessions(&server).await;
    mount_file_id(&server).await;

    for content_range in ["bytes 0-3/10", "bytes 4-7/10", "bytes 8-9/10"] {
        Mock::given(method("PUT"))
            .and(path("/upload/session-0"))
            .and(header("Content-Range", content_range))
            .and(header("Content-Type", "application/octet-stream"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;
    }

    let (_file, target) = local_file(10);
    let report = coordinator(&server, 3, 1).run(&target, 4, None).await.unwrap();
    assert_eq!(report.bytes_uploaded, 10);

    server.verify().await;
}

#[tokio::test]
async fn test_session_expired_renews_once_without_redelivery() {
    let server = MockServer::start().await;
    let sessions = mount_sessions(&server).await;
    mount_file_id(&server).await;

    // Chunk 1 hits an invalidated session exactly once
    Mock::given(method("PUT"))
        .and(path("/upload/session-0"))
        .and(header("Content-Range", "bytes 4-7/10"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "error": {"code": "resourceModified", "message": "The upload session was modified"}
        })))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/upload/session-1"))
        .and(header("Content-Range", "bytes 4-7/10"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    for content_range in ["bytes 0-3/10", "bytes 8-9/10"] {
        Mock::given(method("PUT"))
            .and(path_regex(r"^/upload/session-\d+$"))
            .and(header("Content-Range", content_range))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;
    }

    let (_file, target) = local_file(10);
    let report = coordinator(&server, 3, 1).run(&target, 4, None).await.unwrap();

    assert_eq!(report.bytes_uploaded, 10);
    assert_eq!(report.metrics.session_renewals, 1);
    assert_eq!(report.metrics.retries, 1);
    assert_eq!(sessions.load(Ordering::SeqCst), 2);

    server.verify().await;
}

#[tokio::test]
async fn test_range_not_satisfiable_renews_session() {
    let server = MockServer::start().await;
    let sessions = mount_sessions(&server).await;
    mount_file_id(&server).await;

    Mock::given(method("PUT"))
        .and(path("/upload/session-0"))
        .respond_with(ResponseTemplate::new(416).set_body_string("invalidRange"))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/upload/session-1"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let (_file, target) = local_file(8);
    let report = coordinator(&server, 3, 1).run(&target, 8, None).await.unwrap();

    assert_eq!(report.bytes_uploaded, 8);
    assert_eq!(report.metrics.session_renewals, 1);
    assert_eq!(sessions.load(Ordering::SeqCst), 2);

    server.verify().await;
}

#[tokio::test]
async fn test_other_failure_exhausts_attempts() {
    let server = MockServer::start().await;
    let sessions = mount_sessions(&server).await;

    let puts = Arc::new(AtomicUsize::new(0));
    let puts_clone = puts.clone();
    Mock::given(method("PUT"))
        .and(path_regex(r"^/upload/session-\d+$"))
        .respond_with(move |_req: &wiremock::Request| {
            puts_clone.fetch_add(1, Ordering::SeqCst);
            ResponseTemplate::new(500).set_body_string("internal error")
        })
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(ITEM_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let (_file, target) = local_file(10);
    let (events, sink) = collecting_sink();
    let coordinator = coordinator(&server, 3, 1);
    let result = coordinator.run(&target, 4, Some(sink)).await;

    match result {
        Err(UploadError::ChunkFailed {
            start,
            end,
            attempts,
            source,
        }) => {
            assert_eq!((start, end), (0, 3));
            assert_eq!(attempts, 3);
            assert!(matches!(*source, UploadError::OtherFailure(_)));
        }
        other => panic!("expected ChunkFailed, got {:?}", other),
    }

    // The first chunk failed, so no further chunks were claimed
    assert_eq!(puts.load(Ordering::SeqCst), 3);
    assert_eq!(sessions.load(Ordering::SeqCst), 1);

    let stats = coordinator.metrics().get_stats();
    assert!(stats.bytes_uploaded < 10);
    assert_eq!(stats.chunks_failed, 1);
    assert!(events.lock().unwrap().is_empty());

    server.verify().await;
}

#[tokio::test]
async fn test_failed_renewal_consumes_attempt() {
    let server = MockServer::start().await;

    let session_calls = Arc::new(AtomicUsize::new(0));
    let session_calls_clone = session_calls.clone();
    let uri = server.uri();
    Mock::given(method("POST"))
        .and(path(SESSION_PATH))
        .respond_with(move |_req: &wiremock::Request| {
            if session_calls_clone.fetch_add(1, Ordering::SeqCst) == 0 {
                ResponseTemplate::new(200)
                    .set_body_json(json!({"uploadUrl": format!("{}/upload/session-0", uri)}))
            } else {
                ResponseTemplate::new(503).set_body_string("unavailable")
            }
        })
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/upload/session-0"))
        .respond_with(
            ResponseTemplate::new(409)
                .set_body_string(r#"{"error":{"code":"resourceModified"}}"#),
        )
        .expect(3)
        .mount(&server)
        .await;

    let (_file, target) = local_file(4);
    let result = coordinator(&server, 3, 1).run(&target, 4, None).await;

    match result {
        Err(UploadError::ChunkFailed { attempts, source, .. }) => {
            assert_eq!(attempts, 3);
            assert!(matches!(*source, UploadError::SessionExpired(_)));
        }
        other => panic!("expected ChunkFailed, got {:?}", other),
    }

    // One initial session plus a failed renewal after each of the first two attempts
    assert_eq!(session_calls.load(Ordering::SeqCst), 3);

    server.verify().await;
}

#[tokio::test]
async fn test_metadata_404_after_full_transfer() {
    let server = MockServer::start().await;
    mount_sessions(&server).await;

    Mock::given(method("PUT"))
        .and(path_regex(r"^/upload/session-\d+$"))
        .respond_with(ResponseTemplate::new(202))
        .expect(3)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(ITEM_PATH))
        .respond_with(ResponseTemplate::new(404).set_body_string("itemNotFound"))
        .mount(&server)
        .await;

    let (_file, target) = local_file(10);
    let result = coordinator(&server, 3, 1).run(&target, 4, None).await;

    match result {
        Err(err @ UploadError::MetadataFetchError { .. }) => {
            assert_eq!(err.status(), Some(404));
            assert!(err.bytes_stored());
        }
        other => panic!("expected MetadataFetchError, got {:?}", other),
    }

    server.verify().await;
}

#[tokio::test]
async fn test_missing_local_file_fails_before_session() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(SESSION_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let target = UploadTarget::new("/nonexistent/drive-upload/data.bin", REMOTE_PATH, 10);
    let result = coordinator(&server, 3, 1).run(&target, 4, None).await;

    assert!(matches!(result, Err(UploadError::LocalFile(_))));
    server.verify().await;
}

#[tokio::test]
async fn test_session_error_carries_status_and_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(SESSION_PATH))
        .respond_with(ResponseTemplate::new(403).set_body_string("accessDenied"))
        .mount(&server)
        .await;

    let (_file, target) = local_file(10);
    let result = coordinator(&server, 3, 1).run(&target, 4, None).await;

    match result {
        Err(UploadError::SessionError { status, body }) => {
            assert_eq!(status, Some(403));
            assert!(body.contains("accessDenied"));
        }
        other => panic!("expected SessionError, got {:?}", other),
    }
}

#[tokio::test]
async fn test_cancel_stops_claiming_new_chunks() {
    let server = MockServer::start().await;
    mount_sessions(&server).await;

    let puts = Arc::new(AtomicUsize::new(0));
    let puts_clone = puts.clone();
    Mock::given(method("PUT"))
        .and(path_regex(r"^/upload/session-\d+$"))
        .respond_with(move |_req: &wiremock::Request| {
            puts_clone.fetch_add(1, Ordering::SeqCst);
            ResponseTemplate::new(202)
        })
        .mount(&server)
        .await;

    let coordinator = coordinator(&server, 3, 1);
    let cancel = coordinator.cancel_handle();
    let sink = move |_event: ProgressEvent| cancel.cancel();

    let (_file, target) = local_file(10);
    let result = coordinator.run(&target, 4, Some(Box::new(sink))).await;

    assert!(matches!(result, Err(UploadError::Cancelled)));
    assert_eq!(puts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_parallel_workers_cover_every_chunk() {
    let server = MockServer::start().await;
    mount_sessions(&server).await;
    mount_file_id(&server).await;

    let puts = Arc::new(AtomicUsize::new(0));
    let puts_clone = puts.clone();
    Mock::given(method("PUT"))
        .and(path_regex(r"^/upload/session-\d+$"))
        .respond_with(move |_req: &wiremock::Request| {
            puts_clone.fetch_add(1, Ordering::SeqCst);
            ResponseTemplate::new(202)
        })
        .mount(&server)
        .await;

    let (_file, target) = local_file(10_000);
    let (events, sink) = collecting_sink();

    let report = coordinator(&server, 3, 4)
        .run(&target, 1_000, Some(sink))
        .await
        .unwrap();

    assert_eq!(report.bytes_uploaded, 10_000);
    assert_eq!(report.metrics.chunks_uploaded, 10);
    assert_eq!(puts.load(Ordering::SeqCst), 10);

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 10);
    assert!(events.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(events.last(), Some(&10_000));
}

#[tokio::test]
async fn test_concurrent_workers_renew_stale_session_once() {
    let server = MockServer::start().await;
    let sessions = mount_sessions(&server).await;
    mount_file_id(&server).await;

    // Every worker's first PUT is in flight on session-0 when it is invalidated
    let stale_puts = Arc::new(AtomicUsize::new(0));
    let stale_clone = stale_puts.clone();
    Mock::given(method("PUT"))
        .and(path("/upload/session-0"))
        .respond_with(move |_req: &wiremock::Request| {
            stale_clone.fetch_add(1, Ordering::SeqCst);
            ResponseTemplate::new(409)
                .set_body_json(json!({
                    "error": {"code": "resourceModified", "message": "The upload session was modified"}
                }))
                .set_delay(Duration::from_millis(200))
        })
        .mount(&server)
        .await;

    // Each chunk lands exactly once on the renewed session
    for i in 0..8u64 {
        Mock::given(method("PUT"))
            .and(path("/upload/session-1"))
            .and(header("Content-Range", format!("bytes {}-{}/32", i * 4, i * 4 + 3).as_str()))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;
    }

    let (_file, target) = local_file(32);
    let report = coordinator(&server, 3, 4).run(&target, 4, None).await.unwrap();

    assert_eq!(report.bytes_uploaded, 32);
    assert_eq!(report.metrics.chunks_uploaded, 8);
    assert_eq!(report.metrics.sessions_opened, 2);
    assert_eq!(report.metrics.session_renewals, 1);
    assert_eq!(sessions.load(Ordering::SeqCst), 2);
    assert_eq!(stale_puts.load(Ordering::SeqCst), 4);

    server.verify().await;
}

#[tokio::test]
async fn test_zero_length_target_is_rejected() {
    let server = MockServer::start().await;
    let (_file, target) = local_file(0);

    let result = coordinator(&server, 3, 1).run(&target, 4, None).await;
    assert!(matches!(result, Err(UploadError::InvalidRange(_))));
}
