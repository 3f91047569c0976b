//! Integration tests for single transfers.
//!
//! These tests run `Transfer` against mock HTTP servers and check retry,
//! validation, cancellation and bandwidth behavior end to end.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use docsync_core::download::{
    ClientOptions, DownloadError, HttpClient, RateLimiter, RetryPolicy, Transfer,
    TransferControl, TransferRequest,
};
use docsync_core::validator::FileValidator;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MINIMAL_PDF: &[u8] = b"%PDF-1.4\n\
1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n\
2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n\
3 0 obj << /Type /Page /Parent 2 0 R >> endobj\n\
trailer << /Root 1 0 R >>\n\
%%EOF\n";

fn transfer(max_retries: u32, delay: Duration, limiter: RateLimiter) -> Transfer {
    let client = HttpClient::new(&ClientOptions::default()).expect("client");
    Transfer::new(
        client,
        Arc::new(limiter),
        RetryPolicy::new(max_retries, delay),
        Arc::new(FileValidator::default()),
    )
}

fn request(url: String, dir: &TempDir, name: &str, file_type: &str) -> TransferRequest {
    TransferRequest {
        url,
        destination: dir.path().join("nested").join(name),
        file_type: Some(file_type.to_string()),
    }
}

fn control() -> TransferControl {
    TransferControl::cancellable(CancellationToken::new())
}

async fn mount(server: &MockServer, route: &str, template: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(template)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_transfer_writes_and_validates_pdf() {
    let server = MockServer::start().await;
    mount(&server, "/guide.pdf", ResponseTemplate::new(200).set_body_bytes(MINIMAL_PDF)).await;
    let dir = TempDir::new().expect("temp dir");

    let req = request(format!("{}/guide.pdf", server.uri()), &dir, "guide.pdf", "pdf");
    let last_fraction = Arc::new(AtomicU64::new(0));
    let seen = Arc::clone(&last_fraction);
    let outcome = transfer(0, Duration::ZERO, RateLimiter::disabled())
        .run(&req, &control(), move |progress| {
            if let Some(fraction) = progress.fraction() {
                seen.store(fraction.to_bits(), Ordering::SeqCst);
            }
        })
        .await
        .expect("transfer should succeed");

    assert_eq!(outcome.attempts, 1);
    assert_eq!(outcome.bytes, MINIMAL_PDF.len() as u64);
    assert_eq!(std::fs::read(&outcome.path).expect("read"), MINIMAL_PDF);
    assert!(outcome.validation.valid);
    assert_eq!(outcome.validation.metadata.get("pages").map(String::as_str), Some("1"));
    assert!(!dir.path().join("nested/guide.pdf.part").exists());
    assert!((f64::from_bits(last_fraction.load(Ordering::SeqCst)) - 1.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_transfer_retries_transient_status_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/notes.txt"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    mount(&server, "/notes.txt", ResponseTemplate::new(200).set_body_string("hello\n")).await;
    let dir = TempDir::new().expect("temp dir");

    let req = request(format!("{}/notes.txt", server.uri()), &dir, "notes.txt", "text");
    let outcome = transfer(3, Duration::from_millis(10), RateLimiter::disabled())
        .run(&req, &control(), |_| {})
        .await
        .expect("second attempt should succeed");
    assert_eq!(outcome.attempts, 2);
}

#[tokio::test]
async fn test_transfer_exhausts_retries_with_delay() {
    let server = MockServer::start().await;
    mount(&server, "/flaky.txt", ResponseTemplate::new(503)).await;
    let dir = TempDir::new().expect("temp dir");

    let req = request(format!("{}/flaky.txt", server.uri()), &dir, "flaky.txt", "text");
    let started = Instant::now();
    let failure = transfer(2, Duration::from_millis(50), RateLimiter::disabled())
        .run(&req, &control(), |_| {})
        .await
        .expect_err("should fail");

    assert_eq!(failure.attempts, 3);
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(server.received_requests().await.expect("recording").len(), 3);
    assert!(matches!(
        failure.error,
        DownloadError::HttpStatus { status: 503, .. }
    ));
    assert!(!req.destination.exists());
}

#[tokio::test]
async fn test_transfer_network_error_uses_every_attempt() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);
    let dir = TempDir::new().expect("temp dir");

    let req = request(format!("http://127.0.0.1:{port}/a.txt"), &dir, "a.txt", "text");
    let failure = transfer(2, Duration::from_millis(10), RateLimiter::disabled())
        .run(&req, &control(), |_| {})
        .await
        .expect_err("nothing is listening");
    assert_eq!(failure.attempts, 3);
    assert!(matches!(failure.error, DownloadError::Network { .. }));
}

#[tokio::test]
async fn test_transfer_does_not_retry_not_found() {
    let server = MockServer::start().await;
    mount(&server, "/missing.pdf", ResponseTemplate::new(404)).await;
    let dir = TempDir::new().expect("temp dir");

    let req = request(format!("{}/missing.pdf", server.uri()), &dir, "missing.pdf", "pdf");
    let failure = transfer(5, Duration::from_millis(10), RateLimiter::disabled())
        .run(&req, &control(), |_| {})
        .await
        .expect_err("404 is permanent");
    assert_eq!(failure.attempts, 1);
    assert_eq!(server.received_requests().await.expect("recording").len(), 1);
}

#[tokio::test]
async fn test_transfer_validation_failure_keeps_file() {
    let server = MockServer::start().await;
    mount(&server, "/broken.pdf", ResponseTemplate::new(200).set_body_string("<html>login</html>")).await;
    let dir = TempDir::new().expect("temp dir");

    let req = request(format!("{}/broken.pdf", server.uri()), &dir, "broken.pdf", "pdf");
    let failure = transfer(3, Duration::from_millis(10), RateLimiter::disabled())
        .run(&req, &control(), |_| {})
        .await
        .expect_err("not a pdf");
    assert!(matches!(failure.error, DownloadError::Validation { .. }));
    assert_eq!(failure.attempts, 1);
    assert!(req.destination.exists(), "invalid file stays for inspection");
}

#[tokio::test]
async fn test_transfer_cancelled_before_start() {
    let server = MockServer::start().await;
    mount(&server, "/a.txt", ResponseTemplate::new(200).set_body_string("hello")).await;
    let dir = TempDir::new().expect("temp dir");

    let cancel = CancellationToken::new();
    cancel.cancel();
    let req = request(format!("{}/a.txt", server.uri()), &dir, "a.txt", "text");
    let failure = transfer(0, Duration::ZERO, RateLimiter::disabled())
        .run(&req, &TransferControl::cancellable(cancel), |_| {})
        .await
        .expect_err("cancelled");
    assert!(failure.is_cancelled());
    assert_eq!(failure.attempts, 0);
}

#[tokio::test]
async fn test_transfer_cancelled_while_waiting_for_response() {
    let server = MockServer::start().await;
    mount(
        &server,
        "/slow.txt",
        ResponseTemplate::new(200)
            .set_body_string("late")
            .set_delay(Duration::from_secs(30)),
    )
    .await;
    let dir = TempDir::new().expect("temp dir");

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });
    let req = request(format!("{}/slow.txt", server.uri()), &dir, "slow.txt", "text");
    let started = Instant::now();
    let failure = transfer(0, Duration::ZERO, RateLimiter::disabled())
        .run(&req, &TransferControl::cancellable(cancel), |_| {})
        .await
        .expect_err("cancelled");
    assert!(failure.is_cancelled());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_transfer_respects_rate_limit() {
    let body = "x".repeat(24 * 1024);
    let server = MockServer::start().await;
    mount(&server, "/big.txt", ResponseTemplate::new(200).set_body_string(body.clone())).await;
    let dir = TempDir::new().expect("temp dir");

    let req = request(format!("{}/big.txt", server.uri()), &dir, "big.txt", "text");
    let started = Instant::now();
    let outcome = transfer(0, Duration::ZERO, RateLimiter::new(16 * 1024))
        .run(&req, &control(), |_| {})
        .await
        .expect("transfer should succeed");

    assert_eq!(outcome.bytes, body.len() as u64);
    // One burst is free; the remaining 16 KiB need about a second.
    assert!(
        started.elapsed() >= Duration::from_millis(900),
        "finished too fast: {:?}",
        started.elapsed()
    );
}
