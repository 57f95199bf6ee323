//! Download orchestrator against a real HTTP server
//!
//! These tests verify that:
//! - Transient failures are retried exactly `max_retries` times, then give up as retryable
//! - Permission failures are never retried
//! - An asset past its deadline is never requested at all

mod common;

use chrono::Utc;
use common::{png, quick_retry};
use grabber::FailureKind;
use grabber::config::DownloadConfig;
use grabber::orchestrator::DownloadOrchestrator;
use grabber::orchestrator::fetcher::HttpFetcher;
use grabber::types::{DownloadTask, ImageAsset, NodeId, TaskStatus};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn orchestrator(max_retries: u32) -> DownloadOrchestrator {
    let fetcher = HttpFetcher::new(Duration::from_secs(5)).unwrap();
    let config = DownloadConfig {
        politeness_interval: Duration::ZERO,
        ..DownloadConfig::default()
    };
    DownloadOrchestrator::new(Arc::new(fetcher), config, quick_retry(max_retries))
}

fn task(server: &MockServer, dir: &Path, page: u32, issued_ago: Duration, ttl: Duration) -> DownloadTask {
    let issued_at = Utc::now() - chrono::Duration::from_std(issued_ago).unwrap();
    let url = Url::parse(&format!("{}/p/{page}.png", server.uri())).unwrap();
    let asset = ImageAsset::issue(NodeId::from("doc"), page, url, issued_at, ttl);
    DownloadTask::new(asset, dir.join(format!("{page}.png")))
}

async fn respond(server: &MockServer, page: u32, template: ResponseTemplate, expected: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/p/{page}.png")))
        .respond_with(template)
        .expect(expected)
        .mount(server)
        .await;
}

#[tokio::test]
async fn transient_failures_exhaust_retry_budget() {
    let server = MockServer::start().await;
    respond(&server, 1, ResponseTemplate::new(503), 3).await;
    let dir = tempfile::tempdir().unwrap();

    let done = orchestrator(2)
        .run(vec![task(&server, dir.path(), 1, Duration::ZERO, Duration::from_secs(60))])
        .await;

    assert_eq!(done[0].status, TaskStatus::FailedRetryable);
    assert_eq!(done[0].attempt, 3);
    assert_eq!(done[0].failure.as_ref().unwrap().kind, FailureKind::TransientNetwork);
    server.verify().await;
}

#[tokio::test]
async fn permission_denied_is_never_retried() {
    let server = MockServer::start().await;
    respond(&server, 1, ResponseTemplate::new(403), 1).await;
    let dir = tempfile::tempdir().unwrap();

    let done = orchestrator(2)
        .run(vec![task(&server, dir.path(), 1, Duration::ZERO, Duration::from_secs(60))])
        .await;

    assert_eq!(done[0].status, TaskStatus::FailedTerminal);
    assert_eq!(done[0].attempt, 1);
    assert_eq!(done[0].failure.as_ref().unwrap().kind, FailureKind::AccessGate);
    server.verify().await;
}

#[tokio::test]
async fn expired_assets_are_not_requested() {
    let server = MockServer::start().await;
    respond(&server, 1, ResponseTemplate::new(200).set_body_bytes(png(4, 4)), 0).await;
    respond(&server, 2, ResponseTemplate::new(200).set_body_bytes(png(4, 4)), 1).await;
    let dir = tempfile::tempdir().unwrap();

    let done = orchestrator(2)
        .run(vec![
            task(&server, dir.path(), 1, Duration::from_secs(300), Duration::from_secs(210)),
            task(&server, dir.path(), 2, Duration::ZERO, Duration::from_secs(210)),
        ])
        .await;

    assert_eq!(done[0].status, TaskStatus::FailedTerminal);
    assert_eq!(done[0].attempt, 0);
    assert_eq!(done[0].failure.as_ref().unwrap().kind, FailureKind::ExpiredAsset);
    assert_eq!(done[1].status, TaskStatus::Succeeded);
    assert!(dir.path().join("2.png").exists());
    assert!(!dir.path().join("1.png").exists());
    server.verify().await;
}
