mod common;

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use docrelay::{
    domain::context::{RenderContext, RenderOptions},
    infra::network::{
        HttpUrlRefresher, NetworkConfig, NetworkFault, NetworkLayer, ProgressFn, RetryPolicy,
    },
};
use httpmock::prelude::*;
use serde_json::json;
use url::Url;

fn fast_network() -> NetworkConfig {
    NetworkConfig {
        retry: RetryPolicy {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            max_retries: 2,
        },
        ..NetworkConfig::default()
    }
}

fn context(url: &Url, timeout: Duration) -> RenderContext {
    RenderContext::new(
        url.clone(),
        RenderOptions {
            timeout,
            ..RenderOptions::default()
        },
    )
}

#[tokio::test]
async fn truncated_transfer_is_partial_and_still_renderable() {
    let body = common::padded_pdf(2, 4096);
    let (url, server) = common::truncating_server(body, 4096, 2048).await;
    let network = NetworkLayer::new(fast_network()).expect("network");

    let loaded = Arc::new(AtomicU64::new(0));
    let seen = Arc::clone(&loaded);
    let report = move |bytes: u64, _total: Option<u64>| {
        seen.fetch_max(bytes, Ordering::SeqCst);
    };
    let on_progress: ProgressFn<'_> = &report;
    let outcome = network
        .fetch_document(&url, &context(&url, Duration::from_secs(5)), Some(on_progress))
        .await
        .expect("partial outcome");

    assert!(outcome.is_partial);
    assert_eq!(outcome.bytes_received, 2048);
    assert_eq!(outcome.content_length, Some(4096));
    assert_eq!(loaded.load(Ordering::SeqCst), 2048);
    assert!(network.can_render_partial_data(&outcome.data, outcome.content_length));
    assert!(network.in_flight().is_empty());
    server.abort();
}

#[tokio::test]
async fn partial_rendering_can_be_switched_off() {
    let body = common::padded_pdf(2, 4096);
    let (url, server) = common::truncating_server(body, 4096, 2048).await;
    let mut config = fast_network();
    config.partial.enabled = false;
    let network = NetworkLayer::new(config).expect("network");

    let outcome = network
        .fetch_document(&url, &context(&url, Duration::from_secs(5)), None)
        .await
        .expect("partial outcome");
    assert!(outcome.is_partial);
    assert!(!network.can_render_partial_data(&outcome.data, outcome.content_length));
    server.abort();
}

#[tokio::test]
async fn server_errors_are_retried_up_to_the_policy() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/flaky.pdf");
            then.status(503);
        })
        .await;
    let url = Url::parse(&server.url("/flaky.pdf")).unwrap();
    let network = NetworkLayer::new(fast_network()).expect("network");

    let fault = network
        .fetch_document(&url, &context(&url, Duration::from_secs(5)), None)
        .await
        .unwrap_err();

    assert!(matches!(fault, NetworkFault::Status { status: 503, .. }));
    assert_eq!(mock.hits_async().await, 3);
}

#[tokio::test]
async fn not_found_is_not_retried() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/missing.pdf");
            then.status(404);
        })
        .await;
    let url = Url::parse(&server.url("/missing.pdf")).unwrap();
    let network = NetworkLayer::new(fast_network()).expect("network");

    let fault = network
        .fetch_document(&url, &context(&url, Duration::from_secs(5)), None)
        .await
        .unwrap_err();

    assert_eq!(fault.status(), Some(404));
    assert_eq!(mock.hits_async().await, 1);
}

#[tokio::test]
async fn rejected_signature_is_refreshed_once() {
    let server = MockServer::start_async().await;
    let expired = server
        .mock_async(|when, then| {
            when.method(GET).path("/signed.pdf").query_param("sig", "old");
            then.status(403);
        })
        .await;
    let fresh = server
        .mock_async(|when, then| {
            when.method(GET).path("/signed.pdf").query_param("sig", "new");
            then.status(200).body(common::pdf(1));
        })
        .await;
    let refresh_url = server.url("/signed.pdf?sig=new");
    let refresh = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/refresh")
                .json_body(json!({"url": server.url("/signed.pdf?sig=old")}));
            then.status(200).json_body(json!({ "url": refresh_url }));
        })
        .await;

    let base = NetworkLayer::new(fast_network()).expect("network");
    let refresher = HttpUrlRefresher::new(
        base.client().clone(),
        Url::parse(&server.url("/refresh")).unwrap(),
        Duration::from_secs(2),
    );
    let network = base.with_refresher(Arc::new(refresher));
    let url = Url::parse(&server.url("/signed.pdf?sig=old")).unwrap();

    let outcome = network
        .fetch_document(&url, &context(&url, Duration::from_secs(5)), None)
        .await
        .expect("refreshed fetch");

    assert!(!outcome.is_partial);
    assert_eq!(outcome.url.query(), Some("sig=new"));
    expired.assert_async().await;
    refresh.assert_async().await;
    fresh.assert_async().await;
}

#[tokio::test]
async fn rejection_without_refresher_is_an_authentication_fault() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/signed.pdf");
            then.status(401);
        })
        .await;
    let url = Url::parse(&server.url("/signed.pdf")).unwrap();
    let network = NetworkLayer::new(fast_network()).expect("network");

    let fault = network
        .fetch_document(&url, &context(&url, Duration::from_secs(5)), None)
        .await
        .unwrap_err();
    assert!(matches!(
        fault,
        NetworkFault::Authentication { status: 401, .. }
    ));
}

#[tokio::test]
async fn slow_responses_time_out() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/slow.pdf");
            then.status(200)
                .delay(Duration::from_secs(2))
                .body(common::pdf(1));
        })
        .await;
    let url = Url::parse(&server.url("/slow.pdf")).unwrap();
    let mut config = fast_network();
    config.retry.max_retries = 0;
    let network = NetworkLayer::new(config).expect("network");

    let fault = network
        .fetch_once(
            &url,
            uuid::Uuid::new_v4(),
            Duration::from_millis(100),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(fault, NetworkFault::Timeout { timeout_ms: 100, .. }));
}

#[tokio::test]
async fn retries_share_one_time_budget() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/overloaded.pdf");
            then.status(503).delay(Duration::from_millis(150));
        })
        .await;
    let url = Url::parse(&server.url("/overloaded.pdf")).unwrap();
    let mut config = fast_network();
    config.retry.max_retries = 5;
    let network = NetworkLayer::new(config).expect("network");

    let started = std::time::Instant::now();
    let fault = network
        .fetch_document(&url, &context(&url, Duration::from_millis(400)), None)
        .await
        .unwrap_err();

    assert!(matches!(fault, NetworkFault::Timeout { timeout_ms: 400, .. }));
    assert!(started.elapsed() < Duration::from_millis(800), "{:?}", started.elapsed());
    assert!(mock.hits_async().await < 6);
}

#[tokio::test]
async fn cancelling_a_rendering_aborts_its_requests() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/slow.pdf");
            then.status(200)
                .delay(Duration::from_secs(5))
                .body(common::pdf(1));
        })
        .await;
    let url = Url::parse(&server.url("/slow.pdf")).unwrap();
    let network = Arc::new(NetworkLayer::new(fast_network()).expect("network"));
    let ctx = context(&url, Duration::from_secs(30));
    let rendering_id = ctx.rendering_id;

    let fetching = {
        let network = Arc::clone(&network);
        tokio::spawn(async move { network.fetch_document(&url, &ctx, None).await })
    };
    while network.in_flight().is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(network.cancel_rendering(rendering_id), 1);

    let fault = fetching.await.expect("join").unwrap_err();
    assert!(matches!(fault, NetworkFault::Cancelled(_)));
    assert!(network.in_flight().is_empty());
}
