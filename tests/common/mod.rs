#![allow(dead_code)]

use std::time::Duration;

use docrelay::{
    application::{
        orchestrator::PipelineConfig, progress::ProgressConfig, recovery::RecoveryConfig,
    },
    infra::network::RetryPolicy,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
    task::JoinHandle,
};
use url::Url;

/// A minimal document with `pages` page objects of 32x24 and a trailer.
pub fn pdf(pages: usize) -> Vec<u8> {
    let mut body = String::from("%PDF-1.7\n1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    body.push_str("2 0 obj << /Type /Pages >> endobj\n");
    for index in 0..pages {
        body.push_str(&format!(
            "{} 0 obj << /Type /Page /MediaBox [0 0 32 24] >> endobj\n",
            index + 3
        ));
    }
    body.push_str("%%EOF\n");
    body.into_bytes()
}

/// `pdf(pages)` padded with comment bytes to exactly `len`, trailer last.
pub fn padded_pdf(pages: usize, len: usize) -> Vec<u8> {
    let mut body = pdf(pages);
    let trailer = body.split_off(body.len() - b"%%EOF\n".len());
    let padding = len.saturating_sub(body.len() + trailer.len());
    body.push(b'%');
    body.extend(std::iter::repeat_n(b'x', padding.saturating_sub(2)));
    body.push(b'\n');
    body.extend(trailer);
    body
}

/// Pipeline settings with millisecond backoffs so recovery-heavy sessions
/// finish quickly.
pub fn fast_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.network.retry = RetryPolicy {
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        max_retries: 0,
    };
    config.recovery = RecoveryConfig {
        network_retry_base: Duration::from_millis(1),
        network_retry_max_delay: Duration::from_millis(5),
        memory_cooldown: Duration::from_millis(1),
        ..RecoveryConfig::default()
    };
    config.progress = ProgressConfig {
        update_interval: Duration::from_millis(20),
        stuck_threshold: Duration::from_secs(30),
        purge_delay: Duration::from_secs(5),
    };
    config
}

/// Serves every connection the same way: declares `declared` bytes, writes
/// the first `sent` bytes of `body`, then hangs up.
pub async fn truncating_server(
    body: Vec<u8>,
    declared: usize,
    sent: usize,
) -> (Url, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let handle = tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let body = body.clone();
            tokio::spawn(async move {
                let mut request = [0_u8; 2048];
                let _ = socket.read(&mut request).await;
                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/pdf\r\nContent-Length: {declared}\r\nConnection: close\r\n\r\n"
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(&body[..sent.min(body.len())]).await;
                let _ = socket.flush().await;
            });
        }
    });
    let url = Url::parse(&format!("http://{addr}/truncated.pdf")).expect("url");
    (url, handle)
}
