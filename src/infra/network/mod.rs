//! Network resilience layer: streamed fetches with timeouts, bounded retries,
//! signed-URL refresh, partial-payload salvage and cancellation.

mod fault;
mod partial;
mod refresh;
mod requests;
mod retry;

use std::{future::Future, sync::Arc, time::Duration};

use bytes::{Bytes, BytesMut};
use metrics::{counter, histogram};
use reqwest::{Client, header::RANGE};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::{domain::context::RenderContext, infra::error::InfraError};

pub use fault::NetworkFault;
pub use partial::{DOCUMENT_MAGIC, MIN_PARTIAL_BYTES, MIN_PARTIAL_RATIO, PartialDataPolicy};
pub use refresh::{HttpUrlRefresher, RefreshError, UrlRefresher};
pub use requests::{InFlightRequests, RequestGuard, RequestId};
pub use retry::RetryPolicy;

use fault::is_auth_status;

const SOURCE: &str = "docrelay::infra::network";
/// Bytes requested by [`NetworkLayer::probe_header`].
pub const PROBE_BYTES: usize = 1024;
const MAX_PREALLOCATION: u64 = 16 * 1024 * 1024;

/// Receives `(bytes_loaded, total_bytes)` after every body chunk.
pub type ProgressFn<'a> = &'a (dyn Fn(u64, Option<u64>) + Send + Sync);

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub partial: PartialDataPolicy,
    pub user_agent: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout: crate::domain::context::DEFAULT_FETCH_TIMEOUT,
            retry: RetryPolicy::default(),
            partial: PartialDataPolicy { enabled: true },
            user_agent: default_user_agent().to_string(),
        }
    }
}

pub fn default_user_agent() -> &'static str {
    concat!("docrelay/", env!("CARGO_PKG_VERSION"))
}

/// Result of one completed transfer.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub status: u16,
    pub data: Bytes,
    pub bytes_received: u64,
    pub content_length: Option<u64>,
    /// The body ended short of the declared length, or an unsized transfer
    /// was cut off.
    pub is_partial: bool,
    /// URL that produced the body; differs from the request after a refresh.
    pub url: Url,
}

pub struct NetworkLayer {
    client: Client,
    config: NetworkConfig,
    refresher: Option<Arc<dyn UrlRefresher>>,
    requests: InFlightRequests,
}

impl NetworkLayer {
    pub fn new(config: NetworkConfig) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(InfraError::HttpClient)?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: NetworkConfig) -> Self {
        Self {
            client,
            config,
            refresher: None,
            requests: InFlightRequests::new(),
        }
    }

    pub fn with_refresher(mut self, refresher: Arc<dyn UrlRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn refresher(&self) -> Option<Arc<dyn UrlRefresher>> {
        self.refresher.clone()
    }

    pub fn in_flight(&self) -> &InFlightRequests {
        &self.requests
    }

    /// Abort a tracked request. Unknown or finished ids are ignored.
    pub fn cancel(&self, id: RequestId) -> bool {
        let cancelled = self.requests.cancel(id);
        debug!(
            target = SOURCE,
            op = "cancel",
            request_id = %id,
            result = if cancelled { "cancelled" } else { "noop" },
        );
        cancelled
    }

    pub fn cancel_rendering(&self, rendering_id: Uuid) -> usize {
        self.requests.cancel_rendering(rendering_id)
    }

    pub fn can_render_partial_data(&self, buffer: &[u8], content_length: Option<u64>) -> bool {
        self.config.partial.can_render(buffer, content_length)
    }

    /// Fetch a whole document, retrying transient faults and refreshing the
    /// URL once when it is rejected with 401/403. `context.options.timeout`
    /// bounds the whole fetch, retries and backoff included.
    pub async fn fetch_document(
        &self,
        url: &Url,
        context: &RenderContext,
        on_progress: Option<ProgressFn<'_>>,
    ) -> Result<FetchOutcome, NetworkFault> {
        let timeout = context.options.timeout;
        match tokio::time::timeout(timeout, self.fetch_with_retries(url, context, on_progress))
            .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    target = SOURCE,
                    op = "fetch_document",
                    result = "timeout",
                    rendering_id = %context.rendering_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Document fetch exceeded its time budget"
                );
                Err(NetworkFault::Timeout {
                    url: url.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    async fn fetch_with_retries(
        &self,
        url: &Url,
        context: &RenderContext,
        on_progress: Option<ProgressFn<'_>>,
    ) -> Result<FetchOutcome, NetworkFault> {
        let timeout = context.options.timeout;
        let mut target = url.clone();
        let mut retries = 0_u32;
        let mut refreshed = false;

        loop {
            match self
                .fetch_once(&target, context.rendering_id, timeout, on_progress)
                .await
            {
                Ok(outcome) => return Ok(outcome),
                Err(NetworkFault::Status { status, .. }) if is_auth_status(status) => {
                    target = self.refresh_rejected(&target, status, refreshed).await?;
                    refreshed = true;
                }
                Err(fault) if fault.is_retryable() && self.config.retry.allows(retries) => {
                    retries += 1;
                    let delay = self.config.retry.delay_for(retries);
                    warn!(
                        target = SOURCE,
                        op = "fetch_document",
                        result = "retry",
                        rendering_id = %context.rendering_id,
                        retry = retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %fault,
                        "Retrying document fetch"
                    );
                    counter!("docrelay_fetch_retry_total").increment(1);
                    tokio::time::sleep(delay).await;
                }
                Err(fault) => return Err(fault),
            }
        }
    }

    async fn refresh_rejected(
        &self,
        url: &Url,
        status: u16,
        already_refreshed: bool,
    ) -> Result<Url, NetworkFault> {
        if already_refreshed {
            return Err(NetworkFault::Authentication {
                status,
                reason: "refreshed URL was rejected as well".to_string(),
            });
        }
        let Some(refresher) = self.refresher.as_ref() else {
            return Err(NetworkFault::Authentication {
                status,
                reason: "no URL refresher configured".to_string(),
            });
        };
        match refresher.refresh(url).await {
            Ok(fresh) => {
                info!(
                    target = SOURCE,
                    op = "refresh_url",
                    result = "refreshed",
                    status,
                    host = url.host_str().unwrap_or_default(),
                    "Signed URL refreshed after rejection"
                );
                Ok(fresh)
            }
            Err(err) => Err(NetworkFault::Authentication {
                status,
                reason: format!("URL refresh failed: {err}"),
            }),
        }
    }

    /// One streamed GET bounded by `timeout`, without retries.
    pub async fn fetch_once(
        &self,
        url: &Url,
        rendering_id: Uuid,
        timeout: Duration,
        on_progress: Option<ProgressFn<'_>>,
    ) -> Result<FetchOutcome, NetworkFault> {
        let started = Instant::now();
        let result = self
            .run_tracked(url, rendering_id, timeout, self.transfer(url, on_progress))
            .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        histogram!("docrelay_fetch_ms").record(elapsed_ms as f64);
        match &result {
            Ok(outcome) => {
                let label = if outcome.is_partial { "partial" } else { "complete" };
                counter!("docrelay_fetch_total", "result" => label).increment(1);
                counter!("docrelay_fetch_bytes_total").increment(outcome.bytes_received);
                info!(
                    target = SOURCE,
                    op = "fetch",
                    result = label,
                    rendering_id = %rendering_id,
                    host = url.host_str().unwrap_or_default(),
                    path = url.path(),
                    status = outcome.status,
                    bytes = outcome.bytes_received,
                    content_length = ?outcome.content_length,
                    elapsed_ms,
                    "Document fetched"
                );
            }
            Err(fault) => {
                counter!("docrelay_fetch_total", "result" => fault.metric_label()).increment(1);
                warn!(
                    target = SOURCE,
                    op = "fetch",
                    result = "error",
                    rendering_id = %rendering_id,
                    host = url.host_str().unwrap_or_default(),
                    path = url.path(),
                    elapsed_ms,
                    error = %fault,
                    "Document fetch failed"
                );
            }
        }
        result
    }

    /// Ranged GET returning at most [`PROBE_BYTES`] leading bytes.
    pub async fn probe_header(
        &self,
        url: &Url,
        context: &RenderContext,
    ) -> Result<Bytes, NetworkFault> {
        let probe = async {
            let mut response = self
                .client
                .get(url.clone())
                .header(RANGE, format!("bytes=0-{}", PROBE_BYTES - 1))
                .send()
                .await
                .map_err(NetworkFault::Transport)?;
            let status = response.status();
            if !status.is_success() {
                return Err(NetworkFault::Status {
                    url: url.to_string(),
                    status: status.as_u16(),
                });
            }
            let mut head = BytesMut::with_capacity(PROBE_BYTES);
            while head.len() < PROBE_BYTES {
                match response.chunk().await.map_err(NetworkFault::Transport)? {
                    Some(chunk) => head.extend_from_slice(&chunk),
                    None => break,
                }
            }
            head.truncate(PROBE_BYTES);
            Ok(head.freeze())
        };

        let result = self
            .run_tracked(url, context.rendering_id, context.options.timeout, probe)
            .await;
        debug!(
            target = SOURCE,
            op = "probe_header",
            result = if result.is_ok() { "ok" } else { "error" },
            rendering_id = %context.rendering_id,
            path = url.path(),
        );
        result
    }

    async fn run_tracked<T>(
        &self,
        url: &Url,
        rendering_id: Uuid,
        timeout: Duration,
        operation: impl Future<Output = Result<T, NetworkFault>>,
    ) -> Result<T, NetworkFault> {
        let (guard, mut cancelled) = self.requests.register(rendering_id);
        let request_id = guard.id();

        let result = tokio::select! {
            biased;
            _ = &mut cancelled => Err(NetworkFault::Cancelled(request_id)),
            outcome = tokio::time::timeout(timeout, operation) => match outcome {
                Ok(result) => result,
                Err(_) => Err(NetworkFault::Timeout {
                    url: url.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                }),
            },
        };
        drop(guard);
        result
    }

    async fn transfer(
        &self,
        url: &Url,
        on_progress: Option<ProgressFn<'_>>,
    ) -> Result<FetchOutcome, NetworkFault> {
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(NetworkFault::Transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(NetworkFault::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_length = response.content_length();
        let capacity = content_length.unwrap_or(0).min(MAX_PREALLOCATION) as usize;
        let mut data = BytesMut::with_capacity(capacity);
        let mut aborted = None;

        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    data.extend_from_slice(&chunk);
                    if let Some(report) = on_progress {
                        report(data.len() as u64, content_length);
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    aborted = Some(err);
                    break;
                }
            }
        }

        let bytes_received = data.len() as u64;
        let was_aborted = aborted.is_some();
        if let Some(err) = aborted {
            if bytes_received == 0 {
                return Err(NetworkFault::Transport(err));
            }
            warn!(
                target = SOURCE,
                op = "transfer",
                result = "aborted",
                bytes = bytes_received,
                content_length = ?content_length,
                error = %err,
                "Body stream ended early"
            );
        }

        let is_partial = match content_length {
            Some(total) => bytes_received < total,
            None => was_aborted,
        };

        Ok(FetchOutcome {
            status: status.as_u16(),
            data: data.freeze(),
            bytes_received,
            content_length,
            is_partial,
            url: url.clone(),
        })
    }
}
