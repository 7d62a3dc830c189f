use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::{
    application::canvas::SharedCanvas,
    domain::{
        context::RenderContext,
        error::{ErrorKind, RenderError},
        types::{RecoveryStrategyKind, RenderMethod},
    },
    infra::network::{RefreshError, UrlRefresher},
    util::lock::mutex_lock,
};

const SOURCE: &str = "docrelay::application::recovery::strategy";

/// Network retries never stretch the fetch timeout past this.
pub const NETWORK_TIMEOUT_CAP: Duration = Duration::from_secs(60);
/// Timeout extension never stretches a timeout past this.
pub const EXTENDED_TIMEOUT_CAP: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryConfig {
    /// First network-retry backoff; doubles with every use.
    pub network_retry_base: Duration,
    pub network_retry_max_delay: Duration,
    pub network_retry_max: u32,
    pub url_refresh_max: u32,
    pub canvas_recreation_max: u32,
    pub memory_cleanup_max: u32,
    pub memory_cooldown: Duration,
    pub timeout_extension_max: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            network_retry_base: Duration::from_millis(1000),
            network_retry_max_delay: Duration::from_secs(30),
            network_retry_max: 5,
            url_refresh_max: 3,
            canvas_recreation_max: 2,
            memory_cleanup_max: 2,
            memory_cooldown: Duration::from_millis(500),
            timeout_extension_max: 2,
        }
    }
}

/// Strategies tried for a kind, in order.
pub fn plan_for(kind: ErrorKind) -> &'static [RecoveryStrategyKind] {
    use RecoveryStrategyKind::*;
    match kind {
        ErrorKind::Network => &[NetworkRetry, UrlRefresh, FallbackMethod],
        ErrorKind::Authentication => &[UrlRefresh, FallbackMethod],
        ErrorKind::Canvas => &[CanvasRecreation, FallbackMethod],
        ErrorKind::Memory => &[MemoryCleanup, FallbackMethod],
        ErrorKind::Timeout => &[TimeoutExtension, FallbackMethod],
        ErrorKind::Parsing => &[FallbackMethod],
        ErrorKind::Corruption => &[],
    }
}

/// What the orchestrator runs next.
#[derive(Debug)]
pub struct RecoveryAction {
    pub next_context: RenderContext,
    /// Move to the next method in the chain instead of retrying this one.
    pub advance_method: bool,
}

impl RecoveryAction {
    fn retry(next_context: RenderContext) -> Self {
        Self {
            next_context,
            advance_method: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum RecoveryFault {
    #[error("no URL refresher configured")]
    NoRefresher,
    #[error("URL refresh failed: {0}")]
    Refresh(#[from] RefreshError),
}

#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    fn kind(&self) -> RecoveryStrategyKind;

    /// Uses allowed per session.
    fn max_retries(&self) -> u32;

    fn can_handle(&self, error: &RenderError) -> bool;

    /// Produce a fresh context for the next attempt. `attempt` counts earlier
    /// uses of this strategy in the session.
    async fn execute(
        &self,
        context: &mut RenderContext,
        error: &RenderError,
        attempt: u32,
    ) -> Result<RecoveryAction, RecoveryFault>;
}

/// Scale `current` by `factor`. The result never exceeds `cap`, even when
/// `current` already did.
fn stretch(current: Duration, factor: f64, cap: Duration) -> Duration {
    current.mul_f64(factor).min(cap)
}

fn release_surface(canvas: &SharedCanvas, context: &mut RenderContext, op: &'static str) {
    if let Some(mut surface) = context.surface.take() {
        mutex_lock(canvas, SOURCE, op).destroy_canvas(&mut surface);
    }
}

pub struct NetworkRetryStrategy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_retries: u32,
}

impl NetworkRetryStrategy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2_u32.saturating_pow(attempt))
            .min(self.max_delay)
    }
}

#[async_trait]
impl RecoveryStrategy for NetworkRetryStrategy {
    fn kind(&self) -> RecoveryStrategyKind {
        RecoveryStrategyKind::NetworkRetry
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn can_handle(&self, error: &RenderError) -> bool {
        error.kind == ErrorKind::Network
    }

    async fn execute(
        &self,
        context: &mut RenderContext,
        _error: &RenderError,
        attempt: u32,
    ) -> Result<RecoveryAction, RecoveryFault> {
        tokio::time::sleep(self.delay_for(attempt)).await;
        let timeout = stretch(context.options.timeout, 1.5, NETWORK_TIMEOUT_CAP);
        Ok(RecoveryAction::retry(context.create_fresh().with_timeout(timeout)))
    }
}

pub struct UrlRefreshStrategy {
    pub refresher: Option<Arc<dyn UrlRefresher>>,
    pub max_retries: u32,
}

#[async_trait]
impl RecoveryStrategy for UrlRefreshStrategy {
    fn kind(&self) -> RecoveryStrategyKind {
        RecoveryStrategyKind::UrlRefresh
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn can_handle(&self, error: &RenderError) -> bool {
        self.refresher.is_some()
            && matches!(error.kind, ErrorKind::Authentication | ErrorKind::Network)
    }

    async fn execute(
        &self,
        context: &mut RenderContext,
        _error: &RenderError,
        _attempt: u32,
    ) -> Result<RecoveryAction, RecoveryFault> {
        let refresher = self.refresher.as_ref().ok_or(RecoveryFault::NoRefresher)?;
        let fresh = refresher.refresh(&context.url).await?;
        info!(
            target = SOURCE,
            op = "url_refresh",
            result = "refreshed",
            rendering_id = %context.rendering_id,
            host = fresh.host_str().unwrap_or_default(),
        );
        Ok(RecoveryAction::retry(context.create_fresh().with_url(fresh)))
    }
}

pub struct CanvasRecreationStrategy {
    pub canvas: SharedCanvas,
    pub max_retries: u32,
}

#[async_trait]
impl RecoveryStrategy for CanvasRecreationStrategy {
    fn kind(&self) -> RecoveryStrategyKind {
        RecoveryStrategyKind::CanvasRecreation
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn can_handle(&self, error: &RenderError) -> bool {
        error.kind == ErrorKind::Canvas
    }

    async fn execute(
        &self,
        context: &mut RenderContext,
        _error: &RenderError,
        _attempt: u32,
    ) -> Result<RecoveryAction, RecoveryFault> {
        release_surface(&self.canvas, context, "canvas_recreation");
        Ok(RecoveryAction::retry(context.create_fresh()))
    }
}

pub struct MemoryCleanupStrategy {
    pub canvas: SharedCanvas,
    pub cooldown: Duration,
    pub max_retries: u32,
}

#[async_trait]
impl RecoveryStrategy for MemoryCleanupStrategy {
    fn kind(&self) -> RecoveryStrategyKind {
        RecoveryStrategyKind::MemoryCleanup
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn can_handle(&self, error: &RenderError) -> bool {
        error.kind == ErrorKind::Memory
    }

    async fn execute(
        &self,
        context: &mut RenderContext,
        _error: &RenderError,
        _attempt: u32,
    ) -> Result<RecoveryAction, RecoveryFault> {
        let (collected, removed, remaining) = {
            let mut canvas = mutex_lock(&self.canvas, SOURCE, "memory_cleanup");
            let collected = canvas
                .heap_probe()
                .is_some_and(|probe| probe.request_collection());
            if let Some(mut surface) = context.surface.take() {
                canvas.destroy_canvas(&mut surface);
            }
            context.document = None;
            let removed = canvas.cleanup_unused_canvases();
            (collected, removed, canvas.memory_usage())
        };
        info!(
            target = SOURCE,
            op = "memory_cleanup",
            rendering_id = %context.rendering_id,
            collected,
            removed,
            remaining_bytes = remaining,
            cooldown_ms = self.cooldown.as_millis() as u64,
        );
        tokio::time::sleep(self.cooldown).await;
        Ok(RecoveryAction::retry(context.create_fresh()))
    }
}

pub struct TimeoutExtensionStrategy {
    pub max_retries: u32,
}

#[async_trait]
impl RecoveryStrategy for TimeoutExtensionStrategy {
    fn kind(&self) -> RecoveryStrategyKind {
        RecoveryStrategyKind::TimeoutExtension
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn can_handle(&self, error: &RenderError) -> bool {
        error.kind == ErrorKind::Timeout
    }

    async fn execute(
        &self,
        context: &mut RenderContext,
        _error: &RenderError,
        _attempt: u32,
    ) -> Result<RecoveryAction, RecoveryFault> {
        let mut next = context.create_fresh();
        next.options.timeout = stretch(context.options.timeout, 2.0, EXTENDED_TIMEOUT_CAP);
        next.options.stage_timeout =
            stretch(context.options.stage_timeout, 2.0, EXTENDED_TIMEOUT_CAP);
        Ok(RecoveryAction::retry(next))
    }
}

/// Gives up on the current method.
pub struct FallbackMethodStrategy;

#[async_trait]
impl RecoveryStrategy for FallbackMethodStrategy {
    fn kind(&self) -> RecoveryStrategyKind {
        RecoveryStrategyKind::FallbackMethod
    }

    fn max_retries(&self) -> u32 {
        RenderMethod::CHAIN.len() as u32
    }

    fn can_handle(&self, _error: &RenderError) -> bool {
        true
    }

    async fn execute(
        &self,
        context: &mut RenderContext,
        _error: &RenderError,
        _attempt: u32,
    ) -> Result<RecoveryAction, RecoveryFault> {
        Ok(RecoveryAction {
            next_context: context.create_fresh(),
            advance_method: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::*;
    use crate::{
        application::canvas::{CanvasConfig, CanvasManager},
        domain::context::RenderOptions,
    };

    fn context(timeout: Duration) -> RenderContext {
        RenderContext::new(
            Url::parse("https://docs.example.com/a.pdf").unwrap(),
            RenderOptions {
                timeout,
                ..RenderOptions::default()
            },
        )
    }

    #[test]
    fn network_backoff_doubles_from_the_base() {
        let strategy = NetworkRetryStrategy {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            max_retries: 5,
        };
        let delays: Vec<u64> = (0..6)
            .map(|attempt| strategy.delay_for(attempt).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000, 30000]);
    }

    #[tokio::test(start_paused = true)]
    async fn network_retry_stretches_the_fetch_timeout() {
        let strategy = NetworkRetryStrategy {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            max_retries: 5,
        };
        let error = RenderError::new(ErrorKind::Network, "reset");

        let mut ctx = context(Duration::from_secs(30));
        let action = strategy.execute(&mut ctx, &error, 0).await.unwrap();
        assert_eq!(action.next_context.options.timeout, Duration::from_secs(45));
        assert_ne!(action.next_context.rendering_id, ctx.rendering_id);
        assert_eq!(action.next_context.session_id, ctx.session_id);
        assert!(!action.advance_method);

        let mut ctx = context(Duration::from_secs(50));
        let action = strategy.execute(&mut ctx, &error, 1).await.unwrap();
        assert_eq!(action.next_context.options.timeout, NETWORK_TIMEOUT_CAP);

        let mut ctx = context(Duration::from_secs(90));
        let action = strategy.execute(&mut ctx, &error, 2).await.unwrap();
        assert_eq!(action.next_context.options.timeout, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn timeout_extension_doubles_and_caps() {
        let error = RenderError::new(ErrorKind::Timeout, "slow");
        let mut ctx = context(Duration::from_secs(40));
        let action = TimeoutExtensionStrategy { max_retries: 2 }
            .execute(&mut ctx, &error, 0)
            .await
            .unwrap();
        assert_eq!(action.next_context.options.timeout, Duration::from_secs(80));
        assert_eq!(action.next_context.options.stage_timeout, EXTENDED_TIMEOUT_CAP);

        let mut ctx = context(Duration::from_secs(200));
        ctx.options.stage_timeout = Duration::from_secs(300);
        let action = TimeoutExtensionStrategy { max_retries: 2 }
            .execute(&mut ctx, &error, 0)
            .await
            .unwrap();
        assert_eq!(action.next_context.options.timeout, EXTENDED_TIMEOUT_CAP);
        assert_eq!(action.next_context.options.stage_timeout, EXTENDED_TIMEOUT_CAP);
    }

    #[tokio::test]
    async fn canvas_recreation_destroys_the_surface_first() {
        let canvas = CanvasManager::new(CanvasConfig::default()).into_shared();
        let mut ctx = context(Duration::from_secs(30));
        ctx.surface = Some(canvas.lock().unwrap().create_canvas(8, 8).unwrap());

        let strategy = CanvasRecreationStrategy {
            canvas: canvas.clone(),
            max_retries: 2,
        };
        let error = RenderError::new(ErrorKind::Canvas, "context lost");
        let action = strategy.execute(&mut ctx, &error, 0).await.unwrap();

        assert!(ctx.surface.is_none());
        assert!(action.next_context.surface.is_none());
        assert_eq!(canvas.lock().unwrap().surface_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn memory_cleanup_drops_document_and_surface() {
        let canvas = CanvasManager::new(CanvasConfig::default()).into_shared();
        let mut ctx = context(Duration::from_secs(30));
        ctx.surface = Some(canvas.lock().unwrap().create_canvas(16, 16).unwrap());
        ctx.document = Some(crate::domain::document::ParsedDocument::new(
            "1.7",
            1,
            (16, 16),
            false,
            bytes::Bytes::from_static(b"%PDF-1.7"),
        ));

        let strategy = MemoryCleanupStrategy {
            canvas: canvas.clone(),
            cooldown: Duration::from_millis(500),
            max_retries: 2,
        };
        let error = RenderError::new(ErrorKind::Memory, "allocation failed");
        strategy.execute(&mut ctx, &error, 0).await.unwrap();

        assert!(ctx.document.is_none());
        assert!(ctx.surface.is_none());
        assert_eq!(canvas.lock().unwrap().memory_usage(), 0);
    }

    #[test]
    fn url_refresh_needs_a_refresher() {
        let strategy = UrlRefreshStrategy {
            refresher: None,
            max_retries: 3,
        };
        assert!(!strategy.can_handle(&RenderError::new(ErrorKind::Authentication, "401")));
    }

    #[test]
    fn corruption_has_no_plan() {
        assert!(plan_for(ErrorKind::Corruption).is_empty());
        for kind in ErrorKind::ALL {
            if kind.is_recoverable() {
                assert_eq!(
                    plan_for(kind).last(),
                    Some(&RecoveryStrategyKind::FallbackMethod)
                );
            }
        }
    }
}
