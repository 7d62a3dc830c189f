//! Rendering methods and the fixed-order chain that falls back between them.

mod conversion;
mod direct;
mod download;
mod embedded;
mod engine;
mod prerendered;
mod stats;

use std::{
    collections::BTreeMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use metrics::{counter, histogram};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    application::{
        canvas::CanvasFault,
        progress::{ProgressTracker, ProgressUpdate},
    },
    domain::{
        context::RenderContext,
        types::{ProgressStage, RenderMethod, RenderedPage, SizeClass},
    },
    infra::network::NetworkFault,
    util::lock::{rw_read, rw_write},
};

pub use conversion::{
    ConversionFault, ConversionHandler, ConversionService, HttpConversionService, ManifestPage,
    PageManifest,
};
pub use direct::DirectRenderHandler;
pub use download::DownloadHandler;
pub use embedded::EmbeddedViewerHandler;
pub use engine::{DocumentEngine, EngineFault, StructuralEngine};
pub use prerendered::{DEFAULT_MANIFEST_SUFFIX, PreRenderedHandler};
pub use stats::{MethodStatistics, MethodSuccessRecord, default_preference};

const SOURCE: &str = "docrelay::application::methods";

/// Why a rendering attempt did not produce pages.
#[derive(Debug, Error)]
pub enum MethodFailure {
    #[error(transparent)]
    Network(#[from] NetworkFault),
    #[error(transparent)]
    Canvas(#[from] CanvasFault),
    #[error(transparent)]
    Engine(#[from] EngineFault),
    #[error(transparent)]
    Conversion(#[from] ConversionFault),
    #[error("stage `{stage}` exceeded {timeout_ms} ms")]
    StageTimeout { stage: ProgressStage, timeout_ms: u64 },
    #[error("forced retry requested for stalled attempt")]
    ForcedRetry,
    #[error("rendering method `{0}` is not available")]
    Unavailable(RenderMethod),
    #[error("{0}")]
    Opaque(String),
}

/// One way of turning a document URL into pages.
#[async_trait]
pub trait RenderMethodHandler: Send + Sync {
    fn method(&self) -> RenderMethod;

    /// Whether the collaborators this method needs are configured.
    fn is_available(&self) -> bool {
        true
    }

    async fn render(&self, context: &mut RenderContext) -> Result<Vec<RenderedPage>, MethodFailure>;
}

/// Moves a session's progress into a stage at a given percentage.
pub(crate) fn report_stage(
    progress: &ProgressTracker,
    session_id: Uuid,
    stage: ProgressStage,
    percentage: f64,
) {
    progress.update_progress(session_id, ProgressUpdate::stage(stage).percentage(percentage));
}

pub struct RenderingMethodChain {
    handlers: BTreeMap<RenderMethod, Arc<dyn RenderMethodHandler>>,
    stats: Arc<RwLock<MethodStatistics>>,
}

impl Default for RenderingMethodChain {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderingMethodChain {
    pub fn new() -> Self {
        Self {
            handlers: BTreeMap::new(),
            stats: Arc::new(RwLock::new(MethodStatistics::default())),
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn RenderMethodHandler>) -> Self {
        self.register(handler);
        self
    }

    pub fn register(&mut self, handler: Arc<dyn RenderMethodHandler>) {
        self.handlers.insert(handler.method(), handler);
    }

    /// The method after `failed` in the fixed order; `None` after the last.
    pub fn next_method(failed: RenderMethod) -> Option<RenderMethod> {
        RenderMethod::CHAIN.get(failed.position() + 1).copied()
    }

    pub fn is_available(&self, method: RenderMethod) -> bool {
        self.handlers
            .get(&method)
            .is_some_and(|handler| handler.is_available())
    }

    /// `method` itself if available, otherwise the next available one.
    pub fn first_available(&self, method: RenderMethod) -> Option<RenderMethod> {
        if self.is_available(method) {
            return Some(method);
        }
        self.next_available(method)
    }

    /// Like [`Self::next_method`], skipping methods whose handler is missing
    /// or unavailable.
    pub fn next_available(&self, failed: RenderMethod) -> Option<RenderMethod> {
        let mut current = failed;
        while let Some(next) = Self::next_method(current) {
            if self.is_available(next) {
                return Some(next);
            }
            current = next;
        }
        None
    }

    pub fn preferred_method(&self, size: SizeClass) -> RenderMethod {
        rw_read(&self.stats, SOURCE, "preferred_method").preferred(size)
    }

    pub fn record_method_success(
        &self,
        method: RenderMethod,
        size: SizeClass,
        elapsed: std::time::Duration,
    ) {
        rw_write(&self.stats, SOURCE, "record_method_success").record_success(method, size, elapsed);
    }

    pub fn record_method_failure(&self, method: RenderMethod, size: SizeClass) {
        rw_write(&self.stats, SOURCE, "record_method_failure").record_failure(method, size);
    }

    pub fn statistics(&self) -> MethodStatistics {
        rw_read(&self.stats, SOURCE, "statistics").clone()
    }

    pub fn clear_method_history(&self) {
        rw_write(&self.stats, SOURCE, "clear_method_history").clear();
    }

    /// Run one method, timing it and recording the outcome under the
    /// context's size class.
    pub async fn attempt_method(
        &self,
        method: RenderMethod,
        context: &mut RenderContext,
    ) -> Result<Vec<RenderedPage>, MethodFailure> {
        let handler = match self.handlers.get(&method) {
            Some(handler) if handler.is_available() => Arc::clone(handler),
            _ => return Err(MethodFailure::Unavailable(method)),
        };

        let started = Instant::now();
        let result = handler.render(context).await;
        let elapsed = started.elapsed();
        let size = context.size_class();
        let elapsed_ms = elapsed.as_millis() as u64;

        histogram!("docrelay_render_attempt_ms", "method" => method.as_str())
            .record(elapsed_ms as f64);
        match &result {
            Ok(pages) => {
                self.record_method_success(method, size, elapsed);
                counter!(
                    "docrelay_render_attempt_total",
                    "method" => method.as_str(),
                    "result" => "success"
                )
                .increment(1);
                info!(
                    target = SOURCE,
                    op = "attempt_method",
                    result = "success",
                    method = %method,
                    size_class = %size,
                    rendering_id = %context.rendering_id,
                    pages = pages.len(),
                    elapsed_ms,
                    "Rendering method succeeded"
                );
            }
            Err(failure) => {
                self.record_method_failure(method, size);
                counter!(
                    "docrelay_render_attempt_total",
                    "method" => method.as_str(),
                    "result" => "failure"
                )
                .increment(1);
                warn!(
                    target = SOURCE,
                    op = "attempt_method",
                    result = "failure",
                    method = %method,
                    size_class = %size,
                    rendering_id = %context.rendering_id,
                    elapsed_ms,
                    error = %failure,
                    "Rendering method failed"
                );
            }
        }
        result
    }
}
