//! Composition root driving one rendering session from URL to pages.

use std::{num::NonZeroUsize, sync::Arc, time::Duration};

use dashmap::DashMap;
use docrelay_types::{AttemptOutcome, AttemptRecord};
use metrics::counter;
use reqwest::Client;
use time::OffsetDateTime;
use tokio::{
    sync::Notify,
    time::{Instant, timeout},
};
use tracing::{error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::{
    application::{
        canvas::{
            CanvasConfig, CanvasManager, HeapProbe, MemoryBackend, SharedCanvas, SurfaceBackend,
        },
        diagnostics::DiagnosticsCollector,
        methods::{
            ConversionHandler, ConversionService, DEFAULT_MANIFEST_SUFFIX, DirectRenderHandler,
            DocumentEngine, DownloadHandler, EmbeddedViewerHandler, HttpConversionService,
            MethodFailure, PreRenderedHandler, RenderingMethodChain, StructuralEngine,
        },
        progress::{ProgressConfig, ProgressTracker},
        recovery::{ErrorRecoverySystem, RecoveryConfig, categorize},
    },
    domain::{
        context::{RenderContext, RenderOptions},
        error::{DomainError, ErrorKind, RenderError},
        types::{ProgressStage, ProgressState, RenderMethod, RenderResult, RenderedPage},
    },
    infra::{
        error::InfraError,
        network::{HttpUrlRefresher, NetworkConfig, NetworkLayer, UrlRefresher},
    },
    config::Settings,
    util::lock::mutex_lock,
};

const SOURCE: &str = "docrelay::application::orchestrator";

pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_DIAGNOSTICS_RETENTION: NonZeroUsize = match NonZeroUsize::new(64) {
    Some(value) => value,
    None => NonZeroUsize::MIN,
};

/// Which optional methods are wired, and where their remote halves live.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodsConfig {
    pub manifest_suffix: String,
    pub embedded_viewer: bool,
    pub conversion_endpoint: Option<Url>,
    pub refresh_endpoint: Option<Url>,
    pub refresh_timeout: Duration,
}

impl Default for MethodsConfig {
    fn default() -> Self {
        Self {
            manifest_suffix: DEFAULT_MANIFEST_SUFFIX.to_string(),
            embedded_viewer: true,
            conversion_endpoint: None,
            refresh_endpoint: None,
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Ceiling on method attempts per session, recoveries included.
    pub max_attempts: u32,
    pub diagnostics_retention: NonZeroUsize,
    pub network: NetworkConfig,
    pub canvas: CanvasConfig,
    pub progress: ProgressConfig,
    pub recovery: RecoveryConfig,
    pub methods: MethodsConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            diagnostics_retention: DEFAULT_DIAGNOSTICS_RETENTION,
            network: NetworkConfig::default(),
            canvas: CanvasConfig::default(),
            progress: ProgressConfig::default(),
            recovery: RecoveryConfig::default(),
            methods: MethodsConfig::default(),
        }
    }
}

impl From<&Settings> for PipelineConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            max_attempts: settings.pipeline.max_attempts.get(),
            diagnostics_retention: settings.pipeline.diagnostics_retention,
            network: settings.network.clone(),
            canvas: settings.canvas.clone(),
            progress: settings.progress.clone(),
            recovery: settings.recovery.clone(),
            methods: settings.methods.clone(),
        }
    }
}

/// Collaborators left unset fall back to the in-process defaults: the
/// structural engine, heap-backed surfaces, and HTTP services built from
/// the configured endpoints.
pub struct OrchestratorBuilder {
    config: PipelineConfig,
    client: Option<Client>,
    engine: Option<Arc<dyn DocumentEngine>>,
    url_refresher: Option<Arc<dyn UrlRefresher>>,
    conversion_service: Option<Arc<dyn ConversionService>>,
    heap_probe: Option<Arc<dyn HeapProbe>>,
    surface_backend: Option<Arc<dyn SurfaceBackend>>,
}

impl OrchestratorBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            client: None,
            engine: None,
            url_refresher: None,
            conversion_service: None,
            heap_probe: None,
            surface_backend: None,
        }
    }

    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    pub fn engine(mut self, engine: Arc<dyn DocumentEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn url_refresher(mut self, refresher: Arc<dyn UrlRefresher>) -> Self {
        self.url_refresher = Some(refresher);
        self
    }

    pub fn conversion_service(mut self, service: Arc<dyn ConversionService>) -> Self {
        self.conversion_service = Some(service);
        self
    }

    pub fn heap_probe(mut self, probe: Arc<dyn HeapProbe>) -> Self {
        self.heap_probe = Some(probe);
        self
    }

    pub fn surface_backend(mut self, backend: Arc<dyn SurfaceBackend>) -> Self {
        self.surface_backend = Some(backend);
        self
    }

    pub fn build(self) -> Result<Orchestrator, InfraError> {
        let OrchestratorBuilder {
            config,
            client,
            engine,
            url_refresher,
            conversion_service,
            heap_probe,
            surface_backend,
        } = self;

        if config.max_attempts == 0 {
            return Err(InfraError::configuration("max_attempts must be at least 1"));
        }

        let mut network = match client {
            Some(client) => NetworkLayer::with_client(client, config.network.clone()),
            None => NetworkLayer::new(config.network.clone())?,
        };
        let refresher = url_refresher.or_else(|| {
            config.methods.refresh_endpoint.clone().map(|endpoint| {
                Arc::new(HttpUrlRefresher::new(
                    network.client().clone(),
                    endpoint,
                    config.methods.refresh_timeout,
                )) as Arc<dyn UrlRefresher>
            })
        });
        if let Some(refresher) = &refresher {
            network = network.with_refresher(Arc::clone(refresher));
        }
        let conversion = conversion_service.or_else(|| {
            config.methods.conversion_endpoint.clone().map(|endpoint| {
                Arc::new(HttpConversionService::new(network.client().clone(), endpoint))
                    as Arc<dyn ConversionService>
            })
        });
        let network = Arc::new(network);

        let backend = surface_backend.unwrap_or_else(|| Arc::new(MemoryBackend::default()));
        let mut canvas = CanvasManager::with_backend(config.canvas.clone(), backend);
        let mut diagnostics = DiagnosticsCollector::new(config.diagnostics_retention);
        if let Some(probe) = heap_probe {
            canvas = canvas.with_heap_probe(Arc::clone(&probe));
            diagnostics = diagnostics.with_heap_probe(probe);
        }
        let canvas = canvas.into_shared();

        let progress = ProgressTracker::new(config.progress.clone());
        let engine = engine.unwrap_or_else(|| Arc::new(StructuralEngine::default()));

        let chain = RenderingMethodChain::new()
            .with_handler(Arc::new(DirectRenderHandler::new(
                Arc::clone(&network),
                Arc::clone(&canvas),
                engine,
                progress.clone(),
            )))
            .with_handler(Arc::new(EmbeddedViewerHandler::new(
                Arc::clone(&network),
                progress.clone(),
                config.methods.embedded_viewer,
            )))
            .with_handler(Arc::new(ConversionHandler::new(conversion, progress.clone())))
            .with_handler(Arc::new(PreRenderedHandler::new(
                Arc::clone(&network),
                progress.clone(),
                config.methods.manifest_suffix.clone(),
            )))
            .with_handler(Arc::new(DownloadHandler));

        let recovery = ErrorRecoverySystem::new(
            &config.recovery,
            Arc::clone(&canvas),
            refresher,
            diagnostics.clone(),
        );

        let interrupts: Arc<DashMap<Uuid, Arc<Notify>>> = Arc::new(DashMap::new());
        let forced = Arc::clone(&interrupts);
        progress.on_retry(Arc::new(move |session_id: Uuid, _: &ProgressState| {
            if let Some(interrupt) = forced.get(&session_id) {
                interrupt.notify_waiters();
            }
        }));

        Ok(Orchestrator {
            max_attempts: config.max_attempts,
            network,
            canvas,
            chain,
            progress,
            recovery,
            diagnostics,
            interrupts,
        })
    }
}

pub struct Orchestrator {
    max_attempts: u32,
    network: Arc<NetworkLayer>,
    canvas: SharedCanvas,
    chain: RenderingMethodChain,
    progress: ProgressTracker,
    recovery: ErrorRecoverySystem,
    diagnostics: DiagnosticsCollector,
    interrupts: Arc<DashMap<Uuid, Arc<Notify>>>,
}

impl Orchestrator {
    pub fn builder(config: PipelineConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    pub fn diagnostics(&self) -> &DiagnosticsCollector {
        &self.diagnostics
    }

    pub fn chain(&self) -> &RenderingMethodChain {
        &self.chain
    }

    pub fn recovery(&self) -> &ErrorRecoverySystem {
        &self.recovery
    }

    pub fn canvas(&self) -> &SharedCanvas {
        &self.canvas
    }

    pub fn network(&self) -> &NetworkLayer {
        &self.network
    }

    /// Validate the request and register the session so callers can
    /// subscribe to progress before [`Orchestrator::run`] starts it.
    pub fn prepare(&self, url: Url, options: RenderOptions) -> Result<RenderContext, DomainError> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DomainError::validation(format!(
                "unsupported URL scheme `{}`",
                url.scheme()
            )));
        }
        if options.timeout.is_zero() || options.stage_timeout.is_zero() {
            return Err(DomainError::validation("timeouts must be non-zero"));
        }

        let mut context = RenderContext::new(url, options);
        self.diagnostics
            .begin_session(context.session_id, &context.url);
        context.progress_state = Some(
            self.progress
                .initialize_progress(context.session_id, ProgressStage::Initializing),
        );
        self.interrupts
            .insert(context.session_id, Arc::new(Notify::new()));
        info!(
            target = SOURCE,
            op = "prepare",
            session_id = %context.session_id,
            url_host = context.url.host_str().unwrap_or_default(),
            size_class = %context.size_class(),
        );
        Ok(context)
    }

    pub async fn render(&self, url: Url, options: RenderOptions) -> Result<RenderResult, DomainError> {
        let context = self.prepare(url, options)?;
        Ok(self.run(context).await)
    }

    /// Drive a prepared session until it succeeds, runs out of methods or
    /// recoveries, hits a non-recoverable error, or reaches the attempt
    /// ceiling.
    pub async fn run(&self, mut context: RenderContext) -> RenderResult {
        let session_id = context.session_id;
        let interrupt = self
            .interrupts
            .entry(session_id)
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone();

        let Some(mut method) = self.starting_method(&context) else {
            let error = RenderError::new(ErrorKind::Parsing, "no rendering method is available");
            self.diagnostics.record_error(session_id, &error);
            return self.finish(context, None, Err(error));
        };

        let mut attempts = 0_u32;
        loop {
            attempts += 1;
            context.current_method = Some(method);
            context.attempt_count = attempts;

            let started = Instant::now();
            let result = self.attempt(method, &mut context, &interrupt).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            let failure = match result {
                Ok(pages) => {
                    self.record_attempt(
                        &context,
                        method,
                        duration_ms,
                        AttemptOutcome::Succeeded { pages: pages.len() },
                    );
                    return self.finish(context, Some(method), Ok(pages));
                }
                Err(failure) => failure,
            };
            self.record_attempt(
                &context,
                method,
                duration_ms,
                AttemptOutcome::Failed {
                    kind: categorize(&failure),
                },
            );

            let stage = self
                .progress
                .snapshot(session_id)
                .map_or(ProgressStage::Initializing, |state| state.stage);
            let outcome = self
                .recovery
                .detect_and_recover(&mut context, &failure, stage)
                .await;
            let next = match outcome.next_context {
                Some(next) if outcome.recovered => next,
                _ => return self.finish(context, Some(method), Err(outcome.error)),
            };

            if outcome.advance_method {
                match self.chain.next_available(method) {
                    Some(next_method) => method = next_method,
                    None => return self.finish(context, Some(method), Err(outcome.error)),
                }
            }
            if attempts >= self.max_attempts {
                warn!(
                    target = SOURCE,
                    op = "run",
                    result = "attempt_ceiling",
                    session_id = %session_id,
                    attempts,
                );
                return self.finish(context, Some(method), Err(outcome.error));
            }

            self.release(&mut context);
            self.progress.restart(session_id);
            context = next;
        }
    }

    fn starting_method(&self, context: &RenderContext) -> Option<RenderMethod> {
        let preferred = context
            .options
            .preferred_method
            .unwrap_or_else(|| self.chain.preferred_method(context.size_class()));
        self.chain.first_available(preferred)
    }

    /// One method attempt, bounded by the stage timeout and cut short by a
    /// forced retry.
    async fn attempt(
        &self,
        method: RenderMethod,
        context: &mut RenderContext,
        interrupt: &Notify,
    ) -> Result<Vec<RenderedPage>, MethodFailure> {
        let stage_timeout = context.options.stage_timeout;
        let size = context.size_class();
        let session_id = context.session_id;
        let result = tokio::select! {
            biased;
            _ = interrupt.notified() => Err(MethodFailure::ForcedRetry),
            outcome = timeout(stage_timeout, self.chain.attempt_method(method, context)) => {
                outcome.unwrap_or_else(|_| {
                    let stage = self
                        .progress
                        .snapshot(session_id)
                        .map_or(ProgressStage::Initializing, |state| state.stage);
                    Err(MethodFailure::StageTimeout {
                        stage,
                        timeout_ms: stage_timeout.as_millis() as u64,
                    })
                })
            }
        };

        // An interrupted attempt never reached the chain's own bookkeeping.
        if matches!(
            result,
            Err(MethodFailure::ForcedRetry | MethodFailure::StageTimeout { .. })
        ) {
            self.chain.record_method_failure(method, size);
        }
        result
    }

    fn record_attempt(
        &self,
        context: &RenderContext,
        method: RenderMethod,
        duration_ms: u64,
        outcome: AttemptOutcome,
    ) {
        self.diagnostics.record_attempt(
            context.session_id,
            AttemptRecord {
                rendering_id: context.rendering_id,
                method,
                size_class: context.size_class(),
                duration_ms,
                outcome,
                finished_at: OffsetDateTime::now_utc(),
            },
        );
    }

    /// Destroy the context's surface and drop its parsed document.
    fn release(&self, context: &mut RenderContext) {
        if let Some(mut surface) = context.surface.take() {
            mutex_lock(&self.canvas, SOURCE, "release").destroy_canvas(&mut surface);
        }
        context.document = None;
    }

    fn finish(
        &self,
        mut context: RenderContext,
        method: Option<RenderMethod>,
        outcome: Result<Vec<RenderedPage>, RenderError>,
    ) -> RenderResult {
        let session_id = context.session_id;
        self.release(&mut context);
        self.recovery.cleanup(session_id);
        self.interrupts.remove(&session_id);

        let diagnostics = self.diagnostics.export(session_id);
        let elapsed_ms = diagnostics
            .as_ref()
            .map_or(0, |report| report.total_elapsed_ms);
        let (success, pages, error) = match outcome {
            Ok(pages) => {
                self.progress.complete_progress(session_id);
                counter!("docrelay_session_total", "result" => "success").increment(1);
                info!(
                    target = SOURCE,
                    op = "run",
                    result = "success",
                    session_id = %session_id,
                    method = method.map(RenderMethod::as_str).unwrap_or_default(),
                    pages = pages.len(),
                    elapsed_ms,
                    "Rendering session finished"
                );
                (true, pages, None)
            }
            Err(err) => {
                self.progress.fail_progress(session_id);
                counter!("docrelay_session_total", "result" => "failure").increment(1);
                error!(
                    target = SOURCE,
                    op = "run",
                    result = "failure",
                    session_id = %session_id,
                    kind = %err.kind,
                    elapsed_ms,
                    error = %err.message,
                    "Rendering session failed"
                );
                (false, Vec::new(), Some(err))
            }
        };

        RenderResult {
            success,
            rendering_id: context.rendering_id,
            session_id,
            method,
            pages,
            error,
            diagnostics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orchestrator() -> Orchestrator {
        Orchestrator::builder(PipelineConfig::default())
            .build()
            .expect("orchestrator")
    }

    #[tokio::test]
    async fn prepare_rejects_non_http_urls() {
        let err = orchestrator()
            .prepare(
                Url::parse("ftp://files.example.com/a.pdf").unwrap(),
                RenderOptions::default(),
            )
            .unwrap_err();
        assert!(err.to_string().contains("ftp"));
    }

    #[tokio::test]
    async fn prepare_registers_progress_and_diagnostics() {
        let orchestrator = orchestrator();
        let context = orchestrator
            .prepare(
                Url::parse("https://docs.example.com/a.pdf").unwrap(),
                RenderOptions::default(),
            )
            .unwrap();

        let state = orchestrator.progress().snapshot(context.session_id).unwrap();
        assert_eq!(state.stage, ProgressStage::Initializing);
        assert_eq!(state.percentage, 0.0);
        assert!(orchestrator.diagnostics().export(context.session_id).is_some());
    }

    #[test]
    fn zero_attempt_ceiling_is_rejected() {
        let config = PipelineConfig {
            max_attempts: 0,
            ..PipelineConfig::default()
        };
        assert!(Orchestrator::builder(config).build().is_err());
    }

    #[tokio::test]
    async fn preferred_method_skips_to_first_available() {
        let orchestrator = orchestrator();
        let options = RenderOptions {
            preferred_method: Some(RenderMethod::RemoteConversionService),
            ..RenderOptions::default()
        };
        let context = orchestrator
            .prepare(Url::parse("https://docs.example.com/a.pdf").unwrap(), options)
            .unwrap();
        assert_eq!(
            orchestrator.starting_method(&context),
            Some(RenderMethod::PreRenderedImageFallback)
        );
    }
}
