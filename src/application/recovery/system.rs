use std::{collections::BTreeMap, fmt::Write as _, sync::Arc};

use dashmap::DashMap;
use docrelay_types::RecoveryRecord;
use metrics::counter;
use time::OffsetDateTime;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{
    categorize::categorize_error,
    strategy::{
        CanvasRecreationStrategy, FallbackMethodStrategy, MemoryCleanupStrategy,
        NetworkRetryStrategy, RecoveryConfig, RecoveryStrategy, TimeoutExtensionStrategy,
        UrlRefreshStrategy, plan_for,
    },
};
use crate::{
    application::{canvas::SharedCanvas, diagnostics::DiagnosticsCollector, methods::MethodFailure},
    domain::{
        context::RenderContext,
        error::{ErrorKind, RenderError},
        types::{ProgressStage, RecoveryStrategyKind},
    },
    infra::network::UrlRefresher,
};

const SOURCE: &str = "docrelay::application::recovery";

/// Result of routing one failure through the recovery table.
#[derive(Debug)]
pub struct RecoveryOutcome {
    pub recovered: bool,
    pub strategy: Option<RecoveryStrategyKind>,
    /// Present exactly when `recovered` is true.
    pub next_context: Option<RenderContext>,
    pub advance_method: bool,
    pub error: RenderError,
}

impl RecoveryOutcome {
    fn failed(error: RenderError) -> Self {
        Self {
            recovered: false,
            strategy: None,
            next_context: None,
            advance_method: false,
            error,
        }
    }
}

pub struct ErrorRecoverySystem {
    strategies: BTreeMap<RecoveryStrategyKind, Arc<dyn RecoveryStrategy>>,
    counters: DashMap<(Uuid, RecoveryStrategyKind), u32>,
    diagnostics: DiagnosticsCollector,
}

impl ErrorRecoverySystem {
    pub fn new(
        config: &RecoveryConfig,
        canvas: SharedCanvas,
        refresher: Option<Arc<dyn UrlRefresher>>,
        diagnostics: DiagnosticsCollector,
    ) -> Self {
        let strategies: [Arc<dyn RecoveryStrategy>; 6] = [
            Arc::new(NetworkRetryStrategy {
                base_delay: config.network_retry_base,
                max_delay: config.network_retry_max_delay,
                max_retries: config.network_retry_max,
            }),
            Arc::new(UrlRefreshStrategy {
                refresher,
                max_retries: config.url_refresh_max,
            }),
            Arc::new(CanvasRecreationStrategy {
                canvas: canvas.clone(),
                max_retries: config.canvas_recreation_max,
            }),
            Arc::new(MemoryCleanupStrategy {
                canvas,
                cooldown: config.memory_cooldown,
                max_retries: config.memory_cleanup_max,
            }),
            Arc::new(TimeoutExtensionStrategy {
                max_retries: config.timeout_extension_max,
            }),
            Arc::new(FallbackMethodStrategy),
        ];
        Self::with_strategies(strategies, diagnostics)
    }

    pub fn with_strategies(
        strategies: impl IntoIterator<Item = Arc<dyn RecoveryStrategy>>,
        diagnostics: DiagnosticsCollector,
    ) -> Self {
        Self {
            strategies: strategies
                .into_iter()
                .map(|strategy| (strategy.kind(), strategy))
                .collect(),
            counters: DashMap::new(),
            diagnostics,
        }
    }

    pub fn diagnostics(&self) -> &DiagnosticsCollector {
        &self.diagnostics
    }

    /// Uses of `strategy` so far in `session_id`.
    pub fn attempts(&self, session_id: Uuid, strategy: RecoveryStrategyKind) -> u32 {
        self.counters
            .get(&(session_id, strategy))
            .map(|count| *count)
            .unwrap_or(0)
    }

    /// Categorise `failure`, record it, and run the first strategy in the
    /// kind's plan that can handle it and still has budget.
    pub async fn detect_and_recover(
        &self,
        context: &mut RenderContext,
        failure: &MethodFailure,
        stage: ProgressStage,
    ) -> RecoveryOutcome {
        let session_id = context.session_id;
        let error = categorize_error(failure, context, stage);
        self.diagnostics.record_error(session_id, &error);
        context.error_history.push(error.clone());

        if !error.recoverable {
            error!(
                target = SOURCE,
                op = "detect_and_recover",
                result = "unrecoverable",
                session_id = %session_id,
                rendering_id = %context.rendering_id,
                kind = %error.kind,
                error = %error.message,
                "Failure cannot be recovered"
            );
            self.record(context, &error, None, false, "unrecoverable");
            return RecoveryOutcome::failed(error);
        }

        for kind in plan_for(error.kind) {
            let Some(strategy) = self.strategies.get(kind) else {
                continue;
            };
            if !strategy.can_handle(&error) {
                continue;
            }
            let Some(used) = self.reserve(session_id, strategy.as_ref()) else {
                continue;
            };

            match strategy.execute(context, &error, used).await {
                Ok(action) => {
                    info!(
                        target = SOURCE,
                        op = "detect_and_recover",
                        result = "recovered",
                        session_id = %session_id,
                        rendering_id = %context.rendering_id,
                        next_rendering_id = %action.next_context.rendering_id,
                        kind = %error.kind,
                        strategy = %kind,
                        use_count = used + 1,
                        advance_method = action.advance_method,
                        "Recovery strategy applied"
                    );
                    self.record(context, &error, Some(*kind), true, "recovered");
                    return RecoveryOutcome {
                        recovered: true,
                        strategy: Some(*kind),
                        next_context: Some(action.next_context),
                        advance_method: action.advance_method,
                        error,
                    };
                }
                Err(fault) => {
                    warn!(
                        target = SOURCE,
                        op = "detect_and_recover",
                        result = "strategy_failed",
                        session_id = %session_id,
                        kind = %error.kind,
                        strategy = %kind,
                        error = %fault,
                        "Recovery strategy failed; trying the next one"
                    );
                    self.record(context, &error, Some(*kind), false, "failed");
                }
            }
        }

        warn!(
            target = SOURCE,
            op = "detect_and_recover",
            result = "exhausted",
            session_id = %session_id,
            kind = %error.kind,
            "No recovery strategy left"
        );
        self.record(context, &error, None, false, "exhausted");
        RecoveryOutcome::failed(error)
    }

    /// Forget the session's budgets.
    pub fn cleanup(&self, session_id: Uuid) {
        self.counters.retain(|(session, _), _| *session != session_id);
    }

    /// Human-readable recovery table with per-session budgets.
    pub fn describe_plan(&self) -> String {
        let mut out = String::new();
        for kind in ErrorKind::ALL {
            let steps: Vec<String> = plan_for(kind)
                .iter()
                .filter_map(|step| self.strategies.get(step))
                .map(|strategy| format!("{} x{}", strategy.kind(), strategy.max_retries()))
                .collect();
            let plan = if steps.is_empty() {
                "(not recoverable)".to_string()
            } else {
                steps.join(" -> ")
            };
            if !out.is_empty() {
                out.push('\n');
            }
            let _ = write!(out, "{:<16}{plan}", kind.as_str());
        }
        out
    }

    fn reserve(&self, session_id: Uuid, strategy: &dyn RecoveryStrategy) -> Option<u32> {
        let mut count = self.counters.entry((session_id, strategy.kind())).or_insert(0);
        if *count >= strategy.max_retries() {
            return None;
        }
        let used = *count;
        *count += 1;
        Some(used)
    }

    fn record(
        &self,
        context: &RenderContext,
        error: &RenderError,
        strategy: Option<RecoveryStrategyKind>,
        recovered: bool,
        result: &'static str,
    ) {
        counter!(
            "docrelay_recovery_total",
            "strategy" => strategy.map_or("none", RecoveryStrategyKind::as_str),
            "result" => result
        )
        .increment(1);
        self.diagnostics.record_recovery(
            context.session_id,
            RecoveryRecord {
                rendering_id: context.rendering_id,
                error_kind: error.kind,
                strategy,
                recovered,
                timestamp: OffsetDateTime::now_utc(),
            },
        );
    }
}
