use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{ErrorKind, RecoveryStrategyKind, RenderError, RenderMethod, RenderedPage, SizeClass};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded { pages: usize },
    Failed { kind: ErrorKind },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub rendering_id: Uuid,
    pub method: RenderMethod,
    pub size_class: SizeClass,
    pub duration_ms: u64,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryRecord {
    pub rendering_id: Uuid,
    pub error_kind: ErrorKind,
    /// `None` when no strategy could be applied.
    pub strategy: Option<RecoveryStrategyKind>,
    pub recovered: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    pub os: String,
    pub arch: String,
    pub family: String,
    pub crate_version: String,
    pub heap_used_bytes: Option<u64>,
    pub heap_limit_bytes: Option<u64>,
}

/// Serialisable per-session log handed to telemetry collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsReport {
    pub session_id: Uuid,
    pub url: String,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    pub total_elapsed_ms: u64,
    pub errors: Vec<RenderError>,
    pub attempts: Vec<AttemptRecord>,
    pub recoveries: Vec<RecoveryRecord>,
    pub environment: EnvironmentInfo,
}

/// Terminal output of one rendering session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderResult {
    pub success: bool,
    pub rendering_id: Uuid,
    pub session_id: Uuid,
    pub method: Option<RenderMethod>,
    pub pages: Vec<RenderedPage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RenderError>,
    pub diagnostics: Option<DiagnosticsReport>,
}
