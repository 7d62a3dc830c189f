use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStage {
    Initializing,
    Fetching,
    Parsing,
    Rendering,
    Finalizing,
    Complete,
    Error,
}

impl ProgressStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, ProgressStage::Complete | ProgressStage::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProgressStage::Initializing => "initializing",
            ProgressStage::Fetching => "fetching",
            ProgressStage::Parsing => "parsing",
            ProgressStage::Rendering => "rendering",
            ProgressStage::Finalizing => "finalizing",
            ProgressStage::Complete => "complete",
            ProgressStage::Error => "error",
        }
    }
}

impl fmt::Display for ProgressStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one session's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressState {
    /// Always within `0.0..=100.0`.
    pub percentage: f64,
    pub stage: ProgressStage,
    pub bytes_loaded: u64,
    pub total_bytes: Option<u64>,
    /// Milliseconds since the current attempt started.
    pub time_elapsed_ms: u64,
    pub is_stuck: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub last_update: OffsetDateTime,
}

impl ProgressState {
    pub fn new(stage: ProgressStage) -> Self {
        Self {
            percentage: 0.0,
            stage,
            bytes_loaded: 0,
            total_bytes: None,
            time_elapsed_ms: 0,
            is_stuck: false,
            last_update: OffsetDateTime::now_utc(),
        }
    }
}
