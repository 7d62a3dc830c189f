use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::{ProgressStage, RenderMethod};

/// Failure categories every raised error is normalised into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Network,
    Parsing,
    Canvas,
    Memory,
    Timeout,
    Authentication,
    Corruption,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 7] = [
        ErrorKind::Network,
        ErrorKind::Authentication,
        ErrorKind::Canvas,
        ErrorKind::Memory,
        ErrorKind::Timeout,
        ErrorKind::Parsing,
        ErrorKind::Corruption,
    ];

    /// Only corruption ends a session without a recovery attempt.
    pub fn is_recoverable(self) -> bool {
        !matches!(self, ErrorKind::Corruption)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Parsing => "parsing",
            ErrorKind::Canvas => "canvas",
            ErrorKind::Memory => "memory",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Corruption => "corruption",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A categorised rendering failure.
///
/// Built once through the `with_*` helpers and then only cloned; every
/// attempt's errors end up in the context history and in diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderError {
    pub kind: ErrorKind,
    pub message: String,
    pub stage: ProgressStage,
    pub method: Option<RenderMethod>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, Value>,
    pub recoverable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

impl RenderError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stage: ProgressStage::Initializing,
            method: None,
            timestamp: OffsetDateTime::now_utc(),
            context: BTreeMap::new(),
            recoverable: kind.is_recoverable(),
            trace: None,
        }
    }

    pub fn with_stage(mut self, stage: ProgressStage) -> Self {
        self.stage = stage;
        self
    }

    pub fn with_method(mut self, method: Option<RenderMethod>) -> Self {
        self.method = method;
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_trace(mut self, trace: Option<String>) -> Self {
        self.trace = trace;
        self
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.kind, self.message)
    }
}

impl std::error::Error for RenderError {}
