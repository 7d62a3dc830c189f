use std::{error::Error as StdError, fmt};

use thiserror::Error;

use crate::{
    config::LoadError,
    domain::error::{DomainError, ErrorKind, RenderError},
    infra::error::InfraError,
};

/// An error flattened into its `source()` chain for the terminal.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self { source, messages }
    }

    pub fn from_message(source: &'static str, message: impl Into<String>) -> Self {
        Self {
            source,
            messages: vec![message.into()],
        }
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut messages = self.messages.iter();
        if let Some(first) = messages.next() {
            write!(f, "{first}")?;
        }
        for message in messages {
            write!(f, "\n  caused by: {message}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error("rendering failed ({kind}): {message}")]
    RenderFailed { kind: ErrorKind, message: String },
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    pub fn presentation_message(&self) -> &'static str {
        match self {
            AppError::Domain(DomainError::Validation { .. }) => "Request could not be processed",
            AppError::Config(_) | AppError::Infra(InfraError::Configuration { .. }) => {
                "Configuration is invalid"
            }
            AppError::Infra(InfraError::Telemetry(_)) => "Logging subsystem could not start",
            AppError::Infra(InfraError::HttpClient(_)) => "HTTP client could not be built",
            AppError::RenderFailed { .. } => "Document could not be rendered",
            AppError::Domain(DomainError::Invariant { .. }) | AppError::Unexpected(_) => {
                "Unexpected error occurred"
            }
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport::from_error("application::error::AppError", self)
    }
}

impl From<RenderError> for AppError {
    fn from(error: RenderError) -> Self {
        Self::RenderFailed {
            kind: error.kind,
            message: error.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_walks_the_source_chain() {
        let err = AppError::Config(LoadError::invalid("network.timeout", "must be non-zero"));
        let report = err.report();
        assert_eq!(report.source, "application::error::AppError");
        assert!(report.messages[0].contains("network.timeout"));
        assert_eq!(err.presentation_message(), "Configuration is invalid");
    }

    #[test]
    fn render_errors_keep_their_kind() {
        let err = AppError::from(RenderError::new(ErrorKind::Corruption, "bad xref table"));
        assert_eq!(
            err.to_string(),
            "rendering failed (corruption): bad xref table"
        );
        assert_eq!(
            ErrorReport::from_message("cli", "one").to_string(),
            "one"
        );
    }
}
