use tracing_error::{SpanTrace, SpanTraceStatus};

use crate::{
    application::{
        canvas::CanvasFault,
        methods::{ConversionFault, EngineFault, MethodFailure},
    },
    domain::{
        context::RenderContext,
        error::{ErrorKind, RenderError},
        types::ProgressStage,
    },
    infra::network::NetworkFault,
};

/// Kind of a typed failure. Only opaque text goes through keyword sniffing.
pub fn categorize(failure: &MethodFailure) -> ErrorKind {
    match failure {
        MethodFailure::Network(fault) => categorize_network(fault),
        MethodFailure::Canvas(fault) => categorize_canvas(fault),
        MethodFailure::Engine(fault) => match fault {
            EngineFault::Corrupted { .. } => ErrorKind::Corruption,
            EngineFault::Malformed { .. } | EngineFault::PageOutOfRange { .. } => {
                ErrorKind::Parsing
            }
            EngineFault::Surface(fault) => categorize_canvas(fault),
            EngineFault::Opaque(message) => categorize_message(message),
        },
        MethodFailure::Conversion(fault) => match fault {
            ConversionFault::Status { status } => categorize_status(*status),
            ConversionFault::Transport(_) => ErrorKind::Network,
            ConversionFault::Timeout { .. } => ErrorKind::Timeout,
            ConversionFault::Manifest(_) | ConversionFault::Empty => ErrorKind::Parsing,
        },
        MethodFailure::StageTimeout { .. } | MethodFailure::ForcedRetry => ErrorKind::Timeout,
        MethodFailure::Unavailable(_) => ErrorKind::Parsing,
        MethodFailure::Opaque(message) => categorize_message(message),
    }
}

fn categorize_network(fault: &NetworkFault) -> ErrorKind {
    match fault {
        NetworkFault::Timeout { .. } => ErrorKind::Timeout,
        NetworkFault::Status { status, .. } => categorize_status(*status),
        NetworkFault::Authentication { .. } => ErrorKind::Authentication,
        NetworkFault::Transport(err) if err.is_timeout() => ErrorKind::Timeout,
        NetworkFault::Incomplete { .. }
        | NetworkFault::Transport(_)
        | NetworkFault::Cancelled(_) => ErrorKind::Network,
        NetworkFault::InvalidUrl(_) => ErrorKind::Parsing,
    }
}

fn categorize_canvas(fault: &CanvasFault) -> ErrorKind {
    match fault {
        CanvasFault::Allocation { .. } => ErrorKind::Memory,
        _ => ErrorKind::Canvas,
    }
}

fn categorize_status(status: u16) -> ErrorKind {
    match status {
        401 | 403 => ErrorKind::Authentication,
        _ => ErrorKind::Network,
    }
}

/// Keyword fallback for error text from third-party code, checked in
/// precedence order. Unrecognised text counts as a parsing failure.
pub fn categorize_message(message: &str) -> ErrorKind {
    let lowered = message.to_ascii_lowercase();
    if let Some(status) = http_status(&lowered) {
        return categorize_status(status);
    }

    const KEYWORDS: &[(&[&str], ErrorKind)] = &[
        (&["timeout", "timed out"], ErrorKind::Timeout),
        (&["auth", "unauthorized"], ErrorKind::Authentication),
        (&["network", "fetch"], ErrorKind::Network),
        (&["pdf", "parsing", "invalid"], ErrorKind::Parsing),
        (&["canvas", "context"], ErrorKind::Canvas),
        (&["memory", "allocation"], ErrorKind::Memory),
    ];
    KEYWORDS
        .iter()
        .find(|(needles, _)| needles.iter().any(|needle| lowered.contains(needle)))
        .map(|(_, kind)| *kind)
        .unwrap_or(ErrorKind::Parsing)
}

/// First standalone three-digit token in the 4xx/5xx range.
fn http_status(message: &str) -> Option<u16> {
    message
        .split(|ch: char| !ch.is_ascii_digit())
        .filter(|token| token.len() == 3)
        .filter_map(|token| token.parse::<u16>().ok())
        .find(|status| (400..600).contains(status))
}

fn status_of(failure: &MethodFailure) -> Option<u16> {
    match failure {
        MethodFailure::Network(fault) => fault.status(),
        MethodFailure::Conversion(ConversionFault::Status { status }) => Some(*status),
        _ => None,
    }
}

/// Normalise a failed attempt into a [`RenderError`], capturing the active
/// span trace when one is available.
pub fn categorize_error(
    failure: &MethodFailure,
    context: &RenderContext,
    stage: ProgressStage,
) -> RenderError {
    let mut error = RenderError::new(categorize(failure), failure.to_string())
        .with_stage(stage)
        .with_method(context.current_method)
        .with_context("rendering_id", context.rendering_id.to_string())
        .with_context("attempt", context.attempt_count)
        .with_context("url_host", context.url.host_str().unwrap_or_default());
    if let Some(status) = status_of(failure) {
        error = error.with_context("status", status);
    }

    let trace = SpanTrace::capture();
    if trace.status() == SpanTraceStatus::CAPTURED {
        error = error.with_trace(Some(trace.to_string()));
    }
    error
}
