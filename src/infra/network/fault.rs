use thiserror::Error;

use super::requests::RequestId;

/// Failures raised by the network layer, typed at the point they occur.
#[derive(Debug, Error)]
pub enum NetworkFault {
    #[error("request to {url} timed out after {timeout_ms} ms")]
    Timeout { url: String, timeout_ms: u64 },
    #[error("server responded with HTTP {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("authentication rejected with HTTP {status}: {reason}")]
    Authentication { status: u16, reason: String },
    #[error("transfer incomplete: received {received} of {expected:?} bytes")]
    Incomplete { received: u64, expected: Option<u64> },
    #[error("network transport failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("request {0} was cancelled")]
    Cancelled(RequestId),
    #[error("invalid document URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl NetworkFault {
    /// Whether the retry loop may try the same request again.
    ///
    /// Timeouts, transport failures and 5xx answers qualify. Client errors
    /// are final, and 401/403 go through the URL refresher instead.
    pub fn is_retryable(&self) -> bool {
        match self {
            NetworkFault::Timeout { .. } | NetworkFault::Transport(_) => true,
            NetworkFault::Status { status, .. } => *status >= 500,
            NetworkFault::Authentication { .. }
            | NetworkFault::Incomplete { .. }
            | NetworkFault::Cancelled(_)
            | NetworkFault::InvalidUrl(_) => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            NetworkFault::Status { status, .. } | NetworkFault::Authentication { status, .. } => {
                Some(*status)
            }
            NetworkFault::Transport(err) => err.status().map(|status| status.as_u16()),
            _ => None,
        }
    }

    pub(crate) fn metric_label(&self) -> &'static str {
        match self {
            NetworkFault::Timeout { .. } => "timeout",
            NetworkFault::Status { .. } => "status",
            NetworkFault::Authentication { .. } => "authentication",
            NetworkFault::Incomplete { .. } => "incomplete",
            NetworkFault::Transport(_) => "transport",
            NetworkFault::Cancelled(_) => "cancelled",
            NetworkFault::InvalidUrl(_) => "invalid_url",
        }
    }
}

pub(crate) fn is_auth_status(status: u16) -> bool {
    matches!(status, 401 | 403)
}
