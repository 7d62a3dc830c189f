//! Failure categorisation and the strategies that turn a failed attempt into
//! a fresh one.

mod categorize;
mod strategy;
mod system;

pub use categorize::{categorize, categorize_error, categorize_message};
pub use strategy::{
    CanvasRecreationStrategy, EXTENDED_TIMEOUT_CAP, FallbackMethodStrategy, MemoryCleanupStrategy,
    NETWORK_TIMEOUT_CAP, NetworkRetryStrategy, RecoveryAction, RecoveryConfig, RecoveryFault,
    RecoveryStrategy, TimeoutExtensionStrategy, UrlRefreshStrategy, plan_for,
};
pub use system::{ErrorRecoverySystem, RecoveryOutcome};
