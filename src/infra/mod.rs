//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod network;
pub mod telemetry;
