//! Domain layer types and invariants.

pub mod context;
pub mod document;
pub mod error;
pub mod types;
