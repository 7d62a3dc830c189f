//! Resilient document rendering: a fallback chain of rendering methods with
//! network retries, surface reclamation, stuck-progress detection and
//! per-session diagnostics.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
mod util;
