//! Rendering pipeline services: methods, recovery, progress and the
//! orchestrator that composes them.

pub mod canvas;
pub mod diagnostics;
pub mod error;
pub mod methods;
pub mod orchestrator;
pub mod progress;
pub mod recovery;
