//! Shared result, progress and diagnostics types exchanged between the
//! docrelay rendering pipeline and the applications embedding it.

mod error;
mod method;
mod page;
mod progress;
mod report;

pub use error::{ErrorKind, RenderError};
pub use method::{ParseRenderMethodError, RecoveryStrategyKind, RenderMethod, SizeClass};
pub use page::{PageContent, RenderedPage};
pub use progress::{ProgressStage, ProgressState};
pub use report::{
    AttemptOutcome, AttemptRecord, DiagnosticsReport, EnvironmentInfo, RecoveryRecord,
    RenderResult,
};
