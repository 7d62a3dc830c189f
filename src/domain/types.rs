use std::fmt;

pub use docrelay_types::{
    PageContent, ProgressStage, ProgressState, RecoveryStrategyKind, RenderMethod, RenderResult,
    RenderedPage, SizeClass,
};

/// Identity of a surface registered with the canvas manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(u64);

impl SurfaceId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface-{}", self.0)
    }
}

/// Exclusive reference to a pixel surface.
///
/// Deliberately not `Clone`: a surface belongs to exactly one context. After
/// the canvas manager destroys it the handle reports zero dimensions.
#[derive(Debug, PartialEq, Eq)]
pub struct SurfaceHandle {
    id: SurfaceId,
    width: u32,
    height: u32,
}

impl SurfaceHandle {
    pub(crate) fn new(id: SurfaceId, width: u32, height: u32) -> Self {
        Self { id, width, height }
    }

    pub fn id(&self) -> SurfaceId {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_released(&self) -> bool {
        self.width == 0 && self.height == 0
    }

    pub(crate) fn release(&mut self) {
        self.width = 0;
        self.height = 0;
    }
}
