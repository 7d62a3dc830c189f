//! Pixel-surface lifecycle and memory accounting.
//!
//! Surfaces live in an arena owned by [`CanvasManager`]; rendering contexts
//! only hold a [`SurfaceHandle`]. A handle whose surface was reclaimed turns
//! stale, which validation detects and repairs by recreating the surface.

mod surface;

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use metrics::{counter, gauge};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::types::{SurfaceHandle, SurfaceId};

pub use surface::{DrawingContext, MemoryBackend, SurfaceBackend};

const SOURCE: &str = "docrelay::application::canvas";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CanvasFault {
    #[error("surface dimensions {width}x{height} are invalid")]
    InvalidDimensions { width: u32, height: u32 },
    #[error("failed to acquire a 2D context for a {width}x{height} surface")]
    ContextUnavailable { width: u32, height: u32 },
    #[error("drawing context lost on {width}x{height} surface")]
    ContextLost { width: u32, height: u32 },
    #[error("memory allocation of {bytes} bytes for a surface failed")]
    Allocation { bytes: u64 },
    #[error("{0} is no longer registered")]
    Stale(SurfaceId),
    #[error("no surface attached to the rendering context")]
    Missing,
}

/// Heap usage reported by the hosting environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapUsage {
    pub used_bytes: u64,
    pub limit_bytes: u64,
}

impl HeapUsage {
    pub fn ratio(&self) -> f64 {
        if self.limit_bytes == 0 {
            return 0.0;
        }
        self.used_bytes as f64 / self.limit_bytes as f64
    }
}

/// Optional environment signal about process memory.
pub trait HeapProbe: Send + Sync {
    fn heap_usage(&self) -> Option<HeapUsage>;

    /// Ask the host to reclaim memory. Returns whether anything was attempted.
    fn request_collection(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CanvasConfig {
    pub memory_threshold_bytes: u64,
    pub max_surfaces: usize,
    pub idle_timeout: Duration,
    pub heap_ratio_limit: f64,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            memory_threshold_bytes: 256 * 1024 * 1024,
            max_surfaces: 10,
            idle_timeout: Duration::from_secs(5 * 60),
            heap_ratio_limit: 0.8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanvasRecord {
    pub created_at: Instant,
    pub last_used: Instant,
    pub width: u32,
    pub height: u32,
    pub estimated_memory_bytes: u64,
}

struct SurfaceEntry {
    record: CanvasRecord,
    context: DrawingContext,
}

pub type SharedCanvas = Arc<Mutex<CanvasManager>>;

pub fn estimated_memory(width: u32, height: u32) -> u64 {
    u64::from(width) * u64::from(height) * 4
}

pub struct CanvasManager {
    config: CanvasConfig,
    backend: Arc<dyn SurfaceBackend>,
    heap: Option<Arc<dyn HeapProbe>>,
    surfaces: BTreeMap<SurfaceId, SurfaceEntry>,
    total_memory: u64,
    next_id: u64,
}

impl CanvasManager {
    pub fn new(config: CanvasConfig) -> Self {
        Self::with_backend(config, Arc::new(MemoryBackend::default()))
    }

    pub fn with_backend(config: CanvasConfig, backend: Arc<dyn SurfaceBackend>) -> Self {
        Self {
            config,
            backend,
            heap: None,
            surfaces: BTreeMap::new(),
            total_memory: 0,
            next_id: 0,
        }
    }

    pub fn with_heap_probe(mut self, heap: Arc<dyn HeapProbe>) -> Self {
        self.heap = Some(heap);
        self
    }

    pub fn into_shared(self) -> SharedCanvas {
        Arc::new(Mutex::new(self))
    }

    pub fn config(&self) -> &CanvasConfig {
        &self.config
    }

    pub fn heap_probe(&self) -> Option<Arc<dyn HeapProbe>> {
        self.heap.clone()
    }

    pub fn memory_usage(&self) -> u64 {
        self.total_memory
    }

    pub fn surface_count(&self) -> usize {
        self.surfaces.len()
    }

    pub fn record(&self, id: SurfaceId) -> Option<CanvasRecord> {
        self.surfaces.get(&id).map(|entry| entry.record)
    }

    /// Allocate and register a surface, failing fast when no drawing context
    /// can be obtained for it.
    pub fn create_canvas(&mut self, width: u32, height: u32) -> Result<SurfaceHandle, CanvasFault> {
        if width == 0 || height == 0 {
            return Err(CanvasFault::InvalidDimensions { width, height });
        }
        if self.check_memory_pressure() {
            self.cleanup_unused_canvases();
        }

        let context = self.backend.acquire_context(width, height)?;

        self.next_id += 1;
        let id = SurfaceId::new(self.next_id);
        let now = Instant::now();
        let record = CanvasRecord {
            created_at: now,
            last_used: now,
            width,
            height,
            estimated_memory_bytes: estimated_memory(width, height),
        };
        self.total_memory += record.estimated_memory_bytes;
        self.surfaces.insert(id, SurfaceEntry { record, context });
        self.publish_gauges();

        debug!(
            target = SOURCE,
            op = "create_canvas",
            surface = %id,
            width,
            height,
            total_memory = self.total_memory,
            surfaces = self.surfaces.len(),
        );
        Ok(SurfaceHandle::new(id, width, height))
    }

    /// Tracked memory above the threshold, heap usage above its limit ratio,
    /// or more surfaces than allowed. Reads state only.
    pub fn check_memory_pressure(&self) -> bool {
        if self.total_memory > self.config.memory_threshold_bytes {
            return true;
        }
        if self.surfaces.len() > self.config.max_surfaces {
            return true;
        }
        self.heap
            .as_ref()
            .and_then(|probe| probe.heap_usage())
            .is_some_and(|usage| usage.ratio() > self.config.heap_ratio_limit)
    }

    /// Destroy idle surfaces; with none idle and pressure persisting, destroy
    /// the least recently used quarter (at least one). Returns how many went.
    pub fn cleanup_unused_canvases(&mut self) -> usize {
        let now = Instant::now();
        let idle: Vec<SurfaceId> = self
            .surfaces
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.record.last_used) > self.config.idle_timeout)
            .map(|(id, _)| *id)
            .collect();

        let victims = if !idle.is_empty() {
            idle
        } else if self.check_memory_pressure() {
            let mut by_use: Vec<(Instant, SurfaceId)> = self
                .surfaces
                .iter()
                .map(|(id, entry)| (entry.record.last_used, *id))
                .collect();
            by_use.sort();
            let quota = self.surfaces.len().div_ceil(4).max(1);
            by_use.into_iter().take(quota).map(|(_, id)| id).collect()
        } else {
            Vec::new()
        };

        let removed = victims
            .into_iter()
            .filter(|id| self.remove_surface(*id))
            .count();
        if removed > 0 {
            counter!("docrelay_canvas_cleanup_total").increment(removed as u64);
            info!(
                target = SOURCE,
                op = "cleanup_unused_canvases",
                removed,
                remaining = self.surfaces.len(),
                total_memory = self.total_memory,
                "Reclaimed surfaces"
            );
        }
        removed
    }

    /// Clear, zero and deregister a surface. Safe on an already-destroyed handle.
    pub fn destroy_canvas(&mut self, handle: &mut SurfaceHandle) {
        if self.remove_surface(handle.id()) {
            debug!(
                target = SOURCE,
                op = "destroy_canvas",
                surface = %handle.id(),
                total_memory = self.total_memory,
            );
        }
        handle.release();
    }

    /// Replace a failed surface with a new one of the same dimensions.
    pub fn recreate_canvas(&mut self, failed: &mut SurfaceHandle) -> Result<(), CanvasFault> {
        let (width, height) = (failed.width(), failed.height());
        let previous = failed.id();
        self.destroy_canvas(failed);
        *failed = self.create_canvas(width, height)?;
        info!(
            target = SOURCE,
            op = "recreate_canvas",
            previous = %previous,
            replacement = %failed.id(),
            width,
            height,
            "Surface recreated"
        );
        Ok(())
    }

    /// Exercise save/restore on the surface's context and recreate the surface
    /// when that fails.
    pub fn validate_and_recreate_canvas(
        &mut self,
        handle: &mut SurfaceHandle,
    ) -> Result<(), CanvasFault> {
        match self.validate(handle) {
            Ok(()) => Ok(()),
            Err(fault) => {
                warn!(
                    target = SOURCE,
                    op = "validate_canvas",
                    surface = %handle.id(),
                    error = %fault,
                    "Surface failed validation; recreating"
                );
                self.recreate_canvas(handle)
            }
        }
    }

    fn validate(&mut self, handle: &SurfaceHandle) -> Result<(), CanvasFault> {
        let entry = self
            .surfaces
            .get_mut(&handle.id())
            .ok_or(CanvasFault::Stale(handle.id()))?;
        entry.context.scoped(|_| Ok(()))
    }

    /// Run drawing code against the surface's live context.
    pub fn with_context<R>(
        &mut self,
        handle: &SurfaceHandle,
        draw: impl FnOnce(&mut DrawingContext) -> R,
    ) -> Result<R, CanvasFault> {
        let entry = self
            .surfaces
            .get_mut(&handle.id())
            .ok_or(CanvasFault::Stale(handle.id()))?;
        entry.record.last_used = Instant::now();
        Ok(draw(&mut entry.context))
    }

    /// Destroy every tracked surface.
    pub fn clear(&mut self) {
        let ids: Vec<SurfaceId> = self.surfaces.keys().copied().collect();
        for id in ids {
            self.remove_surface(id);
        }
    }

    fn remove_surface(&mut self, id: SurfaceId) -> bool {
        let Some(mut entry) = self.surfaces.remove(&id) else {
            return false;
        };
        let _ = entry.context.clear();
        entry.context.release();
        self.total_memory = self
            .total_memory
            .saturating_sub(entry.record.estimated_memory_bytes);
        self.publish_gauges();
        true
    }

    fn publish_gauges(&self) {
        gauge!("docrelay_canvas_memory_bytes").set(self.total_memory as f64);
        gauge!("docrelay_canvas_surfaces").set(self.surfaces.len() as f64);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    use super::*;

    struct FlakyBackend {
        fail_next: AtomicBool,
    }

    impl SurfaceBackend for FlakyBackend {
        fn acquire_context(&self, width: u32, height: u32) -> Result<DrawingContext, CanvasFault> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(CanvasFault::ContextUnavailable { width, height });
            }
            MemoryBackend::default().acquire_context(width, height)
        }
    }

    struct FixedHeap(AtomicU64);

    impl HeapProbe for FixedHeap {
        fn heap_usage(&self) -> Option<HeapUsage> {
            Some(HeapUsage {
                used_bytes: self.0.load(Ordering::SeqCst),
                limit_bytes: 100,
            })
        }
    }

    fn manager() -> CanvasManager {
        CanvasManager::new(CanvasConfig::default())
    }

    #[tokio::test]
    async fn create_registers_estimated_memory() {
        let mut canvas = manager();
        let handle = canvas.create_canvas(10, 20).unwrap();
        assert_eq!(canvas.memory_usage(), 800);
        assert_eq!(canvas.surface_count(), 1);
        let record = canvas.record(handle.id()).unwrap();
        assert_eq!(record.estimated_memory_bytes, 800);
    }

    #[tokio::test]
    async fn context_failure_fails_fast_without_registering() {
        let backend = Arc::new(FlakyBackend {
            fail_next: AtomicBool::new(true),
        });
        let mut canvas = CanvasManager::with_backend(CanvasConfig::default(), backend);
        assert!(matches!(
            canvas.create_canvas(4, 4),
            Err(CanvasFault::ContextUnavailable { .. })
        ));
        assert_eq!(canvas.surface_count(), 0);
        assert_eq!(canvas.memory_usage(), 0);
    }

    #[tokio::test]
    async fn destroy_is_idempotent() {
        let mut canvas = manager();
        let mut handle = canvas.create_canvas(8, 8).unwrap();
        canvas.destroy_canvas(&mut handle);
        assert!(handle.is_released());
        assert_eq!(canvas.memory_usage(), 0);
        canvas.destroy_canvas(&mut handle);
        assert_eq!(canvas.memory_usage(), 0);
        assert_eq!(canvas.surface_count(), 0);
    }

    #[tokio::test]
    async fn pressure_checks_are_pure() {
        let mut canvas = CanvasManager::new(CanvasConfig {
            memory_threshold_bytes: 100,
            ..CanvasConfig::default()
        });
        assert!(!canvas.check_memory_pressure());
        let _handle = canvas.create_canvas(10, 10).unwrap();
        assert!(canvas.check_memory_pressure());
        assert!(canvas.check_memory_pressure());
    }

    #[tokio::test]
    async fn heap_hint_and_surface_count_trigger_pressure() {
        let heap = Arc::new(FixedHeap(AtomicU64::new(50)));
        let mut canvas = manager().with_heap_probe(heap.clone());
        assert!(!canvas.check_memory_pressure());
        heap.0.store(81, Ordering::SeqCst);
        assert!(canvas.check_memory_pressure());
        heap.0.store(10, Ordering::SeqCst);

        let mut handles = Vec::new();
        for _ in 0..10 {
            handles.push(canvas.create_canvas(1, 1).unwrap());
        }
        assert!(!canvas.check_memory_pressure());
        handles.push(canvas.create_canvas(1, 1).unwrap());
        assert!(canvas.check_memory_pressure());
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_prefers_idle_surfaces() {
        let mut canvas = manager();
        let idle = canvas.create_canvas(2, 2).unwrap();
        tokio::time::advance(Duration::from_secs(4 * 60)).await;
        let fresh = canvas.create_canvas(2, 2).unwrap();
        tokio::time::advance(Duration::from_secs(2 * 60)).await;

        assert_eq!(canvas.cleanup_unused_canvases(), 1);
        assert!(canvas.record(idle.id()).is_none());
        assert!(canvas.record(fresh.id()).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_under_pressure_drops_oldest_quarter() {
        let mut canvas = manager();
        let mut handles = Vec::new();
        for _ in 0..11 {
            handles.push(canvas.create_canvas(1, 1).unwrap());
            tokio::time::advance(Duration::from_millis(10)).await;
        }
        assert!(canvas.check_memory_pressure());
        let before_memory = canvas.memory_usage();

        assert_eq!(canvas.cleanup_unused_canvases(), 3);
        assert_eq!(canvas.surface_count(), 8);
        assert!(canvas.memory_usage() < before_memory);
        for handle in &handles[..3] {
            assert!(canvas.record(handle.id()).is_none());
        }
    }

    #[tokio::test]
    async fn cleanup_without_pressure_or_idle_is_noop() {
        let mut canvas = manager();
        let _handle = canvas.create_canvas(3, 3).unwrap();
        assert_eq!(canvas.cleanup_unused_canvases(), 0);
        assert_eq!(canvas.surface_count(), 1);
    }

    #[tokio::test]
    async fn validation_recreates_lost_context() {
        let mut canvas = manager();
        let mut handle = canvas.create_canvas(6, 4).unwrap();
        let original = handle.id();
        canvas
            .with_context(&handle, |ctx| ctx.mark_lost())
            .unwrap();

        canvas.validate_and_recreate_canvas(&mut handle).unwrap();

        assert_ne!(handle.id(), original);
        assert_eq!((handle.width(), handle.height()), (6, 4));
        assert_eq!(canvas.surface_count(), 1);
        assert_eq!(canvas.memory_usage(), estimated_memory(6, 4));
    }

    #[tokio::test]
    async fn validation_recreates_reclaimed_surface() {
        let mut canvas = manager();
        let mut handle = canvas.create_canvas(2, 2).unwrap();
        canvas.clear();
        assert!(matches!(
            canvas.with_context(&handle, |_| ()),
            Err(CanvasFault::Stale(_))
        ));

        canvas.validate_and_recreate_canvas(&mut handle).unwrap();
        assert!(canvas.with_context(&handle, |ctx| ctx.width()).is_ok());
    }

    #[tokio::test]
    async fn validation_keeps_healthy_surface() {
        let mut canvas = manager();
        let mut handle = canvas.create_canvas(2, 2).unwrap();
        let original = handle.id();
        canvas.validate_and_recreate_canvas(&mut handle).unwrap();
        assert_eq!(handle.id(), original);
    }
}
