use super::CanvasFault;

#[derive(Debug, Clone, Copy, PartialEq)]
struct DrawState {
    fill: [u8; 4],
    line_width: u32,
}

impl Default for DrawState {
    fn default() -> Self {
        Self {
            fill: [0, 0, 0, 255],
            line_width: 1,
        }
    }
}

/// 2D drawing context over an RGBA buffer.
#[derive(Debug)]
pub struct DrawingContext {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    state: DrawState,
    saved: Vec<DrawState>,
    lost: bool,
}

impl DrawingContext {
    pub(crate) fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixels,
            state: DrawState::default(),
            saved: Vec::new(),
            lost: false,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_lost(&self) -> bool {
        self.lost
    }

    /// Simulates the host revoking the context (GPU reset, tab eviction).
    pub fn mark_lost(&mut self) {
        self.lost = true;
    }

    fn ensure_live(&self) -> Result<(), CanvasFault> {
        if self.lost {
            Err(CanvasFault::ContextLost {
                width: self.width,
                height: self.height,
            })
        } else {
            Ok(())
        }
    }

    pub fn save(&mut self) -> Result<(), CanvasFault> {
        self.ensure_live()?;
        self.saved.push(self.state);
        Ok(())
    }

    /// Pops the saved state even when the context is lost, so every `save`
    /// stays paired with one `restore`.
    pub fn restore(&mut self) -> Result<(), CanvasFault> {
        let saved = self.saved.pop();
        self.ensure_live()?;
        if let Some(state) = saved {
            self.state = state;
        }
        Ok(())
    }

    /// Runs `draw` between `save` and `restore`, restoring on failure too.
    pub fn scoped<T>(
        &mut self,
        draw: impl FnOnce(&mut Self) -> Result<T, CanvasFault>,
    ) -> Result<T, CanvasFault> {
        self.save()?;
        let drawn = draw(self);
        let restored = self.restore();
        let value = drawn?;
        restored?;
        Ok(value)
    }

    pub fn save_depth(&self) -> usize {
        self.saved.len()
    }

    pub fn set_fill(&mut self, rgba: [u8; 4]) {
        self.state.fill = rgba;
    }

    pub fn set_line_width(&mut self, width: u32) {
        self.state.line_width = width.max(1);
    }

    /// Fills the whole surface with opaque white.
    pub fn clear(&mut self) -> Result<(), CanvasFault> {
        self.ensure_live()?;
        self.pixels.fill(255);
        Ok(())
    }

    pub fn fill_rect(&mut self, x: u32, y: u32, w: u32, h: u32) -> Result<(), CanvasFault> {
        self.ensure_live()?;
        let x_end = x.saturating_add(w).min(self.width);
        let y_end = y.saturating_add(h).min(self.height);
        let fill = self.state.fill;
        let stride = self.width as usize;
        for row in y.min(self.height)..y_end {
            let start = (row as usize * stride + x.min(self.width) as usize) * 4;
            let end = (row as usize * stride + x_end as usize) * 4;
            for pixel in self.pixels[start..end].chunks_exact_mut(4) {
                pixel.copy_from_slice(&fill);
            }
        }
        Ok(())
    }

    /// Outlines a rectangle using the current line width.
    pub fn stroke_rect(&mut self, x: u32, y: u32, w: u32, h: u32) -> Result<(), CanvasFault> {
        let line = self.state.line_width;
        self.fill_rect(x, y, w, line)?;
        self.fill_rect(x, (y + h).saturating_sub(line), w, line)?;
        self.fill_rect(x, y, line, h)?;
        self.fill_rect((x + w).saturating_sub(line), y, line, h)
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        let mut rgba = [0; 4];
        rgba.copy_from_slice(&self.pixels[offset..offset + 4]);
        Some(rgba)
    }

    pub fn to_rgba(&self) -> Vec<u8> {
        self.pixels.clone()
    }

    pub(crate) fn release(&mut self) {
        self.pixels = Vec::new();
        self.saved.clear();
        self.width = 0;
        self.height = 0;
    }
}

/// Source of backing buffers and drawing contexts.
pub trait SurfaceBackend: Send + Sync {
    fn acquire_context(&self, width: u32, height: u32) -> Result<DrawingContext, CanvasFault>;
}

/// Heap-backed surfaces; allocation failure is reported, not aborted on.
#[derive(Debug, Clone, Copy)]
pub struct MemoryBackend {
    pub max_dimension: u32,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self {
            max_dimension: 16_384,
        }
    }
}

impl SurfaceBackend for MemoryBackend {
    fn acquire_context(&self, width: u32, height: u32) -> Result<DrawingContext, CanvasFault> {
        if width > self.max_dimension || height > self.max_dimension {
            return Err(CanvasFault::ContextUnavailable { width, height });
        }
        let bytes = u64::from(width) * u64::from(height) * 4;
        let mut pixels = Vec::new();
        pixels
            .try_reserve_exact(bytes as usize)
            .map_err(|_| CanvasFault::Allocation { bytes })?;
        pixels.resize(bytes as usize, 0);
        Ok(DrawingContext::new(width, height, pixels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(width: u32, height: u32) -> DrawingContext {
        MemoryBackend::default()
            .acquire_context(width, height)
            .unwrap()
    }

    #[test]
    fn save_restore_round_trips_state() {
        let mut ctx = context(4, 4);
        ctx.set_fill([1, 2, 3, 4]);
        ctx.save().unwrap();
        ctx.set_fill([9, 9, 9, 9]);
        ctx.restore().unwrap();
        ctx.fill_rect(0, 0, 1, 1).unwrap();
        assert_eq!(ctx.pixel(0, 0), Some([1, 2, 3, 4]));
    }

    #[test]
    fn lost_context_rejects_save() {
        let mut ctx = context(2, 2);
        ctx.mark_lost();
        assert!(matches!(ctx.save(), Err(CanvasFault::ContextLost { .. })));
    }

    #[test]
    fn scoped_drawing_restores_after_losing_the_context() {
        let mut ctx = context(4, 4);
        ctx.set_fill([1, 2, 3, 4]);
        let result = ctx.scoped(|ctx| {
            ctx.set_fill([9, 9, 9, 9]);
            ctx.fill_rect(0, 0, 1, 1)?;
            ctx.mark_lost();
            ctx.fill_rect(1, 1, 1, 1)
        });
        assert!(matches!(result, Err(CanvasFault::ContextLost { .. })));
        assert_eq!(ctx.save_depth(), 0);
    }

    #[test]
    fn fill_rect_clips_to_bounds() {
        let mut ctx = context(3, 3);
        ctx.clear().unwrap();
        ctx.set_fill([0, 0, 0, 255]);
        ctx.fill_rect(2, 2, 10, 10).unwrap();
        assert_eq!(ctx.pixel(2, 2), Some([0, 0, 0, 255]));
        assert_eq!(ctx.pixel(1, 1), Some([255, 255, 255, 255]));
        assert_eq!(ctx.pixel(3, 3), None);
    }

    #[test]
    fn oversized_surface_has_no_context() {
        let backend = MemoryBackend { max_dimension: 8 };
        assert!(matches!(
            backend.acquire_context(9, 1),
            Err(CanvasFault::ContextUnavailable {
                width: 9,
                height: 1
            })
        ));
    }
}
