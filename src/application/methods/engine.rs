use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

use crate::{
    application::canvas::{CanvasFault, DrawingContext},
    domain::document::ParsedDocument,
    infra::network::DOCUMENT_MAGIC,
};

const TRAILER: &[u8] = b"%%EOF";
const TRAILER_WINDOW: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineFault {
    #[error("document is corrupted: {reason}")]
    Corrupted { reason: String },
    #[error("invalid document structure: {reason}")]
    Malformed { reason: String },
    #[error("page {page} is out of range (document has {count} pages)")]
    PageOutOfRange { page: u32, count: u32 },
    #[error(transparent)]
    Surface(#[from] CanvasFault),
    /// Error text from a third-party engine, categorised by its wording.
    #[error("{0}")]
    Opaque(String),
}

/// Parses documents and draws their pages onto a surface.
pub trait DocumentEngine: Send + Sync {
    fn parse(&self, data: Bytes, partial: bool) -> Result<ParsedDocument, EngineFault>;

    fn draw_page(
        &self,
        document: &ParsedDocument,
        page: u32,
        surface: &mut DrawingContext,
    ) -> Result<(), EngineFault>;
}

/// Validates document structure and paints page placeholders.
///
/// Enough to prove the pipeline end to end; a real rasteriser plugs in
/// through [`DocumentEngine`].
#[derive(Debug, Clone)]
pub struct StructuralEngine {
    pub default_page_size: (u32, u32),
    pub max_page_dimension: u32,
    pub max_pages: u32,
}

impl Default for StructuralEngine {
    fn default() -> Self {
        Self {
            default_page_size: (612, 792),
            max_page_dimension: 2048,
            max_pages: 64,
        }
    }
}

impl StructuralEngine {
    fn page_size(&self, data: &[u8]) -> (u32, u32) {
        let Some(start) = find(data, b"/MediaBox") else {
            return self.default_page_size;
        };
        let rest = &data[start..];
        let (Some(open), Some(close)) = (find(rest, b"["), find(rest, b"]")) else {
            return self.default_page_size;
        };
        if close < open {
            return self.default_page_size;
        }
        let numbers: Vec<f64> = String::from_utf8_lossy(&rest[open + 1..close])
            .split_whitespace()
            .filter_map(|token| token.parse().ok())
            .collect();
        match numbers.as_slice() {
            [x0, y0, x1, y1] => {
                let clamp = |value: f64| {
                    (value.abs().round() as u32).clamp(1, self.max_page_dimension)
                };
                (clamp(x1 - x0), clamp(y1 - y0))
            }
            _ => self.default_page_size,
        }
    }
}

impl DocumentEngine for StructuralEngine {
    fn parse(&self, data: Bytes, partial: bool) -> Result<ParsedDocument, EngineFault> {
        if !data.starts_with(DOCUMENT_MAGIC) {
            return Err(EngineFault::Corrupted {
                reason: "missing %PDF- header".to_string(),
            });
        }

        let version: String = data[DOCUMENT_MAGIC.len()..]
            .iter()
            .take_while(|byte| byte.is_ascii_digit() || **byte == b'.')
            .map(|byte| char::from(*byte))
            .collect();
        if version.is_empty() {
            return Err(EngineFault::Malformed {
                reason: "header carries no version".to_string(),
            });
        }

        if !partial {
            let tail = &data[data.len().saturating_sub(TRAILER_WINDOW)..];
            if find(tail, TRAILER).is_none() {
                return Err(EngineFault::Malformed {
                    reason: "missing %%EOF trailer".to_string(),
                });
            }
        }

        let pages = count_page_objects(&data);
        if pages == 0 {
            return Err(EngineFault::Malformed {
                reason: "no page objects found".to_string(),
            });
        }
        let page_count = pages.min(self.max_pages);
        let page_size = self.page_size(&data);

        debug!(
            target = "docrelay::application::methods::engine",
            op = "parse",
            version = %version,
            pages,
            page_count,
            width = page_size.0,
            height = page_size.1,
            partial,
        );
        Ok(ParsedDocument::new(version, page_count, page_size, partial, data))
    }

    fn draw_page(
        &self,
        document: &ParsedDocument,
        page: u32,
        surface: &mut DrawingContext,
    ) -> Result<(), EngineFault> {
        if page == 0 || page > document.page_count {
            return Err(EngineFault::PageOutOfRange {
                page,
                count: document.page_count,
            });
        }
        surface.scoped(|surface| {
            surface.clear()?;
            surface.set_fill([200, 200, 200, 255]);
            surface.set_line_width(2);
            surface.stroke_rect(0, 0, surface.width(), surface.height())?;
            surface.set_fill([0, 0, 0, 255]);
            for marker in 0..page.min(10) {
                surface.fill_rect(8 + marker * 6, 8, 4, 4)?;
            }
            Ok(())
        })?;
        Ok(())
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Counts `/Type /Page` dictionaries, skipping `/Type /Pages` tree nodes.
fn count_page_objects(data: &[u8]) -> u32 {
    let mut count = 0;
    let mut offset = 0;
    while let Some(found) = find(&data[offset..], b"/Type") {
        let mut cursor = offset + found + b"/Type".len();
        while data.get(cursor).is_some_and(u8::is_ascii_whitespace) {
            cursor += 1;
        }
        if data[cursor..].starts_with(b"/Page") {
            let next = data.get(cursor + b"/Page".len());
            if next != Some(&b's') {
                count += 1;
            }
        }
        offset = cursor;
    }
    count
}
