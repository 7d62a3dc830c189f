use bytes::Bytes;
use uuid::Uuid;

/// Handle to a document parsed by a [`DocumentEngine`](crate::application::methods::DocumentEngine).
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub id: Uuid,
    pub version: String,
    pub page_count: u32,
    pub page_width: u32,
    pub page_height: u32,
    /// Parsed from a truncated payload.
    pub partial: bool,
    data: Bytes,
}

impl ParsedDocument {
    pub fn new(
        version: impl Into<String>,
        page_count: u32,
        page_size: (u32, u32),
        partial: bool,
        data: Bytes,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            version: version.into(),
            page_count,
            page_width: page_size.0,
            page_height: page_size.1,
            partial,
            data,
        }
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }
}
