use std::time::Duration;

use serde_json::Value;
use time::OffsetDateTime;
use tokio::time::Instant;
use url::Url;
use uuid::Uuid;

use super::{
    document::ParsedDocument,
    error::RenderError,
    types::{ProgressState, RenderMethod, SizeClass, SurfaceHandle},
};

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(90);

/// Caller-supplied knobs for one rendering session.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    /// Bound on a whole network fetch.
    pub timeout: Duration,
    /// Bound on one method attempt.
    pub stage_timeout: Duration,
    pub preferred_method: Option<RenderMethod>,
    /// Watermark description, passed through untouched.
    pub watermark: Option<Value>,
    pub content_length_hint: Option<u64>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_FETCH_TIMEOUT,
            stage_timeout: DEFAULT_STAGE_TIMEOUT,
            preferred_method: None,
            watermark: None,
            content_length_hint: None,
        }
    }
}

/// State of one rendering attempt.
///
/// A retry never reuses a context: recovery builds a fresh one with
/// [`RenderContext::create_fresh`], and the orchestrator releases the old
/// context's surface and document before the next attempt starts.
#[derive(Debug)]
pub struct RenderContext {
    pub rendering_id: Uuid,
    pub session_id: Uuid,
    pub url: Url,
    pub options: RenderOptions,
    pub start_time: Instant,
    pub started_at: OffsetDateTime,
    pub current_method: Option<RenderMethod>,
    pub attempt_count: u32,
    pub surface: Option<SurfaceHandle>,
    pub document: Option<ParsedDocument>,
    pub progress_state: Option<ProgressState>,
    pub error_history: Vec<RenderError>,
}

impl RenderContext {
    pub fn new(url: Url, options: RenderOptions) -> Self {
        let rendering_id = Uuid::new_v4();
        Self {
            rendering_id,
            session_id: rendering_id,
            url,
            options,
            start_time: Instant::now(),
            started_at: OffsetDateTime::now_utc(),
            current_method: None,
            attempt_count: 0,
            surface: None,
            document: None,
            progress_state: None,
            error_history: Vec::new(),
        }
    }

    /// New attempt for the same session: new rendering id, no handles, no
    /// history. URL, options, session and method carry over.
    pub fn create_fresh(&self) -> Self {
        Self {
            rendering_id: Uuid::new_v4(),
            session_id: self.session_id,
            url: self.url.clone(),
            options: self.options.clone(),
            start_time: Instant::now(),
            started_at: OffsetDateTime::now_utc(),
            current_method: self.current_method,
            attempt_count: 0,
            surface: None,
            document: None,
            progress_state: None,
            error_history: Vec::new(),
        }
    }

    pub fn with_url(mut self, url: Url) -> Self {
        self.url = url;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = timeout;
        self
    }

    pub fn size_class(&self) -> SizeClass {
        SizeClass::from_content_length(self.options.content_length_hint)
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}
