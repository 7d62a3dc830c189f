//! In-memory per-session diagnostics with bounded retention.

use std::{
    num::NonZeroUsize,
    sync::{Arc, Mutex},
};

use docrelay_types::{AttemptRecord, DiagnosticsReport, EnvironmentInfo, RecoveryRecord};
use lru::LruCache;
use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::{
    application::canvas::HeapProbe, domain::error::RenderError, util::lock::mutex_lock,
};

const SOURCE: &str = "docrelay::application::diagnostics";
const DEFAULT_RETAINED_SESSIONS: NonZeroUsize = match NonZeroUsize::new(64) {
    Some(value) => value,
    None => NonZeroUsize::MIN,
};

struct SessionLog {
    url: String,
    started_at: OffsetDateTime,
    started: Instant,
    errors: Vec<RenderError>,
    attempts: Vec<AttemptRecord>,
    recoveries: Vec<RecoveryRecord>,
}

impl SessionLog {
    fn new(url: String) -> Self {
        Self {
            url,
            started_at: OffsetDateTime::now_utc(),
            started: Instant::now(),
            errors: Vec::new(),
            attempts: Vec::new(),
            recoveries: Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct DiagnosticsCollector {
    sessions: Arc<Mutex<LruCache<Uuid, SessionLog>>>,
    heap: Option<Arc<dyn HeapProbe>>,
}

impl Default for DiagnosticsCollector {
    fn default() -> Self {
        Self::new(DEFAULT_RETAINED_SESSIONS)
    }
}

impl DiagnosticsCollector {
    /// Keeps the `retained` most recently touched sessions.
    pub fn new(retained: NonZeroUsize) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(LruCache::new(retained))),
            heap: None,
        }
    }

    pub fn with_heap_probe(mut self, heap: Arc<dyn HeapProbe>) -> Self {
        self.heap = Some(heap);
        self
    }

    /// Start (or restart) the log for a session.
    pub fn begin_session(&self, session_id: Uuid, url: &Url) {
        let mut sessions = mutex_lock(&self.sessions, SOURCE, "begin_session");
        if let Some((evicted, _)) = sessions.push(session_id, SessionLog::new(url.to_string())) {
            if evicted != session_id {
                debug!(target = SOURCE, op = "evict", session_id = %evicted);
            }
        }
    }

    pub fn record_error(&self, session_id: Uuid, error: &RenderError) {
        self.with_log(session_id, "record_error", |log| log.errors.push(error.clone()));
    }

    pub fn record_attempt(&self, session_id: Uuid, attempt: AttemptRecord) {
        self.with_log(session_id, "record_attempt", |log| log.attempts.push(attempt));
    }

    pub fn record_recovery(&self, session_id: Uuid, recovery: RecoveryRecord) {
        self.with_log(session_id, "record_recovery", |log| log.recoveries.push(recovery));
    }

    pub fn export(&self, session_id: Uuid) -> Option<DiagnosticsReport> {
        let environment = self.environment();
        let mut sessions = mutex_lock(&self.sessions, SOURCE, "export");
        let log = sessions.get(&session_id)?;
        Some(DiagnosticsReport {
            session_id,
            url: log.url.clone(),
            started_at: log.started_at,
            total_elapsed_ms: log.started.elapsed().as_millis() as u64,
            errors: log.errors.clone(),
            attempts: log.attempts.clone(),
            recoveries: log.recoveries.clone(),
            environment,
        })
    }

    pub fn environment(&self) -> EnvironmentInfo {
        let heap = self.heap.as_ref().and_then(|probe| probe.heap_usage());
        EnvironmentInfo {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            family: std::env::consts::FAMILY.to_string(),
            crate_version: env!("CARGO_PKG_VERSION").to_string(),
            heap_used_bytes: heap.map(|usage| usage.used_bytes),
            heap_limit_bytes: heap.map(|usage| usage.limit_bytes),
        }
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.sessions, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records against a session nobody began still land in a log of their own.
    fn with_log(&self, session_id: Uuid, op: &'static str, apply: impl FnOnce(&mut SessionLog)) {
        let mut sessions = mutex_lock(&self.sessions, SOURCE, op);
        let log = sessions.get_or_insert_mut(session_id, || SessionLog::new(String::new()));
        apply(log);
    }
}
