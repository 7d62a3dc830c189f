//! Per-session progress, stall detection and forced retries.
//!
//! Each tracked session owns two timer tasks: an interval tick that refreshes
//! `time_elapsed_ms` for subscribers, and a stall deadline re-armed by every
//! update. Both are aborted together when the session reaches a terminal
//! stage, so no stall is reported for a finished session.
//!
//! Every snapshot is stamped with a per-session revision while the session
//! lock is held, and delivery goes through a per-session gate that drops
//! anything older than what subscribers already saw. Callbacks for one
//! session therefore run one at a time, in mutation order, whichever task or
//! thread produced the snapshot. Subscribers must not update the session
//! they observe from inside the callback.

mod percentage;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, Weak},
    time::Duration,
};

use metrics::counter;
use time::OffsetDateTime;
use tokio::{
    runtime::Handle,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    domain::types::{ProgressStage, ProgressState},
    util::lock::mutex_lock,
};

pub use percentage::{calculate_progress_percentage, stage_band};

const SOURCE: &str = "docrelay::application::progress";

pub type ProgressCallback = Arc<dyn Fn(&ProgressState) + Send + Sync>;
pub type StallCallback = Arc<dyn Fn(Uuid, &ProgressState) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressConfig {
    pub update_interval: Duration,
    pub stuck_threshold: Duration,
    /// How long a finished session stays readable.
    pub purge_delay: Duration,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_millis(250),
            stuck_threshold: Duration::from_secs(30),
            purge_delay: Duration::from_secs(5),
        }
    }
}

/// Fields to merge into a session's state; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressUpdate {
    pub percentage: Option<f64>,
    pub stage: Option<ProgressStage>,
    pub bytes_loaded: Option<u64>,
    pub total_bytes: Option<u64>,
}

impl ProgressUpdate {
    pub fn stage(stage: ProgressStage) -> Self {
        Self {
            stage: Some(stage),
            ..Self::default()
        }
    }

    pub fn percentage(mut self, percentage: f64) -> Self {
        self.percentage = Some(percentage);
        self
    }

    pub fn bytes(mut self, loaded: u64, total: Option<u64>) -> Self {
        self.bytes_loaded = Some(loaded);
        self.total_bytes = total;
        self
    }
}

struct Session {
    state: ProgressState,
    started: Instant,
    ticker: Option<JoinHandle<()>>,
    stall: Option<JoinHandle<()>>,
    revision: u64,
    /// Last revision handed to subscribers.
    delivered: Arc<Mutex<u64>>,
}

/// A snapshot waiting to be handed to subscribers.
struct Delivery {
    revision: u64,
    gate: Arc<Mutex<u64>>,
    state: ProgressState,
}

impl Session {
    fn new(state: ProgressState) -> Self {
        Self {
            state,
            started: Instant::now(),
            ticker: None,
            stall: None,
            revision: 0,
            delivered: Arc::new(Mutex::new(0)),
        }
    }

    /// Stamp the current state as the newest revision.
    fn stamp(&mut self) -> Delivery {
        self.revision += 1;
        self.current()
    }

    /// The current state at its existing revision; subscribers that already
    /// saw it will not see it again.
    fn current(&self) -> Delivery {
        Delivery {
            revision: self.revision,
            gate: Arc::clone(&self.delivered),
            state: self.state.clone(),
        }
    }

    fn stop_timers(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        if let Some(stall) = self.stall.take() {
            stall.abort();
        }
    }

    fn refresh_elapsed(&mut self) {
        self.state.time_elapsed_ms = self.started.elapsed().as_millis() as u64;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop_timers();
    }
}

struct Inner {
    config: ProgressConfig,
    sessions: Mutex<HashMap<Uuid, Session>>,
    subscribers: Mutex<HashMap<Uuid, Vec<ProgressCallback>>>,
    stuck_callbacks: Mutex<Vec<StallCallback>>,
    retry_callbacks: Mutex<Vec<StallCallback>>,
}

#[derive(Clone)]
pub struct ProgressTracker {
    inner: Arc<Inner>,
}

impl ProgressTracker {
    pub fn new(config: ProgressConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                sessions: Mutex::new(HashMap::new()),
                subscribers: Mutex::new(HashMap::new()),
                stuck_callbacks: Mutex::new(Vec::new()),
                retry_callbacks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &ProgressConfig {
        &self.inner.config
    }

    /// Receive snapshots for one session. May be called before the session
    /// is initialised.
    pub fn subscribe(&self, id: Uuid, callback: ProgressCallback) {
        mutex_lock(&self.inner.subscribers, SOURCE, "subscribe")
            .entry(id)
            .or_default()
            .push(callback);
    }

    pub fn on_stuck(&self, callback: StallCallback) {
        mutex_lock(&self.inner.stuck_callbacks, SOURCE, "on_stuck").push(callback);
    }

    pub fn on_retry(&self, callback: StallCallback) {
        mutex_lock(&self.inner.retry_callbacks, SOURCE, "on_retry").push(callback);
    }

    /// Start tracking at 0 %. Subscribers see the initial state before this
    /// returns.
    pub fn initialize_progress(&self, id: Uuid, stage: ProgressStage) -> ProgressState {
        let delivery = {
            let mut sessions = mutex_lock(&self.inner.sessions, SOURCE, "initialize_progress");
            let mut session = Session::new(ProgressState::new(stage));
            session.ticker = self.spawn_ticker(id);
            session.stall = self.spawn_stall_deadline(id);
            let delivery = session.stamp();
            sessions.insert(id, session);
            delivery
        };
        debug!(target = SOURCE, op = "initialize_progress", session_id = %id, stage = %stage);
        let state = delivery.state.clone();
        self.deliver(id, delivery);
        state
    }

    /// Merge fields, clear the stall flag and re-arm the stall deadline.
    /// Returns `None` for an unknown session.
    ///
    /// `bytes_loaded` never moves backwards within an attempt, so a fetch
    /// retried by the network layer does not rewind subscribers.
    pub fn update_progress(&self, id: Uuid, update: ProgressUpdate) -> Option<ProgressState> {
        if let Some(stage) = update.stage.filter(|stage| stage.is_terminal()) {
            self.apply(id, ProgressUpdate { stage: None, ..update })?;
            return self.finish(id, stage);
        }
        let delivery = self.apply(id, update)?;
        let snapshot = delivery.state.clone();
        self.deliver(id, delivery);
        Some(snapshot)
    }

    fn apply(&self, id: Uuid, update: ProgressUpdate) -> Option<Delivery> {
        let mut sessions = mutex_lock(&self.inner.sessions, SOURCE, "update_progress");
        let session = sessions.get_mut(&id)?;
        if session.state.stage.is_terminal() {
            return Some(session.current());
        }

        let state = &mut session.state;
        if let Some(stage) = update.stage {
            state.stage = stage;
        }
        if let Some(total) = update.total_bytes {
            state.total_bytes = Some(total);
        }
        if let Some(loaded) = update.bytes_loaded {
            state.bytes_loaded = state.bytes_loaded.max(loaded);
        }
        if let Some(percentage) = update.percentage {
            state.percentage = percentage.clamp(0.0, 100.0);
        }
        state.is_stuck = false;
        state.last_update = OffsetDateTime::now_utc();
        session.refresh_elapsed();

        if let Some(stall) = session.stall.take() {
            stall.abort();
        }
        session.stall = self.spawn_stall_deadline(id);
        Some(session.stamp())
    }

    pub fn snapshot(&self, id: Uuid) -> Option<ProgressState> {
        let sessions = mutex_lock(&self.inner.sessions, SOURCE, "snapshot");
        let session = sessions.get(&id)?;
        let mut state = session.state.clone();
        if !state.stage.is_terminal() {
            state.time_elapsed_ms = session.started.elapsed().as_millis() as u64;
        }
        Some(state)
    }

    pub fn is_tracking(&self, id: Uuid) -> bool {
        mutex_lock(&self.inner.sessions, SOURCE, "is_tracking").contains_key(&id)
    }

    /// Restart a stalled session. Does nothing unless the session is stuck.
    pub fn force_retry(&self, id: Uuid) -> bool {
        let stalled = {
            let sessions = mutex_lock(&self.inner.sessions, SOURCE, "force_retry");
            match sessions.get(&id) {
                Some(session) if session.state.is_stuck => session.state.clone(),
                _ => return false,
            }
        };

        let callbacks = mutex_lock(&self.inner.retry_callbacks, SOURCE, "force_retry").clone();
        for callback in callbacks {
            callback(id, &stalled);
        }
        warn!(
            target = SOURCE,
            op = "force_retry",
            session_id = %id,
            stage = %stalled.stage,
            time_elapsed_ms = stalled.time_elapsed_ms,
            "Forced retry of stalled session"
        );
        self.restart(id).is_some()
    }

    /// Silent reset to 0 % / initializing with a new attempt clock. A known
    /// `total_bytes` survives as a hint.
    pub fn restart(&self, id: Uuid) -> Option<ProgressState> {
        let delivery = {
            let mut sessions = mutex_lock(&self.inner.sessions, SOURCE, "restart");
            let session = sessions.get_mut(&id)?;
            if session.state.stage.is_terminal() {
                return None;
            }
            let total_bytes = session.state.total_bytes;
            session.state = ProgressState::new(ProgressStage::Initializing);
            session.state.total_bytes = total_bytes;
            session.started = Instant::now();

            if let Some(stall) = session.stall.take() {
                stall.abort();
            }
            session.stall = self.spawn_stall_deadline(id);
            if session.ticker.as_ref().is_none_or(JoinHandle::is_finished) {
                session.ticker = self.spawn_ticker(id);
            }
            session.stamp()
        };
        let snapshot = delivery.state.clone();
        self.deliver(id, delivery);
        Some(snapshot)
    }

    pub fn complete_progress(&self, id: Uuid) -> Option<ProgressState> {
        self.finish(id, ProgressStage::Complete)
    }

    pub fn fail_progress(&self, id: Uuid) -> Option<ProgressState> {
        self.finish(id, ProgressStage::Error)
    }

    fn finish(&self, id: Uuid, stage: ProgressStage) -> Option<ProgressState> {
        let delivery = {
            let mut sessions = mutex_lock(&self.inner.sessions, SOURCE, "finish");
            let session = sessions.get_mut(&id)?;
            if session.state.stage.is_terminal() {
                return Some(session.state.clone());
            }
            session.stop_timers();
            session.refresh_elapsed();
            session.state.stage = stage;
            session.state.is_stuck = false;
            session.state.last_update = OffsetDateTime::now_utc();
            if stage == ProgressStage::Complete {
                session.state.percentage = 100.0;
            }
            session.stamp()
        };
        let snapshot = delivery.state.clone();
        debug!(
            target = SOURCE,
            op = "finish",
            session_id = %id,
            stage = %stage,
            time_elapsed_ms = snapshot.time_elapsed_ms,
        );
        self.deliver(id, delivery);
        self.schedule_purge(id);
        Some(snapshot)
    }

    fn tick(&self, id: Uuid) -> bool {
        let delivery = {
            let mut sessions = mutex_lock(&self.inner.sessions, SOURCE, "tick");
            let Some(session) = sessions.get_mut(&id) else {
                return false;
            };
            if session.state.stage.is_terminal() {
                return false;
            }
            session.refresh_elapsed();
            session.stamp()
        };
        self.deliver(id, delivery);
        true
    }

    fn mark_stuck(&self, id: Uuid) {
        let delivery = {
            let mut sessions = mutex_lock(&self.inner.sessions, SOURCE, "mark_stuck");
            let Some(session) = sessions.get_mut(&id) else {
                return;
            };
            if session.state.stage.is_terminal() || session.state.is_stuck {
                return;
            }
            session.state.is_stuck = true;
            session.refresh_elapsed();
            // This task is the stall deadline; it ends on its own.
            session.stall = None;
            session.stamp()
        };
        let snapshot = delivery.state.clone();

        counter!("docrelay_progress_stuck_total").increment(1);
        warn!(
            target = SOURCE,
            op = "stuck_detection",
            session_id = %id,
            stage = %snapshot.stage,
            percentage = snapshot.percentage,
            time_elapsed_ms = snapshot.time_elapsed_ms,
            "Progress stalled"
        );

        let callbacks = mutex_lock(&self.inner.stuck_callbacks, SOURCE, "mark_stuck").clone();
        for callback in callbacks {
            callback(id, &snapshot);
        }
        self.deliver(id, delivery);
    }

    fn purge(&self, id: Uuid) {
        let removed = {
            let mut sessions = mutex_lock(&self.inner.sessions, SOURCE, "purge");
            let finished = sessions
                .get(&id)
                .is_some_and(|session| session.state.stage.is_terminal());
            if finished {
                sessions.remove(&id)
            } else {
                None
            }
        };
        if removed.is_some() {
            mutex_lock(&self.inner.subscribers, SOURCE, "purge").remove(&id);
        }
    }

    /// Hand a snapshot to the session's subscribers unless a newer one
    /// already went out. The gate stays held while callbacks run.
    fn deliver(&self, id: Uuid, delivery: Delivery) {
        let mut delivered = mutex_lock(&delivery.gate, SOURCE, "deliver");
        if delivery.revision <= *delivered {
            return;
        }
        *delivered = delivery.revision;
        let callbacks = mutex_lock(&self.inner.subscribers, SOURCE, "deliver")
            .get(&id)
            .cloned()
            .unwrap_or_default();
        for callback in callbacks {
            callback(&delivery.state);
        }
    }

    fn weak(&self) -> Weak<Inner> {
        Arc::downgrade(&self.inner)
    }

    fn spawn_ticker(&self, id: Uuid) -> Option<JoinHandle<()>> {
        let runtime = Handle::try_current().ok()?;
        let weak = self.weak();
        let period = self.inner.config.update_interval;
        Some(runtime.spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let tracker = ProgressTracker { inner };
                if !tracker.tick(id) {
                    break;
                }
            }
        }))
    }

    fn spawn_stall_deadline(&self, id: Uuid) -> Option<JoinHandle<()>> {
        let runtime = Handle::try_current().ok()?;
        let weak = self.weak();
        let threshold = self.inner.config.stuck_threshold;
        Some(runtime.spawn(async move {
            tokio::time::sleep(threshold).await;
            if let Some(inner) = weak.upgrade() {
                let tracker = ProgressTracker { inner };
                tracker.mark_stuck(id);
            }
        }))
    }

    fn schedule_purge(&self, id: Uuid) {
        let Ok(runtime) = Handle::try_current() else {
            return;
        };
        let weak = self.weak();
        let delay = self.inner.config.purge_delay;
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                let tracker = ProgressTracker { inner };
                tracker.purge(id);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn tracker() -> ProgressTracker {
        ProgressTracker::new(ProgressConfig {
            update_interval: Duration::from_millis(100),
            stuck_threshold: Duration::from_secs(1),
            purge_delay: Duration::from_secs(2),
        })
    }

    fn recorder(tracker: &ProgressTracker, id: Uuid) -> Arc<Mutex<Vec<ProgressState>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        tracker.subscribe(
            id,
            Arc::new(move |state: &ProgressState| sink.lock().unwrap().push(state.clone())),
        );
        seen
    }

    fn stuck_counter(tracker: &ProgressTracker) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&count);
        tracker.on_stuck(Arc::new(move |_: Uuid, _: &ProgressState| {
            sink.fetch_add(1, Ordering::SeqCst);
        }));
        count
    }

    #[tokio::test(start_paused = true)]
    async fn initialize_notifies_before_returning() {
        let tracker = tracker();
        let id = Uuid::new_v4();
        let seen = recorder(&tracker, id);

        tracker.initialize_progress(id, ProgressStage::Initializing);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].percentage, 0.0);
        assert_eq!(seen[0].stage, ProgressStage::Initializing);
    }

    #[tokio::test(start_paused = true)]
    async fn update_clamps_and_unknown_ids_return_none() {
        let tracker = tracker();
        let id = Uuid::new_v4();
        tracker.initialize_progress(id, ProgressStage::Initializing);

        let state = tracker
            .update_progress(id, ProgressUpdate::stage(ProgressStage::Rendering).percentage(140.0))
            .unwrap();
        assert_eq!(state.percentage, 100.0);
        let state = tracker
            .update_progress(id, ProgressUpdate::default().percentage(-3.0))
            .unwrap();
        assert_eq!(state.percentage, 0.0);

        assert!(
            tracker
                .update_progress(Uuid::new_v4(), ProgressUpdate::default())
                .is_none()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_refreshes_elapsed_time() {
        let tracker = tracker();
        let id = Uuid::new_v4();
        let seen = recorder(&tracker, id);
        tracker.initialize_progress(id, ProgressStage::Fetching);

        tokio::time::sleep(Duration::from_millis(350)).await;

        let seen = seen.lock().unwrap();
        assert!(seen.len() >= 4, "got {} snapshots", seen.len());
        let elapsed: Vec<u64> = seen.iter().map(|s| s.time_elapsed_ms).collect();
        assert!(elapsed.windows(2).all(|pair| pair[0] <= pair[1]), "{elapsed:?}");
        assert!(*elapsed.last().unwrap() >= 300);
    }

    #[tokio::test(start_paused = true)]
    async fn stall_fires_once_and_recurs_after_update() {
        let tracker = tracker();
        let id = Uuid::new_v4();
        let stuck = stuck_counter(&tracker);
        tracker.initialize_progress(id, ProgressStage::Fetching);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(stuck.load(Ordering::SeqCst), 1);
        assert!(tracker.snapshot(id).unwrap().is_stuck);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(stuck.load(Ordering::SeqCst), 1);

        let state = tracker
            .update_progress(id, ProgressUpdate::default().percentage(20.0))
            .unwrap();
        assert!(!state.is_stuck);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(stuck.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn updates_push_back_the_stall_deadline() {
        let tracker = tracker();
        let id = Uuid::new_v4();
        let stuck = stuck_counter(&tracker);
        tracker.initialize_progress(id, ProgressStage::Fetching);

        for _ in 0..5 {
            tokio::time::sleep(Duration::from_millis(800)).await;
            tracker.update_progress(id, ProgressUpdate::default().percentage(15.0));
        }
        assert_eq!(stuck.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn force_retry_requires_stall_and_preserves_total() {
        let tracker = tracker();
        let id = Uuid::new_v4();
        let retries = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&retries);
        tracker.on_retry(Arc::new(move |_: Uuid, state: &ProgressState| {
            assert!(state.is_stuck);
            sink.fetch_add(1, Ordering::SeqCst);
        }));
        tracker.initialize_progress(id, ProgressStage::Initializing);
        tracker.update_progress(
            id,
            ProgressUpdate::stage(ProgressStage::Fetching)
                .bytes(512, Some(4096))
                .percentage(12.5),
        );

        assert!(!tracker.force_retry(id));

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(tracker.force_retry(id));
        assert_eq!(retries.load(Ordering::SeqCst), 1);

        let state = tracker.snapshot(id).unwrap();
        assert_eq!(state.stage, ProgressStage::Initializing);
        assert_eq!(state.percentage, 0.0);
        assert_eq!(state.bytes_loaded, 0);
        assert_eq!(state.total_bytes, Some(4096));
        assert!(!state.is_stuck);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_sessions_never_stall_and_are_purged() {
        let tracker = tracker();
        let id = Uuid::new_v4();
        let stuck = stuck_counter(&tracker);
        let seen = recorder(&tracker, id);
        tracker.initialize_progress(id, ProgressStage::Fetching);

        let final_state = tracker.complete_progress(id).unwrap();
        assert_eq!(final_state.percentage, 100.0);
        assert_eq!(seen.lock().unwrap().last().unwrap().stage, ProgressStage::Complete);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(stuck.load(Ordering::SeqCst), 0);
        assert_eq!(tracker.snapshot(id).unwrap().stage, ProgressStage::Complete);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(tracker.snapshot(id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn bytes_loaded_never_rewinds_within_an_attempt() {
        let tracker = tracker();
        let id = Uuid::new_v4();
        tracker.initialize_progress(id, ProgressStage::Fetching);
        tracker.update_progress(id, ProgressUpdate::default().bytes(2048, Some(4096)));
        let state = tracker
            .update_progress(id, ProgressUpdate::default().bytes(100, Some(4096)))
            .unwrap();
        assert_eq!(state.bytes_loaded, 2048);

        let state = tracker.restart(id).unwrap();
        assert_eq!(state.bytes_loaded, 0);
        assert_eq!(state.total_bytes, Some(4096));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn subscribers_see_snapshots_in_order_under_contention() {
        let tracker = ProgressTracker::new(ProgressConfig {
            update_interval: Duration::from_millis(1),
            stuck_threshold: Duration::from_secs(30),
            purge_delay: Duration::from_secs(5),
        });
        let id = Uuid::new_v4();
        let seen = recorder(&tracker, id);
        tracker.initialize_progress(id, ProgressStage::Fetching);

        let next = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let writers: Vec<_> = (0..4)
            .map(|_| {
                let tracker = tracker.clone();
                let next = Arc::clone(&next);
                tokio::spawn(async move {
                    for _ in 0..500 {
                        let loaded = next.fetch_add(1, Ordering::SeqCst) + 1;
                        tracker.update_progress(id, ProgressUpdate::default().bytes(loaded, None));
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap();
        }
        tracker.complete_progress(id);

        let seen = seen.lock().unwrap();
        assert!(seen.len() > 1);
        for pair in seen.windows(2) {
            assert!(
                pair[0].time_elapsed_ms <= pair[1].time_elapsed_ms,
                "elapsed went back: {} then {}",
                pair[0].time_elapsed_ms,
                pair[1].time_elapsed_ms
            );
            assert!(
                pair[0].bytes_loaded <= pair[1].bytes_loaded,
                "bytes went back: {} then {}",
                pair[0].bytes_loaded,
                pair[1].bytes_loaded
            );
        }
        assert_eq!(seen.last().unwrap().stage, ProgressStage::Complete);
        assert_eq!(seen.last().unwrap().bytes_loaded, 2000);
    }

    #[tokio::test(start_paused = true)]
    async fn fail_progress_is_terminal() {
        let tracker = tracker();
        let id = Uuid::new_v4();
        tracker.initialize_progress(id, ProgressStage::Parsing);
        let state = tracker.fail_progress(id).unwrap();
        assert_eq!(state.stage, ProgressStage::Error);
        assert!(tracker.restart(id).is_none());
        let after = tracker
            .update_progress(id, ProgressUpdate::default().percentage(50.0))
            .unwrap();
        assert_eq!(after.stage, ProgressStage::Error);
    }
}
