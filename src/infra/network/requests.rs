use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use dashmap::DashMap;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Opaque identity of one in-flight HTTP request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

struct Pending {
    rendering_id: Uuid,
    cancel: oneshot::Sender<()>,
}

/// Requests currently being transferred, each with a cancellation channel.
///
/// Registration hands back a [`RequestGuard`]; dropping it deregisters the
/// request, so cancelling a finished request finds nothing and is a no-op.
#[derive(Default, Clone)]
pub struct InFlightRequests {
    pending: Arc<DashMap<RequestId, Pending>>,
    next_id: Arc<AtomicU64>,
}

impl InFlightRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, rendering_id: Uuid) -> (RequestGuard, oneshot::Receiver<()>) {
        let id = RequestId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (cancel, receiver) = oneshot::channel();
        self.pending.insert(
            id,
            Pending {
                rendering_id,
                cancel,
            },
        );
        let guard = RequestGuard {
            id,
            pending: Arc::clone(&self.pending),
        };
        (guard, receiver)
    }

    /// Signal cancellation. Returns whether a live request was found.
    pub fn cancel(&self, id: RequestId) -> bool {
        match self.pending.remove(&id) {
            Some((_id, pending)) => pending.cancel.send(()).is_ok(),
            None => false,
        }
    }

    /// Cancel every request issued on behalf of one rendering attempt.
    pub fn cancel_rendering(&self, rendering_id: Uuid) -> usize {
        let ids: Vec<RequestId> = self
            .pending
            .iter()
            .filter(|entry| entry.value().rendering_id == rendering_id)
            .map(|entry| *entry.key())
            .collect();
        ids.into_iter().filter(|id| self.cancel(*id)).count()
    }

    pub fn ids(&self) -> Vec<RequestId> {
        let mut ids: Vec<RequestId> = self.pending.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

pub struct RequestGuard {
    id: RequestId,
    pending: Arc<DashMap<RequestId, Pending>>,
}

impl RequestGuard {
    pub fn id(&self) -> RequestId {
        self.id
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_delivers_signal_once() {
        let requests = InFlightRequests::new();
        let (guard, mut receiver) = requests.register(Uuid::new_v4());
        assert_eq!(requests.ids(), vec![guard.id()]);

        assert!(requests.cancel(guard.id()));
        assert!(receiver.try_recv().is_ok());
        assert!(!requests.cancel(guard.id()));
    }

    #[test]
    fn finished_and_unknown_requests_cancel_as_noop() {
        let requests = InFlightRequests::new();
        let (guard, _receiver) = requests.register(Uuid::new_v4());
        let id = guard.id();
        drop(guard);

        assert!(requests.is_empty());
        assert!(!requests.cancel(id));
        assert!(!requests.cancel(RequestId::from_raw(999)));
    }

    #[test]
    fn cancel_rendering_targets_one_attempt() {
        let requests = InFlightRequests::new();
        let attempt = Uuid::new_v4();
        let (_a, _ra) = requests.register(attempt);
        let (_b, _rb) = requests.register(attempt);
        let (other, _rc) = requests.register(Uuid::new_v4());

        assert_eq!(requests.cancel_rendering(attempt), 2);
        assert_eq!(requests.ids(), vec![other.id()]);
    }
}
