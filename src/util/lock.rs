//! Lock helpers that keep the pipeline running after a panic poisoned shared
//! state. Accumulators here (statistics, surface accounting, progress) stay
//! usable even if one session panicked mid-update.

use std::sync::{
    LockResult, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

use tracing::warn;

fn recover<G>(
    result: LockResult<G>,
    component: &'static str,
    op: &'static str,
    lock_kind: &'static str,
) -> G {
    result.unwrap_or_else(|poisoned| {
        warn!(
            target = "docrelay::util::lock",
            component,
            op,
            lock_kind,
            result = "poisoned_recovered",
            "Recovered from poisoned lock; state may reflect a partial update"
        );
        poisoned.into_inner()
    })
}

pub(crate) fn rw_read<'a, T>(
    lock: &'a RwLock<T>,
    component: &'static str,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    recover(lock.read(), component, op, "rwlock.read")
}

pub(crate) fn rw_write<'a, T>(
    lock: &'a RwLock<T>,
    component: &'static str,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    recover(lock.write(), component, op, "rwlock.write")
}

pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    component: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    recover(lock.lock(), component, op, "mutex.lock")
}

#[cfg(test)]
mod tests {
    use std::{panic, sync::Arc, thread};

    use super::*;

    #[test]
    fn poisoned_mutex_is_recovered() {
        let shared = Arc::new(Mutex::new(1_u32));
        let cloned = Arc::clone(&shared);
        let _ = thread::spawn(move || {
            let _guard = cloned.lock().unwrap();
            panic::panic_any("poison");
        })
        .join();

        assert!(shared.is_poisoned());
        let mut guard = mutex_lock(&shared, "test", "poisoned_mutex_is_recovered");
        *guard += 1;
        assert_eq!(*guard, 2);
    }

    #[test]
    fn rwlock_helpers_read_and_write() {
        let lock = RwLock::new(vec![1]);
        rw_write(&lock, "test", "push").push(2);
        assert_eq!(rw_read(&lock, "test", "read").len(), 2);
    }
}
