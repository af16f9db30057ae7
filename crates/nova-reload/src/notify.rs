use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::ProjectState;

struct PendingFire {
    id: u64,
    token: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

struct CoalescerInner {
    handle: tokio::runtime::Handle,
    window: Duration,
    next_id: AtomicU64,
    entries: Mutex<HashMap<u64, PendingFire>>,
}

/// Delays change notifications per project state so that a burst of degradations is reported
/// once.
///
/// Scheduling a state that already has a pending notification restarts its window.
#[derive(Clone)]
pub(crate) struct Coalescer {
    inner: Arc<CoalescerInner>,
}

impl Coalescer {
    pub(crate) fn new(handle: tokio::runtime::Handle, window: Duration) -> Self {
        Self {
            inner: Arc::new(CoalescerInner {
                handle,
                window,
                next_id: AtomicU64::new(1),
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub(crate) fn schedule(&self, state: &Arc<ProjectState>) {
        let key = state.serial();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();

        // Hold the map while spawning so the task cannot finish before its entry exists.
        let mut entries = self.inner.entries.lock();
        if let Some(previous) = entries.remove(&key) {
            previous.token.cancel();
            previous.handle.abort();
        }

        let inner = Arc::clone(&self.inner);
        let state = Arc::downgrade(state);
        let token_for_task = token.clone();
        let handle = self.inner.handle.spawn(async move {
            tokio::select! {
                _ = token_for_task.cancelled() => {}
                _ = tokio::time::sleep(inner.window) => {
                    {
                        let mut entries = inner.entries.lock();
                        if entries.get(&key).is_some_and(|current| current.id == id) {
                            entries.remove(&key);
                        }
                    }
                    if let Some(state) = state.upgrade() {
                        state.fire_change();
                    }
                }
            }
        });

        entries.insert(key, PendingFire { id, token, handle });
    }

    /// Number of notifications waiting for their window to close.
    pub(crate) fn pending(&self) -> usize {
        self.inner.entries.lock().len()
    }
}
