use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::key::StateKey;
use crate::{ProjectId, ProjectState};

struct CacheEntry {
    state: Weak<ProjectState>,
    /// Strong reference held for the first TTL and renewed while the state is in use.
    pinned: Option<Arc<ProjectState>>,
    last_accessed: Instant,
    /// Cleared when a provider reports its data invalid; the entry is then never served again.
    usable: bool,
    serial: u64,
}

#[derive(Default)]
struct CacheMap {
    entries: HashMap<StateKey, CacheEntry>,
    latest: HashMap<ProjectId, StateKey>,
    next_serial: u64,
}

struct CacheInner {
    handle: tokio::runtime::Handle,
    ttl: Duration,
    map: Mutex<CacheMap>,
}

/// Project states by [`StateKey`].
///
/// A new entry pins its state for one TTL. Every half TTL afterwards the pin is renewed if the
/// state was accessed in the meantime and released otherwise. Entries whose state is no longer
/// referenced anywhere are removed.
#[derive(Clone)]
pub(crate) struct StateCache {
    inner: Arc<CacheInner>,
}

impl StateCache {
    pub(crate) fn new(handle: tokio::runtime::Handle, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                handle,
                ttl,
                map: Mutex::new(CacheMap::default()),
            }),
        }
    }

    /// Returns the usable, valid state cached under `key`, pinning it again.
    pub(crate) fn lookup(&self, key: &StateKey) -> Option<Arc<ProjectState>> {
        let mut map = self.inner.map.lock();
        let entry = map.entries.get_mut(key)?;
        if !entry.usable {
            return None;
        }
        let state = entry.state.upgrade()?;
        if !state.is_valid() {
            return None;
        }
        entry.last_accessed = Instant::now();
        entry.pinned = Some(Arc::clone(&state));
        Some(state)
    }

    /// The most recently installed state of `project`, if still alive.
    pub(crate) fn latest(&self, project: ProjectId) -> Option<Arc<ProjectState>> {
        let map = self.inner.map.lock();
        let key = map.latest.get(&project)?;
        map.entries.get(key)?.state.upgrade()
    }

    /// Installs `state` as the project's current state.
    ///
    /// If an equal, usable and valid state is already cached, that state is returned instead and
    /// `state` is dropped. Either way the returned state becomes the project's latest, and the
    /// state it replaces is invalidated.
    pub(crate) fn install(&self, state: Arc<ProjectState>) -> Arc<ProjectState> {
        let key = state.key().clone();
        let project = key.project();

        let (installed, previous, replaced, eviction) = {
            let mut map = self.inner.map.lock();
            let previous = map
                .latest
                .get(&project)
                .and_then(|key| map.entries.get(key))
                .and_then(|entry| entry.state.upgrade());

            let reused = map.entries.get_mut(&key).and_then(|existing| {
                let current = existing.state.upgrade()?;
                if !existing.usable || !current.is_valid() {
                    return None;
                }
                existing.last_accessed = Instant::now();
                existing.pinned = Some(Arc::clone(&current));
                Some(current)
            });

            let (installed, replaced, eviction) = match reused {
                Some(current) => (current, None, None),
                None => {
                    map.next_serial += 1;
                    let serial = map.next_serial;
                    let replaced = map.entries.insert(
                        key.clone(),
                        CacheEntry {
                            state: Arc::downgrade(&state),
                            pinned: Some(Arc::clone(&state)),
                            last_accessed: Instant::now(),
                            usable: true,
                            serial,
                        },
                    );
                    (Arc::clone(&state), replaced, Some(serial))
                }
            };
            map.latest.insert(project, key.clone());

            let previous = previous.filter(|previous| !Arc::ptr_eq(previous, &installed));
            if let Some(previous) = &previous {
                installed.supersede(previous);
            }
            (installed, previous, replaced, eviction)
        };
        drop(replaced);
        drop(state);

        if let Some(previous) = previous {
            previous.invalidate();
        }
        if let Some(serial) = eviction {
            self.spawn_eviction(key, serial);
        }
        installed
    }

    fn spawn_eviction(&self, key: StateKey, serial: u64) {
        let cache = Arc::downgrade(&self.inner);
        let ttl = self.inner.ttl;
        let half = (ttl / 2).max(Duration::from_millis(1));

        self.inner.handle.spawn(async move {
            tokio::time::sleep(ttl).await;
            loop {
                let Some(inner) = cache.upgrade() else {
                    return;
                };
                let released = {
                    let mut map = inner.map.lock();
                    let Some(entry) = map.entries.get_mut(&key) else {
                        return;
                    };
                    if entry.serial != serial {
                        return;
                    }
                    if entry.pinned.is_none() && entry.state.strong_count() == 0 {
                        map.entries.remove(&key);
                        if map.latest.get(&key.project()) == Some(&key) {
                            map.latest.remove(&key.project());
                        }
                        return;
                    }
                    if entry.last_accessed.elapsed() >= half {
                        entry.pinned.take()
                    } else {
                        None
                    }
                };
                // Dropped outside the lock: this may be the last reference to the project.
                drop(released);
                drop(inner);
                tokio::time::sleep(half).await;
            }
        });
    }

    /// Stops serving the project's current entry.
    pub(crate) fn mark_unusable(&self, project: ProjectId) {
        let mut map = self.inner.map.lock();
        let Some(key) = map.latest.get(&project).cloned() else {
            return;
        };
        if let Some(entry) = map.entries.get_mut(&key) {
            entry.usable = false;
        }
    }

    /// Forgets every entry of `project`.
    pub(crate) fn close_project(&self, project: ProjectId) -> usize {
        let removed: Vec<CacheEntry> = {
            let mut map = self.inner.map.lock();
            map.latest.remove(&project);
            let keys: Vec<StateKey> = map
                .entries
                .keys()
                .filter(|key| key.project() == project)
                .cloned()
                .collect();
            keys.iter()
                .filter_map(|key| map.entries.remove(key))
                .collect()
        };
        removed.len()
    }

    /// Live states, most useful for file events.
    pub(crate) fn live_states(&self) -> Vec<Arc<ProjectState>> {
        self.inner
            .map
            .lock()
            .entries
            .values()
            .filter_map(|entry| entry.state.upgrade())
            .collect()
    }

    /// Drops entries whose states are gone. Returns how many were removed.
    pub(crate) fn sweep(&self) -> usize {
        let mut map = self.inner.map.lock();
        let dead: Vec<StateKey> = map
            .entries
            .iter()
            .filter(|(_, entry)| entry.state.strong_count() == 0)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &dead {
            map.entries.remove(key);
            if map.latest.get(&key.project()) == Some(key) {
                map.latest.remove(&key.project());
            }
        }
        dead.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.map.lock().entries.len()
    }
}
