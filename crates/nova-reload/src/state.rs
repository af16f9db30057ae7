use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use parking_lot::Mutex;

use crate::aggregate::Aggregate;
use crate::consistency;
use crate::key::StateKey;
use crate::notify::Coalescer;
use crate::{DocumentStore, PartState, Project, ProviderData, Quality};

/// One provider's contribution to a project state.
#[derive(Debug, Clone)]
pub struct Part {
    index: usize,
    provider: String,
    data: ProviderData,
    state: PartState,
}

impl Part {
    pub(crate) fn new(
        index: usize,
        provider: impl Into<String>,
        data: ProviderData,
        state: PartState,
    ) -> Self {
        Self {
            index,
            provider: provider.into(),
            data,
            state,
        }
    }

    /// Position of the provider in [`Project::providers`].
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn data(&self) -> &ProviderData {
        &self.data
    }

    pub fn state(&self) -> &PartState {
        &self.state
    }
}

pub type ChangeListener = Arc<dyn Fn(&ProjectState) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Flags {
    valid: bool,
    consistent: bool,
    modified: BTreeSet<PathBuf>,
    listeners: Vec<(ListenerId, ChangeListener)>,
    /// Superseded states whose listeners have not been told about their successor yet.
    previous: Vec<Weak<ProjectState>>,
    /// Listeners of this state already learned that it is stale.
    stale_delivered: bool,
    /// A degradation happened that listeners have not been told about.
    undelivered: bool,
}

/// Snapshot of a project's metadata, aggregated over all contributing providers.
///
/// Everything except validity, consistency and the modified-file set is fixed when the state is
/// built. Those three only ever degrade: a state never becomes valid or consistent again.
/// Degradations are reported to change listeners after a short coalescing window.
pub struct ProjectState {
    serial: u64,
    project: Project,
    key: StateKey,
    quality: Quality,
    timestamp: Option<SystemTime>,
    loaded_files: BTreeSet<PathBuf>,
    parts: Vec<Part>,
    notifier: Coalescer,
    flags: Mutex<Flags>,
}

impl ProjectState {
    pub(crate) fn new(
        project: Project,
        parts: Vec<Part>,
        documents: &dyn DocumentStore,
        notifier: Coalescer,
    ) -> Arc<Self> {
        static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

        let aggregate = Aggregate::of(parts.iter().map(Part::state));
        let scan = consistency::scan(&aggregate.files, aggregate.timestamp, documents);
        let consistent = !aggregate.is_empty() && scan.is_clean();

        Arc::new(Self {
            serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed),
            key: StateKey::new(project.id(), &parts),
            project,
            quality: aggregate.quality,
            timestamp: aggregate.timestamp,
            loaded_files: aggregate.files,
            parts,
            notifier,
            flags: Mutex::new(Flags {
                valid: aggregate.valid,
                consistent,
                modified: scan.dirty,
                listeners: Vec::new(),
                previous: Vec::new(),
                stale_delivered: false,
                undelivered: false,
            }),
        })
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn quality(&self) -> Quality {
        self.quality
    }

    /// Oldest provider timestamp; `None` when unknown.
    pub fn timestamp(&self) -> Option<SystemTime> {
        self.timestamp
    }

    pub fn loaded_files(&self) -> &BTreeSet<PathBuf> {
        &self.loaded_files
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn part(&self, provider: &str) -> Option<&Part> {
        self.parts.iter().find(|part| part.provider == provider)
    }

    pub(crate) fn part_at(&self, index: usize) -> Option<&Part> {
        self.parts.iter().find(|part| part.index == index)
    }

    /// First service of type `T` exposed by any contributing provider.
    pub fn lookup<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.parts
            .iter()
            .find_map(|part| part.state.services.get::<T>())
    }

    pub fn is_valid(&self) -> bool {
        self.flags.lock().valid
    }

    pub fn is_consistent(&self) -> bool {
        self.flags.lock().consistent
    }

    /// Loaded files with unsaved modifications.
    pub fn modified_files(&self) -> BTreeSet<PathBuf> {
        self.flags.lock().modified.clone()
    }

    /// Registers a listener called after the state degrades.
    ///
    /// A superseded state is invalidated, so its listeners learn about it once. If the successor
    /// degrades before that notification goes out, they are called with the successor instead.
    pub fn add_change_listener(
        &self,
        listener: impl Fn(&ProjectState) + Send + Sync + 'static,
    ) -> ListenerId {
        static NEXT_LISTENER: AtomicU64 = AtomicU64::new(1);
        let id = ListenerId(NEXT_LISTENER.fetch_add(1, Ordering::Relaxed));
        self.flags.lock().listeners.push((id, Arc::new(listener)));
        id
    }

    pub fn remove_change_listener(&self, id: ListenerId) -> bool {
        let mut flags = self.flags.lock();
        let before = flags.listeners.len();
        flags.listeners.retain(|(existing, _)| *existing != id);
        flags.listeners.len() != before
    }

    pub(crate) fn serial(&self) -> u64 {
        self.serial
    }

    pub(crate) fn key(&self) -> &StateKey {
        &self.key
    }

    pub(crate) fn invalidate(self: &Arc<Self>) -> bool {
        let changed = {
            let mut flags = self.flags.lock();
            let changed = std::mem::replace(&mut flags.valid, false);
            flags.undelivered |= changed;
            changed
        };
        if changed {
            self.notifier.schedule(self);
        }
        changed
    }

    /// Marks the state inconsistent and records `modified` as unsaved files.
    pub(crate) fn mark_inconsistent(
        self: &Arc<Self>,
        modified: impl IntoIterator<Item = PathBuf>,
    ) -> bool {
        let changed = {
            let mut flags = self.flags.lock();
            let mut changed = std::mem::replace(&mut flags.consistent, false);
            for file in modified {
                changed |= flags.modified.insert(file);
            }
            flags.undelivered |= changed;
            changed
        };
        if changed {
            self.notifier.schedule(self);
        }
        changed
    }

    /// Links `old` as superseded by `self`, together with everything `old` still carried.
    pub(crate) fn supersede(&self, old: &Arc<ProjectState>) {
        if old.serial == self.serial {
            return;
        }
        let inherited = std::mem::take(&mut old.flags.lock().previous);
        let mut flags = self.flags.lock();
        flags.previous.extend(inherited);
        flags.previous.push(Arc::downgrade(old));
        flags.previous.retain(|state| state.strong_count() > 0);
    }

    /// Calls the listeners of this state, then those of superseded states not yet told.
    pub(crate) fn fire_change(&self) {
        let (own, previous) = {
            let mut flags = self.flags.lock();
            let own: Vec<_> = if std::mem::take(&mut flags.undelivered) {
                if !flags.valid {
                    flags.stale_delivered = true;
                }
                flags.listeners.iter().map(|(_, l)| l.clone()).collect()
            } else {
                Vec::new()
            };
            (own, std::mem::take(&mut flags.previous))
        };

        self.deliver(&own);

        for previous in previous.iter().filter_map(Weak::upgrade) {
            let listeners: Vec<_> = {
                let mut flags = previous.flags.lock();
                if std::mem::replace(&mut flags.stale_delivered, true) {
                    continue;
                }
                // Covers the superseded state's own pending notification.
                flags.undelivered = false;
                flags.listeners.iter().map(|(_, l)| l.clone()).collect()
            };
            self.deliver(&listeners);
        }
    }

    fn deliver(&self, listeners: &[ChangeListener]) {
        for listener in listeners {
            let result =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| listener(self)));
            if let Err(panic) = result {
                tracing::error!(
                    target = "nova.reload",
                    project = %self.project.name(),
                    panic = %panic_message(&*panic),
                    "project state listener panicked"
                );
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    payload
        .downcast_ref::<String>()
        .cloned()
        .unwrap_or_else(|| "<non-string panic payload>".to_string())
}

impl fmt::Debug for ProjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags = self.flags.lock();
        f.debug_struct("ProjectState")
            .field("project", &self.project.name())
            .field("quality", &self.quality)
            .field("timestamp", &self.timestamp)
            .field("valid", &flags.valid)
            .field("consistent", &flags.consistent)
            .field("loaded_files", &self.loaded_files)
            .field("modified", &flags.modified)
            .field("parts", &self.parts.len())
            .finish()
    }
}
