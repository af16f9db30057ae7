use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::aggregate::Aggregate;
use crate::{Part, PartState, Project, ReloadRequest};

/// State shared by all provider calls of one reload chain, across restarts.
#[derive(Default)]
pub(crate) struct ChainShared {
    memo: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
    retry: AtomicBool,
    restarts: AtomicU32,
}

impl ChainShared {
    /// Consumes a pending restart request.
    pub(crate) fn take_retry(&self) -> bool {
        self.retry.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn record_restart(&self) -> u32 {
        self.restarts.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// What a provider sees of the reload chain it runs in.
pub struct LoadContext {
    project: Project,
    request: ReloadRequest,
    last_state: Option<PartState>,
    partial: Vec<Part>,
    shared: Arc<ChainShared>,
}

impl LoadContext {
    pub(crate) fn new(
        project: Project,
        request: ReloadRequest,
        last_state: Option<PartState>,
        partial: Vec<Part>,
        shared: Arc<ChainShared>,
    ) -> Self {
        Self {
            project,
            request,
            last_state,
            partial,
            shared,
        }
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn request(&self) -> &ReloadRequest {
        &self.request
    }

    /// The provider's record in the state the reload started from.
    pub fn last_state(&self) -> Option<&PartState> {
        self.last_state.as_ref()
    }

    /// Aggregate over the providers that already completed in this pass.
    pub fn partial_state(&self) -> Aggregate {
        Aggregate::of(self.partial.iter().map(Part::state))
    }

    pub fn partial_parts(&self) -> &[Part] {
        &self.partial
    }

    /// First service of type `T` exposed by an earlier provider of this pass.
    pub fn lookup<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.partial
            .iter()
            .find_map(|part| part.state().services.get::<T>())
    }

    /// Per-type value that survives chain restarts.
    ///
    /// The first call for `T` runs `init`; later calls, including those after
    /// [`retry_reload`](Self::retry_reload), return the same value.
    pub fn memento<T, F>(&self, init: F) -> Arc<T>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        let existing = self.shared.memo.lock().get(&TypeId::of::<T>()).cloned();
        if let Some(value) = existing.and_then(|value| value.downcast::<T>().ok()) {
            return value;
        }

        // `init` runs unlocked and may itself ask for other mementos.
        let fresh = Arc::new(init());
        let stored = Arc::clone(
            self.shared
                .memo
                .lock()
                .entry(TypeId::of::<T>())
                .or_insert_with(|| fresh.clone()),
        );
        // A racing call may have stored its value first; that one wins.
        stored.downcast::<T>().unwrap_or(fresh)
    }

    /// Restarts the whole chain from the first provider once the current provider returns.
    pub fn retry_reload(&self) {
        self.shared.retry.store(true, Ordering::Release);
    }

    /// Restarts performed so far in this chain.
    pub fn restarts(&self) -> u32 {
        self.shared.restarts.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for LoadContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadContext")
            .field("project", &self.project.name())
            .field("request", &self.request)
            .field("partial", &self.partial.len())
            .field("restarts", &self.restarts())
            .finish()
    }
}
