use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::ReloadProvider;

/// Stable identity of an opened project within one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProjectId(u64);

impl ProjectId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn to_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "project#{}", self.0)
    }
}

struct ProjectInner {
    id: ProjectId,
    name: String,
    root: PathBuf,
    providers: Vec<Arc<dyn ReloadProvider>>,
}

/// Handle to an opened project.
///
/// Cheap to clone. Two handles are equal if they refer to the same opened project.
#[derive(Clone)]
pub struct Project {
    inner: Arc<ProjectInner>,
}

impl Project {
    pub(crate) fn new(
        name: impl Into<String>,
        root: impl Into<PathBuf>,
        providers: Vec<Arc<dyn ReloadProvider>>,
    ) -> Self {
        Self {
            inner: Arc::new(ProjectInner {
                id: ProjectId::next(),
                name: name.into(),
                root: root.into(),
                providers,
            }),
        }
    }

    pub fn id(&self) -> ProjectId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Providers in registration order. Reload chains visit them in this order.
    pub fn providers(&self) -> &[Arc<dyn ReloadProvider>] {
        &self.inner.providers
    }

    pub fn downgrade(&self) -> WeakProject {
        WeakProject {
            id: self.inner.id,
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl PartialEq for Project {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Project {}

impl std::hash::Hash for Project {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Project {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Project")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("root", &self.inner.root)
            .field("providers", &self.inner.providers.len())
            .finish()
    }
}

/// Non-owning project handle.
#[derive(Clone)]
pub struct WeakProject {
    id: ProjectId,
    inner: Weak<ProjectInner>,
}

impl WeakProject {
    pub fn id(&self) -> ProjectId {
        self.id
    }

    pub fn upgrade(&self) -> Option<Project> {
        self.inner.upgrade().map(|inner| Project { inner })
    }
}

impl fmt::Debug for WeakProject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakProject")
            .field("id", &self.id)
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}
