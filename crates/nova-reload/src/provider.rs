use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use async_trait::async_trait;

use crate::engine::EngineInner;
use crate::{LoadContext, ProjectId, Quality, ReloadRequest, Result};

/// Opaque, provider-owned project data.
///
/// The engine never looks inside; it hands the value back to the provider that produced it as
/// the prior data of the next reload and as input to [`ReloadProvider::derive_state`].
#[derive(Clone)]
pub struct ProviderData(Arc<dyn Any + Send + Sync>);

impl ProviderData {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self(value)
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.0).downcast::<T>().ok()
    }

    /// Returns `true` if both values are the same allocation.
    pub fn ptr_eq(&self, other: &ProviderData) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ProviderData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ProviderData")
            .field(&Arc::as_ptr(&self.0))
            .finish()
    }
}

/// Typed services a provider exposes to later providers and to callers.
#[derive(Clone, Default)]
pub struct ServiceBag {
    services: Vec<Arc<dyn Any + Send + Sync>>,
}

impl ServiceBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<T: Any + Send + Sync>(mut self, service: T) -> Self {
        self.services.push(Arc::new(service));
        self
    }

    pub fn insert<T: Any + Send + Sync>(&mut self, service: Arc<T>) {
        self.services.push(service);
    }

    /// First service of type `T`.
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.services
            .iter()
            .find_map(|service| Arc::clone(service).downcast::<T>().ok())
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }
}

impl fmt::Debug for ServiceBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBag")
            .field("len", &self.services.len())
            .finish()
    }
}

/// State record a provider derives from its data.
///
/// Two records are the same for caching purposes when quality, timestamp, files and validity
/// are equal; services are not compared.
#[derive(Debug, Clone)]
pub struct PartState {
    pub quality: Quality,
    /// When the data was produced. `None` if unknown, which counts as infinitely old.
    pub timestamp: Option<SystemTime>,
    /// Files the data was loaded from.
    pub files: BTreeSet<PathBuf>,
    pub valid: bool,
    pub services: ServiceBag,
}

impl PartState {
    pub fn new(quality: Quality) -> Self {
        Self {
            quality,
            timestamp: None,
            files: BTreeSet::new(),
            valid: true,
            services: ServiceBag::new(),
        }
    }

    pub fn timestamp(mut self, timestamp: SystemTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn files(mut self, files: impl IntoIterator<Item = PathBuf>) -> Self {
        self.files = files.into_iter().collect();
        self
    }

    pub fn invalid(mut self) -> Self {
        self.valid = false;
        self
    }

    pub fn services(mut self, services: ServiceBag) -> Self {
        self.services = services;
        self
    }
}

/// A source of project metadata for one build technology.
///
/// After a successful [`reload`](ReloadProvider::reload), [`current_data`](ReloadProvider::current_data)
/// must report the data it returned; the engine derives the cached project state from it.
#[async_trait]
pub trait ReloadProvider: Send + Sync {
    /// Stable identifier, used in logs and errors.
    fn id(&self) -> &str;

    /// The provider's latest data, or `None` if the provider does not apply to the project.
    fn current_data(&self) -> Option<ProviderData>;

    fn derive_state(&self, data: &ProviderData) -> PartState;

    /// Whether `data` already fulfils `request`. Returning `false` forces a reload even if the
    /// derived state looks good enough.
    fn accepts(&self, _request: &ReloadRequest, _data: &ProviderData) -> bool {
        true
    }

    /// Extra condition for joining an in-flight reload for `pending` instead of starting a new one.
    fn satisfies(&self, _pending: &ReloadRequest, _next: &ReloadRequest) -> bool {
        true
    }

    /// Loads fresh data.
    ///
    /// `prior` is this provider's data from an earlier pass of the same chain, or else from the
    /// state the reload started from. Returning `Ok(None)` means the provider does not apply.
    async fn reload(
        &self,
        request: &ReloadRequest,
        ctx: &LoadContext,
        prior: Option<ProviderData>,
    ) -> Result<Option<ProviderData>>;

    /// Called once when the project is opened.
    fn attach(&self, _signal: ChangeSignal) {}
}

/// What a provider observed about its data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderChange {
    pub invalidate: bool,
    pub inconsistent: bool,
    /// New file set, when it changed.
    pub files: Option<BTreeSet<PathBuf>>,
}

impl ProviderChange {
    /// The data is no longer usable; the next state request rebuilds the project state.
    pub fn invalidated() -> Self {
        Self {
            invalidate: true,
            ..Self::default()
        }
    }

    /// The data no longer matches files on disk.
    pub fn inconsistent() -> Self {
        Self {
            inconsistent: true,
            ..Self::default()
        }
    }

    pub fn files_changed(files: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            files: Some(files.into_iter().collect()),
            ..Self::default()
        }
    }
}

/// Channel from a provider back to the engine that opened its project.
///
/// The signal does not keep the engine alive; firing after the engine is gone does nothing.
#[derive(Clone)]
pub struct ChangeSignal {
    engine: Weak<EngineInner>,
    project: ProjectId,
    provider: String,
}

impl ChangeSignal {
    pub(crate) fn new(engine: Weak<EngineInner>, project: ProjectId, provider: String) -> Self {
        Self {
            engine,
            project,
            provider,
        }
    }

    pub fn project(&self) -> ProjectId {
        self.project
    }

    pub fn fire(&self, change: ProviderChange) {
        let Some(engine) = self.engine.upgrade() else {
            return;
        };
        engine.provider_changed(self.project, &self.provider, change);
    }
}

impl fmt::Debug for ChangeSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeSignal")
            .field("project", &self.project)
            .field("provider", &self.provider)
            .finish()
    }
}
