use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::runtime::Runtime;
use tracing::Instrument;

use crate::cache::StateCache;
use crate::consistency;
use crate::context::ChainShared;
use crate::key::StateKey;
use crate::notify::Coalescer;
use crate::{
    ChangeSignal, DocumentStore, LoadContext, LocalDocuments, Part, Project, ProjectId,
    ProjectState, ProviderChange, ProviderData, ReloadConfig, ReloadError, ReloadProvider,
    ReloadRequest, Result,
};

/// Completion of a project reload. Cloning shares the same in-flight reload.
pub type ReloadFuture = Shared<BoxFuture<'static, Result<Project>>>;

struct PendingReload {
    id: u64,
    project: ProjectId,
    request: ReloadRequest,
    future: ReloadFuture,
}

pub(crate) struct EngineInner {
    config: ReloadConfig,
    handle: tokio::runtime::Handle,
    documents: Arc<dyn DocumentStore>,
    cache: StateCache,
    notifier: Coalescer,
    pending: Mutex<Vec<PendingReload>>,
    next_reload: AtomicU64,
}

struct OwnedRuntime(Option<Runtime>);

impl Drop for OwnedRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.0.take() {
            runtime.shutdown_background();
        }
    }
}

fn build_runtime(threads: usize) -> std::io::Result<Runtime> {
    let mut threads = threads.max(1);
    loop {
        match tokio::runtime::Builder::new_multi_thread()
            .worker_threads(threads)
            .enable_io()
            .enable_time()
            .thread_name("nova-reload")
            .build()
        {
            Ok(rt) => return Ok(rt),
            Err(_) if threads > 1 => {
                threads = 1;
            }
            Err(_) => {
                // Thread creation can be temporarily unavailable; a current-thread runtime still
                // drives timers and reload tasks.
                return tokio::runtime::Builder::new_current_thread()
                    .enable_io()
                    .enable_time()
                    .build();
            }
        }
    }
}

/// Project metadata cache and reload coordinator.
///
/// The engine owns the state cache, the change-notification coalescer and the list of in-flight
/// reloads. Cloning is cheap and shares all of them.
#[derive(Clone)]
pub struct ReloadEngine {
    inner: Arc<EngineInner>,
    _runtime: Option<Arc<OwnedRuntime>>,
}

impl ReloadEngine {
    /// Builds an engine with its own `nova-reload` runtime and local documents.
    pub fn new(config: ReloadConfig) -> std::io::Result<Self> {
        let runtime = build_runtime(config.io_threads)?;
        let handle = runtime.handle().clone();
        let documents = Arc::new(LocalDocuments::new());
        let mut engine = Self::new_with_documents(config, handle, documents);
        engine._runtime = Some(Arc::new(OwnedRuntime(Some(runtime))));
        Ok(engine)
    }

    /// Builds an engine that runs its tasks on an existing Tokio runtime.
    pub fn new_with_handle(config: ReloadConfig, handle: tokio::runtime::Handle) -> Self {
        Self::new_with_documents(config, handle, Arc::new(LocalDocuments::new()))
    }

    pub fn new_with_documents(
        config: ReloadConfig,
        handle: tokio::runtime::Handle,
        documents: Arc<dyn DocumentStore>,
    ) -> Self {
        let cache = StateCache::new(handle.clone(), config.state_ttl());
        let notifier = Coalescer::new(handle.clone(), config.coalesce_window());
        Self {
            inner: Arc::new(EngineInner {
                config,
                handle,
                documents,
                cache,
                notifier,
                pending: Mutex::new(Vec::new()),
                next_reload: AtomicU64::new(1),
            }),
            _runtime: None,
        }
    }

    pub fn config(&self) -> &ReloadConfig {
        &self.inner.config
    }

    pub fn documents(&self) -> &Arc<dyn DocumentStore> {
        &self.inner.documents
    }

    pub fn runtime_handle(&self) -> &tokio::runtime::Handle {
        &self.inner.handle
    }

    /// Opens a project backed by `providers`, in the order reloads should visit them.
    pub fn open_project(
        &self,
        name: impl Into<String>,
        root: impl Into<PathBuf>,
        providers: Vec<Arc<dyn ReloadProvider>>,
    ) -> Project {
        let project = Project::new(name, root, providers);
        for provider in project.providers() {
            provider.attach(ChangeSignal::new(
                Arc::downgrade(&self.inner),
                project.id(),
                provider.id().to_owned(),
            ));
        }
        tracing::debug!(
            target = "nova.reload",
            project = %project.name(),
            root = %project.root().display(),
            providers = project.providers().len(),
            "opened project"
        );
        project
    }

    /// Drops all cached states of `project`. In-flight reloads still complete.
    pub fn close_project(&self, project: &Project) {
        let removed = self.inner.cache.close_project(project.id());
        tracing::debug!(
            target = "nova.reload",
            project = %project.name(),
            removed,
            "closed project"
        );
    }

    /// Current state of `project`, built from the providers' current data.
    ///
    /// Never runs a provider reload. A cached state is re-checked against files on disk before it
    /// is returned.
    pub fn project_state(&self, project: &Project) -> Arc<ProjectState> {
        self.inner.project_state(project)
    }

    /// Brings `project` to the state `request` asks for.
    ///
    /// Resolves immediately when the current state already satisfies the request. Otherwise a
    /// reload chain runs in the background; a request that an in-flight reload satisfies shares
    /// that reload's future.
    pub fn request_state(&self, project: &Project, request: ReloadRequest) -> ReloadFuture {
        self.inner.request_state(project, request)
    }

    /// Re-checks the live states that loaded any of `paths`. Returns how many became inconsistent.
    pub fn files_changed<P: AsRef<Path>>(&self, paths: impl IntoIterator<Item = P>) -> usize {
        let paths: BTreeSet<PathBuf> = paths
            .into_iter()
            .map(|path| path.as_ref().to_path_buf())
            .collect();
        let mut degraded = 0;
        for state in self.inner.cache.live_states() {
            if state.loaded_files().is_disjoint(&paths) {
                continue;
            }
            let was_consistent = state.is_consistent();
            consistency::recheck(&state, &*self.inner.documents);
            if was_consistent && !state.is_consistent() {
                degraded += 1;
            }
        }
        degraded
    }

    /// Removes cache entries whose states were reclaimed.
    pub fn sweep(&self) -> usize {
        self.inner.cache.sweep()
    }

    pub fn cached_states(&self) -> usize {
        self.inner.cache.len()
    }

    pub fn pending_reloads(&self, project: &Project) -> usize {
        self.inner
            .pending
            .lock()
            .iter()
            .filter(|pending| pending.project == project.id())
            .count()
    }
}

impl std::fmt::Debug for ReloadEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReloadEngine")
            .field("config", &self.inner.config)
            .field("cached_states", &self.inner.cache.len())
            .finish()
    }
}

fn ready(result: Result<Project>) -> ReloadFuture {
    futures::future::ready(result).boxed().shared()
}

fn current_parts(project: &Project) -> Vec<Part> {
    project
        .providers()
        .iter()
        .enumerate()
        .filter_map(|(index, provider)| {
            let data = provider.current_data()?;
            let state = provider.derive_state(&data);
            Some(Part::new(index, provider.id(), data, state))
        })
        .collect()
}

/// Removes a reload from the pending list when its task ends, even by panic.
struct PendingGuard {
    inner: Arc<EngineInner>,
    id: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.inner
            .pending
            .lock()
            .retain(|pending| pending.id != self.id);
    }
}

impl EngineInner {
    fn project_state(&self, project: &Project) -> Arc<ProjectState> {
        let parts = current_parts(project);
        let key = StateKey::new(project.id(), &parts);
        if let Some(state) = self.cache.lookup(&key) {
            consistency::recheck(&state, &*self.documents);
            return state;
        }
        let state = ProjectState::new(
            project.clone(),
            parts,
            &*self.documents,
            self.notifier.clone(),
        );
        self.cache.install(state)
    }

    pub(crate) fn provider_changed(
        &self,
        project: ProjectId,
        provider: &str,
        change: ProviderChange,
    ) {
        let Some(state) = self.cache.latest(project) else {
            return;
        };
        tracing::debug!(
            target = "nova.reload",
            project = %state.project().name(),
            provider,
            invalidate = change.invalidate,
            inconsistent = change.inconsistent,
            "provider reported a change"
        );

        if change.invalidate {
            self.cache.mark_unusable(project);
            state.invalidate();
        }
        if change.inconsistent {
            state.mark_inconsistent(std::iter::empty());
        }
        if let Some(files) = change.files {
            let same = state
                .part(provider)
                .is_some_and(|part| part.state().files == files);
            if !same {
                state.mark_inconsistent(std::iter::empty());
            }
        }
    }

    fn request_state(
        self: &Arc<Self>,
        project: &Project,
        request: ReloadRequest,
    ) -> ReloadFuture {
        let state = self.project_state(project);
        if !consistency::needs_reload(&state, &request) {
            return ready(Ok(project.clone()));
        }

        let request =
            request.with_default_reason(|| format!("Reloading project {}", project.name()));

        let dirty: BTreeSet<PathBuf> = state
            .loaded_files()
            .iter()
            .filter(|file| self.documents.is_modified(file))
            .cloned()
            .collect();
        if !dirty.is_empty() && !request.is_save_modifications() {
            return ready(Err(ReloadError::out_of_sync(
                project.name(),
                format!("Project {} has {} unsaved files", project.name(), dirty.len()),
                dirty,
            )));
        }

        // Providers are asked outside the lock; two requests racing here may both start a chain.
        let in_flight: Vec<(ReloadRequest, ReloadFuture)> = self
            .pending
            .lock()
            .iter()
            .filter(|pending| pending.project == project.id())
            .map(|pending| (pending.request.clone(), pending.future.clone()))
            .collect();
        let joinable = in_flight.into_iter().find(|(pending, _)| {
            pending.satisfies(&request)
                && project
                    .providers()
                    .iter()
                    .all(|provider| provider.satisfies(pending, &request))
        });
        if let Some((_, future)) = joinable {
            tracing::debug!(
                target = "nova.reload",
                project = %project.name(),
                reason = request.reload_reason().unwrap_or_default(),
                "joining in-flight project reload"
            );
            return future;
        }

        let id = self.next_reload.fetch_add(1, Ordering::Relaxed);
        let span = tracing::info_span!(
            "project_reload",
            project = %project.name(),
            reason = request.reload_reason().unwrap_or_default(),
        );
        let task = Arc::clone(self)
            .run_reload(id, project.clone(), request.clone(), state, dirty)
            .instrument(span);
        // Held across the spawn so the task cannot remove its entry before it is pushed.
        let mut pending = self.pending.lock();
        let handle = self.handle.spawn(task);
        let future = async move {
            match handle.await {
                Ok(result) => result,
                Err(err) => Err(ReloadError::Task(err.to_string())),
            }
        }
        .boxed()
        .shared();

        pending.push(PendingReload {
            id,
            project: project.id(),
            request,
            future: future.clone(),
        });
        future
    }

    async fn run_reload(
        self: Arc<Self>,
        id: u64,
        project: Project,
        request: ReloadRequest,
        base: Arc<ProjectState>,
        dirty: BTreeSet<PathBuf>,
    ) -> Result<Project> {
        let _pending = PendingGuard {
            inner: Arc::clone(&self),
            id,
        };

        let result = async {
            if !dirty.is_empty() {
                self.save_files(&project, dirty).await?;
            }
            self.run_chain(&project, &request, &base).await
        }
        .await;

        match &result {
            Ok(state) => tracing::info!(
                target = "nova.reload",
                quality = %state.quality(),
                consistent = state.is_consistent(),
                "project reloaded"
            ),
            Err(err) => tracing::info!(
                target = "nova.reload",
                error = %err,
                "project reload failed"
            ),
        }
        result.map(|_| project)
    }

    async fn save_files(&self, project: &Project, files: BTreeSet<PathBuf>) -> Result<()> {
        let documents = Arc::clone(&self.documents);
        let name = project.name().to_owned();
        self.handle
            .spawn_blocking(move || {
                for file in &files {
                    if let Err(err) = documents.save(file) {
                        return Err(ReloadError::out_of_sync(
                            name,
                            format!("Error saving file {}: {err}", file.display()),
                            [file.clone()],
                        ));
                    }
                }
                Ok(())
            })
            .await
            .map_err(|err| ReloadError::Task(err.to_string()))?
    }

    async fn run_chain(
        &self,
        project: &Project,
        request: &ReloadRequest,
        base: &ProjectState,
    ) -> Result<Arc<ProjectState>> {
        let providers = project.providers();
        let shared = Arc::new(ChainShared::default());
        // Data each provider returned earlier in this chain; reused as prior after a restart.
        let mut returned: Vec<Option<Option<ProviderData>>> = vec![None; providers.len()];

        let parts = 'chain: loop {
            let mut parts: Vec<Part> = Vec::new();
            for (index, provider) in providers.iter().enumerate() {
                let base_part = base.part_at(index);
                let prior = match &returned[index] {
                    Some(data) => data.clone(),
                    None => base_part.map(|part| part.data().clone()),
                };
                let ctx = LoadContext::new(
                    project.clone(),
                    request.clone(),
                    base_part.map(|part| part.state().clone()),
                    parts.clone(),
                    Arc::clone(&shared),
                );

                let data = match provider.reload(request, &ctx, prior).await {
                    Ok(data) => data,
                    Err(err) => {
                        tracing::debug!(
                            target = "nova.reload",
                            provider = %provider.id(),
                            error = %err,
                            "provider reload failed"
                        );
                        return Err(err);
                    }
                };
                returned[index] = Some(data.clone());
                if let Some(data) = data {
                    let state = provider.derive_state(&data);
                    parts.push(Part::new(index, provider.id(), data, state));
                }

                if shared.take_retry() {
                    let restarts = shared.record_restart();
                    if restarts > self.config.max_chain_restarts {
                        return Err(ReloadError::Broken(format!(
                            "Project {} requested more than {} reload restarts",
                            project.name(),
                            self.config.max_chain_restarts
                        )));
                    }
                    tracing::debug!(
                        target = "nova.reload",
                        provider = %provider.id(),
                        restarts,
                        "provider requested a reload restart"
                    );
                    continue 'chain;
                }
            }
            break parts;
        };

        let candidate = ProjectState::new(
            project.clone(),
            parts,
            &*self.documents,
            self.notifier.clone(),
        );

        if candidate
            .quality()
            .is_worse_than(request.required_quality())
        {
            return Err(ReloadError::Broken(format!(
                "Project {} loaded with quality {}, {} required",
                project.name(),
                candidate.quality(),
                request.required_quality()
            )));
        }

        let raced = !candidate.is_valid()
            || (request.requires_consistency()
                && !candidate.parts().is_empty()
                && !candidate.is_consistent());
        if raced {
            let scan = consistency::scan(
                candidate.loaded_files(),
                candidate.timestamp(),
                &*self.documents,
            );
            return Err(ReloadError::out_of_sync(
                project.name(),
                format!("Project {} has been concurrently modified", project.name()),
                scan.files(),
            ));
        }

        Ok(self.cache.install(candidate))
    }
}
