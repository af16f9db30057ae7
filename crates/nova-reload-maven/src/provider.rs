use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use nova_reload::{
    ChangeSignal, LoadContext, PartState, ProviderChange, ProviderData, Quality, ReloadError,
    ReloadProvider, ReloadRequest, Result,
};
use parking_lot::Mutex;

use crate::command::{CommandOutput, CommandRunner, Invocation, ProcessRunner};
use crate::files::{collect_build_files, is_unresolved_failure, mvn_executable, unchanged_since};
use crate::MavenReloadConfig;

pub const MAVEN_PROVIDER_ID: &str = "maven";

/// Metadata record of a Maven project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MavenData {
    files: BTreeSet<PathBuf>,
    loaded: Option<SystemTime>,
    quality: Quality,
    primed: bool,
}

impl MavenData {
    pub fn files(&self) -> &BTreeSet<PathBuf> {
        &self.files
    }

    /// When the model was last built; `None` if it never was.
    pub fn loaded(&self) -> Option<SystemTime> {
        self.loaded
    }

    pub fn quality(&self) -> Quality {
        self.quality
    }

    /// Whether a priming build downloaded everything the project needs.
    pub fn is_primed(&self) -> bool {
        self.primed
    }

    fn up_to_date(&self, files: &BTreeSet<PathBuf>) -> bool {
        &self.files == files && self.loaded.is_some_and(|loaded| unchanged_since(files, loaded))
    }
}

#[derive(Debug)]
struct Inner {
    current: Option<Arc<MavenData>>,
    trusted: bool,
    signal: Option<ChangeSignal>,
}

/// Loads Maven project metadata by running a priming build.
///
/// One provider serves one project root. Until the first reload it reports heuristic
/// ([`Quality::Fallback`]) data built from the files on disk.
pub struct MavenReloadProvider {
    root: PathBuf,
    config: MavenReloadConfig,
    runner: Arc<dyn CommandRunner>,
    inner: Mutex<Inner>,
}

impl MavenReloadProvider {
    pub fn new(root: impl Into<PathBuf>, config: MavenReloadConfig) -> Self {
        let runner = Arc::new(ProcessRunner::with_timeout(config.timeout()));
        Self::with_runner(root, config, runner)
    }

    pub fn with_runner(
        root: impl Into<PathBuf>,
        config: MavenReloadConfig,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let root = root.into();
        let current = is_maven_root(&root).then(|| {
            Arc::new(MavenData {
                files: build_files(&root, &config),
                loaded: None,
                quality: Quality::Fallback,
                primed: false,
            })
        });
        let trusted = config.trusted;
        Self {
            root,
            config,
            runner,
            inner: Mutex::new(Inner {
                current,
                trusted,
                signal: None,
            }),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &MavenReloadConfig {
        &self.config
    }

    pub fn current(&self) -> Option<Arc<MavenData>> {
        self.inner.lock().current.clone()
    }

    /// Re-collects the build files and reports the set to the engine.
    ///
    /// Call this when files were created or deleted under the project root.
    pub fn rescan(&self) -> BTreeSet<PathBuf> {
        let files = build_files(&self.root, &self.config);
        let signal = self.inner.lock().signal.clone();
        if let Some(signal) = signal {
            signal.fire(ProviderChange::files_changed(files.iter().cloned()));
        }
        files
    }

    fn is_trusted(&self, request: &ReloadRequest) -> bool {
        let mut inner = self.inner.lock();
        if request.is_grant_trust() {
            inner.trusted = true;
        }
        inner.trusted
    }

    fn publish(&self, data: Option<MavenData>) -> Option<ProviderData> {
        let data = data.map(Arc::new);
        self.inner.lock().current = data.clone();
        data.map(ProviderData::from_arc)
    }

    /// Collects the build files and checks them against `prior`, off the runtime workers.
    async fn scan(&self, prior: Option<Arc<MavenData>>) -> Result<(BTreeSet<PathBuf>, bool)> {
        let root = self.root.clone();
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || {
            let files = build_files(&root, &config);
            let up_to_date = prior.is_some_and(|prior| prior.up_to_date(&files));
            (files, up_to_date)
        })
        .await
        .map_err(|err| ReloadError::Task(err.to_string()))
    }

    async fn prime(
        &self,
        name: &str,
        request: &ReloadRequest,
        files: BTreeSet<PathBuf>,
    ) -> Result<MavenData> {
        let mut args = self.config.prime_args.clone();
        if request.is_offline() {
            args.push("-o".into());
        }
        let invocation = Invocation::new(
            &self.root,
            mvn_executable(&self.config, &self.root),
            args,
        );
        let command = invocation.to_string();
        tracing::info!(
            target = "nova.reload.maven",
            project = %name,
            command = %command,
            "running Maven priming build"
        );

        let loaded = SystemTime::now();
        let runner = Arc::clone(&self.runner);
        let output = tokio::task::spawn_blocking(move || runner.run(&invocation))
            .await
            .map_err(|err| ReloadError::Task(err.to_string()))?
            .map_err(|err| {
                ReloadError::provider_source(
                    MAVEN_PROVIDER_ID,
                    format!("failed to run `{command}`"),
                    err,
                )
            })?;

        let quality = outcome(name, &command, &output)?;
        Ok(MavenData {
            files,
            loaded: Some(loaded),
            quality,
            primed: quality == Quality::Resolved,
        })
    }
}

fn outcome(name: &str, command: &str, output: &CommandOutput) -> Result<Quality> {
    if output.success() {
        return Ok(Quality::Resolved);
    }
    let text = output.combined();
    if is_unresolved_failure(&text) {
        tracing::warn!(
            target = "nova.reload.maven",
            project = %name,
            command = %command,
            "Maven priming build could not resolve all artifacts"
        );
        return Ok(Quality::Incomplete);
    }
    tracing::warn!(
        target = "nova.reload.maven",
        project = %name,
        command = %command,
        status = %output.status,
        output = %text,
        "Maven priming build failed"
    );
    Err(ReloadError::Broken(format!(
        "Priming build of {name} failed."
    )))
}

fn is_maven_root(root: &Path) -> bool {
    root.join("pom.xml").is_file()
}

fn build_files(root: &Path, config: &MavenReloadConfig) -> BTreeSet<PathBuf> {
    let mut files = match collect_build_files(root) {
        Ok(files) => files,
        Err(err) => {
            tracing::warn!(
                target = "nova.reload.maven",
                root = %root.display(),
                error = %err,
                "failed to collect Maven build files"
            );
            BTreeSet::new()
        }
    };
    if let Some(settings) = &config.settings_file {
        if settings.is_file() {
            files.insert(settings.clone());
        }
    }
    files
}

#[async_trait]
impl ReloadProvider for MavenReloadProvider {
    fn id(&self) -> &str {
        MAVEN_PROVIDER_ID
    }

    fn current_data(&self) -> Option<ProviderData> {
        self.current().map(ProviderData::from_arc)
    }

    fn derive_state(&self, data: &ProviderData) -> PartState {
        let Some(data) = data.downcast_ref::<MavenData>() else {
            return PartState::new(Quality::None).invalid();
        };
        let state = PartState::new(data.quality).files(data.files.iter().cloned());
        match data.loaded {
            Some(loaded) => state.timestamp(loaded),
            None => state,
        }
    }

    fn accepts(&self, request: &ReloadRequest, data: &ProviderData) -> bool {
        let primed = data
            .downcast_ref::<MavenData>()
            .is_some_and(MavenData::is_primed);
        primed || request.is_offline()
    }

    fn satisfies(&self, pending: &ReloadRequest, next: &ReloadRequest) -> bool {
        // An offline reload never primes, so it cannot stand in for an online one.
        !pending.is_offline() || next.is_offline()
    }

    async fn reload(
        &self,
        request: &ReloadRequest,
        ctx: &LoadContext,
        prior: Option<ProviderData>,
    ) -> Result<Option<ProviderData>> {
        let name = ctx.project().name().to_string();
        if !is_maven_root(&self.root) {
            return Ok(self.publish(None));
        }
        let prior = prior
            .and_then(|data| data.downcast::<MavenData>())
            .or_else(|| self.current());
        let (files, up_to_date) = self.scan(prior.clone()).await?;

        if let Some(prior) = &prior {
            // An incomplete result means priming was already attempted for these files.
            let settled = prior.primed || prior.quality == Quality::Incomplete;
            if settled && !request.is_force_reload() && up_to_date {
                tracing::debug!(
                    target = "nova.reload.maven",
                    project = %name,
                    quality = %prior.quality,
                    "Maven metadata is up to date"
                );
                return Ok(self.publish(Some(MavenData::clone(prior))));
            }
        }

        if !self.is_trusted(request) {
            tracing::info!(
                target = "nova.reload.maven",
                project = %name,
                "project is not trusted; skipping Maven build"
            );
            return Ok(self.publish(Some(MavenData {
                files,
                loaded: Some(SystemTime::now()),
                quality: Quality::Untrusted,
                primed: false,
            })));
        }

        let primed = prior.as_ref().is_some_and(|prior| prior.primed);
        if !primed && request.is_offline() {
            return Err(ReloadError::Offline(format!(
                "Priming build for {name} is required, but offline operation was requested."
            )));
        }

        let data = self.prime(&name, request, files).await?;
        Ok(self.publish(Some(data)))
    }

    fn attach(&self, signal: ChangeSignal) {
        self.inner.lock().signal = Some(signal);
    }
}

impl fmt::Debug for MavenReloadProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MavenReloadProvider")
            .field("root", &self.root)
            .field("runner", &self.runner)
            .field("current", &self.current())
            .finish()
    }
}
