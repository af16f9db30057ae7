use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use futures::future::Shared;
use nova_reload::{
    LoadContext, PartState, ProviderData, Quality, ReloadEngine, ReloadProvider, ReloadRequest,
    Result, WeakProject,
};

use super::support::{dyn_providers, engine, fast_config, EventLog, ScriptedProvider};

#[tokio::test(flavor = "multi_thread")]
async fn weaker_request_joins_stronger_in_flight_reload() {
    let dir = tempfile::tempdir().unwrap();
    let maven = Arc::new(
        ScriptedProvider::new("maven", Vec::new(), EventLog::default())
            .with_delay(Duration::from_millis(200)),
    );
    let engine = engine(fast_config());
    let project = engine.open_project("demo", dir.path(), dyn_providers(&[&maven]));

    let strong = engine.request_state(
        &project,
        ReloadRequest::reload().min_quality(Quality::Resolved),
    );
    let weak = engine.request_state(&project, ReloadRequest::refresh());
    assert!(Shared::ptr_eq(&strong, &weak));
    assert_eq!(engine.pending_reloads(&project), 1);

    let (strong, weak) = tokio::join!(strong, weak);
    assert_eq!(strong.unwrap(), project);
    assert_eq!(weak.unwrap(), project);
    assert_eq!(maven.reloads(), 1);
    assert_eq!(engine.pending_reloads(&project), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn stronger_request_starts_its_own_reload() {
    let dir = tempfile::tempdir().unwrap();
    let maven = Arc::new(
        ScriptedProvider::new("maven", Vec::new(), EventLog::default())
            .with_delay(Duration::from_millis(200)),
    );
    let engine = engine(fast_config());
    let project = engine.open_project("demo", dir.path(), dyn_providers(&[&maven]));

    let weak = engine.request_state(&project, ReloadRequest::refresh());
    let strong = engine.request_state(&project, ReloadRequest::reload());
    assert!(!Shared::ptr_eq(&strong, &weak));
    assert_eq!(engine.pending_reloads(&project), 2);

    let (weak, strong) = tokio::join!(weak, strong);
    weak.unwrap();
    strong.unwrap();
    assert_eq!(maven.reloads(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn offline_reload_is_not_shared_with_online_request() {
    let dir = tempfile::tempdir().unwrap();
    let maven = Arc::new(
        ScriptedProvider::new("maven", Vec::new(), EventLog::default())
            .with_delay(Duration::from_millis(100)),
    );
    let engine = engine(fast_config());
    let project = engine.open_project("demo", dir.path(), dyn_providers(&[&maven]));

    let offline = engine.request_state(&project, ReloadRequest::refresh().offline());
    let online = engine.request_state(&project, ReloadRequest::refresh());
    assert!(!Shared::ptr_eq(&offline, &online));

    let (offline, online) = tokio::join!(offline, online);
    offline.unwrap();
    online.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn satisfied_request_resolves_without_reload() {
    let dir = tempfile::tempdir().unwrap();
    let maven = Arc::new(ScriptedProvider::new(
        "maven",
        Vec::new(),
        EventLog::default(),
    ));
    let engine = engine(fast_config());
    let project = engine.open_project("demo", dir.path(), dyn_providers(&[&maven]));

    engine
        .request_state(&project, ReloadRequest::refresh())
        .await
        .unwrap();
    assert_eq!(maven.reloads(), 1);

    engine
        .request_state(&project, ReloadRequest::refresh().min_quality(Quality::Resolved))
        .await
        .unwrap();
    engine
        .request_state(&project, ReloadRequest::load().min_quality(Quality::None))
        .await
        .unwrap();
    assert_eq!(maven.reloads(), 1);
    assert_eq!(engine.pending_reloads(&project), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn rejecting_provider_forces_reload() {
    let dir = tempfile::tempdir().unwrap();
    let maven = Arc::new(ScriptedProvider::new(
        "maven",
        Vec::new(),
        EventLog::default(),
    ));
    let engine = engine(fast_config());
    let project = engine.open_project("demo", dir.path(), dyn_providers(&[&maven]));

    engine
        .request_state(&project, ReloadRequest::load())
        .await
        .unwrap();
    maven.set_accepts(false);
    engine
        .request_state(&project, ReloadRequest::load())
        .await
        .unwrap();
    assert_eq!(maven.reloads(), 2);
}

/// Looks at the engine's pending reloads while deciding whether to join one.
#[derive(Default)]
struct Introspecting {
    engine: OnceLock<Weak<ReloadEngine>>,
    project: OnceLock<WeakProject>,
    seen_pending: Mutex<Vec<usize>>,
}

#[async_trait]
impl ReloadProvider for Introspecting {
    fn id(&self) -> &str {
        "introspecting"
    }

    fn current_data(&self) -> Option<ProviderData> {
        None
    }

    fn derive_state(&self, _data: &ProviderData) -> PartState {
        PartState::new(Quality::Resolved).timestamp(SystemTime::now())
    }

    fn satisfies(&self, _pending: &ReloadRequest, _next: &ReloadRequest) -> bool {
        let engine = self.engine.get().and_then(Weak::upgrade);
        let project = self.project.get().and_then(WeakProject::upgrade);
        if let (Some(engine), Some(project)) = (engine, project) {
            let pending = engine.pending_reloads(&project);
            self.seen_pending.lock().unwrap().push(pending);
        }
        true
    }

    async fn reload(
        &self,
        _request: &ReloadRequest,
        _ctx: &LoadContext,
        _prior: Option<ProviderData>,
    ) -> Result<Option<ProviderData>> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(Some(ProviderData::new(())))
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn provider_may_call_into_engine_while_joining() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(Introspecting::default());
    let engine = Arc::new(engine(fast_config()));
    let project = engine.open_project(
        "demo",
        dir.path(),
        vec![provider.clone() as Arc<dyn ReloadProvider>],
    );
    assert!(provider.engine.set(Arc::downgrade(&engine)).is_ok());
    assert!(provider.project.set(project.downgrade()).is_ok());

    let first = engine.request_state(&project, ReloadRequest::refresh());
    let second = engine.request_state(&project, ReloadRequest::refresh());
    assert!(Shared::ptr_eq(&first, &second));
    assert_eq!(*provider.seen_pending.lock().unwrap(), vec![1]);

    let (first, second) = tokio::join!(first, second);
    first.unwrap();
    second.unwrap();
    assert_eq!(engine.pending_reloads(&project), 0);
}
