use std::sync::Arc;
use std::time::{Duration, SystemTime};

use nova_reload::{Quality, ReloadConfig, ReloadEngine, ReloadRequest};

use super::support::{dyn_providers, engine, fast_config, EventLog, ScriptedProvider};

fn short_ttl() -> ReloadConfig {
    ReloadConfig {
        state_ttl_ms: 100,
        coalesce_ms: 20,
        ..ReloadConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn equal_provider_records_share_one_state() {
    let dir = tempfile::tempdir().unwrap();
    let maven = Arc::new(
        ScriptedProvider::new("maven", Vec::new(), EventLog::default())
            .with_current(Quality::Resolved, SystemTime::UNIX_EPOCH),
    );
    let engine = engine(fast_config());
    let project = engine.open_project("demo", dir.path(), dyn_providers(&[&maven]));

    // Every call hands out a fresh data object with equal contents.
    let first = engine.project_state(&project);
    let second = engine.project_state(&project);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(engine.cached_states(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn reloaded_state_is_served_from_cache() {
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
    let state = engine.project_state(&project);
    assert_eq!(state.quality(), Quality::Resolved);
    assert!(Arc::ptr_eq(&state, &engine.project_state(&project)));
}

#[tokio::test(flavor = "multi_thread")]
async fn unused_state_is_released_after_ttl() {
    let dir = tempfile::tempdir().unwrap();
    let maven = Arc::new(
        ScriptedProvider::new("maven", Vec::new(), EventLog::default())
            .with_current(Quality::Resolved, SystemTime::now()),
    );
    let engine = engine(short_ttl());
    let project = engine.open_project("demo", dir.path(), dyn_providers(&[&maven]));

    let state = engine.project_state(&project);
    let weak = Arc::downgrade(&state);
    drop(state);

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(weak.upgrade().is_some(), "state is pinned for one TTL");

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(weak.upgrade().is_none());
    assert_eq!(engine.cached_states(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn held_state_stays_cached() {
    let dir = tempfile::tempdir().unwrap();
    let maven = Arc::new(
        ScriptedProvider::new("maven", Vec::new(), EventLog::default())
            .with_current(Quality::Resolved, SystemTime::now()),
    );
    let engine = engine(short_ttl());
    let project = engine.open_project("demo", dir.path(), dyn_providers(&[&maven]));

    let state = engine.project_state(&project);
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(engine.sweep(), 0);
    assert_eq!(engine.cached_states(), 1);
    assert!(Arc::ptr_eq(&state, &engine.project_state(&project)));
}

#[tokio::test(flavor = "multi_thread")]
async fn closed_project_can_be_reclaimed() {
    let dir = tempfile::tempdir().unwrap();
    let maven = Arc::new(ScriptedProvider::new(
        "maven",
        Vec::new(),
        EventLog::default(),
    ));
    let engine = engine(fast_config());
    let project = engine.open_project("demo", dir.path(), dyn_providers(&[&maven]));
    let weak = project.downgrade();

    engine
        .request_state(&project, ReloadRequest::refresh())
        .await
        .unwrap();
    assert!(engine.cached_states() > 0);

    engine.close_project(&project);
    drop(project);

    assert_eq!(engine.cached_states(), 0);
    assert!(weak.upgrade().is_none());
}

#[test]
fn engine_with_own_runtime_reloads() {
    let dir = tempfile::tempdir().unwrap();
    let maven = Arc::new(ScriptedProvider::new(
        "maven",
        Vec::new(),
        EventLog::default(),
    ));
    let engine = ReloadEngine::new(fast_config()).unwrap();
    let project = engine.open_project("demo", dir.path(), dyn_providers(&[&maven]));

    let result =
        futures::executor::block_on(engine.request_state(&project, ReloadRequest::refresh()));
    assert_eq!(result.unwrap(), project);
    assert_eq!(engine.project_state(&project).quality(), Quality::Resolved);
}
