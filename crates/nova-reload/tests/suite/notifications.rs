use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use nova_reload::{ProjectState, ProviderChange, Quality, ReloadError, ReloadRequest};

use super::support::{
    an_hour_ago, dyn_providers, engine, fast_config, set_mtime, write_file, EventLog,
    ScriptedProvider, Step,
};

fn counter(state: &ProjectState) -> Arc<AtomicUsize> {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    state.add_change_listener(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    calls
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(200)).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn burst_of_degradations_is_reported_once() {
    let dir = tempfile::tempdir().unwrap();
    let maven = Arc::new(
        ScriptedProvider::new("maven", Vec::new(), EventLog::default())
            .with_current(Quality::Resolved, SystemTime::now()),
    );
    let engine = engine(fast_config());
    let project = engine.open_project("demo", dir.path(), dyn_providers(&[&maven]));

    let state = engine.project_state(&project);
    let calls = counter(&state);

    maven.fire(ProviderChange::inconsistent());
    maven.fire(ProviderChange::invalidated());
    settle().await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!state.is_valid());
    assert!(!state.is_consistent());
}

#[tokio::test(flavor = "multi_thread")]
async fn repeated_degradation_is_not_reported_again() {
    let dir = tempfile::tempdir().unwrap();
    let maven = Arc::new(
        ScriptedProvider::new("maven", Vec::new(), EventLog::default())
            .with_current(Quality::Resolved, SystemTime::now()),
    );
    let engine = engine(fast_config());
    let project = engine.open_project("demo", dir.path(), dyn_providers(&[&maven]));

    let state = engine.project_state(&project);
    let calls = counter(&state);

    maven.fire(ProviderChange::inconsistent());
    settle().await;
    maven.fire(ProviderChange::inconsistent());
    settle().await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn superseded_state_listeners_are_told_once() {
    let dir = tempfile::tempdir().unwrap();
    let maven = Arc::new(
        ScriptedProvider::new("maven", Vec::new(), EventLog::default())
            .with_current(Quality::Simple, SystemTime::now()),
    );
    let engine = engine(fast_config());
    let project = engine.open_project("demo", dir.path(), dyn_providers(&[&maven]));

    let old = engine.project_state(&project);
    let old_calls = counter(&old);

    engine
        .request_state(&project, ReloadRequest::refresh().min_quality(Quality::Resolved))
        .await
        .unwrap();
    let new = engine.project_state(&project);
    assert!(!Arc::ptr_eq(&old, &new));
    assert_eq!(new.quality(), Quality::Resolved);
    assert!(new.is_valid());
    let new_calls = counter(&new);

    // The newer load alone makes the old snapshot stale.
    settle().await;
    assert!(!old.is_valid());
    assert_eq!(old_calls.load(Ordering::SeqCst), 1);
    assert_eq!(new_calls.load(Ordering::SeqCst), 0);

    maven.fire(ProviderChange::inconsistent());
    settle().await;
    assert_eq!(new_calls.load(Ordering::SeqCst), 1);
    assert_eq!(old_calls.load(Ordering::SeqCst), 1);

    maven.fire(ProviderChange::invalidated());
    settle().await;
    assert_eq!(new_calls.load(Ordering::SeqCst), 2);
    assert_eq!(old_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn successor_degrading_early_tells_old_listeners_once() {
    let dir = tempfile::tempdir().unwrap();
    let maven = Arc::new(
        ScriptedProvider::new("maven", Vec::new(), EventLog::default())
            .with_current(Quality::Simple, SystemTime::now()),
    );
    let engine = engine(fast_config());
    let project = engine.open_project("demo", dir.path(), dyn_providers(&[&maven]));

    let old = engine.project_state(&project);
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let record = seen.clone();
    old.add_change_listener(move |state| {
        record.lock().unwrap().push(state.quality());
    });

    engine
        .request_state(&project, ReloadRequest::refresh().min_quality(Quality::Resolved))
        .await
        .unwrap();
    // Within the coalescing window of the old state's own notification.
    maven.fire(ProviderChange::inconsistent());
    settle().await;

    assert_eq!(seen.lock().unwrap().len(), 1);
    assert!(!old.is_valid());
}

#[tokio::test(flavor = "multi_thread")]
async fn invalidated_state_is_rebuilt_on_next_access() {
    let dir = tempfile::tempdir().unwrap();
    let maven = Arc::new(
        ScriptedProvider::new("maven", Vec::new(), EventLog::default())
            .with_current(Quality::Resolved, SystemTime::now()),
    );
    let engine = engine(fast_config());
    let project = engine.open_project("demo", dir.path(), dyn_providers(&[&maven]));

    let state = engine.project_state(&project);
    maven.fire(ProviderChange::invalidated());
    assert!(!state.is_valid());

    let rebuilt = engine.project_state(&project);
    assert!(!Arc::ptr_eq(&state, &rebuilt));
    assert!(rebuilt.is_valid());
}

#[tokio::test(flavor = "multi_thread")]
async fn changed_file_set_makes_state_inconsistent() {
    let dir = tempfile::tempdir().unwrap();
    let maven = Arc::new(
        ScriptedProvider::new("maven", Vec::new(), EventLog::default())
            .with_current(Quality::Resolved, SystemTime::now()),
    );
    let engine = engine(fast_config());
    let project = engine.open_project("demo", dir.path(), dyn_providers(&[&maven]));

    let state = engine.project_state(&project);
    maven.fire(ProviderChange::files_changed(Vec::new()));
    assert!(state.is_consistent());

    maven.fire(ProviderChange::files_changed([dir.path().join("child/pom.xml")]));
    assert!(!state.is_consistent());
}

#[tokio::test(flavor = "multi_thread")]
async fn file_events_recheck_states_that_loaded_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let pom = dir.path().join("pom.xml");
    let other = dir.path().join("README.md");
    write_file(&pom, "<project/>", an_hour_ago());
    write_file(&other, "docs", an_hour_ago());

    let loaded = SystemTime::now() - Duration::from_secs(60);
    let maven = Arc::new(
        ScriptedProvider::new("maven", vec![pom.clone()], EventLog::default())
            .with_current(Quality::Resolved, loaded),
    );
    let engine = engine(fast_config());
    let project = engine.open_project("demo", dir.path(), dyn_providers(&[&maven]));

    let state = engine.project_state(&project);
    let calls = counter(&state);

    set_mtime(&other, SystemTime::now());
    assert_eq!(engine.files_changed([&other]), 0);

    set_mtime(&pom, SystemTime::now());
    assert_eq!(engine.files_changed([&pom]), 1);
    settle().await;

    assert!(!state.is_consistent());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_reload_does_not_notify_listeners() {
    let dir = tempfile::tempdir().unwrap();
    let maven = Arc::new(
        ScriptedProvider::new("maven", Vec::new(), EventLog::default())
            .with_current(Quality::Simple, SystemTime::now()),
    );
    maven.script([Step::Fail(ReloadError::Broken("bad pom".into()))]);
    let engine = engine(fast_config());
    let project = engine.open_project("demo", dir.path(), dyn_providers(&[&maven]));

    let state = engine.project_state(&project);
    let calls = counter(&state);

    let err = engine
        .request_state(&project, ReloadRequest::reload())
        .await
        .unwrap_err();
    assert!(matches!(err, ReloadError::Broken(_)), "{err:?}");
    settle().await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(state.is_valid());
    assert!(Arc::ptr_eq(&state, &engine.project_state(&project)));
}
