//! Consistency of loaded metadata with files on disk and in editors.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use crate::{DocumentStore, ProjectState, Quality, ReloadRequest};

/// Result of comparing loaded files against a load timestamp.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scan {
    /// Files with unsaved editor modifications.
    pub dirty: BTreeSet<PathBuf>,
    /// Files written after the load timestamp, or missing on disk.
    pub changed: BTreeSet<PathBuf>,
}

impl Scan {
    pub fn is_clean(&self) -> bool {
        self.dirty.is_empty() && self.changed.is_empty()
    }

    pub fn files(&self) -> BTreeSet<PathBuf> {
        self.dirty.union(&self.changed).cloned().collect()
    }
}

/// Checks every file; dirty files do not short-circuit the timestamp comparison.
///
/// An unknown `timestamp` is older than any file.
pub fn scan<'a>(
    files: impl IntoIterator<Item = &'a PathBuf>,
    timestamp: Option<SystemTime>,
    documents: &dyn DocumentStore,
) -> Scan {
    let mut result = Scan::default();
    for file in files {
        if documents.is_modified(file) {
            result.dirty.insert(file.clone());
        }
        let newer = match (documents.last_modified(file), timestamp) {
            (None, _) => true,
            (Some(_), None) => true,
            (Some(modified), Some(loaded)) => modified > loaded,
        };
        if newer {
            result.changed.insert(file.clone());
        }
    }
    result
}

/// Re-runs the scan for a live state and degrades it when anything changed.
pub(crate) fn recheck(state: &Arc<ProjectState>, documents: &dyn DocumentStore) -> Scan {
    let result = scan(state.loaded_files(), state.timestamp(), documents);
    if !result.is_clean() {
        tracing::debug!(
            target = "nova.reload",
            project = %state.project().name(),
            dirty = result.dirty.len(),
            changed = result.changed.len(),
            "project state is out of date"
        );
        state.mark_inconsistent(result.dirty.iter().cloned());
    }
    result
}

/// Returns `true` if `state` cannot serve `request` without running providers.
pub fn needs_reload(state: &ProjectState, request: &ReloadRequest) -> bool {
    if !state.is_valid() || request.is_force_reload() {
        return true;
    }
    if request.required_quality() == Quality::None {
        return false;
    }
    if request.requires_consistency() && !state.is_consistent() {
        return true;
    }
    if state.quality().is_worse_than(request.required_quality()) {
        return true;
    }

    let providers = state.project().providers();
    state.parts().iter().any(|part| {
        providers
            .get(part.index())
            .is_some_and(|provider| !provider.accepts(request, part.data()))
    })
}
