use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::SystemTime;

use crate::{Part, PartState, ProjectId, Quality};

/// Cache identity of a project state: the project plus the value of every provider record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct StateKey {
    project: ProjectId,
    parts: Vec<PartKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PartKey {
    provider: String,
    quality: Quality,
    timestamp: Option<SystemTime>,
    files: BTreeSet<PathBuf>,
    valid: bool,
}

impl PartKey {
    fn new(provider: &str, state: &PartState) -> Self {
        Self {
            provider: provider.to_owned(),
            quality: state.quality,
            timestamp: state.timestamp,
            files: state.files.clone(),
            valid: state.valid,
        }
    }
}

impl StateKey {
    pub(crate) fn new(project: ProjectId, parts: &[Part]) -> Self {
        Self {
            project,
            parts: parts
                .iter()
                .map(|part| PartKey::new(part.provider(), part.state()))
                .collect(),
        }
    }

    pub(crate) fn project(&self) -> ProjectId {
        self.project
    }
}
