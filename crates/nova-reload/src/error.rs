use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Failure of a project state request.
///
/// Errors are delivered through the request's future only; they never trigger change
/// listeners on cached states. The type is `Clone` because one in-flight reload may be
/// awaited by several callers.
#[derive(Debug, Clone, Error)]
pub enum ReloadError {
    /// Unsaved or concurrently modified files prevent a safe reload.
    #[error("{message}")]
    OutOfSync {
        project: String,
        message: String,
        files: BTreeSet<PathBuf>,
    },

    /// Network access is required but the request is offline-only.
    #[error("{0}")]
    Offline(String),

    /// The project metadata is unusable.
    #[error("{0}")]
    Broken(String),

    /// The project has not been primed (e.g. a required priming build never ran).
    #[error("{0}")]
    Uninitialized(String),

    #[error("{provider}: {message}")]
    Provider {
        provider: String,
        message: String,
        #[source]
        source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    },

    /// The reload task panicked or was torn down with its runtime.
    #[error("project reload task failed: {0}")]
    Task(String),
}

impl ReloadError {
    pub fn out_of_sync(
        project: impl Into<String>,
        message: impl Into<String>,
        files: impl IntoIterator<Item = PathBuf>,
    ) -> Self {
        Self::OutOfSync {
            project: project.into(),
            message: message.into(),
            files: files.into_iter().collect(),
        }
    }

    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn provider_source(
        provider: impl Into<String>,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    /// Files reported by an [`ReloadError::OutOfSync`] error.
    pub fn files(&self) -> Option<&BTreeSet<PathBuf>> {
        match self {
            Self::OutOfSync { files, .. } => Some(files),
            _ => None,
        }
    }

    pub fn is_out_of_sync(&self) -> bool {
        matches!(self, Self::OutOfSync { .. })
    }

    pub fn is_offline(&self) -> bool {
        matches!(self, Self::Offline(_))
    }
}

pub type Result<T> = std::result::Result<T, ReloadError>;
