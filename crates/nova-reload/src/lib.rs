//! Project metadata reload and consistency cache.
//!
//! A [`ReloadEngine`] tracks how trustworthy and how fresh the build metadata of each opened
//! [`Project`] is. Metadata comes from one or more [`ReloadProvider`]s (one per build
//! technology); the engine folds their records into a [`ProjectState`] snapshot, caches snapshots
//! by value, and coordinates asynchronous reloads so that concurrent callers share one reload
//! chain.
//!
//! ```no_run
//! # async fn demo(engine: nova_reload::ReloadEngine, project: nova_reload::Project) {
//! use nova_reload::{Quality, ReloadRequest};
//!
//! let request = ReloadRequest::refresh().min_quality(Quality::Resolved);
//! match engine.request_state(&project, request).await {
//!     Ok(project) => {
//!         let state = engine.project_state(&project);
//!         println!("{} loaded at {}", project.name(), state.quality());
//!     }
//!     Err(err) => eprintln!("reload failed: {err}"),
//! }
//! # }
//! ```

mod aggregate;
mod cache;
mod config;
pub mod consistency;
mod context;
mod documents;
mod engine;
mod error;
mod key;
mod notify;
mod project;
mod provider;
mod quality;
mod request;
mod state;

pub use aggregate::Aggregate;
pub use config::{init_tracing, json_schema, ConfigError, LoggingConfig, ReloadConfig};
pub use context::LoadContext;
pub use documents::{DocumentStore, LocalDocuments};
pub use engine::{ReloadEngine, ReloadFuture};
pub use error::{ReloadError, Result};
pub use project::{Project, ProjectId, WeakProject};
pub use provider::{
    ChangeSignal, PartState, ProviderChange, ProviderData, ReloadProvider, ServiceBag,
};
pub use quality::Quality;
pub use request::ReloadRequest;
pub use state::{ChangeListener, ListenerId, Part, ProjectState};
