//! Maven metadata provider for the Nova reload engine.
//!
//! [`MavenReloadProvider`] tracks a project's `pom.xml` files and Maven settings. It reports
//! [`nova_reload::Quality::Resolved`] data once a priming build has downloaded everything the
//! project needs. Builds run through a [`CommandRunner`] so tests can script them.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use nova_reload::{ReloadConfig, ReloadEngine, ReloadProvider, ReloadRequest};
//! use nova_reload_maven::{MavenReloadConfig, MavenReloadProvider};
//!
//! # async fn demo() -> std::io::Result<()> {
//! let engine = ReloadEngine::new(ReloadConfig::default())?;
//! let maven = Arc::new(MavenReloadProvider::new("/work/app", MavenReloadConfig::default()));
//! let project = engine.open_project("app", "/work/app", vec![maven as Arc<dyn ReloadProvider>]);
//! let result = engine
//!     .request_state(&project, ReloadRequest::refresh().grant_trust())
//!     .await;
//! # let _ = result;
//! # Ok(())
//! # }
//! ```

mod command;
mod config;
mod files;
mod provider;

pub use command::{CommandOutput, CommandRunner, Invocation, ProcessRunner};
pub use config::MavenReloadConfig;
pub use files::{collect_build_files, mvn_executable};
pub use provider::{MavenData, MavenReloadProvider, MAVEN_PROVIDER_ID};
