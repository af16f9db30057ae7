use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt, TestWriter};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        Self::Toml(value.message().to_owned())
    }
}

/// Tuning knobs of a [`crate::ReloadEngine`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[schemars(deny_unknown_fields)]
pub struct ReloadConfig {
    /// How long a freshly built project state stays pinned in the cache (in milliseconds).
    ///
    /// The pin is re-checked every half TTL and released once the state has not been accessed
    /// for half a TTL. Unpinned states stay cached while anyone still holds them.
    #[serde(default = "ReloadConfig::default_state_ttl_ms")]
    #[schemars(range(min = 1))]
    pub state_ttl_ms: u64,

    /// Window used to coalesce state degradations into one listener notification (in milliseconds).
    #[serde(default = "ReloadConfig::default_coalesce_ms")]
    pub coalesce_ms: u64,

    /// Upper bound on provider-requested restarts of a single reload chain.
    #[serde(default = "ReloadConfig::default_max_chain_restarts")]
    pub max_chain_restarts: u32,

    /// Worker threads of the engine-owned runtime. Ignored when the engine reuses a runtime.
    #[serde(default = "ReloadConfig::default_io_threads")]
    #[schemars(range(min = 1))]
    pub io_threads: usize,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ReloadConfig {
    fn default_state_ttl_ms() -> u64 {
        20_000
    }

    fn default_coalesce_ms() -> u64 {
        100
    }

    fn default_max_chain_restarts() -> u32 {
        8
    }

    fn default_io_threads() -> usize {
        1
    }

    pub fn state_ttl(&self) -> Duration {
        Duration::from_millis(self.state_ttl_ms.max(1))
    }

    pub fn coalesce_window(&self) -> Duration {
        Duration::from_millis(self.coalesce_ms)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::load_from_str(&text)
    }

    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        let config: ReloadConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.state_ttl_ms == 0 {
            return Err(ConfigError::Invalid("state_ttl_ms must be at least 1".into()));
        }
        if self.io_threads == 0 {
            return Err(ConfigError::Invalid("io_threads must be at least 1".into()));
        }
        Ok(())
    }
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            state_ttl_ms: Self::default_state_ttl_ms(),
            coalesce_ms: Self::default_coalesce_ms(),
            max_chain_restarts: Self::default_max_chain_restarts(),
            io_threads: Self::default_io_threads(),
            logging: LoggingConfig::default(),
        }
    }
}

/// JSON schema of [`ReloadConfig`], for editor integration.
pub fn json_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(ReloadConfig)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[schemars(deny_unknown_fields)]
pub struct LoggingConfig {
    /// A simple level (`info`, `debug`, ...) or a full `EnvFilter` directive string.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Emit logs in JSON format.
    #[serde(default)]
    pub json: bool,

    /// Mirror logs to stderr.
    #[serde(default = "LoggingConfig::default_stderr")]
    pub stderr: bool,

    /// Append logs to the given file path. If the file cannot be opened, file logging is
    /// disabled while other sinks remain active.
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    fn default_stderr() -> bool {
        true
    }

    /// Effective filter; `RUST_LOG` directives are appended to `level` when set.
    pub fn env_filter(&self) -> EnvFilter {
        self.filter_with(std::env::var("RUST_LOG").ok().as_deref())
    }

    /// Falls back to `info` when the combined directives do not parse.
    fn filter_with(&self, rust_log: Option<&str>) -> EnvFilter {
        let level = match self.level.trim() {
            "" => "info",
            level if level.eq_ignore_ascii_case("warning") => "warn",
            level => level,
        };
        let directives = match rust_log.map(str::trim).filter(|extra| !extra.is_empty()) {
            Some(extra) => format!("{level},{extra}"),
            None => level.to_owned(),
        };
        EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
            stderr: Self::default_stderr(),
            file: None,
        }
    }
}

static TRACING_INIT: Once = Once::new();

/// Subscriber for `config`, plus the error that kept the log file from opening.
fn subscriber(
    config: &LoggingConfig,
    filter: EnvFilter,
) -> (Box<dyn tracing::Subscriber + Send + Sync>, Option<std::io::Error>) {
    let mut writer = BoxMakeWriter::new(std::io::sink);
    if config.stderr {
        // Captured by the test harness in debug builds.
        writer = if cfg!(debug_assertions) {
            BoxMakeWriter::new(writer.and(TestWriter::with_stderr))
        } else {
            BoxMakeWriter::new(writer.and(std::io::stderr))
        };
    }

    let mut file_error = None;
    if let Some(path) = &config.file {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => writer = BoxMakeWriter::new(writer.and(Arc::new(file))),
            Err(err) => file_error = Some(err),
        }
    }

    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false);
    let registry = tracing_subscriber::registry().with(filter);
    let subscriber: Box<dyn tracing::Subscriber + Send + Sync> = if config.json {
        Box::new(registry.with(layer.json()))
    } else {
        Box::new(registry.with(layer))
    };
    (subscriber, file_error)
}

/// Install the global tracing subscriber.
///
/// Only the first call has an effect. Returns `true` if this call installed the subscriber.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let mut installed = false;
    TRACING_INIT.call_once(|| {
        let (subscriber, file_error) = subscriber(config, config.env_filter());
        installed = tracing::subscriber::set_global_default(subscriber).is_ok();
        if let (Some(path), Some(err)) = (&config.file, file_error) {
            tracing::warn!(
                target = "nova.reload",
                path = %path.display(),
                error = %err,
                "failed to open log file; file logging disabled"
            );
        }
    });
    installed
}
