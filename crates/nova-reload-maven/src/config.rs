use std::path::PathBuf;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Settings of the Maven metadata provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
#[schemars(deny_unknown_fields)]
pub struct MavenReloadConfig {
    /// Maven executable used when no wrapper is found (defaults to `mvn` in `PATH`).
    pub mvn_path: PathBuf,

    /// Prefer the project's Maven wrapper (`./mvnw`) when present.
    pub prefer_wrapper: bool,

    /// Kill the priming build after this many milliseconds. `0` disables the limit.
    pub timeout_ms: u64,

    /// Whether the project may run its build without an explicit trust grant.
    pub trusted: bool,

    /// Arguments of the priming build that downloads plugins and dependencies.
    pub prime_args: Vec<String>,

    /// Extra user settings file tracked as a project file (e.g. `~/.m2/settings.xml`).
    pub settings_file: Option<PathBuf>,
}

impl Default for MavenReloadConfig {
    fn default() -> Self {
        Self {
            mvn_path: PathBuf::from("mvn"),
            prefer_wrapper: true,
            timeout_ms: 10 * 60 * 1000,
            trusted: false,
            prime_args: vec![
                "-B".into(),
                "-q".into(),
                "-DskipTests".into(),
                "install".into(),
            ],
            settings_file: None,
        }
    }
}

impl MavenReloadConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}
