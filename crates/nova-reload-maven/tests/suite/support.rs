use std::collections::VecDeque;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use nova_reload::{Project, ReloadConfig, ReloadEngine, ReloadProvider};
use nova_reload_maven::{
    CommandOutput, CommandRunner, Invocation, MavenReloadConfig, MavenReloadProvider,
};

#[derive(Debug, Clone)]
pub enum Script {
    Exit {
        code: i32,
        stdout: String,
        stderr: String,
    },
    SpawnError(io::ErrorKind),
}

impl Script {
    pub fn success() -> Self {
        Self::Exit {
            code: 0,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    pub fn failure(stderr: &str) -> Self {
        Self::Exit {
            code: 1,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }
}

/// Replays scripted outcomes and records every invocation. Succeeds once the script runs out.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    scripts: Mutex<VecDeque<Script>>,
    invocations: Mutex<Vec<Invocation>>,
}

impl ScriptedRunner {
    pub fn new(scripts: impl IntoIterator<Item = Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            invocations: Mutex::new(Vec::new()),
        })
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
        self.invocations.lock().unwrap().push(invocation.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(Script::success);
        match script {
            Script::Exit {
                code,
                stdout,
                stderr,
            } => Ok(CommandOutput {
                status: exit_status(code),
                stdout,
                stderr,
            }),
            Script::SpawnError(kind) => Err(io::Error::new(kind, "mvn: command not found")),
        }
    }
}

fn exit_status(code: i32) -> ExitStatus {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        ExitStatus::from_raw(code << 8)
    }

    #[cfg(windows)]
    {
        use std::os::windows::process::ExitStatusExt;
        ExitStatus::from_raw(code as u32)
    }
}

pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub engine: ReloadEngine,
    pub runner: Arc<ScriptedRunner>,
    pub maven: Arc<MavenReloadProvider>,
    pub project: Project,
}

impl Fixture {
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn pom(&self) -> PathBuf {
        self.root().join("pom.xml")
    }
}

/// A single-module Maven project named `app` whose files predate any load.
pub fn maven_project(config: MavenReloadConfig, scripts: Vec<Script>) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    write_file(
        &dir.path().join("pom.xml"),
        "<project><artifactId>app</artifactId></project>",
        an_hour_ago(),
    );
    open(dir, config, scripts)
}

pub fn open(dir: tempfile::TempDir, config: MavenReloadConfig, scripts: Vec<Script>) -> Fixture {
    let runner = ScriptedRunner::new(scripts);
    let maven = Arc::new(MavenReloadProvider::with_runner(
        dir.path(),
        config,
        runner.clone(),
    ));
    let engine = ReloadEngine::new_with_handle(
        ReloadConfig {
            coalesce_ms: 20,
            ..ReloadConfig::default()
        },
        tokio::runtime::Handle::current(),
    );
    let project = engine.open_project(
        "app",
        dir.path(),
        vec![maven.clone() as Arc<dyn ReloadProvider>],
    );
    Fixture {
        dir,
        engine,
        runner,
        maven,
        project,
    }
}

pub fn trusted() -> MavenReloadConfig {
    MavenReloadConfig {
        trusted: true,
        ..MavenReloadConfig::default()
    }
}

pub fn write_file(path: &Path, contents: &str, modified: SystemTime) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
    set_mtime(path, modified);
}

pub fn set_mtime(path: &Path, modified: SystemTime) {
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(modified)
        .unwrap();
}

pub fn an_hour_ago() -> SystemTime {
    SystemTime::now() - Duration::from_secs(3600)
}
