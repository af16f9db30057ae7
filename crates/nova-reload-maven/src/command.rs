use std::fmt;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// A fully resolved external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub cwd: PathBuf,
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new(cwd: impl Into<PathBuf>, program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            cwd: cwd.into(),
            program: program.into(),
            args,
        }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// `stdout` followed by `stderr`, separated by a newline when needed.
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&self.stderr);
        }
        out
    }
}

/// Runs build tool commands. Implementations block the calling thread.
pub trait CommandRunner: Send + Sync + fmt::Debug {
    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput>;
}

/// Runs commands as child processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    /// Kill the child once it runs longer than this.
    ///
    /// Only the direct child is killed; processes it spawned may outlive it.
    pub timeout: Option<Duration>,
}

impl ProcessRunner {
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

impl CommandRunner for ProcessRunner {
    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .current_dir(&invocation.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| {
                io::Error::new(err.kind(), format!("failed to spawn `{invocation}`: {err}"))
            })?;

        let stdout = drain(child.stdout.take(), "stdout")?;
        let stderr = drain(child.stderr.take(), "stderr")?;

        let waited = wait(&mut child, self.timeout, invocation);
        if waited.is_err() {
            let _ = child.kill();
            let _ = child.wait();
        }

        let stdout = collect(stdout);
        let stderr = collect(stderr);
        match waited {
            Ok(status) => Ok(CommandOutput {
                status,
                stdout,
                stderr,
            }),
            Err(err) => {
                let mut msg = err.to_string();
                for (label, text) in [("stdout", &stdout), ("stderr", &stderr)] {
                    if !text.is_empty() {
                        msg.push_str(&format!("\n{label}:\n{text}"));
                    }
                }
                Err(io::Error::new(err.kind(), msg))
            }
        }
    }
}

fn drain<R: Read + Send + 'static>(
    pipe: Option<R>,
    name: &str,
) -> io::Result<JoinHandle<Vec<u8>>> {
    let mut pipe = pipe.ok_or_else(|| io::Error::other(format!("failed to capture {name}")))?;
    Ok(thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    }))
}

fn collect(handle: JoinHandle<Vec<u8>>) -> String {
    let bytes = handle.join().unwrap_or_default();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn wait(
    child: &mut Child,
    timeout: Option<Duration>,
    invocation: &Invocation,
) -> io::Result<ExitStatus> {
    let Some(timeout) = timeout else {
        return child.wait();
    };
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if start.elapsed() >= timeout {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("command `{invocation}` timed out after {timeout:?}"),
            ));
        }
        thread::sleep(Duration::from_millis(20));
    }
}
