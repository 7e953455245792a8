//! Launch and control seam between the supervisor and the OS.
//!
//! The supervisor never touches `tokio::process` directly. It asks a
//! [`Spawner`] for a [`Launched`] process and from then on only reads the two
//! output pipes and talks to the [`ProcessControl`] handle. Tests substitute
//! scripted readers and a fake control handle here.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncRead;

/// Error type for process launch operations.
#[derive(thiserror::Error, Debug)]
pub enum SpawnError {
    /// The executable was not found.
    #[error("Executable not found: {0}")]
    NotFound(PathBuf),
    /// Permission denied when launching.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
    /// Other I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpawnError {
    /// Classify an I/O error raised while launching `path`.
    #[must_use]
    pub fn from_io(path: PathBuf, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(path),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(path),
            _ => Self::Io(err),
        }
    }

    /// Exit code a shell would report for the same failure.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotFound(_) => 127,
            Self::PermissionDenied(_) => 126,
            Self::Io(_) => -1,
        }
    }
}

/// What to launch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub path: PathBuf,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
}

impl CommandSpec {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// How a process ended.
///
/// `code` is the exit status, or the signal number when `signaled` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Termination {
    pub code: i32,
    pub signaled: bool,
}

impl Termination {
    #[must_use]
    pub fn exited(code: i32) -> Self {
        Self {
            code,
            signaled: false,
        }
    }

    #[must_use]
    pub fn signaled(signal: i32) -> Self {
        Self {
            code: signal,
            signaled: true,
        }
    }

    /// Exited normally with status zero.
    #[must_use]
    pub fn success(&self) -> bool {
        !self.signaled && self.code == 0
    }
}

impl From<ExitStatus> for Termination {
    fn from(status: ExitStatus) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self::signaled(signal);
            }
        }
        Self::exited(status.code().unwrap_or(-1))
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.signaled {
            write!(f, "signal {}", self.code)
        } else {
            write!(f, "exit {}", self.code)
        }
    }
}

/// Readable output pipe. A read of zero bytes means end of stream.
pub type OutputPipe = Box<dyn AsyncRead + Send + Unpin>;

/// Control handle of a launched process.
///
/// Both methods must be cancel-safe: the supervisor polls them inside
/// `tokio::select!` and may drop the future before it completes.
#[async_trait]
pub trait ProcessControl: Send {
    /// Process ID, while known.
    fn id(&self) -> Option<u32>;

    /// Wait for the process to exit.
    async fn wait(&mut self) -> std::io::Result<Termination>;

    /// Ask the process to stop, escalating to a hard kill after `timeout`.
    async fn terminate(&mut self, timeout: Duration) -> std::io::Result<()>;
}

/// A freshly launched process, split into its independent parts.
pub struct Launched {
    pub stdout: OutputPipe,
    pub stderr: OutputPipe,
    pub control: Box<dyn ProcessControl>,
}

impl fmt::Debug for Launched {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Launched")
            .field("pid", &self.control.id())
            .finish_non_exhaustive()
    }
}

/// Launches processes on behalf of the supervisor.
#[async_trait]
pub trait Spawner: Send + Sync {
    /// Launch `command` with both output pipes captured.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` if the process cannot be started.
    async fn launch(&self, command: &CommandSpec) -> Result<Launched, SpawnError>;
}
