//! Child processes launched through `tokio::process`.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};

use super::{CommandSpec, Launched, ProcessControl, SpawnError, Spawner, Termination};

/// Launches real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSpawner;

#[async_trait]
impl Spawner for TokioSpawner {
    async fn launch(&self, command: &CommandSpec) -> Result<Launched, SpawnError> {
        let mut cmd = Command::new(&command.path);
        cmd.args(&command.args)
            .envs(&command.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref dir) = command.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| SpawnError::from_io(command.path.clone(), e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SpawnError::Io(std::io::Error::other("stdout not captured")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SpawnError::Io(std::io::Error::other("stderr not captured")))?;

        tracing::debug!(path = %command.path.display(), pid = ?child.id(), "Process launched");

        Ok(Launched {
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            control: Box::new(TokioProcess { child }),
        })
    }
}

/// A running child process.
#[derive(Debug)]
pub struct TokioProcess {
    child: Child,
}

#[async_trait]
impl ProcessControl for TokioProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> std::io::Result<Termination> {
        self.child.wait().await.map(Termination::from)
    }

    /// On Unix, sends SIGTERM first, then SIGKILL after the timeout.
    /// On other platforms, falls back to immediate kill.
    async fn terminate(&mut self, timeout: Duration) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            self.terminate_unix(timeout).await
        }

        #[cfg(not(unix))]
        {
            let _ = timeout;
            self.child.kill().await
        }
    }
}

impl TokioProcess {
    #[cfg(unix)]
    async fn terminate_unix(&mut self, timeout: Duration) -> std::io::Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.child.id() else {
            // Already reaped.
            return Ok(());
        };

        let nix_pid = Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX));
        if let Err(err) = kill(nix_pid, Signal::SIGTERM) {
            tracing::debug!(pid, error = %err, "SIGTERM failed");
        }

        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                tracing::warn!(pid, ?timeout, "Process ignored SIGTERM, killing");
                self.child.kill().await
            }
        }
    }
}
