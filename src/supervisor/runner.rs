//! Process supervisor driving start, stop and restart of a script.
//!
//! Every run is owned by a single coordinating task. That task launches the
//! process, reads stdout and stderr as fragments arrive, feeds them through
//! one [`PieceStream`] per channel, and finally classifies how the process
//! ended. Pieces and the outcome therefore reach the [`Delegate`] from one
//! place, in order, and the outcome is always the last thing a run delivers.
//!
//! Control calls (`start`, `stop`, `restart`) are serialized through one
//! async lock. `stop` cancels the run and waits for its task, so the
//! manual-termination outcome has been delivered by the time it returns.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::buffer::{Channel, PieceStream};
use crate::config::{ConfigError, ScriptConfig};
use crate::process::{CommandSpec, Launched, Spawner, Termination, TokioSpawner};
use crate::supervisor::{
    classify, Captured, Classifier, Delegate, Failure, Outcome, PatternClassifier, RunState,
    RunStateMachine, RunStats, StderrClassifier,
};

/// Default timeout for graceful process termination.
pub const DEFAULT_TERMINATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Size of a single read from an output pipe.
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Error type for supervisor operations.
#[derive(thiserror::Error, Debug)]
pub enum SupervisorError {
    /// The task driving a run panicked or was aborted.
    #[error("Run task failed: {0}")]
    JoinError(#[from] tokio::task::JoinError),
}

/// Builder for a [`ProcessSupervisor`].
pub struct SupervisorBuilder {
    config: ScriptConfig,
    spawner: Arc<dyn Spawner>,
    classifier: Arc<dyn Classifier>,
}

impl SupervisorBuilder {
    fn new(config: ScriptConfig) -> Result<Self, ConfigError> {
        let classifier: Arc<dyn Classifier> = match config.syntax_pattern.as_deref() {
            Some(pattern) => Arc::new(PatternClassifier::new(pattern).map_err(|source| {
                ConfigError::InvalidPattern {
                    pattern: pattern.to_string(),
                    source,
                }
            })?),
            None => Arc::new(StderrClassifier),
        };

        Ok(Self {
            config,
            spawner: Arc::new(TokioSpawner),
            classifier,
        })
    }

    /// Launch processes through `spawner` instead of `tokio::process`.
    #[must_use]
    pub fn spawner(mut self, spawner: impl Spawner + 'static) -> Self {
        self.spawner = Arc::new(spawner);
        self
    }

    /// Replace the syntax-error classifier.
    #[must_use]
    pub fn classifier(mut self, classifier: impl Classifier + 'static) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    /// Build the supervisor, starting the first run if `autostart` is set.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError` if the initial start fails.
    pub async fn build(
        self,
        delegate: Arc<dyn Delegate>,
    ) -> Result<ProcessSupervisor, SupervisorError> {
        let (delivered, _) = watch::channel(Delivered::default());
        let supervisor = ProcessSupervisor {
            inner: Arc::new(Inner {
                command: self.config.command_spec(),
                delimiter: self.config.delimiter.clone(),
                terminate_timeout: self.config.terminate_timeout(),
                spawner: self.spawner,
                classifier: self.classifier,
                delegate,
                status: Mutex::new(Status::default()),
                delivered,
            }),
            control: tokio::sync::Mutex::new(None),
        };

        if self.config.autostart {
            supervisor.start().await?;
        }
        Ok(supervisor)
    }
}

/// Supervises one script across any number of runs.
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
    control: tokio::sync::Mutex<Option<ActiveRun>>,
}

/// State shared between the supervisor handle and the run task.
struct Inner {
    command: CommandSpec,
    delimiter: String,
    terminate_timeout: Duration,
    spawner: Arc<dyn Spawner>,
    classifier: Arc<dyn Classifier>,
    delegate: Arc<dyn Delegate>,
    status: Mutex<Status>,
    delivered: watch::Sender<Delivered>,
}

#[derive(Debug, Default)]
struct Status {
    machine: RunStateMachine,
    outcome: Option<Outcome>,
    run_id: Option<Uuid>,
    generation: u64,
}

/// Latest run whose outcome reached the delegate.
#[derive(Debug, Clone, Default)]
struct Delivered {
    generation: u64,
    outcome: Option<Outcome>,
}

struct ActiveRun {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ProcessSupervisor {
    /// Start configuring a supervisor for `config`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidPattern` if the configured syntax-error
    /// pattern does not compile.
    pub fn builder(config: ScriptConfig) -> Result<SupervisorBuilder, ConfigError> {
        SupervisorBuilder::new(config)
    }

    /// Begin a run. Does nothing if a run is already in progress.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::JoinError` if the previous run task failed.
    pub async fn start(&self) -> Result<(), SupervisorError> {
        let mut control = self.control.lock().await;
        self.start_locked(&mut control).await
    }

    /// Terminate the current run. Does nothing unless a run is in progress.
    ///
    /// Returns once the run's outcome has been delivered.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::JoinError` if the run task failed.
    pub async fn stop(&self) -> Result<(), SupervisorError> {
        let mut control = self.control.lock().await;
        self.stop_locked(&mut control).await
    }

    /// Stop the current run, if any, and begin a fresh one.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::JoinError` if the previous run task failed.
    pub async fn restart(&self) -> Result<(), SupervisorError> {
        let mut control = self.control.lock().await;
        tracing::info!(path = %self.inner.command.path.display(), "Restarting");
        self.stop_locked(&mut control).await?;
        self.start_locked(&mut control).await
    }

    /// Wait until the current run has delivered its outcome.
    ///
    /// Returns `None` if no run was ever started.
    pub async fn wait(&self) -> Option<Outcome> {
        let generation = self.inner.status().generation;
        if generation == 0 {
            return None;
        }

        let mut rx = self.inner.delivered.subscribe();
        let delivered = rx
            .wait_for(|delivered| delivered.generation >= generation)
            .await
            .ok()?;
        delivered.outcome.clone()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RunState {
        self.inner.status().machine.state()
    }

    /// Outcome of the most recent run, once it has ended.
    #[must_use]
    pub fn outcome(&self) -> Option<Outcome> {
        self.inner.status().outcome.clone()
    }

    /// Identifier of the most recent run.
    #[must_use]
    pub fn run_id(&self) -> Option<Uuid> {
        self.inner.status().run_id
    }

    /// Counters across all runs.
    #[must_use]
    pub fn stats(&self) -> RunStats {
        self.inner.status().machine.stats()
    }

    async fn start_locked(&self, control: &mut Option<ActiveRun>) -> Result<(), SupervisorError> {
        if self.inner.status().machine.is_running() {
            tracing::debug!("Start ignored, already running");
            return Ok(());
        }

        // A finished run may still be handing its outcome to the delegate.
        if let Some(previous) = control.take() {
            previous.task.await?;
        }

        let run_id = Uuid::new_v4();
        let generation = {
            let mut status = self.inner.status();
            status.machine.begin_run();
            status.outcome = None;
            status.run_id = Some(run_id);
            status.generation += 1;
            status.generation
        };

        let cancel = CancellationToken::new();
        let span = tracing::info_span!("run", %run_id);
        let task = tokio::spawn(
            Arc::clone(&self.inner)
                .drive(generation, cancel.clone())
                .instrument(span),
        );

        *control = Some(ActiveRun { cancel, task });
        Ok(())
    }

    async fn stop_locked(&self, control: &mut Option<ActiveRun>) -> Result<(), SupervisorError> {
        let Some(run) = control.take() else {
            return Ok(());
        };

        if self.inner.status().machine.is_running() {
            tracing::info!(path = %self.inner.command.path.display(), "Stopping");
            run.cancel.cancel();
        }
        run.task.await?;
        Ok(())
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        if let Some(run) = self.control.get_mut().as_ref() {
            run.cancel.cancel();
        }
    }
}

impl Inner {
    fn status(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Body of the run task.
    async fn drive(self: Arc<Self>, generation: u64, cancel: CancellationToken) {
        tracing::info!(
            path = %self.command.path.display(),
            args = ?self.command.args,
            "Run started"
        );

        let (outcome, manual) = self.execute(&cancel).await;

        {
            let mut status = self.status();
            status.machine.end_run(manual);
            status.outcome = Some(outcome.clone());
        }

        match &outcome {
            Outcome::Success(_) => tracing::info!("Run succeeded"),
            Outcome::Failure(failure) => tracing::info!(
                exit_code = ?failure.exit_code(),
                manual,
                "Run failed"
            ),
        }

        self.delegate.on_outcome(&outcome);
        self.delivered.send_replace(Delivered {
            generation,
            outcome: Some(outcome),
        });
    }

    /// Launch the process and pump its output until it ends.
    ///
    /// Returns the outcome and whether the run was stopped on request.
    async fn execute(&self, cancel: &CancellationToken) -> (Outcome, bool) {
        let launched = match self.spawner.launch(&self.command).await {
            Ok(launched) => launched,
            Err(err) => {
                tracing::warn!(error = %err, "Launch failed");
                let failure = Failure::Generic {
                    output: err.to_string(),
                    exit_code: err.exit_code(),
                };
                return (failure.into(), false);
            }
        };

        let Launched {
            mut stdout,
            mut stderr,
            mut control,
        } = launched;

        let mut out = PieceStream::new(Channel::Stdout, &self.delimiter);
        let mut err = PieceStream::new(Channel::Stderr, &self.delimiter);
        let mut out_buf = vec![0u8; READ_BUFFER_SIZE];
        let mut err_buf = vec![0u8; READ_BUFFER_SIZE];
        let mut out_open = true;
        let mut err_open = true;
        let mut exited: Option<Termination> = None;

        while out_open || err_open || exited.is_none() {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    if exited.is_some() {
                        // Exit was already observed, so its classification stands.
                        tracing::debug!("Stop requested after exit, skipping drain");
                        break;
                    }
                    tracing::debug!(pid = ?control.id(), "Terminating on request");
                    if let Err(e) = control.terminate(self.terminate_timeout).await {
                        tracing::error!(error = %e, "Failed to terminate process");
                    }
                    return (Failure::ManualTermination.into(), true);
                }
                read = stdout.read(&mut out_buf), if out_open => {
                    out_open = self.pump(&mut out, read, &out_buf);
                }
                read = stderr.read(&mut err_buf), if err_open => {
                    err_open = self.pump(&mut err, read, &err_buf);
                }
                status = control.wait(), if exited.is_none() => {
                    let termination = status.unwrap_or_else(|e| {
                        tracing::error!(error = %e, "Failed to wait for process");
                        Termination::exited(-1)
                    });
                    tracing::debug!(%termination, "Process exited");
                    exited = Some(termination);
                }
            }
        }

        let termination = exited.unwrap_or(Termination::exited(-1));
        let outcome = classify(
            self.classifier.as_ref(),
            termination,
            Captured {
                stdout_tail: out.pending(),
                stdout: out.transcript(),
                stderr: err.transcript(),
            },
        );
        (outcome, false)
    }

    /// Handle one read from a channel. Returns whether the channel is still open.
    fn pump(&self, stream: &mut PieceStream, read: std::io::Result<usize>, buf: &[u8]) -> bool {
        let (pieces, open) = match read {
            Ok(0) => (stream.finish(), false),
            Ok(n) => (stream.feed_bytes(&buf[..n]), true),
            Err(e) => {
                tracing::warn!(channel = %stream.channel(), error = %e, "Read failed");
                (stream.finish(), false)
            }
        };

        for piece in &pieces {
            self.delegate.on_piece(stream.channel(), piece);
        }
        if !open {
            tracing::trace!(channel = %stream.channel(), "Channel closed");
        }
        open
    }
}
