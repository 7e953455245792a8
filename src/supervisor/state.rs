//! Run lifecycle state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of the supervised process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Stopped,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// State machine for tracking runs of the supervised process.
#[derive(Debug, Clone)]
pub struct RunStateMachine {
    state: RunState,
    runs: usize,
    manual_stops: usize,
}

impl Default for RunStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStateMachine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RunState::Idle,
            runs: 0,
            manual_stops: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> RunState {
        self.state
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == RunState::Running
    }

    /// Enter `Running` for a new run.
    pub fn begin_run(&mut self) {
        self.runs = self.runs.saturating_add(1);
        self.transition(RunState::Running);
    }

    /// Leave `Running` because the run ended.
    pub fn end_run(&mut self, manual: bool) {
        if manual {
            self.manual_stops = self.manual_stops.saturating_add(1);
        }
        self.transition(RunState::Stopped);
    }

    fn transition(&mut self, new_state: RunState) {
        tracing::debug!(from = %self.state, to = %new_state, "State transition");
        self.state = new_state;
    }

    #[must_use]
    pub fn stats(&self) -> RunStats {
        RunStats {
            runs: self.runs,
            manual_stops: self.manual_stops,
        }
    }
}

/// Counters across all runs of one supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    pub runs: usize,
    pub manual_stops: usize,
}
