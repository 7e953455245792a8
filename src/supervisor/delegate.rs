//! Observers of supervisor output.

use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::buffer::Channel;
use crate::supervisor::Outcome;

/// Receives pieces as they complete and the outcome of every run.
///
/// Calls come from the task driving the run, one at a time and in order.
/// Implementations should return quickly.
pub trait Delegate: Send + Sync {
    fn on_piece(&self, channel: Channel, piece: &str);

    fn on_outcome(&self, outcome: &Outcome);
}

/// One notification delivered to a delegate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SupervisorEvent {
    Piece { channel: Channel, text: String },
    Outcome { outcome: Outcome },
}

impl SupervisorEvent {
    /// Returns true if this is a terminal event.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Outcome { .. })
    }
}

/// Forwards every notification into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelDelegate {
    tx: mpsc::UnboundedSender<SupervisorEvent>,
}

impl ChannelDelegate {
    /// Create the delegate together with the receiving end of its events.
    #[must_use]
    pub fn new() -> (Self, UnboundedReceiverStream<SupervisorEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, UnboundedReceiverStream::new(rx))
    }

    fn send(&self, event: SupervisorEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Event receiver dropped");
        }
    }
}

impl Delegate for ChannelDelegate {
    fn on_piece(&self, channel: Channel, piece: &str) {
        self.send(SupervisorEvent::Piece {
            channel,
            text: piece.to_string(),
        });
    }

    fn on_outcome(&self, outcome: &Outcome) {
        self.send(SupervisorEvent::Outcome {
            outcome: outcome.clone(),
        });
    }
}

/// Keeps every notification in memory.
#[derive(Debug, Default)]
pub struct RecordingDelegate {
    events: Mutex<Vec<SupervisorEvent>>,
}

impl RecordingDelegate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All events so far, in delivery order.
    #[must_use]
    pub fn events(&self) -> Vec<SupervisorEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Pieces received on `channel`.
    #[must_use]
    pub fn pieces(&self, channel: Channel) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SupervisorEvent::Piece { channel: c, text } if c == channel => Some(text),
                _ => None,
            })
            .collect()
    }

    /// Outcomes received, one per finished run.
    #[must_use]
    pub fn outcomes(&self) -> Vec<Outcome> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SupervisorEvent::Outcome { outcome } => Some(outcome),
                SupervisorEvent::Piece { .. } => None,
            })
            .collect()
    }

    fn push(&self, event: SupervisorEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl Delegate for RecordingDelegate {
    fn on_piece(&self, channel: Channel, piece: &str) {
        self.push(SupervisorEvent::Piece {
            channel,
            text: piece.to_string(),
        });
    }

    fn on_outcome(&self, outcome: &Outcome) {
        self.push(SupervisorEvent::Outcome {
            outcome: outcome.clone(),
        });
    }
}
