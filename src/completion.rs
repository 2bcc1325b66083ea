//! Completion delivery channels
//!
//! A registry reports finished (or failed) transitions three ways: by poll,
//! through a one-shot timer and through a port receiving one event per
//! completion. This module holds the receiving ends of the latter two.

use crate::state::ControllerState;
use crate::types::{ControllerType, ObservationId, ResultCode};
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};

/// One finished transition of one controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedState {
    pub name: String,
    pub controller_type: ControllerType,
    pub observation: ObservationId,
    pub requested_state: ControllerState,
    pub current_state: ControllerState,
    pub establish_time: Instant,
    /// Set for failed transitions; failures travel the same channel as successes
    pub failed: bool,
    pub result: ResultCode,
}

/// Receives every completion recorded after registration.
pub struct CompletionPort {
    rx: mpsc::UnboundedReceiver<CompletedState>,
}

impl CompletionPort {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<CompletedState>) -> Self {
        Self { rx }
    }

    /// Create a connected sender/port pair
    pub fn channel() -> (mpsc::UnboundedSender<CompletedState>, CompletionPort) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self::new(rx))
    }

    /// Receive the next completion
    pub async fn recv(&mut self) -> Option<CompletedState> {
        self.rx.recv().await
    }

    /// Try to receive a completion without waiting
    pub fn try_recv(&mut self) -> Result<CompletedState, TryRecvError> {
        self.rx.try_recv().map_err(|e| match e {
            mpsc::error::TryRecvError::Empty => TryRecvError::Empty,
            mpsc::error::TryRecvError::Disconnected => TryRecvError::Disconnected,
        })
    }
}

/// Fires once, on the first completion recorded after registration.
pub struct CompletionTimer {
    rx: oneshot::Receiver<()>,
}

impl CompletionTimer {
    /// Create a connected sender/timer pair
    pub fn channel() -> (oneshot::Sender<()>, CompletionTimer) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// Wait until the timer fires. Returns false when the registry went away
    /// or the timer was replaced by a newer registration.
    pub async fn fired(self) -> bool {
        self.rx.await.is_ok()
    }

    /// Check without waiting
    pub fn try_fired(&mut self) -> bool {
        self.rx.try_recv().is_ok()
    }
}

/// Error when trying to receive without waiting
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TryRecvError {
    /// No completion is queued
    #[error("no completion queued")]
    Empty,
    /// The registry is gone
    #[error("completion port is disconnected")]
    Disconnected,
}
