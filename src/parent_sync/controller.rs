//! Controller trait and transition execution

use crate::state::ControllerState;
use async_trait::async_trait;

/// Application logic of a controller process.
///
/// The runtime calls [`transition`](Controller::transition) once per lifecycle
/// step, never concurrently. Steps the controller skipped on the way to a
/// requested state are passed in first, marked `synthesized`.
#[async_trait]
pub trait Controller: Send + 'static {
    /// The type of error a failed transition returns
    type Error: std::error::Error + Send + Sync + 'static;

    /// Performs one step. An error aborts the remaining steps of the request.
    async fn transition(&mut self, step: &TransitionStep) -> Result<(), Self::Error>;
}

/// One lifecycle step to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionStep {
    /// Parent on whose behalf the step runs
    pub parent: String,
    /// Name the parent knows the controller by
    pub controller: String,
    pub from: ControllerState,
    /// Requested state; reached is its acknowledgement state
    pub request: ControllerState,
    /// Inserted to catch up, not requested by the parent
    pub synthesized: bool,
}

impl TransitionStep {
    /// State the controller is in after this step succeeds.
    pub fn target(&self) -> ControllerState {
        self.request.ack_of().unwrap_or(self.request)
    }
}

/// How far a transition got.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionOutcome {
    /// Steps completed successfully
    pub completed: usize,
    /// Error of the step that failed
    pub error: Option<String>,
}

impl TransitionOutcome {
    pub fn success(steps: usize) -> Self {
        Self {
            completed: steps,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Runs `steps` in order, stopping at the first failure.
pub async fn run_transition<C: Controller>(
    controller: &mut C,
    steps: &[TransitionStep],
) -> TransitionOutcome {
    for (index, step) in steps.iter().enumerate() {
        if let Err(err) = controller.transition(step).await {
            slog::warn!(slog_scope::logger(), "transition step failed";
                "parent" => &step.parent,
                "from" => %step.from,
                "request" => %step.request,
                "error" => %err
            );
            return TransitionOutcome {
                completed: index,
                error: Some(err.to_string()),
            };
        }
        slog::debug!(slog_scope::logger(), "transition step done";
            "parent" => &step.parent,
            "state" => %step.target(),
            "synthesized" => step.synthesized
        );
    }
    TransitionOutcome::success(steps.len())
}
