//! Controller process errors

use crate::transport::TransportError;
use std::fmt;

/// Errors that stop a controller process from running.
#[derive(Debug)]
pub enum ControllerError {
    /// The spawner could not be reached
    Transport(TransportError),
    /// A required command line argument is absent
    MissingArgument(&'static str),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::Transport(e) => write!(f, "spawner link failed: {}", e),
            ControllerError::MissingArgument(arg) => write!(f, "missing argument: {}", arg),
        }
    }
}

impl std::error::Error for ControllerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ControllerError::Transport(e) => Some(e),
            ControllerError::MissingArgument(_) => None,
        }
    }
}

impl From<TransportError> for ControllerError {
    fn from(e: TransportError) -> Self {
        ControllerError::Transport(e)
    }
}
