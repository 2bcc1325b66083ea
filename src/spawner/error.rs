//! Spawner errors

use crate::types::{ControllerType, ResultCode};

/// Why a controller could not be launched.
#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("no program found for {0}")]
    ProgramNotFound(ControllerType),
    #[error("failed to launch {program}: {source}")]
    StartFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl SpawnError {
    /// Result reported to the requesting parent.
    pub fn result_code(&self) -> ResultCode {
        match self {
            SpawnError::ProgramNotFound(_) => ResultCode::ProgramNotFound,
            SpawnError::StartFailed { .. } => ResultCode::StartFailed,
        }
    }
}
