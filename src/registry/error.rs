//! Registry errors

use crate::transport::TransportError;
use std::fmt;

/// Errors returned by registry operations.
#[derive(Debug)]
pub enum RegistryError {
    /// Registry is shutting down
    ShuttingDown(String),
    /// The service children connect to could not be opened
    ServiceUnavailable {
        name: String,
        source: TransportError,
    },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::ShuttingDown(name) => {
                write!(f, "registry {} is shutting down", name)
            }
            RegistryError::ServiceUnavailable { name, source } => {
                write!(f, "registry {} could not open its service: {}", name, source)
            }
        }
    }
}

impl std::error::Error for RegistryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RegistryError::ServiceUnavailable { source, .. } => Some(source),
            RegistryError::ShuttingDown(_) => None,
        }
    }
}
