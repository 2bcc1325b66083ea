//! Messages exchanged between registries, spawners and controllers

use crate::state::{ControllerState, Signal};
use crate::types::{ControllerType, ResultCode};
use serde::{Deserialize, Serialize};

/// Every message on a control link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Parent asks a host's spawner to create a controller
    Start {
        controller_type: ControllerType,
        name: String,
        parent_host: String,
        parent_service: String,
    },
    /// Spawner's single terminal answer to a `Start`
    Started { name: String, result: ResultCode },
    /// A controller identifies itself, to its spawner by shared name and to a
    /// parent by the name that parent knows it under
    Announcement { name: String },
    /// Spawner tells a controller to attach to one more parent
    NewParent {
        name: String,
        parent_host: String,
        parent_service: String,
    },
    /// Parent requests a lifecycle transition
    Request { controller: String, signal: Signal },
    /// Controller acknowledges (or rejects) a transition
    Reply {
        controller: String,
        signal: Signal,
        result: ResultCode,
    },
}

impl Message {
    /// Request message for `state`; `None` when the state has no signal.
    pub fn request(controller: impl Into<String>, state: ControllerState) -> Option<Self> {
        Some(Self::Request {
            controller: controller.into(),
            signal: state.signal()?,
        })
    }

    /// Reply message carrying `state` (normally an achieved state).
    pub fn reply(
        controller: impl Into<String>,
        state: ControllerState,
        result: ResultCode,
    ) -> Option<Self> {
        Some(Self::Reply {
            controller: controller.into(),
            signal: state.signal()?,
            result,
        })
    }

    /// Short tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Started { .. } => "started",
            Self::Announcement { .. } => "announcement",
            Self::NewParent { .. } => "new-parent",
            Self::Request { .. } => "request",
            Self::Reply { .. } => "reply",
        }
    }
}
