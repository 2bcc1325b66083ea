//! Per-parent view of a controller

use crate::state::ControllerState;
use crate::types::EndpointId;
use std::time::Instant;

/// State of the controller as seen by one parent.
///
/// Created by the parent's connect handshake and dropped when its link goes
/// away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentContext {
    /// Name of the parent, its service address unless told otherwise
    pub parent_name: String,
    pub endpoint: EndpointId,
    pub host: String,
    pub service: String,
    pub requested_state: ControllerState,
    pub request_time: Option<Instant>,
    pub current_state: ControllerState,
    pub establish_time: Option<Instant>,
    /// Repeats of a request that was already queued or running
    pub retry_count: u32,
    pub failed: bool,
}

impl ParentContext {
    pub(crate) fn new(
        endpoint: EndpointId,
        parent_name: String,
        host: String,
        service: String,
        now: Instant,
    ) -> Self {
        Self {
            parent_name,
            endpoint,
            host,
            service,
            requested_state: ControllerState::Connect,
            request_time: Some(now),
            current_state: ControllerState::Connected,
            establish_time: Some(now),
            retry_count: 0,
            failed: false,
        }
    }
}
