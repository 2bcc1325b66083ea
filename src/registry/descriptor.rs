//! Child descriptors and queued actions

use crate::completion::CompletedState;
use crate::state::ControllerState;
use crate::types::{ControllerType, EndpointId, ObservationId, ResultCode};
use std::time::Instant;

/// Progress of one queued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStatus {
    /// Queued, not looked at yet
    Pending,
    /// The child has no live connection; sent once it (re)connects
    AwaitingConnection,
    /// Sent; resent at `retry_at` unless acknowledged first
    AwaitingAck { retry_at: Instant },
    /// Retries exhausted
    Failed,
}

/// Everything the registry knows about one child.
#[derive(Debug, Clone)]
pub struct ControllerDescriptor {
    pub name: String,
    pub instance: u16,
    pub observation: ObservationId,
    pub controller_type: ControllerType,
    /// Present while the child is connected
    pub endpoint: Option<EndpointId>,
    pub host: String,
    pub requested_state: ControllerState,
    pub request_time: Instant,
    pub current_state: ControllerState,
    /// When the last transition finished, successfully or not
    pub establish_time: Option<Instant>,
    /// Request the last finished transition was for
    pub completed_request: ControllerState,
    pub failed: bool,
    pub retry_count: u32,
    /// Result of the last finished transition
    pub last_result: ResultCode,
}

impl ControllerDescriptor {
    pub(crate) fn new(
        name: &str,
        instance: u16,
        observation: ObservationId,
        controller_type: ControllerType,
        host: &str,
        now: Instant,
    ) -> Self {
        Self {
            name: name.to_string(),
            instance,
            observation,
            controller_type,
            endpoint: None,
            host: host.to_string(),
            requested_state: ControllerState::Connect,
            request_time: now,
            current_state: ControllerState::Created,
            establish_time: None,
            completed_request: ControllerState::NoState,
            failed: false,
            retry_count: 0,
            last_result: ResultCode::Ok,
        }
    }

    pub(crate) fn matches(
        &self,
        name: &str,
        observation: Option<ObservationId>,
        controller_type: Option<ControllerType>,
    ) -> bool {
        (name.is_empty() || self.name == name)
            && observation.is_none_or(|obs| self.observation == obs)
            && controller_type.is_none_or(|t| self.controller_type == t)
    }

    pub(crate) fn completion(
        &self,
        requested_state: ControllerState,
        establish_time: Instant,
    ) -> CompletedState {
        CompletedState {
            name: self.name.clone(),
            controller_type: self.controller_type,
            observation: self.observation,
            requested_state,
            current_state: self.current_state,
            establish_time,
            failed: self.failed,
            result: self.last_result,
        }
    }
}

/// One queued state request.
#[derive(Debug, Clone)]
pub(crate) struct Action {
    pub controller: String,
    pub requested_state: ControllerState,
    pub request_time: Instant,
    pub status: ActionStatus,
    pub retry_count: u32,
}

impl Action {
    pub(crate) fn new(controller: &str, requested_state: ControllerState, now: Instant) -> Self {
        Self {
            controller: controller.to_string(),
            requested_state,
            request_time: now,
            status: ActionStatus::Pending,
            retry_count: 0,
        }
    }
}

/// Outstanding request of one controller, as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub name: String,
    pub requested_state: ControllerState,
    pub request_time: Instant,
    pub status: ActionStatus,
    pub retry_count: u32,
    /// Requests queued for this controller, including this one
    pub queued: usize,
}
