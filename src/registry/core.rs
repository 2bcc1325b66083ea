//! Registry state machine
//!
//! [`ChildRegistry`] holds no sockets. Every input (caller commands, child
//! messages, disconnects, ticks) is a method call, and every outgoing message
//! is queued as a [`RegistryEffect`] for the runtime to deliver.

use super::config::RegistryConfig;
use super::descriptor::{Action, ActionStatus, ControllerDescriptor, PendingRequest};
use crate::completion::CompletedState;
use crate::protocol::Message;
use crate::state::{ControllerState, Signal};
use crate::types::{ControllerName, ControllerType, EndpointId, ObservationId, ResultCode};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};

/// Message the registry wants delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEffect {
    /// To the spawner on `host`
    ToSpawner { host: String, message: Message },
    /// To a connected child
    ToChild {
        endpoint: EndpointId,
        message: Message,
    },
}

/// Parent-side bookkeeping of child controllers.
pub struct ChildRegistry {
    name: String,
    host: String,
    service: Option<String>,
    config: RegistryConfig,
    children: BTreeMap<String, ControllerDescriptor>,
    actions: VecDeque<Action>,
    departed: VecDeque<CompletedState>,
    completion_timer: Option<oneshot::Sender<()>>,
    completion_ports: Vec<mpsc::UnboundedSender<CompletedState>>,
    outbox: Vec<RegistryEffect>,
}

impl ChildRegistry {
    pub fn new(name: impl Into<String>, host: impl Into<String>, config: RegistryConfig) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            service: None,
            config,
            children: BTreeMap::new(),
            actions: VecDeque::new(),
            departed: VecDeque::new(),
            completion_timer: None,
            completion_ports: Vec::new(),
            outbox: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Records the service address children are told to dial.
    pub fn open_service(&mut self, service: impl Into<String>) {
        let service = service.into();
        slog::info!(slog_scope::logger(), "registry service opened";
            "registry" => &self.name,
            "service" => &service
        );
        self.service = Some(service);
    }

    pub fn service(&self) -> Option<&str> {
        self.service.as_deref()
    }

    /// Drains the messages queued since the last call.
    pub fn take_effects(&mut self) -> Vec<RegistryEffect> {
        std::mem::take(&mut self.outbox)
    }

    /// Registers a new child and asks the spawner on `host` to create it.
    ///
    /// Returns false when the name is already registered or no service has
    /// been opened yet.
    pub fn start_child(
        &mut self,
        name: &str,
        observation: ObservationId,
        controller_type: ControllerType,
        instance: u16,
        host: &str,
        now: Instant,
    ) -> bool {
        if self.children.contains_key(name) {
            slog::warn!(slog_scope::logger(), "controller already registered"; "controller" => name);
            return false;
        }
        let Some(service) = self.service.clone() else {
            slog::warn!(slog_scope::logger(), "cannot start child before the service is opened";
                "registry" => &self.name,
                "controller" => name
            );
            return false;
        };

        let descriptor =
            ControllerDescriptor::new(name, instance, observation, controller_type, host, now);
        self.children.insert(name.to_string(), descriptor);
        self.actions
            .push_back(Action::new(name, ControllerState::Connect, now));
        self.outbox.push(RegistryEffect::ToSpawner {
            host: host.to_string(),
            message: Message::Start {
                controller_type,
                name: name.to_string(),
                parent_host: self.host.clone(),
                parent_service: service,
            },
        });
        slog::debug!(slog_scope::logger(), "starting child";
            "controller" => name,
            "type" => %controller_type,
            "host" => host
        );

        self.process_actions(now);
        true
    }

    /// Queues `state` for every child matching the filter.
    ///
    /// An empty `name` matches any name. Returns false when `state` is not a
    /// request or nothing matched.
    pub fn request_state(
        &mut self,
        state: ControllerState,
        name: &str,
        observation: Option<ObservationId>,
        controller_type: Option<ControllerType>,
        now: Instant,
    ) -> bool {
        if !state.is_request() {
            slog::warn!(slog_scope::logger(), "not a requestable state"; "state" => %state);
            return false;
        }
        let targets: Vec<String> = self
            .children
            .values()
            .filter(|d| d.matches(name, observation, controller_type))
            .map(|d| d.name.clone())
            .collect();
        if targets.is_empty() {
            slog::debug!(slog_scope::logger(), "no controller matches request";
                "name" => name,
                "state" => %state
            );
            return false;
        }

        for target in &targets {
            self.enqueue(target, state, now);
        }
        self.process_actions(now);
        true
    }

    fn enqueue(&mut self, name: &str, state: ControllerState, now: Instant) {
        if state == ControllerState::Quit {
            // A child that never connected still needs the handshake first
            let connected = self
                .children
                .get(name)
                .is_some_and(|d| d.current_state.has_reached(ControllerState::Connect));
            self.actions.retain(|a| {
                a.controller != name || (!connected && a.requested_state == ControllerState::Connect)
            });
        }
        let last_queued = self
            .actions
            .iter()
            .rev()
            .find(|a| a.controller == name)
            .map(|a| a.requested_state);
        let Some(descriptor) = self.children.get_mut(name) else {
            return;
        };

        match last_queued {
            Some(queued) if queued.supersedes(state) => {
                slog::debug!(slog_scope::logger(), "request covered by queued request";
                    "controller" => name,
                    "queued" => %queued,
                    "requested" => %state
                );
                return;
            }
            None if !descriptor.failed && descriptor.current_state.has_reached(state) => {
                slog::debug!(slog_scope::logger(), "controller already in requested state";
                    "controller" => name,
                    "state" => %descriptor.current_state
                );
                return;
            }
            _ => {}
        }

        descriptor.requested_state = state;
        descriptor.request_time = now;
        descriptor.failed = false;
        self.actions.push_back(Action::new(name, state, now));
    }

    fn purge_actions(&mut self, name: &str) {
        self.actions.retain(|a| a.controller != name);
    }

    /// Sends or resends the head request of every controller as far as its
    /// connection and retry schedule allow. Called on each tick.
    pub fn process_actions(&mut self, now: Instant) {
        let retry = self.config.retry;
        let mut seen = HashSet::new();
        let mut finished = Vec::new();
        let mut failures = Vec::new();

        for (index, action) in self.actions.iter_mut().enumerate() {
            if !seen.insert(action.controller.clone()) {
                // Only the head request of a controller is ever in flight
                continue;
            }
            let Some(descriptor) = self.children.get_mut(&action.controller) else {
                finished.push(index);
                continue;
            };

            let due = match action.status {
                ActionStatus::Pending | ActionStatus::AwaitingConnection => true,
                ActionStatus::AwaitingAck { retry_at } => now >= retry_at,
                ActionStatus::Failed => {
                    finished.push(index);
                    continue;
                }
            };
            if !due {
                continue;
            }

            let Some(endpoint) = descriptor.endpoint else {
                action.status = ActionStatus::AwaitingConnection;
                continue;
            };

            if matches!(action.status, ActionStatus::AwaitingAck { .. })
                && retry.exhausted(action.retry_count)
            {
                slog::warn!(slog_scope::logger(), "request not acknowledged, giving up";
                    "controller" => &action.controller,
                    "state" => %action.requested_state,
                    "attempts" => action.retry_count
                );
                action.status = ActionStatus::Failed;
                descriptor.failed = true;
                descriptor.establish_time = Some(now);
                descriptor.completed_request = action.requested_state;
                descriptor.last_result = ResultCode::MaxRetriesExceeded;
                failures.push(descriptor.completion(action.requested_state, now));
                finished.push(index);
                continue;
            }

            if let Some(message) = Message::request(&action.controller, action.requested_state) {
                self.outbox.push(RegistryEffect::ToChild { endpoint, message });
            }
            action.retry_count += 1;
            action.status = ActionStatus::AwaitingAck {
                retry_at: retry.next_attempt(now),
            };
            descriptor.retry_count = action.retry_count;
            slog::debug!(slog_scope::logger(), "request sent";
                "controller" => &action.controller,
                "state" => %action.requested_state,
                "attempt" => action.retry_count
            );
        }

        for index in finished.into_iter().rev() {
            self.actions.remove(index);
        }
        for completed in failures {
            self.record_completion(completed);
        }
    }

    /// Handles the spawner's answer to a start request.
    pub fn on_started(&mut self, name: &str, result: ResultCode, now: Instant) {
        if result.is_ok() {
            slog::debug!(slog_scope::logger(), "controller started";
                "controller" => name,
                "result" => %result
            );
            return;
        }
        let Some(descriptor) = self.children.get_mut(name) else {
            slog::debug!(slog_scope::logger(), "start result for unknown controller"; "controller" => name);
            return;
        };
        slog::warn!(slog_scope::logger(), "controller could not be started";
            "controller" => name,
            "result" => %result
        );
        descriptor.failed = true;
        descriptor.establish_time = Some(now);
        descriptor.completed_request = descriptor.requested_state;
        descriptor.last_result = result;
        let completed = descriptor.completion(descriptor.requested_state, now);
        self.purge_actions(name);
        self.record_completion(completed);
    }

    /// Binds a connecting child to `endpoint`.
    ///
    /// A child that had already connected before is resynchronised with a
    /// fresh connect handshake. Unknown but well-formed names are adopted.
    pub fn on_announcement(&mut self, endpoint: EndpointId, name: &str, now: Instant) {
        match self.children.get_mut(name) {
            Some(descriptor) => {
                let reconnect = descriptor.current_state >= ControllerState::Connected
                    && descriptor.current_state != ControllerState::AnyState;
                descriptor.endpoint = Some(endpoint);
                slog::info!(slog_scope::logger(), "child connected";
                    "controller" => name,
                    "endpoint" => %endpoint,
                    "reconnect" => reconnect
                );
                if reconnect
                    && let Some(message) = Message::request(name, ControllerState::Connect)
                {
                    self.outbox.push(RegistryEffect::ToChild { endpoint, message });
                }
                // Requests sent over a previous connection are sent again
                for action in self.actions.iter_mut().filter(|a| a.controller == name) {
                    if matches!(action.status, ActionStatus::AwaitingAck { .. }) {
                        action.status = ActionStatus::AwaitingConnection;
                    }
                }
            }
            None => {
                let parsed = match name.parse::<ControllerName>() {
                    Ok(parsed) => parsed,
                    Err(err) => {
                        slog::warn!(slog_scope::logger(), "ignoring announcement";
                            "controller" => name,
                            "error" => %err
                        );
                        return;
                    }
                };
                let mut descriptor = ControllerDescriptor::new(
                    name,
                    parsed.instance,
                    parsed.observation,
                    parsed.controller_type,
                    "",
                    now,
                );
                descriptor.endpoint = Some(endpoint);
                self.children.insert(name.to_string(), descriptor);
                self.actions
                    .push_back(Action::new(name, ControllerState::Connect, now));
                slog::info!(slog_scope::logger(), "adopted unsolicited child";
                    "controller" => name,
                    "endpoint" => %endpoint
                );
            }
        }
        self.process_actions(now);
    }

    /// Handles a child's acknowledgement of a request.
    pub fn on_reply(
        &mut self,
        endpoint: EndpointId,
        controller: &str,
        signal: Signal,
        result: ResultCode,
        now: Instant,
    ) {
        let Some(state) = signal.state() else {
            slog::warn!(slog_scope::logger(), "reply with unknown signal";
                "controller" => controller,
                "signal" => %signal
            );
            return;
        };
        let Some(descriptor) = self.children.get_mut(controller) else {
            slog::debug!(slog_scope::logger(), "reply for unknown controller"; "controller" => controller);
            return;
        };
        if descriptor.endpoint != Some(endpoint) {
            slog::warn!(slog_scope::logger(), "reply from unexpected endpoint";
                "controller" => controller,
                "endpoint" => %endpoint
            );
            return;
        }
        let position = self
            .actions
            .iter()
            .position(|a| a.controller == controller && a.requested_state.ack_of() == Some(state));
        let Some(action) = position.and_then(|index| self.actions.remove(index)) else {
            slog::debug!(slog_scope::logger(), "unsolicited reply";
                "controller" => controller,
                "state" => %state
            );
            return;
        };

        if result.is_ok() {
            descriptor.current_state = state;
            descriptor.failed = false;
        } else {
            descriptor.failed = true;
            slog::warn!(slog_scope::logger(), "transition failed";
                "controller" => controller,
                "requested" => %action.requested_state,
                "result" => %result
            );
        }
        descriptor.establish_time = Some(now);
        descriptor.completed_request = action.requested_state;
        descriptor.last_result = result;
        descriptor.retry_count = 0;
        let completed = descriptor.completion(action.requested_state, now);
        slog::debug!(slog_scope::logger(), "transition acknowledged";
            "controller" => controller,
            "state" => %state,
            "result" => %result
        );

        let departed = result.is_ok() && state == ControllerState::Quited;
        self.record_completion(completed.clone());
        if departed {
            self.depart(controller, completed);
        }
        self.process_actions(now);
    }

    /// Unbinds the child connected on `endpoint`; its requests wait for the
    /// next connection. Returns false when no child used that endpoint.
    pub fn on_disconnect(&mut self, endpoint: EndpointId) -> bool {
        let Some(descriptor) = self
            .children
            .values_mut()
            .find(|d| d.endpoint == Some(endpoint))
        else {
            return false;
        };
        descriptor.endpoint = None;
        let name = descriptor.name.clone();
        slog::info!(slog_scope::logger(), "child disconnected";
            "controller" => &name,
            "endpoint" => %endpoint
        );
        for action in self.actions.iter_mut().filter(|a| a.controller == name) {
            if matches!(action.status, ActionStatus::AwaitingAck { .. }) {
                action.status = ActionStatus::AwaitingConnection;
            }
        }
        true
    }

    /// Forgets a child without telling it. Its queued requests are dropped.
    pub fn remove_child(&mut self, name: &str) -> Option<ControllerDescriptor> {
        let descriptor = self.children.remove(name)?;
        self.purge_actions(name);
        slog::info!(slog_scope::logger(), "child removed"; "controller" => name);
        Some(descriptor)
    }

    fn depart(&mut self, name: &str, completed: CompletedState) {
        self.purge_actions(name);
        self.children.remove(name);
        self.departed.push_back(completed);
        while self.departed.len() > self.config.departed_history {
            self.departed.pop_front();
        }
        slog::info!(slog_scope::logger(), "child quit"; "controller" => name);
    }

    fn record_completion(&mut self, completed: CompletedState) {
        if let Some(timer) = self.completion_timer.take() {
            let _ = timer.send(());
        }
        self.completion_ports
            .retain(|port| port.send(completed.clone()).is_ok());
    }

    /// Fires `notify` on the next completion. Replaces an earlier timer.
    pub fn register_completion_timer(&mut self, notify: oneshot::Sender<()>) {
        self.completion_timer = Some(notify);
    }

    /// Sends every later completion to `port` until its receiver is dropped.
    pub fn register_completion_port(&mut self, port: mpsc::UnboundedSender<CompletedState>) {
        self.completion_ports.push(port);
    }

    /// Number of children matching the filter.
    pub fn count_childs(
        &self,
        observation: Option<ObservationId>,
        controller_type: Option<ControllerType>,
    ) -> usize {
        self.children
            .values()
            .filter(|d| d.matches("", observation, controller_type))
            .count()
    }

    pub fn current_state(&self, name: &str) -> Option<ControllerState> {
        self.children.get(name).map(|d| d.current_state)
    }

    pub fn requested_state(&self, name: &str) -> Option<ControllerState> {
        self.children.get(name).map(|d| d.requested_state)
    }

    pub fn descriptor(&self, name: &str) -> Option<&ControllerDescriptor> {
        self.children.get(name)
    }

    pub fn children(&self) -> impl Iterator<Item = &ControllerDescriptor> {
        self.children.values()
    }

    /// Outstanding work per matching controller: the head of its queue, or
    /// its last request when that one failed.
    pub fn pending_requests(
        &self,
        name: &str,
        observation: Option<ObservationId>,
        controller_type: Option<ControllerType>,
    ) -> Vec<PendingRequest> {
        self.children
            .values()
            .filter(|d| d.matches(name, observation, controller_type))
            .filter_map(|d| {
                let mut queued = self.actions.iter().filter(|a| a.controller == d.name);
                let count = queued.clone().count();
                match queued.next() {
                    Some(head) => Some(PendingRequest {
                        name: d.name.clone(),
                        requested_state: head.requested_state,
                        request_time: head.request_time,
                        status: head.status,
                        retry_count: head.retry_count,
                        queued: count,
                    }),
                    None if d.failed => Some(PendingRequest {
                        name: d.name.clone(),
                        requested_state: d.requested_state,
                        request_time: d.request_time,
                        status: ActionStatus::Failed,
                        retry_count: d.retry_count,
                        queued: 0,
                    }),
                    None => None,
                }
            })
            .collect()
    }

    /// Transitions finished after `since` (all when `None`), oldest first.
    /// Includes children that have quit since.
    pub fn completed_states(&self, since: Option<Instant>) -> Vec<CompletedState> {
        let after = |time: Instant| since.is_none_or(|since| time > since);
        let mut completed: Vec<CompletedState> = self
            .children
            .values()
            .filter_map(|d| {
                let time = d.establish_time?;
                after(time).then(|| d.completion(d.completed_request, time))
            })
            .chain(
                self.departed
                    .iter()
                    .filter(|c| after(c.establish_time))
                    .cloned(),
            )
            .collect();
        completed.sort_by_key(|c| c.establish_time);
        completed
    }

    /// Number of queued requests over all controllers.
    pub fn action_count(&self) -> usize {
        self.actions.len()
    }
}
