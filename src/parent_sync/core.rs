//! Parent synchronisation state machine
//!
//! [`ParentSync`] keeps one [`ParentContext`] per attached parent and runs
//! their requests one at a time against the single controller behind them.
//! Transitions are handed out as [`SyncEffect::Execute`] and reported back
//! through [`ParentSync::complete`].

use super::context::ParentContext;
use super::controller::{TransitionOutcome, TransitionStep};
use crate::protocol::Message;
use crate::state::{ControllerState, Signal};
use crate::types::{EndpointId, ResultCode, shared_name};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Instant;

/// Work the runtime has to carry out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEffect {
    Send {
        endpoint: EndpointId,
        message: Message,
    },
    /// Run these steps on the controller, then call [`ParentSync::complete`]
    Execute(Transition),
    /// The controller quit for its last parent; the process should exit
    Shutdown,
}

/// Steps to run for one parent request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub endpoint: EndpointId,
    pub parent: String,
    pub controller: String,
    pub steps: Vec<TransitionStep>,
}

/// Where a parent link came from.
#[derive(Debug, Clone)]
struct ParentLink {
    host: String,
    service: String,
}

#[derive(Debug, Clone)]
struct QueuedRequest {
    endpoint: EndpointId,
    controller: String,
    target: ControllerState,
}

#[derive(Debug, Clone)]
struct InFlight {
    endpoint: EndpointId,
    controller: String,
    target: ControllerState,
    steps: Vec<ControllerState>,
}

/// Child-side bookkeeping of the parents of one controller process.
pub struct ParentSync {
    shared_name: String,
    links: HashMap<EndpointId, ParentLink>,
    contexts: BTreeMap<EndpointId, ParentContext>,
    queue: VecDeque<QueuedRequest>,
    in_flight: Option<InFlight>,
    quitting: bool,
    outbox: Vec<SyncEffect>,
}

impl ParentSync {
    pub fn new(shared_name: impl Into<String>) -> Self {
        Self {
            shared_name: shared_name.into(),
            links: HashMap::new(),
            contexts: BTreeMap::new(),
            queue: VecDeque::new(),
            in_flight: None,
            quitting: false,
            outbox: Vec::new(),
        }
    }

    pub fn shared_name(&self) -> &str {
        &self.shared_name
    }

    /// Drains the work queued since the last call.
    pub fn take_effects(&mut self) -> Vec<SyncEffect> {
        std::mem::take(&mut self.outbox)
    }

    /// Whether `name` refers to the controller this process hosts.
    pub fn hosts(&self, name: &str) -> bool {
        name == self.shared_name || shared_name(name) == self.shared_name
    }

    /// Records where the link on `endpoint` leads before the parent's
    /// connect handshake arrives.
    pub fn attach_parent(
        &mut self,
        endpoint: EndpointId,
        host: impl Into<String>,
        service: impl Into<String>,
    ) {
        self.links.insert(
            endpoint,
            ParentLink {
                host: host.into(),
                service: service.into(),
            },
        );
    }

    /// Handles a state request from the parent on `endpoint`.
    pub fn on_request(
        &mut self,
        endpoint: EndpointId,
        controller: &str,
        signal: Signal,
        now: Instant,
    ) {
        let Some(state) = signal.state().filter(|s| s.is_request()) else {
            slog::warn!(slog_scope::logger(), "request with invalid signal";
                "controller" => controller,
                "signal" => %signal
            );
            self.outbox.push(SyncEffect::Send {
                endpoint,
                message: Message::Reply {
                    controller: controller.to_string(),
                    signal,
                    result: ResultCode::IllegalTransition,
                },
            });
            return;
        };

        if !self.hosts(controller) {
            slog::warn!(slog_scope::logger(), "request for a controller not hosted here";
                "controller" => controller,
                "hosted" => &self.shared_name
            );
            reply(&mut self.outbox, endpoint, controller, state, ResultCode::UnknownController);
            return;
        }
        if self.quitting {
            reply(&mut self.outbox, endpoint, controller, state, ResultCode::IllegalTransition);
            return;
        }
        if state == ControllerState::Connect {
            self.connect(endpoint, controller, now);
            return;
        }

        let Some(context) = self.contexts.get_mut(&endpoint) else {
            slog::warn!(slog_scope::logger(), "request from a parent that never connected";
                "controller" => controller,
                "endpoint" => %endpoint,
                "state" => %state
            );
            reply(&mut self.outbox, endpoint, controller, state, ResultCode::IllegalTransition);
            return;
        };

        // Answered without waiting behind another parent's transition
        if context.current_state.has_reached(state) {
            slog::debug!(slog_scope::logger(), "requested state already reached";
                "parent" => &context.parent_name,
                "state" => %context.current_state
            );
            context.failed = false;
            reply(&mut self.outbox, endpoint, controller, state, ResultCode::Ok);
            return;
        }

        let pending = self
            .in_flight
            .as_ref()
            .is_some_and(|f| f.endpoint == endpoint && f.target == state)
            || self
                .queue
                .iter()
                .any(|q| q.endpoint == endpoint && q.target == state);
        if pending {
            context.retry_count += 1;
            slog::debug!(slog_scope::logger(), "repeated request already pending";
                "parent" => &context.parent_name,
                "state" => %state
            );
            return;
        }

        context.requested_state = state;
        context.request_time = Some(now);
        self.queue.push_back(QueuedRequest {
            endpoint,
            controller: controller.to_string(),
            target: state,
        });
        self.pump(now);
    }

    fn connect(&mut self, endpoint: EndpointId, controller: &str, now: Instant) {
        if !self.contexts.contains_key(&endpoint) {
            let (parent_name, host, service) = match self.links.get(&endpoint) {
                Some(link) => (link.service.clone(), link.host.clone(), link.service.clone()),
                None => (endpoint.to_string(), String::new(), String::new()),
            };
            slog::info!(slog_scope::logger(), "parent connected";
                "parent" => &parent_name,
                "controller" => controller,
                "parents" => self.contexts.len() + 1
            );
            self.contexts.insert(
                endpoint,
                ParentContext::new(endpoint, parent_name, host, service, now),
            );
        }
        reply(
            &mut self.outbox,
            endpoint,
            controller,
            ControllerState::Connect,
            ResultCode::Ok,
        );
    }

    fn pump(&mut self, now: Instant) {
        while self.in_flight.is_none() && !self.quitting {
            let Some(next) = self.queue.pop_front() else {
                break;
            };
            self.evaluate(next, now);
        }
    }

    fn evaluate(&mut self, request: QueuedRequest, now: Instant) {
        let others_attached = self.contexts.iter().any(|(endpoint, context)| {
            *endpoint != request.endpoint && context.current_state != ControllerState::Quited
        });
        let Some(context) = self.contexts.get_mut(&request.endpoint) else {
            return;
        };

        if context.current_state.has_reached(request.target) {
            slog::debug!(slog_scope::logger(), "requested state already reached";
                "parent" => &context.parent_name,
                "state" => %context.current_state
            );
            context.failed = false;
            reply(&mut self.outbox, request.endpoint, &request.controller, request.target, ResultCode::Ok);
            return;
        }
        let Some(path) = context.current_state.catch_up_path(request.target) else {
            slog::warn!(slog_scope::logger(), "illegal transition";
                "parent" => &context.parent_name,
                "from" => %context.current_state,
                "to" => %request.target
            );
            reply(
                &mut self.outbox,
                request.endpoint,
                &request.controller,
                request.target,
                ResultCode::IllegalTransition,
            );
            return;
        };

        // Quitting one of several parents only detaches that parent
        let detach_only = request.target == ControllerState::Quit && others_attached;
        let steps: Vec<ControllerState> = path
            .iter()
            .copied()
            .filter(|s| !(detach_only && *s == ControllerState::Quit))
            .collect();
        if steps.is_empty() {
            slog::info!(slog_scope::logger(), "parent detached";
                "parent" => &context.parent_name
            );
            context.current_state = ControllerState::Quited;
            context.establish_time = Some(now);
            context.failed = false;
            reply(&mut self.outbox, request.endpoint, &request.controller, request.target, ResultCode::Ok);
            return;
        }

        let mut from = context.current_state;
        let transition_steps: Vec<TransitionStep> = steps
            .iter()
            .map(|&step| {
                let transition = TransitionStep {
                    parent: context.parent_name.clone(),
                    controller: request.controller.clone(),
                    from,
                    request: step,
                    synthesized: step != request.target,
                };
                from = transition.target();
                transition
            })
            .collect();
        slog::debug!(slog_scope::logger(), "starting transition";
            "parent" => &context.parent_name,
            "from" => %context.current_state,
            "to" => %request.target,
            "steps" => steps.len()
        );

        self.outbox.push(SyncEffect::Execute(Transition {
            endpoint: request.endpoint,
            parent: context.parent_name.clone(),
            controller: request.controller.clone(),
            steps: transition_steps,
        }));
        self.in_flight = Some(InFlight {
            endpoint: request.endpoint,
            controller: request.controller,
            target: request.target,
            steps,
        });
    }

    /// Applies the outcome of the running transition and starts the next
    /// queued request.
    pub fn complete(&mut self, outcome: TransitionOutcome, now: Instant) {
        let Some(flight) = self.in_flight.take() else {
            slog::warn!(slog_scope::logger(), "transition outcome without a running transition");
            return;
        };
        let destructive = outcome.is_success() && flight.steps.contains(&ControllerState::Quit);

        match self.contexts.get_mut(&flight.endpoint) {
            Some(context) => {
                context.establish_time = Some(now);
                match &outcome.error {
                    None => {
                        context.current_state = flight.target.ack_of().unwrap_or(flight.target);
                        context.failed = false;
                        reply(&mut self.outbox, flight.endpoint, &flight.controller, flight.target, ResultCode::Ok);
                    }
                    Some(error) => {
                        if let Some(reached) = outcome
                            .completed
                            .checked_sub(1)
                            .and_then(|index| flight.steps.get(index))
                            .and_then(|step| step.ack_of())
                        {
                            context.current_state = reached;
                        }
                        context.failed = true;
                        slog::warn!(slog_scope::logger(), "transition failed";
                            "parent" => &context.parent_name,
                            "to" => %flight.target,
                            "state" => %context.current_state,
                            "error" => error
                        );
                        reply(
                            &mut self.outbox,
                            flight.endpoint,
                            &flight.controller,
                            flight.target,
                            ResultCode::TransitionFailed,
                        );
                    }
                }
            }
            None => {
                slog::debug!(slog_scope::logger(), "parent left before its transition finished";
                    "endpoint" => %flight.endpoint
                );
            }
        }

        if destructive {
            slog::info!(slog_scope::logger(), "controller quit"; "controller" => &self.shared_name);
            self.quitting = true;
            self.queue.clear();
            self.outbox.push(SyncEffect::Shutdown);
            return;
        }
        self.pump(now);
    }

    /// Drops the parent on `endpoint` together with its queued requests.
    /// Returns false when no parent was attached there.
    pub fn on_disconnect(&mut self, endpoint: EndpointId) -> bool {
        self.links.remove(&endpoint);
        self.queue.retain(|q| q.endpoint != endpoint);
        let Some(context) = self.contexts.remove(&endpoint) else {
            return false;
        };
        slog::info!(slog_scope::logger(), "parent disconnected";
            "parent" => &context.parent_name,
            "parents" => self.contexts.len()
        );
        true
    }

    pub fn context(&self, endpoint: EndpointId) -> Option<&ParentContext> {
        self.contexts.get(&endpoint)
    }

    pub fn contexts(&self) -> impl Iterator<Item = &ParentContext> {
        self.contexts.values()
    }

    pub fn parent_count(&self) -> usize {
        self.contexts.len()
    }

    /// Whether a transition is running.
    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Requests waiting behind the running transition.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn is_quitting(&self) -> bool {
        self.quitting
    }
}

/// Queues the acknowledgement of `requested` (its ack state) to `endpoint`.
fn reply(
    outbox: &mut Vec<SyncEffect>,
    endpoint: EndpointId,
    controller: &str,
    requested: ControllerState,
    result: ResultCode,
) {
    let state = requested.ack_of().unwrap_or(requested);
    if let Some(message) = Message::reply(controller, state, result) {
        outbox.push(SyncEffect::Send { endpoint, message });
    }
}
