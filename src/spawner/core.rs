//! Spawner state machine
//!
//! Tracks which controllers run on this host and which parents wait for one
//! to announce itself. A shared controller is launched once; later parents
//! join the running process instead of getting a new one.

use super::config::SpawnerConfig;
use super::error::SpawnError;
use super::launcher::{Launcher, ProgramLocator};
use crate::protocol::Message;
use crate::timer::{TimerId, TimerQueue};
use crate::types::{ControllerType, EndpointId, ResultCode, shared_name};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Instant;

/// Message the spawner wants delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnerEffect {
    pub endpoint: EndpointId,
    pub message: Message,
}

/// A parent waiting for a controller to announce itself.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub shared_name: String,
    pub full_name: String,
    pub controller_type: ControllerType,
    pub parent_host: String,
    pub parent_service: String,
    /// Link the start request came in on
    pub requester: EndpointId,
    id: u64,
    timer: TimerId,
}

/// What a start request resulted in.
#[derive(Debug)]
pub enum CreateOutcome {
    /// Controller was running; the parent was handed to it
    AlreadyRunning,
    /// Controller is starting; the parent waits for its announcement
    Joined,
    /// Controller process launched
    Spawned,
    Rejected(SpawnError),
}

/// Launches controllers on request and hands them their parents.
pub struct ProcessSpawner<L, X> {
    config: SpawnerConfig,
    locator: L,
    launcher: X,
    address: String,
    /// Shared name to the controller's link, `None` until it announces
    active: HashMap<String, Option<EndpointId>>,
    requests: VecDeque<SpawnRequest>,
    timers: TimerQueue<u64>,
    next_request: u64,
    outbox: Vec<SpawnerEffect>,
}

impl<L: ProgramLocator, X: Launcher> ProcessSpawner<L, X> {
    /// `address` is passed to launched controllers so they can announce
    /// themselves.
    pub fn new(config: SpawnerConfig, locator: L, launcher: X, address: impl Into<String>) -> Self {
        Self {
            config,
            locator,
            launcher,
            address: address.into(),
            active: HashMap::new(),
            requests: VecDeque::new(),
            timers: TimerQueue::new(),
            next_request: 0,
            outbox: Vec::new(),
        }
    }

    pub fn set_address(&mut self, address: impl Into<String>) {
        self.address = address.into();
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Drains the messages queued since the last call.
    pub fn take_effects(&mut self) -> Vec<SpawnerEffect> {
        std::mem::take(&mut self.outbox)
    }

    fn send(&mut self, endpoint: EndpointId, message: Message) {
        self.outbox.push(SpawnerEffect { endpoint, message });
    }

    /// Handles a start request from the parent on `requester`.
    pub fn create(
        &mut self,
        requester: EndpointId,
        controller_type: ControllerType,
        full_name: &str,
        parent_host: &str,
        parent_service: &str,
        now: Instant,
    ) -> CreateOutcome {
        let shared = if controller_type.is_shared() {
            shared_name(full_name)
        } else {
            full_name.to_string()
        };

        match self.active.get(&shared).copied() {
            Some(Some(endpoint)) => {
                slog::info!(slog_scope::logger(), "controller already running";
                    "controller" => &shared,
                    "parent" => parent_service
                );
                self.send(
                    endpoint,
                    Message::NewParent {
                        name: full_name.to_string(),
                        parent_host: parent_host.to_string(),
                        parent_service: parent_service.to_string(),
                    },
                );
                self.send(
                    requester,
                    Message::Started {
                        name: full_name.to_string(),
                        result: ResultCode::AlreadyRunning,
                    },
                );
                CreateOutcome::AlreadyRunning
            }
            Some(None) => {
                slog::debug!(slog_scope::logger(), "joining controller that is starting";
                    "controller" => &shared,
                    "parent" => parent_service
                );
                self.enqueue(
                    shared,
                    full_name,
                    controller_type,
                    parent_host,
                    parent_service,
                    requester,
                    now,
                );
                CreateOutcome::Joined
            }
            None => {
                if let Err(err) = self.launch(controller_type, &shared) {
                    slog::warn!(slog_scope::logger(), "controller not started";
                        "controller" => &shared,
                        "error" => %err
                    );
                    self.send(
                        requester,
                        Message::Started {
                            name: full_name.to_string(),
                            result: err.result_code(),
                        },
                    );
                    return CreateOutcome::Rejected(err);
                }
                self.active.insert(shared.clone(), None);
                self.enqueue(
                    shared,
                    full_name,
                    controller_type,
                    parent_host,
                    parent_service,
                    requester,
                    now,
                );
                CreateOutcome::Spawned
            }
        }
    }

    fn launch(&mut self, controller_type: ControllerType, shared: &str) -> Result<(), SpawnError> {
        let program = self
            .locator
            .locate(controller_type)
            .ok_or(SpawnError::ProgramNotFound(controller_type))?;
        self.launcher
            .launch(&program, shared, &self.address)
            .map_err(|source| SpawnError::StartFailed {
                program: program.display().to_string(),
                source,
            })
    }

    #[allow(clippy::too_many_arguments)]
    fn enqueue(
        &mut self,
        shared: String,
        full_name: &str,
        controller_type: ControllerType,
        parent_host: &str,
        parent_service: &str,
        requester: EndpointId,
        now: Instant,
    ) {
        let id = self.next_request;
        self.next_request += 1;
        let timer = self
            .timers
            .schedule(now + self.config.announce_timeout, id);
        self.requests.push_back(SpawnRequest {
            shared_name: shared,
            full_name: full_name.to_string(),
            controller_type,
            parent_host: parent_host.to_string(),
            parent_service: parent_service.to_string(),
            requester,
            id,
            timer,
        });
    }

    /// Binds the controller announcing itself on `endpoint` and hands it every
    /// parent waiting for it. Returns the number of parents served.
    pub fn announce(&mut self, endpoint: EndpointId, name: &str) -> usize {
        if self
            .active
            .insert(name.to_string(), Some(endpoint))
            .is_none()
        {
            slog::info!(slog_scope::logger(), "unsolicited controller announcement"; "controller" => name);
        }

        let (served, waiting): (VecDeque<SpawnRequest>, VecDeque<SpawnRequest>) = self
            .requests
            .drain(..)
            .partition(|r| r.shared_name == name);
        self.requests = waiting;

        slog::info!(slog_scope::logger(), "controller announced";
            "controller" => name,
            "endpoint" => %endpoint,
            "parents" => served.len()
        );
        let count = served.len();
        for request in served {
            self.timers.cancel(request.timer);
            self.send(
                endpoint,
                Message::NewParent {
                    name: request.full_name.clone(),
                    parent_host: request.parent_host,
                    parent_service: request.parent_service,
                },
            );
            self.send(
                request.requester,
                Message::Started {
                    name: request.full_name,
                    result: ResultCode::Ok,
                },
            );
        }
        count
    }

    /// Fails every request whose controller did not announce in time.
    /// Returns the number of requests failed.
    pub fn tick(&mut self, now: Instant) -> usize {
        let mut failed = 0;
        for id in self.timers.pop_expired(now) {
            let Some(index) = self.requests.iter().position(|r| r.id == id) else {
                continue;
            };
            let Some(request) = self.requests.remove(index) else {
                continue;
            };
            slog::warn!(slog_scope::logger(), "controller did not announce in time";
                "controller" => &request.shared_name,
                "parent" => &request.parent_service
            );
            self.send(
                request.requester,
                Message::Started {
                    name: request.full_name,
                    result: ResultCode::StartFailed,
                },
            );
            self.forget_if_orphaned(&request.shared_name);
            failed += 1;
        }
        failed
    }

    /// Drops a link. Requests it made are withdrawn; a controller bound to it
    /// is forgotten. Returns the number of withdrawn requests.
    pub fn disconnect(&mut self, endpoint: EndpointId) -> usize {
        let mut orphaned = HashSet::new();
        let timers = &mut self.timers;
        let before = self.requests.len();
        self.requests.retain(|r| {
            if r.requester == endpoint {
                timers.cancel(r.timer);
                orphaned.insert(r.shared_name.clone());
                false
            } else {
                true
            }
        });
        let withdrawn = before - self.requests.len();
        for shared in orphaned {
            self.forget_if_orphaned(&shared);
        }

        let active_before = self.active.len();
        self.active.retain(|_, bound| *bound != Some(endpoint));
        if self.active.len() < active_before {
            slog::info!(slog_scope::logger(), "controller link closed"; "endpoint" => %endpoint);
        }
        withdrawn
    }

    // An unannounced controller nobody waits for any more is left running
    fn forget_if_orphaned(&mut self, shared: &str) {
        let waiting = self.requests.iter().any(|r| r.shared_name == shared);
        if !waiting && self.active.get(shared) == Some(&None) {
            self.active.remove(shared);
            slog::debug!(slog_scope::logger(), "forgot unannounced controller"; "controller" => shared);
        }
    }

    /// Earliest announce deadline.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Whether a controller with this shared name is starting or running.
    pub fn is_active(&self, shared: &str) -> bool {
        self.active.contains_key(shared)
    }

    /// Link of the running controller with this shared name.
    pub fn endpoint_of(&self, shared: &str) -> Option<EndpointId> {
        self.active.get(shared).copied().flatten()
    }

    pub fn pending_requests(&self) -> impl Iterator<Item = &SpawnRequest> {
        self.requests.iter()
    }
}
