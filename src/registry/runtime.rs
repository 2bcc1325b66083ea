//! Registry runtime - owns the registry state and its links

use super::config::RegistryConfig;
use super::core::{ChildRegistry, RegistryEffect};
use super::descriptor::PendingRequest;
use super::error::RegistryError;
use crate::completion::CompletedState;
use crate::protocol::Message;
use crate::state::ControllerState;
use crate::timer;
use crate::transport::{self, LinkEvent, Links, ServiceAddress};
use crate::types::{ControllerType, EndpointId, ObservationId};
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

/// Commands sent from [`RegistryHandle`](super::RegistryHandle) to the runtime.
pub(crate) enum RegistryCommand {
    OpenService {
        respond_to: oneshot::Sender<Result<ServiceAddress, RegistryError>>,
    },
    StartChild {
        name: String,
        observation: ObservationId,
        controller_type: ControllerType,
        instance: u16,
        host: String,
        respond_to: oneshot::Sender<bool>,
    },
    RequestState {
        state: ControllerState,
        name: String,
        observation: Option<ObservationId>,
        controller_type: Option<ControllerType>,
        respond_to: oneshot::Sender<bool>,
    },
    RemoveChild {
        name: String,
        respond_to: oneshot::Sender<bool>,
    },
    CountChilds {
        observation: Option<ObservationId>,
        controller_type: Option<ControllerType>,
        respond_to: oneshot::Sender<usize>,
    },
    CurrentState {
        name: String,
        respond_to: oneshot::Sender<Option<ControllerState>>,
    },
    RequestedState {
        name: String,
        respond_to: oneshot::Sender<Option<ControllerState>>,
    },
    PendingRequests {
        name: String,
        observation: Option<ObservationId>,
        controller_type: Option<ControllerType>,
        respond_to: oneshot::Sender<Vec<PendingRequest>>,
    },
    CompletedStates {
        since: Option<Instant>,
        respond_to: oneshot::Sender<Vec<CompletedState>>,
    },
    RegisterCompletionTimer {
        notify: oneshot::Sender<()>,
    },
    RegisterCompletionPort {
        port: mpsc::UnboundedSender<CompletedState>,
    },
    Shutdown,
}

/// Connection to the spawner of one host. Start requests queue in `backlog`
/// while it is being (re)established.
#[derive(Default)]
struct SpawnerLink {
    endpoint: Option<EndpointId>,
    dialing: bool,
    backlog: Vec<Message>,
}

pub(crate) struct RegistryRuntime {
    registry: ChildRegistry,
    host: String,
    config: RegistryConfig,
    control_rx: mpsc::UnboundedReceiver<RegistryCommand>,
    links: Links,
    link_rx: mpsc::UnboundedReceiver<LinkEvent>,
    spawners: HashMap<String, SpawnerLink>,
    spawner_endpoints: HashMap<EndpointId, String>,
    dials: HashMap<u64, String>,
    next_token: u64,
}

impl RegistryRuntime {
    pub(crate) fn new(
        name: &str,
        host: String,
        config: RegistryConfig,
        control_rx: mpsc::UnboundedReceiver<RegistryCommand>,
    ) -> Self {
        let (links, link_rx) = Links::new();
        Self {
            registry: ChildRegistry::new(name, host.clone(), config.clone()),
            host,
            config,
            control_rx,
            links,
            link_rx,
            spawners: HashMap::new(),
            spawner_endpoints: HashMap::new(),
            dials: HashMap::new(),
            next_token: 0,
        }
    }

    pub(crate) async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.control_rx.recv() => match command {
                    Some(RegistryCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some(event) = self.link_rx.recv() => self.handle_link_event(event),
                _ = ticker.tick() => {
                    self.registry.process_actions(timer::now());
                    self.redial_spawners();
                }
            }
            self.deliver_effects();
        }

        slog::debug!(slog_scope::logger(), "registry shutting down"; "registry" => self.registry.name());
        self.links.flush().await;
    }

    async fn handle_command(&mut self, command: RegistryCommand) {
        let now = timer::now();
        match command {
            RegistryCommand::OpenService { respond_to } => {
                let result = self.open_service().await;
                let _ = respond_to.send(result);
            }
            RegistryCommand::StartChild {
                name,
                observation,
                controller_type,
                instance,
                host,
                respond_to,
            } => {
                let started = self.registry.start_child(
                    &name,
                    observation,
                    controller_type,
                    instance,
                    &host,
                    now,
                );
                let _ = respond_to.send(started);
            }
            RegistryCommand::RequestState {
                state,
                name,
                observation,
                controller_type,
                respond_to,
            } => {
                let accepted =
                    self.registry
                        .request_state(state, &name, observation, controller_type, now);
                let _ = respond_to.send(accepted);
            }
            RegistryCommand::RemoveChild { name, respond_to } => {
                let removed = self.registry.remove_child(&name);
                if let Some(endpoint) = removed.as_ref().and_then(|d| d.endpoint) {
                    self.links.close(endpoint);
                }
                let _ = respond_to.send(removed.is_some());
            }
            RegistryCommand::CountChilds {
                observation,
                controller_type,
                respond_to,
            } => {
                let _ = respond_to.send(self.registry.count_childs(observation, controller_type));
            }
            RegistryCommand::CurrentState { name, respond_to } => {
                let _ = respond_to.send(self.registry.current_state(&name));
            }
            RegistryCommand::RequestedState { name, respond_to } => {
                let _ = respond_to.send(self.registry.requested_state(&name));
            }
            RegistryCommand::PendingRequests {
                name,
                observation,
                controller_type,
                respond_to,
            } => {
                let pending = self
                    .registry
                    .pending_requests(&name, observation, controller_type);
                let _ = respond_to.send(pending);
            }
            RegistryCommand::CompletedStates { since, respond_to } => {
                let _ = respond_to.send(self.registry.completed_states(since));
            }
            RegistryCommand::RegisterCompletionTimer { notify } => {
                self.registry.register_completion_timer(notify);
            }
            RegistryCommand::RegisterCompletionPort { port } => {
                self.registry.register_completion_port(port);
            }
            RegistryCommand::Shutdown => {}
        }
    }

    async fn open_service(&mut self) -> Result<ServiceAddress, RegistryError> {
        if let Some(service) = self.registry.service() {
            return service
                .parse()
                .map_err(|source| RegistryError::ServiceUnavailable {
                    name: self.registry.name().to_string(),
                    source,
                });
        }
        let bound = transport::listen(&self.config.listen, self.links.events())
            .await
            .map_err(|source| RegistryError::ServiceUnavailable {
                name: self.registry.name().to_string(),
                source,
            })?;
        let advertised = transport::advertise(&bound, &self.host);
        self.registry.open_service(advertised.to_string());
        Ok(advertised)
    }

    fn handle_link_event(&mut self, event: LinkEvent) {
        let now = timer::now();
        match event {
            LinkEvent::Accepted(stream) => {
                let endpoint = self.links.attach(stream);
                slog::debug!(slog_scope::logger(), "child link accepted"; "endpoint" => %endpoint);
            }
            LinkEvent::Dialed { token, stream } => {
                let Some(host) = self.dials.remove(&token) else {
                    return;
                };
                let link = self.spawners.entry(host.clone()).or_default();
                link.dialing = false;
                match stream {
                    Some(stream) => {
                        let endpoint = self.links.attach(stream);
                        slog::info!(slog_scope::logger(), "spawner connected";
                            "host" => &host,
                            "endpoint" => %endpoint
                        );
                        link.endpoint = Some(endpoint);
                        for message in link.backlog.drain(..) {
                            self.links.send(endpoint, message);
                        }
                        self.spawner_endpoints.insert(endpoint, host);
                    }
                    None => {
                        slog::warn!(slog_scope::logger(), "spawner unreachable, will retry";
                            "host" => &host,
                            "queued" => link.backlog.len()
                        );
                    }
                }
            }
            LinkEvent::Received { endpoint, message } => {
                if self.spawner_endpoints.contains_key(&endpoint) {
                    match message {
                        Message::Started { name, result } => {
                            self.registry.on_started(&name, result, now)
                        }
                        other => {
                            slog::warn!(slog_scope::logger(), "unexpected message from spawner";
                                "kind" => other.kind()
                            );
                        }
                    }
                    return;
                }
                match message {
                    Message::Announcement { name } => {
                        self.registry.on_announcement(endpoint, &name, now)
                    }
                    Message::Reply {
                        controller,
                        signal,
                        result,
                    } => self
                        .registry
                        .on_reply(endpoint, &controller, signal, result, now),
                    other => {
                        slog::warn!(slog_scope::logger(), "unexpected message from child";
                            "endpoint" => %endpoint,
                            "kind" => other.kind()
                        );
                    }
                }
            }
            LinkEvent::Closed { endpoint } => {
                self.links.remove(endpoint);
                if let Some(host) = self.spawner_endpoints.remove(&endpoint) {
                    slog::warn!(slog_scope::logger(), "spawner link lost"; "host" => &host);
                    if let Some(link) = self.spawners.get_mut(&host) {
                        link.endpoint = None;
                    }
                } else {
                    self.registry.on_disconnect(endpoint);
                }
            }
        }
    }

    fn deliver_effects(&mut self) {
        for effect in self.registry.take_effects() {
            match effect {
                RegistryEffect::ToChild { endpoint, message } => {
                    if !self.links.send(endpoint, message) {
                        slog::debug!(slog_scope::logger(), "child link gone, message dropped";
                            "endpoint" => %endpoint
                        );
                    }
                }
                RegistryEffect::ToSpawner { host, message } => self.send_to_spawner(host, message),
            }
        }
    }

    fn send_to_spawner(&mut self, host: String, message: Message) {
        let link = self.spawners.entry(host.clone()).or_default();
        if let Some(endpoint) = link.endpoint
            && self.links.contains(endpoint)
        {
            self.links.send(endpoint, message);
            return;
        }
        link.backlog.push(message);
        if !link.dialing {
            link.dialing = true;
            self.dial_spawner(host);
        }
    }

    fn redial_spawners(&mut self) {
        let idle: Vec<String> = self
            .spawners
            .iter_mut()
            .filter(|(_, link)| link.endpoint.is_none() && !link.dialing && !link.backlog.is_empty())
            .map(|(host, link)| {
                link.dialing = true;
                host.clone()
            })
            .collect();
        for host in idle {
            self.dial_spawner(host);
        }
    }

    fn dial_spawner(&mut self, host: String) {
        let token = self.next_token;
        self.next_token += 1;
        let address = self.config.spawner_address(&host);
        slog::debug!(slog_scope::logger(), "dialing spawner";
            "host" => &host,
            "address" => %address
        );
        self.dials.insert(token, host);
        self.links.dial(address, token);
    }
}
