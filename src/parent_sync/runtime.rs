//! Controller process runtime
//!
//! Announces the controller to its spawner, dials every parent the spawner
//! names, and feeds parent requests through [`ParentSync`]. Transitions run on
//! their own task so the links keep being served while a step is in progress.

use super::config::ControllerConfig;
use super::controller::{Controller, TransitionOutcome, run_transition};
use super::core::{ParentSync, SyncEffect};
use super::error::ControllerError;
use crate::protocol::Message;
use crate::timer::{self, TimerQueue};
use crate::transport::{self, LinkEvent, Links, ServiceAddress};
use crate::types::EndpointId;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// A parent this process dials, with its failed attempts so far.
#[derive(Debug, Clone)]
struct ParentTarget {
    name: String,
    host: String,
    service: ServiceAddress,
    attempts: u32,
}

/// Runs one controller process.
pub struct ControllerRuntime<C: Controller> {
    shared_name: String,
    spawner: ServiceAddress,
    config: ControllerConfig,
    controller: Option<C>,
    sync: ParentSync,
}

impl<C: Controller> ControllerRuntime<C> {
    pub fn new(
        shared_name: impl Into<String>,
        spawner: ServiceAddress,
        controller: C,
        config: ControllerConfig,
    ) -> Self {
        let shared_name = shared_name.into();
        Self {
            sync: ParentSync::new(shared_name.clone()),
            shared_name,
            spawner,
            config,
            controller: Some(controller),
        }
    }

    /// Builds the runtime from the command line a spawner launches with:
    /// `<shared name> <spawner address>`.
    pub fn from_args(controller: C, config: ControllerConfig) -> Result<Self, ControllerError> {
        let mut args = std::env::args().skip(1);
        let name = args
            .next()
            .ok_or(ControllerError::MissingArgument("controller name"))?;
        let spawner = args
            .next()
            .ok_or(ControllerError::MissingArgument("spawner address"))?
            .parse()?;
        Ok(Self::new(name, spawner, controller, config))
    }

    pub fn shared_name(&self) -> &str {
        &self.shared_name
    }

    /// Runs until the controller quits for its last parent.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        let (mut links, mut link_rx) = Links::new();
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<(C, TransitionOutcome)>();

        let spawner = links.attach(transport::connect(&self.spawner).await?);
        links.send(
            spawner,
            Message::Announcement {
                name: self.shared_name.clone(),
            },
        );
        slog::info!(slog_scope::logger(), "controller announced";
            "controller" => &self.shared_name,
            "spawner" => %self.spawner
        );

        let mut redials: TimerQueue<ParentTarget> = TimerQueue::new();
        let mut dials: HashMap<u64, ParentTarget> = HashMap::new();
        let mut parents: HashMap<EndpointId, ParentTarget> = HashMap::new();
        let mut next_token = 0u64;
        let mut dial = |links: &Links, dials: &mut HashMap<u64, ParentTarget>, target: ParentTarget| {
            let token = next_token;
            next_token += 1;
            links.dial(target.service.clone(), token);
            dials.insert(token, target);
        };

        loop {
            let deadline = redials.next_deadline();
            tokio::select! {
                Some(event) = link_rx.recv() => {
                    let now = timer::now();
                    match event {
                        LinkEvent::Accepted(_) => {}
                        LinkEvent::Dialed { token, stream } => {
                            let Some(mut target) = dials.remove(&token) else {
                                continue;
                            };
                            match stream {
                                Some(stream) => {
                                    let endpoint = links.attach(stream);
                                    self.sync.attach_parent(endpoint, target.host.clone(), target.service.to_string());
                                    links.send(endpoint, Message::Announcement { name: target.name.clone() });
                                    slog::info!(slog_scope::logger(), "parent link up";
                                        "parent" => %target.service,
                                        "as" => &target.name
                                    );
                                    target.attempts = 0;
                                    parents.insert(endpoint, target);
                                }
                                None => {
                                    target.attempts += 1;
                                    if self.config.reconnect.exhausted(target.attempts) {
                                        slog::warn!(slog_scope::logger(), "giving up on parent";
                                            "parent" => %target.service,
                                            "attempts" => target.attempts
                                        );
                                    } else {
                                        redials.schedule(self.config.reconnect.next_attempt(now), target);
                                    }
                                }
                            }
                        }
                        LinkEvent::Received { endpoint, message } if endpoint == spawner => match message {
                            Message::NewParent { name, parent_host, parent_service } => {
                                match parent_service.parse::<ServiceAddress>() {
                                    Ok(service) => dial(&links, &mut dials, ParentTarget {
                                        name,
                                        host: parent_host,
                                        service,
                                        attempts: 0,
                                    }),
                                    Err(err) => {
                                        slog::warn!(slog_scope::logger(), "ignoring parent with bad address";
                                            "controller" => &name,
                                            "error" => %err
                                        );
                                    }
                                }
                            }
                            other => {
                                slog::warn!(slog_scope::logger(), "unexpected message from spawner"; "kind" => other.kind());
                            }
                        },
                        LinkEvent::Received { endpoint, message } => match message {
                            Message::Request { controller, signal } => {
                                self.sync.on_request(endpoint, &controller, signal, now)
                            }
                            other => {
                                slog::warn!(slog_scope::logger(), "unexpected message from parent";
                                    "endpoint" => %endpoint,
                                    "kind" => other.kind()
                                );
                            }
                        },
                        LinkEvent::Closed { endpoint } => {
                            links.remove(endpoint);
                            if endpoint == spawner {
                                slog::warn!(slog_scope::logger(), "spawner link lost"; "spawner" => %self.spawner);
                            } else if let Some(target) = parents.remove(&endpoint) {
                                self.sync.on_disconnect(endpoint);
                                if !self.sync.is_quitting() {
                                    redials.schedule(self.config.reconnect.next_attempt(now), target);
                                }
                            }
                        }
                    }
                }
                Some((controller, outcome)) = done_rx.recv() => {
                    self.controller = Some(controller);
                    self.sync.complete(outcome, timer::now());
                }
                _ = timer::sleep_until(deadline) => {
                    for target in redials.pop_expired(timer::now()) {
                        slog::debug!(slog_scope::logger(), "redialing parent";
                            "parent" => %target.service,
                            "attempt" => target.attempts + 1
                        );
                        dial(&links, &mut dials, target);
                    }
                }
            }

            let mut shutdown = false;
            for effect in self.sync.take_effects() {
                match effect {
                    SyncEffect::Send { endpoint, message } => {
                        links.send(endpoint, message);
                    }
                    SyncEffect::Execute(transition) => match self.controller.take() {
                        Some(mut controller) => {
                            let done_tx = done_tx.clone();
                            tokio::spawn(async move {
                                let outcome = run_transition(&mut controller, &transition.steps).await;
                                let _ = done_tx.send((controller, outcome));
                            });
                        }
                        None => {
                            slog::error!(slog_scope::logger(), "transition requested while another is running");
                        }
                    },
                    SyncEffect::Shutdown => shutdown = true,
                }
            }
            if shutdown {
                break;
            }
        }

        slog::info!(slog_scope::logger(), "controller exiting"; "controller" => &self.shared_name);
        links.flush().await;
        Ok(())
    }
}
