//! Spawner service loop

use super::config::SpawnerConfig;
use super::core::ProcessSpawner;
use super::launcher::{Launcher, ProgramLocator};
use crate::protocol::Message;
use crate::timer;
use crate::transport::{self, LinkEvent, Links, ServiceAddress, TransportError};
use tokio::sync::mpsc;

/// A [`ProcessSpawner`] serving its listening socket.
pub struct SpawnerServer<L, X> {
    spawner: ProcessSpawner<L, X>,
    links: Links,
    link_rx: mpsc::UnboundedReceiver<LinkEvent>,
    address: ServiceAddress,
}

impl<L: ProgramLocator, X: Launcher> SpawnerServer<L, X> {
    /// Binds `address`. Launched controllers are told to dial the bound
    /// address, on the loopback interface for wildcard binds.
    pub async fn bind(
        address: &ServiceAddress,
        config: SpawnerConfig,
        locator: L,
        launcher: X,
    ) -> Result<Self, TransportError> {
        let (links, link_rx) = Links::new();
        let bound = transport::listen(address, links.events()).await?;
        let local = transport::advertise(&bound, "127.0.0.1");
        let spawner = ProcessSpawner::new(config, locator, launcher, local.to_string());
        Ok(Self {
            spawner,
            links,
            link_rx,
            address: local,
        })
    }

    /// Address controllers and parents can reach this spawner on.
    pub fn local_address(&self) -> &ServiceAddress {
        &self.address
    }

    /// Serves requests until the task is dropped.
    pub async fn run(mut self) {
        loop {
            let deadline = self.spawner.next_deadline();
            tokio::select! {
                Some(event) = self.link_rx.recv() => self.handle_link_event(event),
                _ = timer::sleep_until(deadline) => {
                    self.spawner.tick(timer::now());
                }
            }
            for effect in self.spawner.take_effects() {
                if !self.links.send(effect.endpoint, effect.message) {
                    slog::debug!(slog_scope::logger(), "link gone, message dropped";
                        "endpoint" => %effect.endpoint
                    );
                }
            }
        }
    }

    fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Accepted(stream) => {
                let endpoint = self.links.attach(stream);
                slog::debug!(slog_scope::logger(), "spawner link accepted"; "endpoint" => %endpoint);
            }
            LinkEvent::Received { endpoint, message } => match message {
                Message::Start {
                    controller_type,
                    name,
                    parent_host,
                    parent_service,
                } => {
                    let outcome = self.spawner.create(
                        endpoint,
                        controller_type,
                        &name,
                        &parent_host,
                        &parent_service,
                        timer::now(),
                    );
                    slog::debug!(slog_scope::logger(), "start request handled";
                        "controller" => &name,
                        "outcome" => ?outcome
                    );
                }
                Message::Announcement { name } => {
                    self.spawner.announce(endpoint, &name);
                }
                other => {
                    slog::warn!(slog_scope::logger(), "unexpected message";
                        "endpoint" => %endpoint,
                        "kind" => other.kind()
                    );
                }
            },
            LinkEvent::Closed { endpoint } => {
                self.links.remove(endpoint);
                self.spawner.disconnect(endpoint);
            }
            LinkEvent::Dialed { .. } => {}
        }
    }
}
