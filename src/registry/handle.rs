//! Registry handle - public API for interacting with a running registry

use super::config::RegistryConfig;
use super::descriptor::PendingRequest;
use super::error::RegistryError;
use super::runtime::{RegistryCommand, RegistryRuntime};
use crate::completion::{CompletedState, CompletionPort, CompletionTimer};
use crate::state::ControllerState;
use crate::transport::ServiceAddress;
use crate::types::{ControllerType, ObservationId};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};

/// Handle used to drive a registry running on its own task.
#[derive(Clone)]
pub struct RegistryHandle {
    pub(crate) name: Arc<String>,
    pub(crate) control_tx: mpsc::UnboundedSender<RegistryCommand>,
}

impl RegistryHandle {
    /// Spawns the registry runtime. `host` is the name children use to reach
    /// this process once its service is open.
    pub fn start(name: impl Into<String>, host: impl Into<String>, config: RegistryConfig) -> Self {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let name_arc = Arc::new(name.into());
        let runtime = RegistryRuntime::new(name_arc.as_str(), host.into(), config, control_rx);

        let runtime_name = Arc::clone(&name_arc);
        tokio::spawn(async move {
            runtime.run().await;
            slog::debug!(slog_scope::logger(), "registry stopped"; "registry" => runtime_name.as_str());
        });

        Self {
            name: name_arc,
            control_tx,
        }
    }

    async fn call<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> RegistryCommand,
    ) -> Result<T, RegistryError> {
        let (result_tx, result_rx) = oneshot::channel();

        self.control_tx
            .send(command(result_tx))
            .map_err(|_| RegistryError::ShuttingDown(self.name().to_string()))?;

        result_rx
            .await
            .map_err(|_| RegistryError::ShuttingDown(self.name().to_string()))
    }

    /// Binds the service children connect to and returns the address
    /// advertised to them.
    pub async fn open_service(&self) -> Result<ServiceAddress, RegistryError> {
        self.call(|respond_to| RegistryCommand::OpenService { respond_to })
            .await?
    }

    /// Registers a child and has the spawner on `host` create it.
    ///
    /// Returns false for a duplicate name or when the service is not open.
    pub async fn start_child(
        &self,
        name: impl Into<String>,
        observation: ObservationId,
        controller_type: ControllerType,
        instance: u16,
        host: impl Into<String>,
    ) -> Result<bool, RegistryError> {
        let name = name.into();
        let host = host.into();
        self.call(|respond_to| RegistryCommand::StartChild {
            name,
            observation,
            controller_type,
            instance,
            host,
            respond_to,
        })
        .await
    }

    /// Requests `state` for every child matching the filter. An empty name
    /// matches every child.
    pub async fn request_state(
        &self,
        state: ControllerState,
        name: impl Into<String>,
        observation: Option<ObservationId>,
        controller_type: Option<ControllerType>,
    ) -> Result<bool, RegistryError> {
        let name = name.into();
        self.call(|respond_to| RegistryCommand::RequestState {
            state,
            name,
            observation,
            controller_type,
            respond_to,
        })
        .await
    }

    /// Forgets a child and drops its connection.
    pub async fn remove_child(&self, name: impl Into<String>) -> Result<bool, RegistryError> {
        let name = name.into();
        self.call(|respond_to| RegistryCommand::RemoveChild { name, respond_to })
            .await
    }

    pub async fn count_childs(
        &self,
        observation: Option<ObservationId>,
        controller_type: Option<ControllerType>,
    ) -> Result<usize, RegistryError> {
        self.call(|respond_to| RegistryCommand::CountChilds {
            observation,
            controller_type,
            respond_to,
        })
        .await
    }

    pub async fn current_state(
        &self,
        name: impl Into<String>,
    ) -> Result<Option<ControllerState>, RegistryError> {
        let name = name.into();
        self.call(|respond_to| RegistryCommand::CurrentState { name, respond_to })
            .await
    }

    pub async fn requested_state(
        &self,
        name: impl Into<String>,
    ) -> Result<Option<ControllerState>, RegistryError> {
        let name = name.into();
        self.call(|respond_to| RegistryCommand::RequestedState { name, respond_to })
            .await
    }

    pub async fn pending_requests(
        &self,
        name: impl Into<String>,
        observation: Option<ObservationId>,
        controller_type: Option<ControllerType>,
    ) -> Result<Vec<PendingRequest>, RegistryError> {
        let name = name.into();
        self.call(|respond_to| RegistryCommand::PendingRequests {
            name,
            observation,
            controller_type,
            respond_to,
        })
        .await
    }

    /// Transitions finished after `since`, oldest first.
    pub async fn completed_states(
        &self,
        since: Option<Instant>,
    ) -> Result<Vec<CompletedState>, RegistryError> {
        self.call(|respond_to| RegistryCommand::CompletedStates { since, respond_to })
            .await
    }

    /// Returns a timer firing on the next completion. Replaces the previous
    /// timer, which then resolves to false.
    pub fn completion_timer(&self) -> Result<CompletionTimer, RegistryError> {
        let (notify, timer) = CompletionTimer::channel();
        self.control_tx
            .send(RegistryCommand::RegisterCompletionTimer { notify })
            .map_err(|_| RegistryError::ShuttingDown(self.name().to_string()))?;
        Ok(timer)
    }

    /// Returns a port receiving one event per later completion.
    pub fn completion_port(&self) -> Result<CompletionPort, RegistryError> {
        let (port_tx, port) = CompletionPort::channel();
        self.control_tx
            .send(RegistryCommand::RegisterCompletionPort { port: port_tx })
            .map_err(|_| RegistryError::ShuttingDown(self.name().to_string()))?;
        Ok(port)
    }

    /// Stops the registry. Queued messages are still written.
    pub async fn shutdown(&self) -> Result<(), RegistryError> {
        self.control_tx
            .send(RegistryCommand::Shutdown)
            .map_err(|_| RegistryError::ShuttingDown(self.name().to_string()))?;
        Ok(())
    }

    /// Returns the registry's name.
    pub fn name(&self) -> &str {
        self.name.as_str()
    }
}
