use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use fedround_core::{ClientId, Config, Parameters};

use crate::state_machine::{
    events::{Selection, SelectionUpdate},
    phases::{Handler, Idle, Phase, PhaseError, PhaseName, PhaseState, Shared},
    requests::{FailureRequest, ParametersRequest, RequestError, StateMachineRequest},
    StateMachine,
};

/// Errors which can occur during the init phase.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("client {0} failed to provide the initial parameters: {1}")]
    ClientFailed(ClientId, String),
    #[error("no client available to provide the initial parameters")]
    NoClient,
}

/// The init state.
///
/// Asks one randomly sampled client for the parameters the global model starts from.
#[derive(Debug, Default)]
pub struct Init {
    selected: Option<ClientId>,
    parameters: Option<Parameters>,
    failure: Option<String>,
}

#[async_trait]
impl Phase for PhaseState<Init> {
    const NAME: PhaseName = PhaseName::Init;

    async fn process(&mut self) -> Result<(), PhaseError> {
        let min = self.shared.strategy.min_available_clients();
        self.wait_for_clients(min).await?;

        let client_id = self
            .shared
            .select(1)
            .into_iter()
            .next()
            .ok_or(InitError::NoClient)?;
        let attempt = self.shared.state.init_attempts;
        self.shared.state.init_attempts += 1;
        info!(
            "requesting initial parameters from client {} (attempt {})",
            client_id, attempt
        );
        self.private.selected = Some(client_id);
        self.shared
            .events
            .broadcast_selection(SelectionUpdate::New(Arc::new(Selection {
                phase: PhaseName::Init,
                clients: std::iter::once(client_id).collect(),
                config: Config::new(),
                attempt,
            })));

        let round_timeout = self.shared.state.round_timeout;
        self.process_until_complete(round_timeout).await?;

        if let Some(reason) = self.private.failure.take() {
            return Err(InitError::ClientFailed(client_id, reason).into());
        }
        if let Some(parameters) = self.private.parameters.take() {
            info!(
                "received {} initial tensors (schema version {})",
                parameters.len(),
                parameters.version()
            );
            self.shared.set_global_parameters(parameters);
        }
        Ok(())
    }

    fn broadcast(&mut self) {
        self.shared
            .events
            .broadcast_selection(SelectionUpdate::Invalidate);
    }

    fn next(self) -> Option<StateMachine> {
        Some(PhaseState::<Idle>::new(self.shared).into())
    }
}

impl Handler for PhaseState<Init> {
    fn handle_request(&mut self, req: StateMachineRequest) -> Result<(), RequestError> {
        match req {
            StateMachineRequest::Parameters(ParametersRequest {
                client_id,
                round_id,
                parameters,
            }) => {
                self.shared.check_round(round_id)?;
                self.check_selected(&client_id)?;
                self.private.parameters = Some(parameters);
                Ok(())
            }
            StateMachineRequest::Failure(FailureRequest {
                client_id,
                round_id,
                reason,
            }) => {
                self.shared.check_round(round_id)?;
                self.check_selected(&client_id)?;
                self.private.failure = Some(reason);
                Ok(())
            }
            _ => Err(RequestError::MessageRejected(
                "unexpected message in the init phase",
            )),
        }
    }

    fn handle_disconnect(&mut self, client_id: &ClientId) {
        if self.private.selected.as_ref() == Some(client_id) && !self.is_complete() {
            self.private.failure = Some("client disconnected".to_string());
        }
    }

    fn is_complete(&self) -> bool {
        self.private.parameters.is_some() || self.private.failure.is_some()
    }
}

impl PhaseState<Init> {
    /// Creates a new init state.
    pub fn new(shared: Shared) -> Self {
        Self {
            private: Init::default(),
            shared,
        }
    }

    fn check_selected(&self, client_id: &ClientId) -> Result<(), RequestError> {
        if self.private.selected.as_ref() != Some(client_id) {
            return Err(RequestError::MessageRejected(
                "client was not asked for parameters",
            ));
        }
        if self.is_complete() {
            return Err(RequestError::MessageRejected("client already answered"));
        }
        Ok(())
    }
}
