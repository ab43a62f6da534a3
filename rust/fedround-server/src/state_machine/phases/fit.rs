use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use fedround_core::{message::FitRes, AggregationError, ClientId};

use crate::state_machine::{
    events::{Selection, SelectionUpdate},
    phases::{
        Evaluate,
        Handler,
        Participation,
        Phase,
        PhaseError,
        PhaseName,
        PhaseState,
        Shared,
    },
    requests::{FailureRequest, FitRequest, RequestError, StateMachineRequest},
    StateMachine,
};

/// Errors which can occur during the fit phase.
#[derive(Debug, Error)]
pub enum FitError {
    #[error("the global parameters are not initialized")]
    NoGlobalParameters,
    #[error("aggregation of the fit results failed: {0}")]
    Aggregation(#[from] AggregationError),
}

/// The fit state.
///
/// Sends the global parameters to the sampled clients and averages their local updates.
#[derive(Debug, Default)]
pub struct Fit {
    participation: Participation<FitRes>,
}

#[cfg(test)]
impl Fit {
    pub fn participation(&self) -> &Participation<FitRes> {
        &self.participation
    }
}

#[async_trait]
impl Phase for PhaseState<Fit> {
    const NAME: PhaseName = PhaseName::Fit;

    async fn process(&mut self) -> Result<(), PhaseError> {
        if self.shared.global_parameters.is_none() {
            return Err(FitError::NoGlobalParameters.into());
        }
        let round_id = self.shared.round_id();
        let num_available = self.shared.clients.len();
        let count = self.shared.strategy.num_fit_clients(num_available);
        let selected = self.shared.select(count);
        info!(
            "sampled {} of {} available clients for training",
            selected.len(),
            num_available
        );

        let config = self.shared.strategy.configure_fit(round_id);
        self.private.participation = Participation::new(selected.clone());
        self.shared
            .events
            .broadcast_selection(SelectionUpdate::New(Arc::new(Selection {
                phase: PhaseName::Fit,
                clients: selected,
                config,
                attempt: 0,
            })));

        let round_timeout = self.shared.state.round_timeout;
        if !self.process_until_complete_or_timeout(round_timeout).await? {
            self.private.participation.time_out();
        }

        let participation = &self.private.participation;
        info!(
            "received {} results and {} failures",
            participation.results().len(),
            participation.failures().len()
        );
        let aggregated = self.shared.strategy.aggregate_fit(
            round_id,
            participation.results(),
            participation.failures(),
        );
        match aggregated.map_err(FitError::from)? {
            Some((parameters, metrics)) => {
                self.shared
                    .history
                    .add_metrics_distributed_fit(round_id, &metrics);
                self.shared.set_global_parameters(parameters);
            }
            None => warn!("round {}: keeping the previous global parameters", round_id),
        }
        Ok(())
    }

    fn broadcast(&mut self) {
        self.shared
            .events
            .broadcast_selection(SelectionUpdate::Invalidate);
    }

    fn next(self) -> Option<StateMachine> {
        Some(PhaseState::<Evaluate>::new(self.shared).into())
    }
}

impl Handler for PhaseState<Fit> {
    fn handle_request(&mut self, req: StateMachineRequest) -> Result<(), RequestError> {
        match req {
            StateMachineRequest::Fit(FitRequest {
                client_id,
                round_id,
                result,
            }) => {
                self.shared.check_round(round_id)?;
                if let Some(global) = &self.shared.global_parameters {
                    if let Err(mismatch) = global.check_compatible(&result.parameters) {
                        self.private.participation.add_failure(
                            client_id,
                            format!("incompatible parameters: {}", mismatch),
                        )?;
                        return Err(RequestError::MessageRejected(
                            "parameters do not match the global model",
                        ));
                    }
                }
                self.private.participation.add_result(client_id, result)
            }
            StateMachineRequest::Failure(FailureRequest {
                client_id,
                round_id,
                reason,
            }) => {
                self.shared.check_round(round_id)?;
                self.private.participation.add_failure(client_id, reason)
            }
            _ => Err(RequestError::MessageRejected(
                "unexpected message in the fit phase",
            )),
        }
    }

    fn handle_disconnect(&mut self, client_id: &ClientId) {
        let _ = self
            .private
            .participation
            .add_failure(*client_id, "client disconnected");
    }

    fn is_complete(&self) -> bool {
        self.private.participation.is_complete()
    }
}

impl PhaseState<Fit> {
    /// Creates a new fit state.
    pub fn new(shared: Shared) -> Self {
        Self {
            private: Fit::default(),
            shared,
        }
    }
}
