use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use fedround_core::{message::EvaluateRes, AggregationError, ClientId};

use crate::state_machine::{
    events::{Selection, SelectionUpdate},
    phases::{
        Handler,
        Idle,
        Participation,
        Phase,
        PhaseError,
        PhaseName,
        PhaseState,
        Shared,
    },
    requests::{EvaluateRequest, FailureRequest, RequestError, StateMachineRequest},
    StateMachine,
};

/// Errors which can occur during the evaluate phase.
#[derive(Debug, Error)]
pub enum EvaluateError {
    #[error("aggregation of the evaluation results failed: {0}")]
    Aggregation(#[from] AggregationError),
}

/// The evaluate state.
///
/// Sends the global parameters to the sampled clients and aggregates their local loss and
/// metrics into the round history.
#[derive(Debug, Default)]
pub struct Evaluate {
    participation: Participation<EvaluateRes>,
}

#[async_trait]
impl Phase for PhaseState<Evaluate> {
    const NAME: PhaseName = PhaseName::Evaluate;

    async fn process(&mut self) -> Result<(), PhaseError> {
        let round_id = self.shared.round_id();
        let num_available = self.shared.clients.len();
        let count = self.shared.strategy.num_evaluate_clients(num_available);
        if count == 0 {
            info!("skipping the evaluation of round {}", round_id);
            return Ok(());
        }
        let selected = self.shared.select(count);
        info!(
            "sampled {} of {} available clients for evaluation",
            selected.len(),
            num_available
        );

        let config = self.shared.strategy.configure_evaluate(round_id);
        self.private.participation = Participation::new(selected.clone());
        self.shared
            .events
            .broadcast_selection(SelectionUpdate::New(Arc::new(Selection {
                phase: PhaseName::Evaluate,
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
        let aggregated = self.shared.strategy.aggregate_evaluate(
            round_id,
            participation.results(),
            participation.failures(),
        );
        match aggregated.map_err(EvaluateError::from)? {
            Some((loss, metrics)) => {
                let history = &mut self.shared.history;
                history.add_loss_distributed(round_id, loss);
                history.add_metrics_distributed(round_id, &metrics);
            }
            None => warn!("round {}: nothing to report", round_id),
        }
        Ok(())
    }

    fn broadcast(&mut self) {
        self.shared
            .events
            .broadcast_selection(SelectionUpdate::Invalidate);
        self.shared
            .events
            .broadcast_history(Arc::new(self.shared.history.clone()));
    }

    fn next(self) -> Option<StateMachine> {
        Some(PhaseState::<Idle>::new(self.shared).into())
    }
}

impl Handler for PhaseState<Evaluate> {
    fn handle_request(&mut self, req: StateMachineRequest) -> Result<(), RequestError> {
        match req {
            StateMachineRequest::Evaluate(EvaluateRequest {
                client_id,
                round_id,
                result,
            }) => {
                self.shared.check_round(round_id)?;
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
                "unexpected message in the evaluate phase",
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

impl PhaseState<Evaluate> {
    /// Creates a new evaluate state.
    pub fn new(shared: Shared) -> Self {
        Self {
            private: Evaluate::default(),
            shared,
        }
    }
}
