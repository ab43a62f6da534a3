use async_trait::async_trait;
use tracing::info;

use crate::state_machine::{
    events::SelectionUpdate,
    phases::{Fit, Handler, Phase, PhaseError, PhaseName, PhaseState, Shared, Shutdown},
    requests::{RequestError, StateMachineRequest},
    StateMachine,
};

/// The idle state.
///
/// Starts a new round and waits until enough clients are registered.
#[derive(Debug)]
pub struct Idle;

#[async_trait]
impl Phase for PhaseState<Idle> {
    const NAME: PhaseName = PhaseName::Idle;

    async fn process(&mut self) -> Result<(), PhaseError> {
        if self.shared.state.is_finished() {
            info!("all {} rounds done", self.shared.state.num_rounds);
            return Ok(());
        }
        info!(
            "starting round {} of {}",
            self.shared.round_id(),
            self.shared.state.num_rounds
        );
        let min = self.shared.strategy.min_available_clients();
        self.wait_for_clients(min).await
    }

    fn broadcast(&mut self) {
        self.shared
            .events
            .broadcast_selection(SelectionUpdate::Invalidate);
    }

    fn next(self) -> Option<StateMachine> {
        Some(if self.shared.state.is_finished() {
            PhaseState::<Shutdown>::new(self.shared).into()
        } else {
            PhaseState::<Fit>::new(self.shared).into()
        })
    }
}

impl Handler for PhaseState<Idle> {
    fn handle_request(&mut self, _req: StateMachineRequest) -> Result<(), RequestError> {
        Err(RequestError::MessageRejected(
            "no task is running in the idle phase",
        ))
    }
}

impl PhaseState<Idle> {
    /// Creates a new idle state and moves on to the next round.
    pub fn new(mut shared: Shared) -> Self {
        shared.set_round_id(shared.round_id() + 1);
        Self::retry(shared)
    }

    /// Creates a new idle state that starts the current round again.
    pub fn retry(shared: Shared) -> Self {
        Self {
            private: Idle,
            shared,
        }
    }
}
