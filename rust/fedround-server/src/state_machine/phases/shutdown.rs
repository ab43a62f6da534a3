use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::state_machine::{
    events::SelectionUpdate,
    phases::{Handler, Phase, PhaseError, PhaseName, PhaseState, Shared},
    requests::{RequestError, StateMachineRequest},
    StateMachine,
};

/// The shutdown state.
#[derive(Debug)]
pub struct Shutdown;

#[async_trait]
impl Phase for PhaseState<Shutdown> {
    const NAME: PhaseName = PhaseName::Shutdown;

    async fn process(&mut self) -> Result<(), PhaseError> {
        info!("shutting down after round {}", self.shared.round_id());
        info!("history:\n{}", self.shared.history);
        self.shared
            .events
            .broadcast_selection(SelectionUpdate::Invalidate);
        self.shared
            .events
            .broadcast_history(Arc::new(self.shared.history.clone()));

        // let polling clients learn about the shutdown
        let grace = self.shared.state.shutdown_grace;
        if let Err(err) = self.process_during(grace).await {
            debug!("stopped answering requests early: {}", err);
        }

        // clear the request channel
        self.shared.request_rx.close();
        while let Some((_, _, resp_tx)) = self.shared.request_rx.recv().await {
            let _ = resp_tx.send(Err(RequestError::MessageDiscarded));
        }
        Ok(())
    }

    fn next(self) -> Option<StateMachine> {
        None
    }
}

impl Handler for PhaseState<Shutdown> {
    fn handle_request(&mut self, _req: StateMachineRequest) -> Result<(), RequestError> {
        Err(RequestError::MessageRejected("the coordinator is shutting down"))
    }
}

impl PhaseState<Shutdown> {
    /// Creates a new shutdown state.
    pub fn new(shared: Shared) -> Self {
        Self {
            private: Shutdown,
            shared,
        }
    }
}
