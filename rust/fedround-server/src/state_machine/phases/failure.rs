use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, info};

use crate::state_machine::{
    events::SelectionUpdate,
    phases::{
        EvaluateError,
        FitError,
        Handler,
        Idle,
        Init,
        InitError,
        Phase,
        PhaseName,
        PhaseState,
        Shared,
        Shutdown,
    },
    requests::{RequestError, StateMachineRequest},
    StateMachine,
};

/// Errors which can occur during the execution of the [`StateMachine`].
#[derive(Error, Debug)]
pub enum PhaseError {
    #[error("request channel error: {0}")]
    RequestChannel(&'static str),
    #[error("phase timeout")]
    PhaseTimeout(#[from] tokio::time::error::Elapsed),
    #[error("init phase failed: {0}")]
    Init(#[from] InitError),
    #[error("fit phase failed: {0}")]
    Fit(#[from] FitError),
    #[error("evaluate phase failed: {0}")]
    Evaluate(#[from] EvaluateError),
}

/// The failure state.
#[derive(Debug)]
pub struct Failure {
    /// The phase that failed.
    pub(in crate::state_machine) phase: PhaseName,
    pub(in crate::state_machine) error: PhaseError,
}

#[async_trait]
impl Phase for PhaseState<Failure> {
    const NAME: PhaseName = PhaseName::Failure;

    async fn process(&mut self) -> Result<(), PhaseError> {
        error!(
            "round {} failed in the {} phase: {}",
            self.shared.round_id(),
            self.private.phase,
            self.private.error
        );
        Ok(())
    }

    fn broadcast(&mut self) {
        info!("broadcasting invalidation of the client selection");
        self.shared
            .events
            .broadcast_selection(SelectionUpdate::Invalidate);
    }

    fn next(self) -> Option<StateMachine> {
        Some(match self.private.error {
            PhaseError::RequestChannel(_) => PhaseState::<Shutdown>::new(self.shared).into(),
            _ if self.shared.global_parameters.is_none() => {
                PhaseState::<Init>::new(self.shared).into()
            }
            // the round never started
            _ if self.private.phase == PhaseName::Idle => {
                PhaseState::<Idle>::retry(self.shared).into()
            }
            _ => PhaseState::<Idle>::new(self.shared).into(),
        })
    }
}

impl Handler for PhaseState<Failure> {
    fn handle_request(&mut self, _req: StateMachineRequest) -> Result<(), RequestError> {
        Err(RequestError::MessageRejected(
            "no task is running in the failure phase",
        ))
    }
}

impl PhaseState<Failure> {
    /// Creates a new failure state.
    pub fn new(shared: Shared, phase: PhaseName, error: PhaseError) -> Self {
        Self {
            private: Failure { phase, error },
            shared,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use futures::future;
    use tokio::time::timeout;

    use super::*;
    use crate::state_machine::tests::utils;

    async fn elapsed() -> PhaseError {
        timeout(Duration::from_millis(1), future::pending::<()>())
            .await
            .unwrap_err()
            .into()
    }

    fn round_after(state: PhaseState<Failure>) -> Option<u64> {
        match state.next() {
            Some(StateMachine::Idle(idle)) => Some(idle.shared.round_id()),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_idle_timeout_keeps_the_round() {
        let (mut shared, _request_tx, _event_subscriber) = utils::init_shared();
        shared.set_round_id(2);
        shared.global_parameters = Some(Arc::new(utils::parameters(0.0, &[2])));
        let state = PhaseState::<Failure>::new(shared, PhaseName::Idle, elapsed().await);
        assert_eq!(round_after(state), Some(2));
    }

    #[tokio::test]
    async fn test_fit_failure_moves_to_the_next_round() {
        let (mut shared, _request_tx, _event_subscriber) = utils::init_shared();
        shared.set_round_id(2);
        shared.global_parameters = Some(Arc::new(utils::parameters(0.0, &[2])));
        let state = PhaseState::<Failure>::new(shared, PhaseName::Fit, elapsed().await);
        assert_eq!(round_after(state), Some(3));
    }

    #[tokio::test]
    async fn test_failure_without_global_parameters_restarts_init() {
        let (shared, _request_tx, _event_subscriber) = utils::init_shared();
        let state = PhaseState::<Failure>::new(shared, PhaseName::Idle, elapsed().await);
        assert!(matches!(state.next(), Some(StateMachine::Init(_))));
    }
}
