//! The state machine that controls the execution of the federated rounds.
//!
//! # Overview
//!
//! The coordinator runs a fixed number of rounds. After asking one client for the parameters
//! the global model starts from, every round samples clients for local training, averages
//! their updated parameters, samples clients for local evaluation and aggregates their losses
//! and metrics.
//!
//! ```text
//!            +------+
//!            | Init |<--------------------------+
//!            +------+                           |
//!               |                               | no global parameters yet
//!               v                               |
//!            +------+      +-----+      +----------+      +---------+
//!    +------>| Idle |----->| Fit |----->| Evaluate |      | Failure |
//!    |       +------+      +-----+      +----------+      +---------+
//!    |          |                            |                  |
//!    +----------+----------------------------+<-----------------+
//!               |
//!               | all rounds done (or the request channel broke)
//!               v
//!          +----------+
//!          | Shutdown |
//!          +----------+
//! ```
//!
//! **Init.** Waits until `strategy.min_available_clients` clients registered, samples one of
//! them and waits for its initial parameters.
//!
//! **Idle.** Increments the round ID. Moves to Shutdown once `rounds.num_rounds` rounds are
//! done, otherwise waits for enough registered clients.
//!
//! **Fit.** Samples clients with the strategy, publishes the global parameters and waits until
//! every sampled client returned a [`FitRes`] or a failure, or the round timeout elapsed. The
//! results are reduced into new global parameters.
//!
//! **Evaluate.** Samples clients, waits for their [`EvaluateRes`] and reduces the losses and
//! metrics. With FedAvg configured as in the `coordinator` binary, the accuracies are reduced
//! with [`weighted_average`].
//!
//! **Failure.** Logs the error of the failed phase. A broken request channel shuts the
//! coordinator down, a failure before the global parameters exist restarts Init and a failed
//! Idle phase starts the same round again. Any other phase error leads to the next round.
//! Each Init run numbers its request, so a client asked again gets a task with a new key.
//!
//! **Shutdown.** Logs the history, keeps answering requests for the grace period and closes
//! the request channel.
//!
//! Registrations and disconnections are accepted in every phase. Phase data is published
//! through the [`EventSubscriber`] listeners that the REST layer reads from.
//!
//! [`FitRes`]: fedround_core::message::FitRes
//! [`EvaluateRes`]: fedround_core::message::EvaluateRes
//! [`weighted_average`]: fedround_core::weighted_average

pub mod clients;
pub mod coordinator;
pub mod events;
pub mod history;
pub mod initializer;
pub mod phases;
pub mod requests;

#[cfg(test)]
pub(crate) mod tests;

pub use self::{
    events::EventSubscriber,
    initializer::StateMachineInitializer,
    requests::{RequestError, RequestSender},
};

use derive_more::From;

use self::phases::{Evaluate, Failure, Fit, Idle, Init, PhaseState, Shutdown};

/// The coordinator state machine with all its states.
#[derive(From)]
pub enum StateMachine {
    Init(PhaseState<Init>),
    Idle(PhaseState<Idle>),
    Fit(PhaseState<Fit>),
    Evaluate(PhaseState<Evaluate>),
    Failure(PhaseState<Failure>),
    Shutdown(PhaseState<Shutdown>),
}

impl StateMachine {
    /// Moves the [`StateMachine`] to the next state and consumes the current one.
    ///
    /// Returns the next state or `None` if the [`StateMachine`] reached the state [`Shutdown`].
    pub async fn next(self) -> Option<Self> {
        match self {
            StateMachine::Init(state) => state.run_phase().await,
            StateMachine::Idle(state) => state.run_phase().await,
            StateMachine::Fit(state) => state.run_phase().await,
            StateMachine::Evaluate(state) => state.run_phase().await,
            StateMachine::Failure(state) => state.run_phase().await,
            StateMachine::Shutdown(state) => state.run_phase().await,
        }
    }

    /// Runs the state machine until it shuts down.
    ///
    /// The [`StateMachine`] shuts down once all rounds are done or all [`RequestSender`] halves
    /// have been dropped.
    pub async fn run(mut self) -> Option<()> {
        loop {
            self = self.next().await?;
        }
    }
}
