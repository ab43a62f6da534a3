use async_trait::async_trait;
use thiserror::Error;

use fedround_core::{
    message::{EvaluateIns, EvaluateRes, FitIns, FitRes, Message, Task},
    ClientId,
    Config,
    LoadError,
    Parameters,
};

use crate::learner::LearnerError;

/// Error returned by a [`Client`] that failed its task.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{0}")]
    Load(#[from] LoadError),
    #[error("{0}")]
    Learner(#[from] LearnerError),
}

/// The local side of federated learning, called by the [`Agent`] for every task.
///
/// [`Agent`]: crate::Agent
pub trait Client {
    /// Gets the current local parameters.
    fn get_parameters(&mut self, config: &Config) -> Result<Parameters, ClientError>;

    /// Loads the given parameters, trains them on the local training set and returns the
    /// updated parameters.
    fn fit(&mut self, ins: FitIns) -> Result<FitRes, ClientError>;

    /// Loads the given parameters and evaluates them on the local test set.
    fn evaluate(&mut self, ins: EvaluateIns) -> Result<EvaluateRes, ClientError>;
}

/// Whether the coordinator accepted a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Accepted,
    /// The coordinator did not expect the message, e.g. because the phase is over.
    Rejected,
}

/// A trait used by the [`Agent`] to communicate with the coordinator.
///
/// [`Agent`]: crate::Agent
#[async_trait]
pub trait CoordinatorClient {
    type Error: std::error::Error + Send + 'static;

    /// Registers with the coordinator and returns the assigned identifier.
    async fn register(&mut self) -> Result<ClientId, Self::Error>;

    /// Gets the current task of the given client.
    async fn task(&mut self, client_id: &ClientId) -> Result<Task, Self::Error>;

    /// Sends a message to the coordinator.
    async fn send(&mut self, message: Message) -> Result<Delivery, Self::Error>;
}
