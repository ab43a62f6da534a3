//! Tasks handed out by the coordinator and the messages clients send back.
//!
//! Both travel as `bincode` encoded bodies over the coordinator's REST API.

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::{
    common::{ClientId, Config, Metrics},
    parameters::Parameters,
};

/// The config key holding the current round.
pub const SERVER_ROUND: &str = "server_round";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Instructions for a local training step.
pub struct FitIns {
    pub parameters: Parameters,
    pub config: Config,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// The result of a local training step.
pub struct FitRes {
    /// The locally updated parameters.
    pub parameters: Parameters,
    /// The size of the local training set.
    pub num_examples: u64,
    pub metrics: Metrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Instructions for a local evaluation step.
pub struct EvaluateIns {
    pub parameters: Parameters,
    pub config: Config,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// The result of a local evaluation step.
pub struct EvaluateRes {
    pub loss: f64,
    /// The size of the local test set.
    pub num_examples: u64,
    /// Holds at least the local accuracy.
    pub metrics: Metrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
/// The kind of a [`Task`] that requires work from a client.
pub enum TaskKind {
    #[display(fmt = "get_parameters")]
    GetParameters,
    #[display(fmt = "fit")]
    Fit,
    #[display(fmt = "evaluate")]
    Evaluate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// What the coordinator currently asks a client to do.
pub enum Task {
    /// Nothing to do, poll again later.
    Wait,
    /// Send the local parameters to initialize the global model.
    ///
    /// `attempt` counts the requests for initial parameters within the round, starting at 0.
    GetParameters {
        round_id: u64,
        attempt: u32,
        config: Config,
    },
    Fit { round_id: u64, ins: FitIns },
    Evaluate { round_id: u64, ins: EvaluateIns },
    /// The coordinator is shutting down.
    Shutdown,
}

impl Task {
    /// Returns the key of a task that requires work, `None` otherwise.
    pub fn key(&self) -> Option<TaskKey> {
        match self {
            Task::GetParameters {
                round_id, attempt, ..
            } => Some(TaskKey {
                round_id: *round_id,
                kind: TaskKind::GetParameters,
                attempt: *attempt,
            }),
            Task::Fit { round_id, .. } => Some(TaskKey::new(*round_id, TaskKind::Fit)),
            Task::Evaluate { round_id, .. } => Some(TaskKey::new(*round_id, TaskKind::Evaluate)),
            Task::Wait | Task::Shutdown => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display(fmt = "round {} {} (attempt {})", round_id, kind, attempt)]
/// Identifies the work a [`Task`] asks for. A client carries out each key at most once.
pub struct TaskKey {
    pub round_id: u64,
    pub kind: TaskKind,
    /// Tells repeated requests of the same kind within a round apart.
    pub attempt: u32,
}

impl TaskKey {
    /// Creates the key of a first attempt.
    pub fn new(round_id: u64, kind: TaskKind) -> Self {
        Self {
            round_id,
            kind,
            attempt: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A message sent by a client to the coordinator.
pub struct Message {
    pub client_id: ClientId,
    /// The round the payload belongs to.
    pub round_id: u64,
    pub payload: Payload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// The content of a [`Message`].
pub enum Payload {
    /// The client's initial parameters.
    Parameters(Parameters),
    Fit(FitRes),
    Evaluate(EvaluateRes),
    /// The client failed to carry out its task.
    Failure(String),
    /// The client leaves the federation.
    Disconnect,
}
