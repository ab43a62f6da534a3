use std::{collections::HashSet, iter, time::Duration};

use ndarray::{ArrayD, IxDyn};
use tracing::Span;
use tracing_subscriber::*;

use fedround_core::{
    message::{EvaluateRes, FitRes, Message, Payload, Task, TaskKind},
    ClientId,
    Metrics,
    Parameters,
    Scalar,
    ACCURACY,
};

use crate::{
    services::Fetcher,
    settings::{RoundSettings, StrategySettings},
    state_machine::{
        coordinator::CoordinatorState,
        events::{EventPublisher, EventSubscriber, ModelUpdate},
        phases::{PhaseName, Shared},
        requests::{RequestReceiver, RequestSender, StateMachineRequest},
    },
    strategy::{FedAvg, RandomSelector, Selector},
};

pub fn enable_logging() {
    let _fmt_subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(true)
        .try_init();
}

pub fn round_settings() -> RoundSettings {
    RoundSettings {
        num_rounds: 1,
        wait_timeout: 5,
        round_timeout: 5,
        shutdown_grace: 0,
    }
}

pub fn strategy_settings() -> StrategySettings {
    StrategySettings {
        fraction_fit: 1.0,
        fraction_evaluate: 1.0,
        min_fit_clients: 2,
        min_evaluate_clients: 2,
        min_available_clients: 2,
        accept_failures: true,
    }
}

pub fn init_shared() -> (Shared, RequestSender, EventSubscriber) {
    let coordinator_state = CoordinatorState::new(round_settings());
    let (event_publisher, event_subscriber) = EventPublisher::init(
        coordinator_state.round_id,
        PhaseName::Init,
        ModelUpdate::Invalidate,
    );
    let (request_rx, request_tx) = RequestReceiver::new();
    let shared = Shared::new(
        coordinator_state,
        event_publisher,
        request_rx,
        Box::new(FedAvg::new(strategy_settings())),
        Box::new(RandomSelector),
    );
    (shared, request_tx, event_subscriber)
}

/// Samples the first clients in registration order (ordered by ID).
#[derive(Debug, Default)]
pub struct FirstSelector;

impl Selector for FirstSelector {
    fn select(&mut self, count: usize, available: &[ClientId]) -> Vec<ClientId> {
        available.iter().take(count).copied().collect()
    }
}

/// Parameters of a single tensor of the given shape filled with `value`.
pub fn parameters(value: f32, shape: &[usize]) -> Parameters {
    Parameters::new(1, vec![ArrayD::from_elem(IxDyn(shape), value)])
}

pub fn accuracy(value: f64) -> Metrics {
    iter::once((ACCURACY.to_string(), Scalar::Float(value))).collect()
}

/// Registers a client through the request channel.
pub async fn register(requests: &RequestSender) -> ClientId {
    let client_id = ClientId::new();
    requests
        .request(StateMachineRequest::Register(client_id), Span::none())
        .await
        .unwrap();
    client_id
}

/// A scripted client that answers the coordinator's tasks until it shuts down.
#[derive(Debug, Clone)]
pub struct SimulatedClient {
    pub client_id: ClientId,
    /// Every tensor this client trains is filled with this value.
    pub value: f32,
    /// The tensor shape of the parameters this client trains.
    pub shape: Vec<usize>,
    pub num_examples: u64,
    pub loss: f64,
    pub accuracy: f64,
    /// Reports a failure instead of training.
    pub fail_fit: bool,
}

impl SimulatedClient {
    pub fn new(client_id: ClientId, value: f32, num_examples: u64, accuracy: f64) -> Self {
        Self {
            client_id,
            value,
            shape: vec![2, 2],
            num_examples,
            loss: 1.0 - accuracy,
            accuracy,
            fail_fit: false,
        }
    }

    fn payload(&self, task: &Task) -> Option<(u64, Payload)> {
        let payload = match task {
            Task::GetParameters { round_id, .. } => {
                (*round_id, Payload::Parameters(parameters(0.0, &self.shape)))
            }
            Task::Fit { round_id, .. } if self.fail_fit => {
                (*round_id, Payload::Failure("out of memory".to_string()))
            }
            Task::Fit { round_id, .. } => (
                *round_id,
                Payload::Fit(FitRes {
                    parameters: parameters(self.value, &self.shape),
                    num_examples: self.num_examples,
                    metrics: Metrics::new(),
                }),
            ),
            Task::Evaluate { round_id, .. } => (
                *round_id,
                Payload::Evaluate(EvaluateRes {
                    loss: self.loss,
                    num_examples: self.num_examples,
                    metrics: accuracy(self.accuracy),
                }),
            ),
            Task::Wait | Task::Shutdown => return None,
        };
        Some(payload)
    }

    /// Polls for tasks and answers each of them once. Returns the kinds of the tasks handled.
    pub async fn run(self, fetcher: Fetcher, requests: RequestSender) -> Vec<(u64, TaskKind)> {
        let mut handled = Vec::new();
        let mut seen = HashSet::new();
        loop {
            let task = fetcher.task(&self.client_id);
            if task == Task::Shutdown {
                return handled;
            }
            if let Some(key) = task.key() {
                if seen.insert(key) {
                    let key = (key.round_id, key.kind);
                    if let Some((round_id, payload)) = self.payload(&task) {
                        let message = Message {
                            client_id: self.client_id,
                            round_id,
                            payload,
                        };
                        if requests
                            .request(message.into(), Span::none())
                            .await
                            .is_ok()
                        {
                            handled.push(key);
                        }
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}
