//! The polling loop of a participant.

use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use fedround_core::{
    message::{Message, Payload, Task, TaskKey},
    ClientId,
};

use crate::{
    settings::AgentSettings,
    traits::{Client, CoordinatorClient, Delivery},
};

/// Error returned by the [`Agent`].
#[derive(Debug, Error)]
pub enum AgentError<E>
where
    E: std::error::Error + 'static,
{
    #[error("giving up after {attempts} failed requests: {source}")]
    Unreachable { attempts: u32, source: E },
}

/// Connects a [`Client`] to the coordinator.
///
/// The agent registers, then polls for tasks. Every task is executed once, its result or
/// failure is sent back. When the coordinator shuts down, the agent disconnects and stops.
pub struct Agent<C, K> {
    client: C,
    coordinator: K,
    poll_interval: Duration,
    max_retries: u32,
}

impl<C, K> Agent<C, K>
where
    C: Client,
    K: CoordinatorClient,
{
    pub fn new(client: C, coordinator: K, settings: AgentSettings) -> Self {
        Self {
            client,
            coordinator,
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            max_retries: settings.max_retries,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn coordinator(&self) -> &K {
        &self.coordinator
    }

    /// Works on the coordinator's tasks until it shuts down.
    ///
    /// Returns the identifier the participant was registered with.
    ///
    /// # Errors
    /// Fails if more than `max_retries` consecutive requests to the coordinator failed.
    pub async fn run(&mut self) -> Result<ClientId, AgentError<K::Error>> {
        let client_id = self.register().await?;
        info!("registered as client {}", client_id);

        let mut last_task: Option<TaskKey> = None;
        loop {
            let task = self.next_task(&client_id).await?;
            if task == Task::Shutdown {
                info!("the coordinator is shutting down");
                let round_id = last_task.map(|key| key.round_id).unwrap_or_default();
                self.disconnect(client_id, round_id).await;
                return Ok(client_id);
            }

            if let Some(key) = task.key() {
                if last_task != Some(key) {
                    last_task = Some(key);
                    info!("starting task: {}", key);
                    if let Some(payload) = self.execute(task) {
                        let message = Message {
                            client_id,
                            round_id: key.round_id,
                            payload,
                        };
                        match self.deliver(message).await? {
                            Delivery::Accepted => debug!("result accepted: {}", key),
                            Delivery::Rejected => {
                                warn!("the coordinator rejected the result: {}", key)
                            }
                        }
                    }
                }
            }
            sleep(self.poll_interval).await;
        }
    }

    /// Runs the client for the given task and wraps the outcome into a payload.
    fn execute(&mut self, task: Task) -> Option<Payload> {
        let result = match task {
            Task::GetParameters { config, .. } => self
                .client
                .get_parameters(&config)
                .map(Payload::Parameters),
            Task::Fit { ins, .. } => self.client.fit(ins).map(Payload::Fit),
            Task::Evaluate { ins, .. } => self.client.evaluate(ins).map(Payload::Evaluate),
            Task::Wait | Task::Shutdown => return None,
        };
        Some(result.unwrap_or_else(|err| {
            warn!("task failed: {}", err);
            Payload::Failure(err.to_string())
        }))
    }

    async fn register(&mut self) -> Result<ClientId, AgentError<K::Error>> {
        let mut failures = 0;
        loop {
            match self.coordinator.register().await {
                Ok(client_id) => return Ok(client_id),
                Err(err) => self.retry(&mut failures, err).await?,
            }
        }
    }

    async fn next_task(&mut self, client_id: &ClientId) -> Result<Task, AgentError<K::Error>> {
        let mut failures = 0;
        loop {
            match self.coordinator.task(client_id).await {
                Ok(task) => return Ok(task),
                Err(err) => self.retry(&mut failures, err).await?,
            }
        }
    }

    async fn deliver(&mut self, message: Message) -> Result<Delivery, AgentError<K::Error>> {
        let mut failures = 0;
        loop {
            match self.coordinator.send(message.clone()).await {
                Ok(delivery) => return Ok(delivery),
                Err(err) => self.retry(&mut failures, err).await?,
            }
        }
    }

    async fn disconnect(&mut self, client_id: ClientId, round_id: u64) {
        let message = Message {
            client_id,
            round_id,
            payload: Payload::Disconnect,
        };
        // the coordinator may already be gone
        if let Err(err) = self.coordinator.send(message).await {
            debug!("failed to disconnect: {}", err);
        }
    }

    async fn retry(&self, failures: &mut u32, err: K::Error) -> Result<(), AgentError<K::Error>> {
        *failures += 1;
        if *failures > self.max_retries {
            return Err(AgentError::Unreachable {
                attempts: *failures,
                source: err,
            });
        }
        warn!(
            "request to the coordinator failed ({} of {} retries): {}",
            failures, self.max_retries, err
        );
        sleep(self.poll_interval).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use ndarray::{ArrayD, IxDyn};

    use fedround_core::{
        message::{EvaluateIns, EvaluateRes, FitIns, FitRes},
        Config,
        Metrics,
        Parameters,
    };

    use super::*;
    use crate::traits::ClientError;
    use fedround_core::message::TaskKind;

    #[derive(Debug, Error)]
    #[error("connection refused")]
    struct ConnectionRefused;

    /// A coordinator that hands out a fixed list of tasks and records the messages it gets.
    #[derive(Default)]
    struct ScriptedCoordinator {
        registrations: VecDeque<Result<ClientId, ConnectionRefused>>,
        tasks: VecDeque<Result<Task, ConnectionRefused>>,
        sent: Vec<Message>,
    }

    impl ScriptedCoordinator {
        fn new(tasks: Vec<Result<Task, ConnectionRefused>>) -> Self {
            Self {
                tasks: tasks.into_iter().collect(),
                ..Self::default()
            }
        }

        fn payloads(&self) -> Vec<(u64, &Payload)> {
            self.sent
                .iter()
                .map(|message| (message.round_id, &message.payload))
                .collect()
        }
    }

    #[async_trait]
    impl CoordinatorClient for ScriptedCoordinator {
        type Error = ConnectionRefused;

        async fn register(&mut self) -> Result<ClientId, Self::Error> {
            self.registrations
                .pop_front()
                .unwrap_or_else(|| Ok(ClientId::new()))
        }

        async fn task(&mut self, _client_id: &ClientId) -> Result<Task, Self::Error> {
            self.tasks.pop_front().unwrap_or(Ok(Task::Shutdown))
        }

        async fn send(&mut self, message: Message) -> Result<Delivery, Self::Error> {
            self.sent.push(message);
            Ok(Delivery::Accepted)
        }
    }

    #[derive(Default)]
    struct CountingClient {
        fail_fit: bool,
        /// Number of `get_parameters` calls that fail before one succeeds.
        get_parameters_failures: u32,
        calls: Vec<TaskKind>,
    }

    fn parameters() -> Parameters {
        Parameters::new(1, vec![ArrayD::zeros(IxDyn(&[2]))])
    }

    impl Client for CountingClient {
        fn get_parameters(&mut self, _config: &Config) -> Result<Parameters, ClientError> {
            self.calls.push(TaskKind::GetParameters);
            if self.get_parameters_failures > 0 {
                self.get_parameters_failures -= 1;
                return Err(crate::learner::LearnerError::EmptyDataset("training").into());
            }
            Ok(parameters())
        }

        fn fit(&mut self, ins: FitIns) -> Result<FitRes, ClientError> {
            self.calls.push(TaskKind::Fit);
            if self.fail_fit {
                return Err(crate::learner::LearnerError::EmptyDataset("training").into());
            }
            Ok(FitRes {
                parameters: ins.parameters,
                num_examples: 10,
                metrics: Metrics::new(),
            })
        }

        fn evaluate(&mut self, _ins: EvaluateIns) -> Result<EvaluateRes, ClientError> {
            self.calls.push(TaskKind::Evaluate);
            Ok(EvaluateRes {
                loss: 0.5,
                num_examples: 5,
                metrics: Metrics::new(),
            })
        }
    }

    fn settings(max_retries: u32) -> AgentSettings {
        AgentSettings {
            poll_interval_ms: 1,
            max_retries,
        }
    }

    fn get_parameters(attempt: u32) -> Result<Task, ConnectionRefused> {
        Ok(Task::GetParameters {
            round_id: 0,
            attempt,
            config: Config::new(),
        })
    }

    fn fit(round_id: u64) -> Result<Task, ConnectionRefused> {
        Ok(Task::Fit {
            round_id,
            ins: FitIns {
                parameters: parameters(),
                config: Config::new(),
            },
        })
    }

    fn evaluate(round_id: u64) -> Result<Task, ConnectionRefused> {
        Ok(Task::Evaluate {
            round_id,
            ins: EvaluateIns {
                parameters: parameters(),
                config: Config::new(),
            },
        })
    }

    #[tokio::test]
    async fn test_every_task_runs_once() {
        let coordinator = ScriptedCoordinator::new(vec![
            Ok(Task::Wait),
            get_parameters(0),
            get_parameters(0),
            Ok(Task::Wait),
            fit(1),
            fit(1),
            evaluate(1),
            evaluate(1),
            fit(2),
        ]);
        let mut agent = Agent::new(CountingClient::default(), coordinator, settings(0));
        let client_id = agent.run().await.unwrap();

        assert_eq!(
            agent.client().calls,
            vec![
                TaskKind::GetParameters,
                TaskKind::Fit,
                TaskKind::Evaluate,
                TaskKind::Fit
            ]
        );
        let payloads = agent.coordinator().payloads();
        assert_eq!(payloads.len(), 5);
        assert!(matches!(payloads[0], (0, Payload::Parameters(_))));
        assert!(matches!(payloads[1], (1, Payload::Fit(_))));
        assert!(matches!(payloads[2], (1, Payload::Evaluate(_))));
        assert!(matches!(payloads[3], (2, Payload::Fit(_))));
        assert!(matches!(payloads[4], (2, Payload::Disconnect)));
        assert!(agent
            .coordinator()
            .sent
            .iter()
            .all(|message| message.client_id == client_id));
    }

    #[tokio::test]
    async fn test_client_errors_are_reported() {
        let client = CountingClient {
            fail_fit: true,
            ..CountingClient::default()
        };
        let mut agent = Agent::new(client, ScriptedCoordinator::new(vec![fit(1)]), settings(0));
        agent.run().await.unwrap();

        let payloads = agent.coordinator().payloads();
        match payloads[0] {
            (1, Payload::Failure(reason)) => assert!(reason.contains("empty")),
            _ => panic!("expected a failure report"),
        }
    }

    #[tokio::test]
    async fn test_repeated_request_after_failure_runs_again() {
        let client = CountingClient {
            get_parameters_failures: 1,
            ..CountingClient::default()
        };
        let coordinator = ScriptedCoordinator::new(vec![
            get_parameters(0),
            Ok(Task::Wait),
            get_parameters(1),
            get_parameters(1),
        ]);
        let mut agent = Agent::new(client, coordinator, settings(0));
        agent.run().await.unwrap();

        assert_eq!(
            agent.client().calls,
            vec![TaskKind::GetParameters, TaskKind::GetParameters]
        );
        let payloads = agent.coordinator().payloads();
        assert_eq!(payloads.len(), 3);
        assert!(matches!(payloads[0], (0, Payload::Failure(_))));
        assert!(matches!(payloads[1], (0, Payload::Parameters(_))));
        assert!(matches!(payloads[2], (0, Payload::Disconnect)));
    }

    #[tokio::test]
    async fn test_transport_errors_are_retried() {
        let coordinator = ScriptedCoordinator::new(vec![
            Err(ConnectionRefused),
            Err(ConnectionRefused),
            fit(1),
            Err(ConnectionRefused),
            Err(ConnectionRefused),
        ]);
        let mut agent = Agent::new(CountingClient::default(), coordinator, settings(2));
        agent.run().await.unwrap();
        assert_eq!(agent.client().calls, vec![TaskKind::Fit]);

        let coordinator = ScriptedCoordinator::new(vec![
            Err(ConnectionRefused),
            Err(ConnectionRefused),
            Err(ConnectionRefused),
        ]);
        let mut agent = Agent::new(CountingClient::default(), coordinator, settings(2));
        assert!(matches!(
            agent.run().await,
            Err(AgentError::Unreachable { attempts: 3, .. })
        ));
    }

    #[tokio::test]
    async fn test_registration_is_retried() {
        let mut coordinator = ScriptedCoordinator::new(Vec::new());
        coordinator.registrations = vec![Err(ConnectionRefused)].into_iter().collect();
        let mut agent = Agent::new(CountingClient::default(), coordinator, settings(1));
        assert!(agent.run().await.is_ok());

        let mut coordinator = ScriptedCoordinator::new(Vec::new());
        coordinator.registrations = vec![Err(ConnectionRefused), Err(ConnectionRefused)]
            .into_iter()
            .collect();
        let mut agent = Agent::new(CountingClient::default(), coordinator, settings(1));
        assert!(agent.run().await.is_err());
        assert!(agent.coordinator().sent.is_empty());
    }
}
