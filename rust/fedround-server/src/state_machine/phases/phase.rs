use std::{collections::HashSet, fmt, sync::Arc};

use async_trait::async_trait;
use derive_more::Display;
use futures::StreamExt;
use tokio::time::timeout;
use tracing::{debug, error, error_span, info, warn, Span};
use tracing_futures::Instrument;

use fedround_core::{ClientId, Parameters};

use crate::{
    state_machine::{
        clients::ClientRegistry,
        coordinator::CoordinatorState,
        events::{EventPublisher, ModelUpdate},
        history::History,
        phases::{Failure, Handler, PhaseError},
        requests::{RequestError, RequestReceiver, ResponseSender, StateMachineRequest},
        StateMachine,
    },
    strategy::{Selector, Strategy},
};

/// The name of the current phase.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq, Hash)]
pub enum PhaseName {
    #[display(fmt = "Init")]
    Init,
    #[display(fmt = "Idle")]
    Idle,
    #[display(fmt = "Fit")]
    Fit,
    #[display(fmt = "Evaluate")]
    Evaluate,
    #[display(fmt = "Failure")]
    Failure,
    #[display(fmt = "Shutdown")]
    Shutdown,
}

/// A trait that must be implemented by a state in order to move to a next state.
///
/// See the [module level documentation] for more details.
///
/// [module level documentation]: crate::state_machine
#[async_trait]
pub trait Phase {
    /// The name of the current phase.
    const NAME: PhaseName;

    /// Performs the tasks of this phase.
    async fn process(&mut self) -> Result<(), PhaseError>;

    /// Broadcasts data of this phase (nothing by default).
    fn broadcast(&mut self) {}

    /// Moves from this phase to the next phase.
    fn next(self) -> Option<StateMachine>;
}

/// A struct that contains the coordinator state and the I/O interfaces that are shared and
/// accessible by all `PhaseState`s.
pub struct Shared {
    /// The coordinator state.
    pub(in crate::state_machine) state: CoordinatorState,
    /// The request receiver half.
    pub(in crate::state_machine) request_rx: RequestReceiver,
    /// The event publisher.
    pub(in crate::state_machine) events: EventPublisher,
    /// The registered clients.
    pub(in crate::state_machine) clients: ClientRegistry,
    /// The strategy deciding on sampling and aggregation.
    pub(in crate::state_machine) strategy: Box<dyn Strategy>,
    /// The client sampler.
    pub(in crate::state_machine) selector: Box<dyn Selector>,
    /// The current global parameters, if already initialized.
    pub(in crate::state_machine) global_parameters: Option<Arc<Parameters>>,
    /// The aggregated results so far.
    pub(in crate::state_machine) history: History,
}

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("state", &self.state)
            .field("request_rx", &self.request_rx)
            .field("events", &self.events)
            .field("clients", &self.clients)
            .field("history", &self.history)
            .finish()
    }
}

impl Shared {
    /// Creates a new shared state.
    pub fn new(
        coordinator_state: CoordinatorState,
        publisher: EventPublisher,
        request_rx: RequestReceiver,
        strategy: Box<dyn Strategy>,
        selector: Box<dyn Selector>,
    ) -> Self {
        Self {
            state: coordinator_state,
            request_rx,
            events: publisher,
            clients: ClientRegistry::default(),
            strategy,
            selector,
            global_parameters: None,
            history: History::default(),
        }
    }

    /// Sets the round ID to the given value.
    pub fn set_round_id(&mut self, id: u64) {
        self.state.round_id = id;
        self.events.set_round_id(id);
    }

    /// Returns the current round ID.
    pub fn round_id(&self) -> u64 {
        self.state.round_id
    }

    /// Samples `count` of the registered clients.
    pub fn select(&mut self, count: usize) -> HashSet<ClientId> {
        let available = self.clients.available();
        self.selector.select(count, &available).into_iter().collect()
    }

    /// Replaces the global parameters and broadcasts them.
    pub fn set_global_parameters(&mut self, parameters: Parameters) {
        let parameters = Arc::new(parameters);
        self.global_parameters = Some(parameters.clone());
        info!("broadcasting the new global parameters");
        self.events.broadcast_model(ModelUpdate::New(parameters));
    }

    /// Rejects requests that belong to another round.
    pub fn check_round(&self, round_id: u64) -> Result<(), RequestError> {
        if round_id == self.state.round_id {
            Ok(())
        } else {
            Err(RequestError::MessageRejected("message belongs to another round"))
        }
    }
}

/// The state corresponding to a phase of the coordinator.
///
/// This contains the state-dependent `private` state and the state-independent `shared` state
/// which is shared across state transitions.
pub struct PhaseState<S> {
    /// The private state.
    pub(in crate::state_machine) private: S,
    /// The shared coordinator state and I/O interfaces.
    pub(in crate::state_machine) shared: Shared,
}

impl<S> PhaseState<S>
where
    S: Send,
    Self: Phase + Handler,
{
    /// Runs the current phase to completion.
    ///
    /// 1. Performs the phase tasks.
    /// 2. Purges outdated phase messages.
    /// 3. Broadcasts the phase data.
    /// 4. Transitions to the next phase.
    pub async fn run_phase(mut self) -> Option<StateMachine> {
        let phase = Self::NAME;
        let span = error_span!("run_phase", phase = %phase, round_id = self.shared.round_id());

        async move {
            info!("starting phase");
            self.shared.events.broadcast_phase(phase);

            if let Err(err) = self.process().await {
                warn!("failed to perform the phase tasks");
                return Some(self.into_failure_state(phase, err));
            }
            info!("phase ran successfully");

            if let Err(err) = self.purge_outdated_requests() {
                warn!("failed to purge outdated requests");
                match phase {
                    PhaseName::Failure | PhaseName::Shutdown => {
                        debug!(
                            "already in {} phase: ignoring error while purging outdated requests",
                            phase,
                        );
                    }
                    _ => return Some(self.into_failure_state(phase, err)),
                }
            }

            self.broadcast();

            info!("transitioning to the next phase");
            self.next()
        }
        .instrument(span)
        .await
    }

    /// Purges all pending requests that are considered outdated at the end of a successful phase.
    ///
    /// Registrations and disconnections are still honored.
    fn purge_outdated_requests(&mut self) -> Result<(), PhaseError> {
        info!("discarding outdated requests");
        while let Some((req, span, resp_tx)) = self.try_next_request()? {
            let _span_guard = span.enter();
            let response = match req {
                StateMachineRequest::Register(_) | StateMachineRequest::Disconnect(_) => {
                    self.handle_membership(req)
                }
                _ => {
                    debug!("discarding outdated request");
                    Err(RequestError::MessageDiscarded)
                }
            };
            let _ = resp_tx.send(response);
        }
        Ok(())
    }
}

impl<S> PhaseState<S>
where
    Self: Handler,
{
    /// Processes a single request.
    ///
    /// Registrations and disconnections are handled the same way in every phase, every other
    /// request is passed on to the phase's [`Handler`].
    pub(in crate::state_machine) fn process_single(
        &mut self,
        req: StateMachineRequest,
        span: Span,
        resp_tx: ResponseSender,
    ) -> bool {
        let _span_guard = span.enter();

        let response = match req {
            StateMachineRequest::Register(_) | StateMachineRequest::Disconnect(_) => {
                self.handle_membership(req)
            }
            req => self.handle_request(req),
        };
        let accepted = match &response {
            Ok(()) => {
                debug!("request accepted");
                true
            }
            Err(err) => {
                debug!("request rejected: {}", err);
                false
            }
        };

        // This may error out if the receiver has already been dropped but it doesn't matter for us.
        let _ = resp_tx.send(response);
        accepted
    }

    fn handle_membership(&mut self, req: StateMachineRequest) -> Result<(), RequestError> {
        match req {
            StateMachineRequest::Register(client_id) => {
                self.shared.clients.register(client_id);
                Ok(())
            }
            StateMachineRequest::Disconnect(client_id) => {
                if self.shared.clients.remove(&client_id) {
                    self.handle_disconnect(&client_id);
                    Ok(())
                } else {
                    Err(RequestError::MessageRejected("client is not registered"))
                }
            }
            _ => Err(RequestError::InternalError("not a membership request")),
        }
    }

    /// Waits until at least `min` clients are registered.
    ///
    /// # Errors
    /// Fails if the clients did not show up within the configured wait timeout.
    pub(in crate::state_machine) async fn wait_for_clients(
        &mut self,
        min: usize,
    ) -> Result<(), PhaseError> {
        if self.shared.clients.len() >= min {
            return Ok(());
        }
        info!(
            "waiting for {} clients ({} available)",
            min,
            self.shared.clients.len()
        );
        let wait_timeout = self.shared.state.wait_timeout;
        timeout(wait_timeout, self.process_until_available(min)).await??;
        Ok(())
    }

    async fn process_until_available(&mut self, min: usize) -> Result<(), PhaseError> {
        while self.shared.clients.len() < min {
            let (req, span, resp_tx) = self.next_request().await?;
            self.process_single(req, span, resp_tx);
        }
        Ok(())
    }
}

impl<S> PhaseState<S> {
    /// Receives the next [`StateMachineRequest`].
    ///
    /// # Errors
    /// Returns [`PhaseError::RequestChannel`] when all sender halves have been dropped.
    pub async fn next_request(
        &mut self,
    ) -> Result<(StateMachineRequest, Span, ResponseSender), PhaseError> {
        debug!("waiting for the next incoming request");
        self.shared.request_rx.next().await.ok_or_else(|| {
            error!("request receiver broken: senders have been dropped");
            PhaseError::RequestChannel("all message senders have been dropped!")
        })
    }

    pub fn try_next_request(
        &mut self,
    ) -> Result<Option<(StateMachineRequest, Span, ResponseSender)>, PhaseError> {
        match self.shared.request_rx.try_recv() {
            Some(Some(item)) => Ok(Some(item)),
            None => {
                debug!("no pending request");
                Ok(None)
            }
            Some(None) => {
                warn!("failed to get next pending request: channel shut down");
                Err(PhaseError::RequestChannel(
                    "all message senders have been dropped!",
                ))
            }
        }
    }

    fn into_failure_state(self, phase: PhaseName, err: PhaseError) -> StateMachine {
        PhaseState::<Failure>::new(self.shared, phase, err).into()
    }
}
