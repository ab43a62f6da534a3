//! A state machine initializer.

use crate::{
    settings::RoundSettings,
    state_machine::{
        coordinator::CoordinatorState,
        events::{EventPublisher, EventSubscriber, ModelUpdate},
        phases::{Init, PhaseName, PhaseState, Shared},
        requests::{RequestReceiver, RequestSender},
        StateMachine,
    },
    strategy::{RandomSelector, Selector, Strategy},
};

/// The state machine initializer that initializes a new state machine.
pub struct StateMachineInitializer {
    round_settings: RoundSettings,
    strategy: Box<dyn Strategy>,
    selector: Box<dyn Selector>,
}

impl StateMachineInitializer {
    /// Creates a new [`StateMachineInitializer`] that samples clients at random.
    pub fn new<S>(round_settings: RoundSettings, strategy: S) -> Self
    where
        S: Strategy + 'static,
    {
        Self {
            round_settings,
            strategy: Box::new(strategy),
            selector: Box::new(RandomSelector),
        }
    }

    /// Replaces the client sampler.
    pub fn with_selector<T>(mut self, selector: T) -> Self
    where
        T: Selector + 'static,
    {
        self.selector = Box::new(selector);
        self
    }

    /// Initializes a new [`StateMachine`] in the init phase.
    pub fn init(self) -> (StateMachine, RequestSender, EventSubscriber) {
        let coordinator_state = CoordinatorState::new(self.round_settings);
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
            self.strategy,
            self.selector,
        );
        let state_machine = StateMachine::from(PhaseState::<Init>::new(shared));
        (state_machine, request_tx, event_subscriber)
    }
}
