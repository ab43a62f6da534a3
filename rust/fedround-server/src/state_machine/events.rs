//! This module provides the [`StateMachine`]'s `Events`, `EventSubscriber` and `EventPublisher`
//! types.
//!
//! [`StateMachine`]: crate::state_machine::StateMachine

use std::{collections::HashSet, sync::Arc};

use tokio::sync::watch;

use fedround_core::{ClientId, Config, Parameters};

use crate::state_machine::{history::History, phases::PhaseName};

/// An event emitted by the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct Event<E> {
    /// Metadata that associates this event to the round in which it is
    /// emitted.
    pub round_id: u64,
    /// The event itself
    pub event: E,
}

/// Global model update event.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelUpdate {
    Invalidate,
    New(Arc<Parameters>),
}

/// The clients sampled for a phase and the config they receive.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub phase: PhaseName,
    pub clients: HashSet<ClientId>,
    pub config: Config,
    /// Counts the selections of this phase within the round.
    pub attempt: u32,
}

impl Selection {
    /// Checks whether the client was sampled.
    pub fn contains(&self, client_id: &ClientId) -> bool {
        self.clients.contains(client_id)
    }
}

/// Client selection update event.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionUpdate {
    Invalidate,
    New(Arc<Selection>),
}

/// A convenience type to emit any coordinator event.
#[derive(Debug)]
pub struct EventPublisher {
    /// Round ID that is attached to all the events.
    round_id: u64,
    phase_tx: EventBroadcaster<PhaseName>,
    model_tx: EventBroadcaster<ModelUpdate>,
    selection_tx: EventBroadcaster<SelectionUpdate>,
    history_tx: EventBroadcaster<Arc<History>>,
}

/// The `EventSubscriber` hands out `EventListener`s for any
/// coordinator event.
#[derive(Debug)]
pub struct EventSubscriber {
    phase_rx: EventListener<PhaseName>,
    model_rx: EventListener<ModelUpdate>,
    selection_rx: EventListener<SelectionUpdate>,
    history_rx: EventListener<Arc<History>>,
}

impl EventPublisher {
    /// Initialize a new event publisher with the given initial events.
    pub fn init(round_id: u64, phase: PhaseName, model: ModelUpdate) -> (Self, EventSubscriber) {
        let (phase_tx, phase_rx) = watch::channel::<Event<PhaseName>>(Event {
            round_id,
            event: phase,
        });

        let (model_tx, model_rx) = watch::channel::<Event<ModelUpdate>>(Event {
            round_id,
            event: model,
        });

        let (selection_tx, selection_rx) = watch::channel::<Event<SelectionUpdate>>(Event {
            round_id,
            event: SelectionUpdate::Invalidate,
        });

        let (history_tx, history_rx) = watch::channel::<Event<Arc<History>>>(Event {
            round_id,
            event: Arc::new(History::default()),
        });

        let publisher = EventPublisher {
            round_id,
            phase_tx: phase_tx.into(),
            model_tx: model_tx.into(),
            selection_tx: selection_tx.into(),
            history_tx: history_tx.into(),
        };

        let subscriber = EventSubscriber {
            phase_rx: phase_rx.into(),
            model_rx: model_rx.into(),
            selection_rx: selection_rx.into(),
            history_rx: history_rx.into(),
        };

        (publisher, subscriber)
    }

    /// Set the round ID that is attached to the events the publisher broadcasts.
    pub fn set_round_id(&mut self, id: u64) {
        self.round_id = id;
    }

    fn event<T>(&self, event: T) -> Event<T> {
        Event {
            round_id: self.round_id,
            event,
        }
    }

    /// Emit a phase event
    pub fn broadcast_phase(&mut self, phase: PhaseName) {
        self.phase_tx.broadcast(self.event(phase));
    }

    /// Emit a model event
    pub fn broadcast_model(&mut self, update: ModelUpdate) {
        self.model_tx.broadcast(self.event(update));
    }

    /// Emit a client selection event
    pub fn broadcast_selection(&mut self, update: SelectionUpdate) {
        self.selection_tx.broadcast(self.event(update));
    }

    /// Emit a history event
    pub fn broadcast_history(&mut self, history: Arc<History>) {
        self.history_tx.broadcast(self.event(history));
    }
}

impl EventSubscriber {
    /// Get a listener for new phase events
    pub fn phase_listener(&self) -> EventListener<PhaseName> {
        self.phase_rx.clone()
    }

    /// Get a listener for new model events
    pub fn model_listener(&self) -> EventListener<ModelUpdate> {
        self.model_rx.clone()
    }

    /// Get a listener for client selection events
    pub fn selection_listener(&self) -> EventListener<SelectionUpdate> {
        self.selection_rx.clone()
    }

    /// Get a listener for history events
    pub fn history_listener(&self) -> EventListener<Arc<History>> {
        self.history_rx.clone()
    }
}

/// A listener for coordinator events. It can be used to either
/// retrieve the latest `Event<E>` emitted by the coordinator (with
/// `EventListener::get_latest`) or to wait for the next one (with
/// `EventListener::changed`).
#[derive(Debug, Clone)]
pub struct EventListener<E>(watch::Receiver<Event<E>>);

impl<E> From<watch::Receiver<Event<E>>> for EventListener<E> {
    fn from(receiver: watch::Receiver<Event<E>>) -> Self {
        EventListener(receiver)
    }
}

impl<E> EventListener<E>
where
    E: Clone,
{
    pub fn get_latest(&self) -> Event<E> {
        self.0.borrow().clone()
    }

    /// Waits for a new event and returns it, or `None` once the publisher is gone.
    pub async fn changed(&mut self) -> Option<Event<E>> {
        self.0.changed().await.ok()?;
        Some(self.get_latest())
    }
}

/// A channel to send `Event<E>` to all the `EventListener<E>`.
#[derive(Debug)]
pub struct EventBroadcaster<E>(watch::Sender<Event<E>>);

impl<E> EventBroadcaster<E> {
    /// Send `event` to all the `EventListener<E>`
    fn broadcast(&self, event: Event<E>) {
        // We don't care whether there's a listener or not
        let _ = self.0.send(event);
    }
}

impl<E> From<watch::Sender<Event<E>>> for EventBroadcaster<E> {
    fn from(sender: watch::Sender<Event<E>>) -> Self {
        Self(sender)
    }
}
