use std::sync::Arc;

use fedround_core::{
    message::{EvaluateIns, FitIns, Task},
    ClientId,
    Parameters,
};

use crate::state_machine::{
    events::{Event, EventListener, EventSubscriber, ModelUpdate, SelectionUpdate},
    phases::PhaseName,
};

/// Reads the latest coordinator events to answer client requests.
#[derive(Debug, Clone)]
pub struct Fetcher {
    phase: EventListener<PhaseName>,
    selection: EventListener<SelectionUpdate>,
    model: EventListener<ModelUpdate>,
}

impl Fetcher {
    pub fn new(events: &EventSubscriber) -> Self {
        Self {
            phase: events.phase_listener(),
            selection: events.selection_listener(),
            model: events.model_listener(),
        }
    }

    /// Gets the current phase.
    pub fn phase(&self) -> Event<PhaseName> {
        self.phase.get_latest()
    }

    /// Gets the current global parameters, if any.
    pub fn model(&self) -> Option<Arc<Parameters>> {
        match self.model.get_latest().event {
            ModelUpdate::New(parameters) => Some(parameters),
            ModelUpdate::Invalidate => None,
        }
    }

    /// Gets the task the given client should work on right now.
    pub fn task(&self, client_id: &ClientId) -> Task {
        let phase = self.phase();
        if phase.event == PhaseName::Shutdown {
            return Task::Shutdown;
        }

        let selection = match self.selection.get_latest() {
            Event {
                round_id,
                event: SelectionUpdate::New(selection),
            } if round_id == phase.round_id
                && selection.phase == phase.event
                && selection.contains(client_id) =>
            {
                selection
            }
            _ => return Task::Wait,
        };
        let round_id = phase.round_id;
        let config = selection.config.clone();

        match phase.event {
            PhaseName::Init => Task::GetParameters {
                round_id,
                attempt: selection.attempt,
                config,
            },
            PhaseName::Fit | PhaseName::Evaluate => {
                let parameters = match self.model() {
                    Some(parameters) => parameters.as_ref().clone(),
                    None => return Task::Wait,
                };
                if phase.event == PhaseName::Fit {
                    Task::Fit {
                        round_id,
                        ins: FitIns { parameters, config },
                    }
                } else {
                    Task::Evaluate {
                        round_id,
                        ins: EvaluateIns { parameters, config },
                    }
                }
            }
            _ => Task::Wait,
        }
    }
}
