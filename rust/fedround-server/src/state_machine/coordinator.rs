//! The coordinator state.

use std::time::Duration;

use crate::settings::RoundSettings;

/// The coordinator state.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorState {
    /// The round ID.
    pub round_id: u64,
    /// The number of times initial parameters were requested.
    pub init_attempts: u32,
    /// The number of rounds to run.
    pub num_rounds: u64,
    /// The time to wait for enough registered clients.
    pub wait_timeout: Duration,
    /// The time a fit or evaluate phase may take.
    pub round_timeout: Duration,
    /// The time the shutdown phase keeps answering requests.
    pub shutdown_grace: Duration,
}

impl CoordinatorState {
    pub fn new(settings: RoundSettings) -> Self {
        Self {
            round_id: 0,
            init_attempts: 0,
            num_rounds: settings.num_rounds,
            wait_timeout: Duration::from_secs(settings.wait_timeout),
            round_timeout: Duration::from_secs(settings.round_timeout),
            shutdown_grace: Duration::from_secs(settings.shutdown_grace),
        }
    }

    /// Checks whether all configured rounds have been started.
    pub fn is_finished(&self) -> bool {
        self.round_id > self.num_rounds
    }
}
