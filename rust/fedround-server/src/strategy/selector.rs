use rand::seq::IteratorRandom;

use fedround_core::ClientId;

/// Samples clients for a phase.
pub trait Selector: Send + Sync {
    /// Selects at most `count` clients out of `available`.
    fn select(&mut self, count: usize, available: &[ClientId]) -> Vec<ClientId>;
}

/// Samples clients uniformly at random without replacement.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSelector;

impl Selector for RandomSelector {
    fn select(&mut self, count: usize, available: &[ClientId]) -> Vec<ClientId> {
        available
            .iter()
            .copied()
            .choose_multiple(&mut rand::thread_rng(), count)
    }
}
