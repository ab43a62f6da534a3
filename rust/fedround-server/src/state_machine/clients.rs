//! The registry of connected clients.

use std::collections::BTreeSet;

use tracing::debug;

use fedround_core::ClientId;

/// The clients currently registered with the coordinator.
#[derive(Debug, Default)]
pub struct ClientRegistry(BTreeSet<ClientId>);

impl ClientRegistry {
    pub fn register(&mut self, client_id: ClientId) {
        if self.0.insert(client_id) {
            debug!("client {} registered ({} available)", client_id, self.0.len());
        }
    }

    /// Removes the client and returns whether it was registered.
    pub fn remove(&mut self, client_id: &ClientId) -> bool {
        let removed = self.0.remove(client_id);
        if removed {
            debug!("client {} left ({} available)", client_id, self.0.len());
        }
        removed
    }

    pub fn contains(&self, client_id: &ClientId) -> bool {
        self.0.contains(client_id)
    }

    /// Gets the number of registered clients.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Gets the registered clients in a stable order.
    pub fn available(&self) -> Vec<ClientId> {
        self.0.iter().copied().collect()
    }
}
