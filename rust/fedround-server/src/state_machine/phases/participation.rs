use std::collections::HashSet;

use tracing::warn;

use fedround_core::ClientId;

use crate::{state_machine::requests::RequestError, strategy::ClientFailure};

/// The clients sampled for a phase and what they answered so far.
#[derive(Debug)]
pub struct Participation<R> {
    selected: HashSet<ClientId>,
    results: Vec<(ClientId, R)>,
    failures: Vec<ClientFailure>,
}

impl<R> Default for Participation<R> {
    fn default() -> Self {
        Self {
            selected: HashSet::new(),
            results: Vec::new(),
            failures: Vec::new(),
        }
    }
}

impl<R> Participation<R> {
    pub fn new(selected: HashSet<ClientId>) -> Self {
        Self {
            selected,
            ..Self::default()
        }
    }

    pub fn selected(&self) -> &HashSet<ClientId> {
        &self.selected
    }

    /// Gets the results in the order they arrived.
    pub fn results(&self) -> &[(ClientId, R)] {
        &self.results
    }

    pub fn failures(&self) -> &[ClientFailure] {
        &self.failures
    }

    fn has_answered(&self, client_id: &ClientId) -> bool {
        self.results.iter().any(|(id, _)| id == client_id)
            || self.failures.iter().any(|(id, _)| id == client_id)
    }

    fn check_pending(&self, client_id: &ClientId) -> Result<(), RequestError> {
        if !self.selected.contains(client_id) {
            return Err(RequestError::MessageRejected("client was not sampled"));
        }
        if self.has_answered(client_id) {
            return Err(RequestError::MessageRejected("client already answered"));
        }
        Ok(())
    }

    /// Records the result of a sampled client.
    ///
    /// # Errors
    /// Fails if the client was not sampled or already answered.
    pub fn add_result(&mut self, client_id: ClientId, result: R) -> Result<(), RequestError> {
        self.check_pending(&client_id)?;
        self.results.push((client_id, result));
        Ok(())
    }

    /// Records the failure of a sampled client.
    ///
    /// # Errors
    /// Fails if the client was not sampled or already answered.
    pub fn add_failure(
        &mut self,
        client_id: ClientId,
        reason: impl Into<String>,
    ) -> Result<(), RequestError> {
        self.check_pending(&client_id)?;
        let reason = reason.into();
        warn!("client {} failed: {}", client_id, reason);
        self.failures.push((client_id, reason));
        Ok(())
    }

    /// Checks whether every sampled client answered.
    pub fn is_complete(&self) -> bool {
        self.results.len() + self.failures.len() >= self.selected.len()
    }

    /// Counts every sampled client that did not answer as failed.
    pub fn time_out(&mut self) {
        let missing: Vec<ClientId> = self
            .selected
            .iter()
            .filter(|id| !self.has_answered(id))
            .copied()
            .collect();
        for client_id in missing {
            let _ = self.add_failure(client_id, "no answer before the round timeout");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_participation() {
        let (a, b, c) = (ClientId::new(), ClientId::new(), ClientId::new());
        let mut participation: Participation<u64> =
            Participation::new(vec![a, b].into_iter().collect());
        assert!(!participation.is_complete());

        assert!(participation.add_result(a, 1).is_ok());
        assert!(participation.add_result(a, 2).is_err());
        assert!(participation.add_failure(a, "late").is_err());
        assert!(participation.add_result(c, 3).is_err());
        assert!(!participation.is_complete());

        participation.time_out();
        assert!(participation.is_complete());
        assert_eq!(participation.results(), &[(a, 1)]);
        assert_eq!(participation.failures().len(), 1);
        assert_eq!(participation.failures()[0].0, b);
    }
}
