use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use fedround_core::ClientId;

use crate::state_machine::{
    phases::{PhaseError, PhaseState},
    requests::{RequestError, StateMachineRequest},
};

/// A trait that must be implemented by a state to handle a request.
pub trait Handler {
    /// Handles a phase specific request.
    ///
    /// Registrations and disconnections never reach this method.
    ///
    /// # Errors
    /// Fails if the request is not expected in the current phase.
    fn handle_request(&mut self, req: StateMachineRequest) -> Result<(), RequestError>;

    /// Reacts to a client leaving the federation (nothing by default).
    fn handle_disconnect(&mut self, _client_id: &ClientId) {}

    /// Checks whether the phase received everything it waits for.
    fn is_complete(&self) -> bool {
        false
    }
}

/// A counter to keep track of handled messages.
#[derive(Debug, Default)]
struct Counter {
    /// The number of messages successfully processed.
    accepted: u64,
    /// The number of messages failed to processed.
    rejected: u64,
}

impl Counter {
    fn count(&mut self, accepted: bool) {
        if accepted {
            self.accepted += 1;
        } else {
            self.rejected += 1;
        }
    }

    fn report(&self) {
        info!("in total {} messages accepted", self.accepted);
        info!("in total {} messages rejected", self.rejected);
    }
}

impl<S> PhaseState<S>
where
    Self: Handler,
{
    /// Processes requests until the phase is complete.
    ///
    /// # Errors
    /// Fails if the phase is not complete within `dur` or all connections were dropped.
    pub(in crate::state_machine) async fn process_until_complete(
        &mut self,
        dur: Duration,
    ) -> Result<(), PhaseError> {
        let mut counter = Counter::default();
        info!("processing requests for at most {:?}", dur);
        let result = timeout(dur, self.process_until_done(&mut counter)).await;
        counter.report();
        result??;
        Ok(())
    }

    /// Processes requests until the phase is complete or `dur` elapsed.
    ///
    /// Returns whether the phase completed in time.
    ///
    /// # Errors
    /// Fails if all connections were dropped.
    pub(in crate::state_machine) async fn process_until_complete_or_timeout(
        &mut self,
        dur: Duration,
    ) -> Result<bool, PhaseError> {
        let mut counter = Counter::default();
        info!("processing requests for at most {:?}", dur);
        let result = timeout(dur, self.process_until_done(&mut counter)).await;
        counter.report();
        match result {
            Ok(processed) => processed.map(|_| true),
            Err(_) => {
                warn!("phase timed out after {:?}", dur);
                Ok(false)
            }
        }
    }

    /// Processes requests for as long as the given duration.
    pub(in crate::state_machine) async fn process_during(
        &mut self,
        dur: Duration,
    ) -> Result<(), PhaseError> {
        let mut counter = Counter::default();
        let deadline = tokio::time::sleep(dur);
        tokio::pin!(deadline);

        let result = loop {
            tokio::select! {
                biased;

                _ = &mut deadline => {
                    debug!("duration elapsed");
                    break Ok(());
                }
                next = self.next_request() => {
                    match next {
                        Ok((req, span, resp_tx)) => {
                            let accepted = self.process_single(req, span, resp_tx);
                            counter.count(accepted);
                        }
                        Err(err) => break Err(err),
                    }
                }
            }
        };
        counter.report();
        result
    }

    async fn process_until_done(&mut self, counter: &mut Counter) -> Result<(), PhaseError> {
        while !self.is_complete() {
            let (req, span, resp_tx) = self.next_request().await?;
            let accepted = self.process_single(req, span, resp_tx);
            counter.count(accepted);
        }
        Ok(())
    }
}
