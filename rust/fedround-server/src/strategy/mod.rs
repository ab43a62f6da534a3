//! Federated learning strategies and client selection.
//!
//! A [`Strategy`] decides how many clients take part in each phase, which config they receive
//! and how their results are reduced. The coordinator ships with [`FedAvg`]. Which clients are
//! sampled is left to a [`Selector`].

mod fedavg;
mod selector;

pub use self::{
    fedavg::FedAvg,
    selector::{RandomSelector, Selector},
};

use std::iter;

use fedround_core::{
    message::{EvaluateRes, FitRes, SERVER_ROUND},
    AggregationError,
    ClientId,
    Config,
    Metrics,
    Parameters,
    Scalar,
};

/// A client that failed its task, with the reported reason.
pub type ClientFailure = (ClientId, String);

/// The decisions the coordinator delegates in every round.
pub trait Strategy: Send + Sync {
    /// The number of registered clients required before sampling.
    fn min_available_clients(&self) -> usize;

    /// The number of clients to sample for training.
    fn num_fit_clients(&self, num_available: usize) -> usize;

    /// The number of clients to sample for evaluation. Zero skips the evaluation.
    fn num_evaluate_clients(&self, num_available: usize) -> usize;

    /// The config sent along with the fit instructions.
    fn configure_fit(&self, round_id: u64) -> Config {
        round_config(round_id)
    }

    /// The config sent along with the evaluate instructions.
    fn configure_evaluate(&self, round_id: u64) -> Config {
        round_config(round_id)
    }

    /// Reduces the fit results into new global parameters and aggregated fit metrics.
    ///
    /// Returns `None` if the round should not update the global parameters.
    fn aggregate_fit(
        &self,
        round_id: u64,
        results: &[(ClientId, FitRes)],
        failures: &[ClientFailure],
    ) -> Result<Option<(Parameters, Metrics)>, AggregationError>;

    /// Reduces the evaluation results into a loss and aggregated evaluation metrics.
    ///
    /// Returns `None` if the round has nothing to report.
    fn aggregate_evaluate(
        &self,
        round_id: u64,
        results: &[(ClientId, EvaluateRes)],
        failures: &[ClientFailure],
    ) -> Result<Option<(f64, Metrics)>, AggregationError>;
}

fn round_config(round_id: u64) -> Config {
    iter::once((SERVER_ROUND.to_string(), Scalar::Int(round_id as i64))).collect()
}
