use std::fmt;

use tracing::{debug, info, warn};

use fedround_core::{
    federated_average,
    message::{EvaluateRes, FitRes},
    weighted_loss_avg,
    AggregationError,
    ClientId,
    Metrics,
    MetricsAggregationFn,
    Parameters,
};

use crate::{
    settings::StrategySettings,
    strategy::{ClientFailure, Strategy},
};

/// Federated averaging.
///
/// Global parameters are the example weighted mean of the clients' parameters, the
/// evaluation loss is the example weighted mean of the clients' losses. Metrics are only
/// aggregated if an aggregation function is configured for them.
#[derive(Clone)]
pub struct FedAvg {
    settings: StrategySettings,
    fit_metrics_aggregation_fn: Option<MetricsAggregationFn>,
    evaluate_metrics_aggregation_fn: Option<MetricsAggregationFn>,
}

impl FedAvg {
    pub fn new(settings: StrategySettings) -> Self {
        Self {
            settings,
            fit_metrics_aggregation_fn: None,
            evaluate_metrics_aggregation_fn: None,
        }
    }

    /// Sets the function that reduces the clients' fit metrics.
    pub fn with_fit_metrics_aggregation(mut self, f: MetricsAggregationFn) -> Self {
        self.fit_metrics_aggregation_fn = Some(f);
        self
    }

    /// Sets the function that reduces the clients' evaluation metrics.
    pub fn with_evaluate_metrics_aggregation(mut self, f: MetricsAggregationFn) -> Self {
        self.evaluate_metrics_aggregation_fn = Some(f);
        self
    }

    fn sample_size(&self, num_available: usize, fraction: f64, min_clients: usize) -> usize {
        let num_clients = (num_available as f64 * fraction) as usize;
        num_clients.max(min_clients).min(num_available)
    }

    fn skip_round(&self, num_results: usize, failures: &[ClientFailure]) -> bool {
        if num_results == 0 {
            return true;
        }
        if !failures.is_empty() && !self.settings.accept_failures {
            warn!(
                "{} client(s) failed and failures are not accepted: skipping aggregation",
                failures.len()
            );
            return true;
        }
        false
    }
}

impl fmt::Debug for FedAvg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FedAvg")
            .field("settings", &self.settings)
            .field(
                "fit_metrics_aggregation_fn",
                &self.fit_metrics_aggregation_fn.is_some(),
            )
            .field(
                "evaluate_metrics_aggregation_fn",
                &self.evaluate_metrics_aggregation_fn.is_some(),
            )
            .finish()
    }
}

fn aggregate_metrics(
    kind: &str,
    f: Option<MetricsAggregationFn>,
    metrics: &[(u64, Metrics)],
) -> Result<Metrics, AggregationError> {
    match f {
        Some(f) => f(metrics),
        None => {
            if metrics.iter().any(|(_, m)| !m.is_empty()) {
                warn!("no {} metrics aggregation function provided", kind);
            }
            Ok(Metrics::new())
        }
    }
}

impl Strategy for FedAvg {
    fn min_available_clients(&self) -> usize {
        self.settings.min_available_clients
    }

    fn num_fit_clients(&self, num_available: usize) -> usize {
        self.sample_size(
            num_available,
            self.settings.fraction_fit,
            self.settings.min_fit_clients,
        )
    }

    fn num_evaluate_clients(&self, num_available: usize) -> usize {
        if self.settings.fraction_evaluate == 0. {
            return 0;
        }
        self.sample_size(
            num_available,
            self.settings.fraction_evaluate,
            self.settings.min_evaluate_clients,
        )
    }

    fn aggregate_fit(
        &self,
        round_id: u64,
        results: &[(ClientId, FitRes)],
        failures: &[ClientFailure],
    ) -> Result<Option<(Parameters, Metrics)>, AggregationError> {
        if self.skip_round(results.len(), failures) {
            return Ok(None);
        }
        debug!("aggregating {} fit results of round {}", results.len(), round_id);

        let weighted: Vec<(Parameters, u64)> = results
            .iter()
            .map(|(_, res)| (res.parameters.clone(), res.num_examples))
            .collect();
        let parameters = federated_average(&weighted)?;

        let metrics: Vec<(u64, Metrics)> = results
            .iter()
            .map(|(_, res)| (res.num_examples, res.metrics.clone()))
            .collect();
        let metrics = aggregate_metrics("fit", self.fit_metrics_aggregation_fn, &metrics)?;
        Ok(Some((parameters, metrics)))
    }

    fn aggregate_evaluate(
        &self,
        round_id: u64,
        results: &[(ClientId, EvaluateRes)],
        failures: &[ClientFailure],
    ) -> Result<Option<(f64, Metrics)>, AggregationError> {
        if self.skip_round(results.len(), failures) {
            return Ok(None);
        }

        let losses: Vec<(u64, f64)> = results
            .iter()
            .map(|(_, res)| (res.num_examples, res.loss))
            .collect();
        let loss = weighted_loss_avg(&losses)?;

        // keep the arrival order of the results
        let metrics: Vec<(u64, Metrics)> = results
            .iter()
            .map(|(_, res)| (res.num_examples, res.metrics.clone()))
            .collect();
        let metrics =
            aggregate_metrics("evaluate", self.evaluate_metrics_aggregation_fn, &metrics)?;
        info!("round {}: loss {} metrics {:?}", round_id, loss, metrics);
        Ok(Some((loss, metrics)))
    }
}
