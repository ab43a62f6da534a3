//! Weighted reductions over per-client results.
//!
//! All reductions weight each client by the number of local examples it reported and
//! accumulate in `f64`. They share one input policy:
//!
//! - an empty input is an [`AggregationError::InvalidAggregationInput`];
//! - a zero count contributes zero weight, but counts summing to zero are invalid;
//! - a count sum overflowing `u64` is invalid;
//! - non-finite values are invalid instead of silently poisoning the result with NaN.

use std::iter;

use ndarray::ArrayD;
use thiserror::Error;
use tracing::debug;

use crate::{
    common::{Metrics, Scalar},
    parameters::{Parameters, SchemaMismatch},
};

/// The metrics key holding a client's accuracy.
pub const ACCURACY: &str = "accuracy";

/// A function reducing per-client `(num_examples, metrics)` pairs into round level metrics.
pub type MetricsAggregationFn = fn(&[(u64, Metrics)]) -> Result<Metrics, AggregationError>;

#[derive(Debug, Error, PartialEq)]
/// An error related to the aggregation of client results.
pub enum AggregationError {
    #[error("invalid aggregation input: {0}")]
    InvalidAggregationInput(String),
    #[error("parameters of result {index} are incompatible with the first result: {reason}")]
    IncompatibleParameters {
        index: usize,
        reason: SchemaMismatch,
    },
}

impl AggregationError {
    fn invalid(reason: impl Into<String>) -> Self {
        AggregationError::InvalidAggregationInput(reason.into())
    }
}

/// Computes the example weighted mean of the clients' accuracies.
///
/// Returns a metrics map holding only [`ACCURACY`], equal to
/// `sum(num_examples * accuracy) / sum(num_examples)`.
///
/// # Errors
/// Fails with [`AggregationError::InvalidAggregationInput`] if the input is empty, the counts sum
/// to zero or overflow, or an accuracy is missing, non-numeric or not finite.
pub fn weighted_average(metrics: &[(u64, Metrics)]) -> Result<Metrics, AggregationError> {
    if metrics.is_empty() {
        return Err(AggregationError::invalid("no metrics to aggregate"));
    }

    let mut accuracies = Vec::with_capacity(metrics.len());
    let mut examples = Vec::with_capacity(metrics.len());
    for (index, (num_examples, client_metrics)) in metrics.iter().enumerate() {
        let accuracy = client_metrics
            .get(ACCURACY)
            .ok_or_else(|| AggregationError::invalid(format!("result {} has no accuracy", index)))?
            .as_f64()
            .ok_or_else(|| {
                AggregationError::invalid(format!("accuracy of result {} is not numeric", index))
            })?;
        if !accuracy.is_finite() {
            return Err(AggregationError::invalid(format!(
                "accuracy of result {} is {}",
                index, accuracy
            )));
        }
        accuracies.push(*num_examples as f64 * accuracy);
        examples.push(*num_examples);
    }
    debug!("accuracies: {:?}", accuracies);
    debug!("examples: {:?}", examples);

    let total = total_examples(examples.iter().copied())?;
    let accuracy = accuracies.iter().sum::<f64>() / total as f64;
    Ok(iter::once((ACCURACY.to_string(), Scalar::Float(accuracy))).collect())
}

/// Computes the example weighted mean of the clients' losses.
///
/// # Errors
/// Fails under the same conditions as [`weighted_average`].
pub fn weighted_loss_avg(results: &[(u64, f64)]) -> Result<f64, AggregationError> {
    if results.is_empty() {
        return Err(AggregationError::invalid("no losses to aggregate"));
    }
    if let Some(index) = results.iter().position(|(_, loss)| !loss.is_finite()) {
        return Err(AggregationError::invalid(format!(
            "loss of result {} is {}",
            index, results[index].1
        )));
    }
    let total = total_examples(results.iter().map(|(num_examples, _)| *num_examples))?;
    let weighted: f64 = results
        .iter()
        .map(|(num_examples, loss)| *num_examples as f64 * loss)
        .sum();
    Ok(weighted / total as f64)
}

/// Computes the example weighted mean of the clients' parameters (FedAvg).
///
/// # Errors
/// Fails if the input is empty, the counts are invalid, a parameter value is not finite, or the
/// parameters differ in version, tensor count or shapes.
pub fn federated_average(results: &[(Parameters, u64)]) -> Result<Parameters, AggregationError> {
    let (first, _) = results
        .first()
        .ok_or_else(|| AggregationError::invalid("no parameters to aggregate"))?;
    for (index, (parameters, _)) in results.iter().enumerate().skip(1) {
        first
            .check_compatible(parameters)
            .map_err(|reason| AggregationError::IncompatibleParameters { index, reason })?;
    }
    if let Some(index) = results
        .iter()
        .position(|(parameters, _)| !parameters.iter().all(|t| t.iter().all(|v| v.is_finite())))
    {
        return Err(AggregationError::invalid(format!(
            "parameters of result {} contain non-finite values",
            index
        )));
    }
    let total = total_examples(results.iter().map(|(_, num_examples)| *num_examples))? as f64;

    let mut sums: Vec<ArrayD<f64>> = first
        .iter()
        .map(|tensor| ArrayD::zeros(tensor.raw_dim()))
        .collect();
    for (parameters, num_examples) in results {
        let weight = *num_examples as f64;
        for (sum, tensor) in sums.iter_mut().zip(parameters.iter()) {
            sum.scaled_add(weight, &tensor.mapv(f64::from));
        }
    }

    let tensors = sums
        .into_iter()
        .map(|sum| sum.mapv(|value| (value / total) as f32))
        .collect();
    Ok(Parameters::new(first.version(), tensors))
}

fn total_examples(counts: impl Iterator<Item = u64>) -> Result<u64, AggregationError> {
    let mut total: u64 = 0;
    for count in counts {
        total = total
            .checked_add(count)
            .ok_or_else(|| AggregationError::invalid("number of examples overflows"))?;
    }
    if total == 0 {
        return Err(AggregationError::invalid("total number of examples is zero"));
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use ndarray::{ArrayD, IxDyn};

    use super::*;

    fn accuracy(value: f64) -> Metrics {
        iter::once((ACCURACY.to_string(), Scalar::Float(value))).collect()
    }

    fn aggregated(metrics: &[(u64, Metrics)]) -> f64 {
        weighted_average(metrics).unwrap()[ACCURACY].as_f64().unwrap()
    }

    #[test]
    fn test_weighted_average_two_clients() {
        let metrics = vec![(10, accuracy(0.8)), (30, accuracy(0.4))];
        assert!((aggregated(&metrics) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_average_single_client() {
        assert!((aggregated(&[(100, accuracy(1.0))]) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_average_returns_only_accuracy() {
        let mut client = accuracy(0.7);
        client.insert("loss".to_string(), Scalar::Float(0.3));
        let result = weighted_average(&[(5, client)]).unwrap();
        assert_eq!(result.keys().collect::<Vec<_>>(), vec![ACCURACY]);
    }

    #[test]
    fn test_weighted_average_matches_definition() {
        let counts = [3_u64, 0, 17, 250, 1, 64];
        let accuracies = [0.1, 0.99, 0.5, 0.731, 0.0, 1.0];
        let metrics: Vec<_> = counts
            .iter()
            .zip(accuracies.iter())
            .map(|(n, a)| (*n, accuracy(*a)))
            .collect();

        let expected = counts
            .iter()
            .zip(accuracies.iter())
            .map(|(n, a)| *n as f64 * a)
            .sum::<f64>()
            / counts.iter().sum::<u64>() as f64;
        assert!((aggregated(&metrics) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_average_ignores_zero_counts() {
        let metrics = vec![(0, accuracy(0.0)), (20, accuracy(0.6))];
        assert!((aggregated(&metrics) - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_average_accepts_integer_accuracy() {
        let client = iter::once((ACCURACY.to_string(), Scalar::Int(1))).collect();
        let metrics = vec![(1, client), (1, accuracy(0.0))];
        assert!((aggregated(&metrics) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_average_empty_input() {
        assert!(matches!(
            weighted_average(&[]),
            Err(AggregationError::InvalidAggregationInput(_))
        ));
    }

    #[test]
    fn test_weighted_average_zero_total() {
        assert!(matches!(
            weighted_average(&[(0, accuracy(0.9))]),
            Err(AggregationError::InvalidAggregationInput(_))
        ));
    }

    #[test]
    fn test_weighted_average_rejects_nan() {
        let metrics = vec![(10, accuracy(0.5)), (10, accuracy(f64::NAN))];
        assert!(matches!(
            weighted_average(&metrics),
            Err(AggregationError::InvalidAggregationInput(_))
        ));
    }

    #[test]
    fn test_weighted_average_rejects_missing_and_non_numeric() {
        let missing = vec![(10, Metrics::new())];
        assert!(weighted_average(&missing).is_err());

        let text = iter::once((ACCURACY.to_string(), Scalar::from("high"))).collect();
        assert!(weighted_average(&[(10, text)]).is_err());
    }

    #[test]
    fn test_weighted_average_count_overflow() {
        let metrics = vec![(u64::MAX, accuracy(0.5)), (1, accuracy(0.5))];
        assert!(matches!(
            weighted_average(&metrics),
            Err(AggregationError::InvalidAggregationInput(_))
        ));
    }

    #[test]
    fn test_weighted_loss_avg() {
        let loss = weighted_loss_avg(&[(10, 2.0), (30, 1.0)]).unwrap();
        assert!((loss - 1.25).abs() < 1e-9);
        assert!(weighted_loss_avg(&[]).is_err());
        assert!(weighted_loss_avg(&[(0, 1.0)]).is_err());
        assert!(weighted_loss_avg(&[(1, f64::INFINITY)]).is_err());
    }

    fn parameters(values: &[f32]) -> Parameters {
        Parameters::new(
            1,
            vec![
                ArrayD::from_shape_vec(IxDyn(&[values.len()]), values.to_vec()).unwrap(),
                ArrayD::from_elem(IxDyn(&[1, 1]), values[0]),
            ],
        )
    }

    #[test]
    fn test_federated_average() {
        let results = vec![(parameters(&[1.0, 2.0]), 1), (parameters(&[3.0, 6.0]), 3)];
        let averaged = federated_average(&results).unwrap();

        assert_eq!(averaged.version(), 1);
        assert_eq!(averaged.shapes(), vec![vec![2], vec![1, 1]]);
        let first: Vec<f32> = averaged.tensors()[0].iter().copied().collect();
        assert!((first[0] - 2.5).abs() < 1e-6);
        assert!((first[1] - 5.0).abs() < 1e-6);
        assert!((averaged.tensors()[1].sum() - 2.5).abs() < 1e-6);
    }

    #[test]
    fn test_federated_average_incompatible_shapes() {
        let results = vec![(parameters(&[1.0, 2.0]), 1), (parameters(&[3.0]), 1)];
        assert!(matches!(
            federated_average(&results),
            Err(AggregationError::IncompatibleParameters { index: 1, .. })
        ));
    }

    #[test]
    fn test_federated_average_invalid_counts() {
        assert!(federated_average(&[]).is_err());
        assert!(federated_average(&[(parameters(&[1.0]), 0)]).is_err());
    }

    #[test]
    fn test_federated_average_rejects_non_finite_values() {
        for value in &[f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            let results = vec![(parameters(&[1.0, 1.0]), 10), (parameters(&[*value, 1.0]), 10)];
            assert!(matches!(
                federated_average(&results),
                Err(AggregationError::InvalidAggregationInput(_))
            ));
        }
    }
}
