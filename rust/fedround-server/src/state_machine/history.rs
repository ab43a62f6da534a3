//! The per-round record of aggregated results.

use std::{collections::BTreeMap, fmt};

use fedround_core::{Metrics, Scalar};

/// Aggregated losses and metrics, indexed by round.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct History {
    /// The weighted evaluation loss of each evaluated round.
    pub losses_distributed: Vec<(u64, f64)>,
    /// The aggregated fit metrics of each round, by metric name.
    pub metrics_distributed_fit: BTreeMap<String, Vec<(u64, Scalar)>>,
    /// The aggregated evaluation metrics of each round, by metric name.
    pub metrics_distributed: BTreeMap<String, Vec<(u64, Scalar)>>,
}

impl History {
    pub fn add_loss_distributed(&mut self, round_id: u64, loss: f64) {
        self.losses_distributed.push((round_id, loss));
    }

    pub fn add_metrics_distributed_fit(&mut self, round_id: u64, metrics: &Metrics) {
        add_metrics(&mut self.metrics_distributed_fit, round_id, metrics);
    }

    pub fn add_metrics_distributed(&mut self, round_id: u64, metrics: &Metrics) {
        add_metrics(&mut self.metrics_distributed, round_id, metrics);
    }

    /// Gets the aggregated value of an evaluation metric in the given round.
    pub fn metric(&self, name: &str, round_id: u64) -> Option<&Scalar> {
        self.metrics_distributed
            .get(name)?
            .iter()
            .find(|(round, _)| *round == round_id)
            .map(|(_, value)| value)
    }
}

fn add_metrics(
    record: &mut BTreeMap<String, Vec<(u64, Scalar)>>,
    round_id: u64,
    metrics: &Metrics,
) {
    for (name, value) in metrics {
        record
            .entry(name.clone())
            .or_default()
            .push((round_id, value.clone()));
    }
}

impl fmt::Display for History {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "loss (distributed):")?;
        for (round_id, loss) in &self.losses_distributed {
            writeln!(f, "\tround {}: {}", round_id, loss)?;
        }
        for (title, record) in &[
            ("metrics (distributed, fit)", &self.metrics_distributed_fit),
            ("metrics (distributed, evaluate)", &self.metrics_distributed),
        ] {
            if record.is_empty() {
                continue;
            }
            writeln!(f, "{}:", title)?;
            for (name, values) in record.iter() {
                writeln!(f, "\t{}: {:?}", name, values)?;
            }
        }
        Ok(())
    }
}
