use std::iter;

use tracing::info;

use fedround_core::{
    message::{EvaluateIns, EvaluateRes, FitIns, FitRes},
    Config,
    Metrics,
    Parameters,
    Scalar,
    ACCURACY,
};

use crate::{
    context::ClientContext,
    learner::{Learner, LearnerError, Model},
    traits::{Client, ClientError},
};

/// A [`Client`] that trains a local model with a [`Learner`].
pub struct LocalClient<L: Learner> {
    learner: L,
    context: ClientContext<L::Model>,
}

impl<L: Learner> LocalClient<L> {
    /// Creates a client and loads its model and datasets.
    pub fn new(learner: L) -> Result<Self, LearnerError> {
        let context = ClientContext::new(&learner)?;
        Ok(Self { learner, context })
    }

    pub fn context(&self) -> &ClientContext<L::Model> {
        &self.context
    }
}

impl<L: Learner> Client for LocalClient<L> {
    fn get_parameters(&mut self, _config: &Config) -> Result<Parameters, ClientError> {
        Ok(self.context.model.get_parameters()?)
    }

    fn fit(&mut self, ins: FitIns) -> Result<FitRes, ClientError> {
        let ClientContext {
            model,
            train_loader,
            ..
        } = &mut self.context;
        model.set_parameters(ins.parameters)?;
        let loss = self.learner.train(model, train_loader)?;
        info!("trained on {} examples, loss {:.4}", train_loader.len(), loss);
        Ok(FitRes {
            parameters: model.get_parameters()?,
            num_examples: train_loader.len() as u64,
            metrics: Metrics::new(),
        })
    }

    fn evaluate(&mut self, ins: EvaluateIns) -> Result<EvaluateRes, ClientError> {
        let ClientContext {
            model, test_loader, ..
        } = &mut self.context;
        model.set_parameters(ins.parameters)?;
        let (loss, accuracy) = self.learner.test(model, test_loader)?;
        info!(
            "evaluated on {} examples, loss {:.4}, accuracy {:.4}",
            test_loader.len(),
            loss,
            accuracy
        );
        Ok(EvaluateRes {
            loss,
            num_examples: test_loader.len() as u64,
            metrics: iter::once((ACCURACY.to_string(), Scalar::Float(accuracy))).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use fedround_core::{message::SERVER_ROUND, LoadError, SchemaMismatch};

    use super::*;
    use crate::{
        learner::{SoftmaxLearner, SoftmaxRegression},
        settings::{DataSettings, ModelSettings, SyntheticSettings, TrainingSettings},
    };

    fn client() -> LocalClient<SoftmaxLearner> {
        let learner = SoftmaxLearner::new(
            ModelSettings {
                num_features: 2,
                num_classes: 3,
                seed: 0,
            },
            DataSettings {
                dir: None,
                synthetic: SyntheticSettings {
                    train_samples: 40,
                    test_samples: 10,
                    ..SyntheticSettings::default()
                },
            },
            TrainingSettings {
                epochs: 1,
                batch_size: 8,
                learning_rate: 0.1,
            },
        );
        LocalClient::new(learner).unwrap()
    }

    fn config() -> Config {
        iter::once((SERVER_ROUND.to_string(), Scalar::Int(1))).collect()
    }

    #[test]
    fn test_fit_reports_training_set_size() {
        let mut client = client();
        let parameters = client.get_parameters(&config()).unwrap();
        let result = client
            .fit(FitIns {
                parameters: parameters.clone(),
                config: config(),
            })
            .unwrap();
        assert_eq!(result.num_examples, 40);
        assert!(result.metrics.is_empty());
        assert_eq!(result.parameters.shapes(), parameters.shapes());
        assert_ne!(result.parameters, parameters);
    }

    #[test]
    fn test_evaluate_reports_accuracy() {
        let mut client = client();
        let parameters = client.get_parameters(&config()).unwrap();
        let result = client
            .evaluate(EvaluateIns {
                parameters,
                config: config(),
            })
            .unwrap();
        assert_eq!(result.num_examples, 10);
        let accuracy = result.metrics[ACCURACY].as_f64().unwrap();
        assert!((0.0..=1.0).contains(&accuracy));
        assert!(result.loss.is_finite());
    }

    #[test]
    fn test_mismatching_parameters_fail_the_task() {
        let mut client = client();
        let other = SoftmaxRegression::new(5, 3, 0).unwrap();
        let err = client
            .fit(FitIns {
                parameters: other.get_parameters().unwrap(),
                config: config(),
            })
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Load(LoadError::StrictLoadMismatch(SchemaMismatch::Shape { .. }))
        ));
    }
}
