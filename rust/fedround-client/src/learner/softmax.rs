use ndarray::{Array, Array1, Array2, ArrayD, ArrayView1, Axis, Dimension, Ix1, Ix2};
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::debug;

use fedround_core::{
    LoadError,
    ParameterSchema,
    SchemaEntry,
    SchemaError,
    SchemaMismatch,
    StateDict,
};

use crate::{
    learner::{Blobs, DataLoader, Dataset, Learner, LearnerError, Model},
    settings::{DataSettings, ModelSettings, TrainingSettings},
};

/// The version of the [`SoftmaxRegression`] parameter schema.
pub const SCHEMA_VERSION: u32 = 1;

const WEIGHT: &str = "fc.weight";
const BIAS: &str = "fc.bias";

/// Initial weights are drawn from `[-INIT_RANGE, INIT_RANGE)`.
const INIT_RANGE: f32 = 0.01;

/// Probabilities are clamped to this value before taking the logarithm.
const MIN_PROBABILITY: f32 = 1e-7;

/// A single linear layer followed by a softmax, trained with cross-entropy.
#[derive(Debug, Clone, PartialEq)]
pub struct SoftmaxRegression {
    schema: ParameterSchema,
    /// `[classes, features]`
    weight: Array2<f32>,
    /// `[classes]`
    bias: Array1<f32>,
}

impl SoftmaxRegression {
    /// Creates a model with small random weights and zero bias.
    pub fn new(
        num_features: usize,
        num_classes: usize,
        seed: u64,
    ) -> Result<Self, SchemaError> {
        let schema = ParameterSchema::new(
            SCHEMA_VERSION,
            vec![
                (WEIGHT, vec![num_classes, num_features]),
                (BIAS, vec![num_classes]),
            ],
        )?;
        let mut rng = StdRng::seed_from_u64(seed);
        let weight = Array2::from_shape_fn((num_classes, num_features), |_| {
            rng.gen_range(-INIT_RANGE..INIT_RANGE)
        });
        Ok(Self {
            schema,
            weight,
            bias: Array1::zeros(num_classes),
        })
    }

    pub fn num_features(&self) -> usize {
        self.weight.ncols()
    }

    pub fn num_classes(&self) -> usize {
        self.weight.nrows()
    }

    /// Computes the class probabilities of each sample.
    pub fn predict(&self, features: &Array2<f32>) -> Array2<f32> {
        let mut probabilities = features.dot(&self.weight.t()) + &self.bias;
        for mut row in probabilities.rows_mut() {
            let max = row.fold(f32::NEG_INFINITY, |max, &logit| max.max(logit));
            row.mapv_inplace(|logit| (logit - max).exp());
            let sum = row.sum();
            row /= sum;
        }
        probabilities
    }

    /// Performs one gradient descent step on a batch and returns the mean batch loss.
    pub fn step(
        &mut self,
        features: &Array2<f32>,
        labels: &Array1<usize>,
        learning_rate: f32,
    ) -> f64 {
        let mut gradient = self.predict(features);
        let loss = cross_entropy(&gradient, labels) / labels.len() as f64;

        for (mut row, &label) in gradient.rows_mut().into_iter().zip(labels.iter()) {
            row[label] -= 1.0;
        }
        gradient /= features.nrows() as f32;
        let weight_gradient = gradient.t().dot(features);
        let bias_gradient = gradient.sum_axis(Axis(0));

        self.weight.scaled_add(-learning_rate, &weight_gradient);
        self.bias.scaled_add(-learning_rate, &bias_gradient);
        loss
    }

    /// Computes the summed loss and the number of correct predictions on a batch.
    pub fn score(&self, features: &Array2<f32>, labels: &Array1<usize>) -> (f64, usize) {
        let probabilities = self.predict(features);
        let correct = probabilities
            .rows()
            .into_iter()
            .zip(labels.iter())
            .filter(|(row, label)| argmax(row) == **label)
            .count();
        (cross_entropy(&probabilities, labels), correct)
    }
}

fn cross_entropy(probabilities: &Array2<f32>, labels: &Array1<usize>) -> f64 {
    probabilities
        .rows()
        .into_iter()
        .zip(labels.iter())
        .map(|(row, &label)| -f64::from(row[label].max(MIN_PROBABILITY)).ln())
        .sum()
}

fn argmax(row: &ArrayView1<f32>) -> usize {
    let mut best = 0;
    for (index, &value) in row.iter().enumerate() {
        if value > row[best] {
            best = index;
        }
    }
    best
}

/// Takes a checked tensor out of a state dict and fixes its dimensionality.
fn into_dimensionality<D: Dimension>(
    entry: &SchemaEntry,
    tensor: Option<ArrayD<f32>>,
) -> Result<Array<f32, D>, LoadError> {
    let mismatch = |actual: Vec<usize>| SchemaMismatch::Shape {
        key: entry.key.clone(),
        expected: entry.shape.clone(),
        actual,
    };
    let tensor = tensor.ok_or_else(|| mismatch(Vec::new()))?;
    let actual = tensor.shape().to_vec();
    tensor
        .into_dimensionality::<D>()
        .map_err(|_| LoadError::from(mismatch(actual)))
}

impl Model for SoftmaxRegression {
    fn schema(&self) -> &ParameterSchema {
        &self.schema
    }

    fn state_dict(&self) -> StateDict {
        let mut state = StateDict::new();
        state.push(WEIGHT, self.weight.clone().into_dyn());
        state.push(BIAS, self.bias.clone().into_dyn());
        state
    }

    fn load_state_dict(&mut self, state: StateDict) -> Result<(), LoadError> {
        self.schema.check_state(&state)?;
        let entries = self.schema.entries();
        let mut tensors = state.into_inner().into_iter().map(|(_, tensor)| tensor);
        let weight = into_dimensionality::<Ix2>(&entries[0], tensors.next())?;
        let bias = into_dimensionality::<Ix1>(&entries[1], tensors.next())?;
        self.weight = weight;
        self.bias = bias;
        Ok(())
    }
}

/// Trains a [`SoftmaxRegression`] with mini-batch gradient descent.
#[derive(Debug, Clone)]
pub struct SoftmaxLearner {
    model: ModelSettings,
    data: DataSettings,
    training: TrainingSettings,
}

impl SoftmaxLearner {
    pub fn new(model: ModelSettings, data: DataSettings, training: TrainingSettings) -> Self {
        Self {
            model,
            data,
            training,
        }
    }

    fn datasets(&self) -> Result<(Dataset, Dataset), LearnerError> {
        let num_classes = self.model.num_classes;
        Ok(match &self.data.dir {
            Some(dir) => (
                Dataset::from_npy(
                    &dir.join("x_train.npy"),
                    &dir.join("y_train.npy"),
                    num_classes,
                )?,
                Dataset::from_npy(&dir.join("x_test.npy"), &dir.join("y_test.npy"), num_classes)?,
            ),
            None => {
                let synthetic = &self.data.synthetic;
                Blobs::new(
                    self.model.num_features,
                    num_classes,
                    synthetic.center_seed,
                    synthetic.noise,
                )?
                .datasets(
                    synthetic.train_samples,
                    synthetic.test_samples,
                    synthetic.seed,
                )
            }
        })
    }
}

impl Learner for SoftmaxLearner {
    type Model = SoftmaxRegression;

    fn load_model(&self) -> Result<SoftmaxRegression, LearnerError> {
        Ok(SoftmaxRegression::new(
            self.model.num_features,
            self.model.num_classes,
            self.model.seed,
        )?)
    }

    fn load_data(&self) -> Result<(DataLoader, DataLoader), LearnerError> {
        let (train, test) = self.datasets()?;
        train.check_features(self.model.num_features)?;
        test.check_features(self.model.num_features)?;
        let batch_size = self.training.batch_size;
        let seed = self.data.synthetic.seed;
        Ok((
            DataLoader::new(train, batch_size, true, seed),
            DataLoader::new(test, batch_size, false, seed),
        ))
    }

    fn train(
        &self,
        model: &mut SoftmaxRegression,
        loader: &mut DataLoader,
    ) -> Result<f64, LearnerError> {
        if loader.is_empty() {
            return Err(LearnerError::EmptyDataset("training"));
        }
        let mut loss = 0.;
        for epoch in 1..=self.training.epochs {
            let mut loss_sum = 0.;
            for (features, labels) in loader.batches() {
                let batch_loss = model.step(&features, &labels, self.training.learning_rate);
                loss_sum += batch_loss * labels.len() as f64;
            }
            loss = loss_sum / loader.len() as f64;
            if !loss.is_finite() {
                return Err(LearnerError::Diverged(loss));
            }
            debug!("epoch {}: loss {:.4}", epoch, loss);
        }
        Ok(loss)
    }

    fn test(
        &self,
        model: &SoftmaxRegression,
        loader: &mut DataLoader,
    ) -> Result<(f64, f64), LearnerError> {
        if loader.is_empty() {
            return Err(LearnerError::EmptyDataset("test"));
        }
        let (mut loss_sum, mut correct) = (0., 0);
        for (features, labels) in loader.batches() {
            let (batch_loss, batch_correct) = model.score(&features, &labels);
            loss_sum += batch_loss;
            correct += batch_correct;
        }
        let num_examples = loader.len() as f64;
        Ok((loss_sum / num_examples, correct as f64 / num_examples))
    }
}
