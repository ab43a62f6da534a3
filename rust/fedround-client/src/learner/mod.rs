//! Local models and the learners that train them.
//!
//! A [`Learner`] builds a [`Model`] and its datasets and knows how to train and test the model.
//! Models exchange their parameters with the coordinator through their [`ParameterSchema`],
//! which rejects any parameters that don't match it exactly.

mod data;
mod softmax;

pub use self::{
    data::{Blobs, DataError, DataLoader, Dataset},
    softmax::{SoftmaxLearner, SoftmaxRegression, SCHEMA_VERSION},
};

use thiserror::Error;

use fedround_core::{LoadError, ParameterSchema, Parameters, SchemaError, StateDict};

#[derive(Debug, Error)]
/// An error related to building, training or testing a local model.
pub enum LearnerError {
    #[error("failed to load the local data: {0}")]
    Data(#[from] DataError),
    #[error("invalid model schema: {0}")]
    Schema(#[from] SchemaError),
    #[error("the local {0} set is empty")]
    EmptyDataset(&'static str),
    #[error("training diverged with loss {0}")]
    Diverged(f64),
}

/// A model whose parameters can be exchanged with the coordinator.
pub trait Model {
    /// Gets the versioned `(key, shape)` list of the parameters.
    fn schema(&self) -> &ParameterSchema;

    /// Gets the named parameters in schema order.
    fn state_dict(&self) -> StateDict;

    /// Replaces the parameters.
    ///
    /// # Errors
    /// Fails with [`LoadError::StrictLoadMismatch`] unless the keys and shapes match the schema
    /// exactly. The model is left untouched in that case.
    fn load_state_dict(&mut self, state: StateDict) -> Result<(), LoadError>;

    /// Flattens the parameters into their wire representation.
    fn get_parameters(&self) -> Result<Parameters, LoadError> {
        self.schema().flatten(&self.state_dict())
    }

    /// Strictly loads parameters in their wire representation.
    fn set_parameters(&mut self, parameters: Parameters) -> Result<(), LoadError> {
        let state = self.schema().unflatten(parameters)?;
        self.load_state_dict(state)
    }
}

/// Builds, trains and tests a local model.
pub trait Learner {
    type Model: Model;

    /// Creates a freshly initialized model.
    fn load_model(&self) -> Result<Self::Model, LearnerError>;

    /// Loads the local training and test sets.
    fn load_data(&self) -> Result<(DataLoader, DataLoader), LearnerError>;

    /// Trains the model on the training set and returns the mean loss of the last epoch.
    fn train(
        &self,
        model: &mut Self::Model,
        loader: &mut DataLoader,
    ) -> Result<f64, LearnerError>;

    /// Computes the mean loss and the accuracy of the model on the test set.
    fn test(
        &self,
        model: &Self::Model,
        loader: &mut DataLoader,
    ) -> Result<(f64, f64), LearnerError>;
}
