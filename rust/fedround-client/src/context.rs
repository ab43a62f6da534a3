use tracing::{debug, info};

use crate::learner::{DataLoader, Learner, LearnerError};

/// The local model and datasets of a participant.
///
/// It is built once at startup and owned by the [`LocalClient`] for the lifetime of the
/// process.
///
/// [`LocalClient`]: crate::LocalClient
#[derive(Debug)]
pub struct ClientContext<M> {
    pub model: M,
    pub train_loader: DataLoader,
    pub test_loader: DataLoader,
}

impl<M> ClientContext<M> {
    /// Loads the model and the datasets through the given learner.
    pub fn new<L>(learner: &L) -> Result<Self, LearnerError>
    where
        L: Learner<Model = M>,
    {
        let model = learner.load_model()?;
        let (train_loader, test_loader) = learner.load_data()?;
        info!(
            "loaded {} training and {} test examples",
            train_loader.len(),
            test_loader.len()
        );
        Ok(Self {
            model,
            train_loader,
            test_loader,
        })
    }
}

impl<M> Drop for ClientContext<M> {
    fn drop(&mut self) {
        debug!("releasing the local model and datasets");
    }
}
