//! Local datasets and the loader that batches them.

use std::{
    fs::File,
    path::{Path, PathBuf},
};

use ndarray::{Array1, Array2, Axis};
use ndarray_npy::{ReadNpyError, ReadNpyExt};
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use thiserror::Error;

/// Class centers of the synthetic blobs are drawn from `[-CENTER_RANGE, CENTER_RANGE)`.
const CENTER_RANGE: f32 = 5.0;

#[derive(Debug, Error)]
/// An error related to loading a local dataset.
pub enum DataError {
    #[error("failed to open {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to read {path:?}: {source}")]
    Npy {
        path: PathBuf,
        source: ReadNpyError,
    },
    #[error("got {features} feature rows but {labels} labels")]
    LengthMismatch { features: usize, labels: usize },
    #[error("label {label} is out of range for {num_classes} classes")]
    InvalidLabel { label: i64, num_classes: usize },
    #[error("expected {expected} features per sample but got {actual}")]
    FeatureMismatch { expected: usize, actual: usize },
    #[error("invalid noise level {0}")]
    InvalidNoise(f32),
}

#[derive(Debug, Clone, PartialEq)]
/// Samples with one feature row and one class label each.
pub struct Dataset {
    features: Array2<f32>,
    labels: Array1<usize>,
}

impl Dataset {
    /// Creates a dataset.
    ///
    /// # Errors
    /// Fails if the number of feature rows and labels differ.
    pub fn new(features: Array2<f32>, labels: Array1<usize>) -> Result<Self, DataError> {
        if features.nrows() != labels.len() {
            return Err(DataError::LengthMismatch {
                features: features.nrows(),
                labels: labels.len(),
            });
        }
        Ok(Self { features, labels })
    }

    /// Creates a dataset from raw integer labels, which must lie in `0..num_classes`.
    pub fn from_raw_labels(
        features: Array2<f32>,
        labels: Array1<i64>,
        num_classes: usize,
    ) -> Result<Self, DataError> {
        let mut checked = Vec::with_capacity(labels.len());
        for &label in labels.iter() {
            if label < 0 || label as usize >= num_classes {
                return Err(DataError::InvalidLabel { label, num_classes });
            }
            checked.push(label as usize);
        }
        Self::new(features, Array1::from(checked))
    }

    /// Reads the features (`f32`, one sample per row) and labels (`i64`) from `.npy` files.
    pub fn from_npy(
        features_path: &Path,
        labels_path: &Path,
        num_classes: usize,
    ) -> Result<Self, DataError> {
        let features: Array2<f32> = read_npy_file(features_path)?;
        let labels: Array1<i64> = read_npy_file(labels_path)?;
        Self::from_raw_labels(features, labels, num_classes)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn num_features(&self) -> usize {
        self.features.ncols()
    }

    pub fn features(&self) -> &Array2<f32> {
        &self.features
    }

    pub fn labels(&self) -> &Array1<usize> {
        &self.labels
    }

    /// Checks that every sample has `expected` features.
    pub fn check_features(&self, expected: usize) -> Result<(), DataError> {
        if self.num_features() != expected {
            return Err(DataError::FeatureMismatch {
                expected,
                actual: self.num_features(),
            });
        }
        Ok(())
    }
}

fn read_npy_file<T: ReadNpyExt>(path: &Path) -> Result<T, DataError> {
    let file = File::open(path).map_err(|source| DataError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    T::read_npy(file).map_err(|source| DataError::Npy {
        path: path.to_path_buf(),
        source,
    })
}

/// A generator of normally distributed samples around one random center per class.
#[derive(Debug, Clone)]
pub struct Blobs {
    centers: Array2<f32>,
    noise: Normal<f32>,
}

impl Blobs {
    /// Draws the class centers. Participants sharing `center_seed` sample from the same blobs.
    ///
    /// # Errors
    /// Fails if `noise` is negative or not finite.
    pub fn new(
        num_features: usize,
        num_classes: usize,
        center_seed: u64,
        noise: f32,
    ) -> Result<Self, DataError> {
        if !noise.is_finite() || noise < 0. {
            return Err(DataError::InvalidNoise(noise));
        }
        let mut rng = StdRng::seed_from_u64(center_seed);
        let centers = Array2::from_shape_fn((num_classes, num_features), |_| {
            rng.gen_range(-CENTER_RANGE..CENTER_RANGE)
        });
        let noise = Normal::new(0., noise).map_err(|_| DataError::InvalidNoise(noise))?;
        Ok(Self { centers, noise })
    }

    /// Samples a training and a test set.
    pub fn datasets(
        &self,
        train_samples: usize,
        test_samples: usize,
        seed: u64,
    ) -> (Dataset, Dataset) {
        let mut rng = StdRng::seed_from_u64(seed);
        let train = self.sample(train_samples, &mut rng);
        let test = self.sample(test_samples, &mut rng);
        (train, test)
    }

    fn sample(&self, num_samples: usize, rng: &mut StdRng) -> Dataset {
        let (num_classes, num_features) = self.centers.dim();
        let labels: Array1<usize> = (0..num_samples)
            .map(|_| rng.gen_range(0..num_classes))
            .collect();
        let features = Array2::from_shape_fn((num_samples, num_features), |(i, j)| {
            self.centers[[labels[i], j]] + self.noise.sample(&mut *rng)
        });
        Dataset { features, labels }
    }
}

/// Hands out the samples of a dataset in mini-batches.
#[derive(Debug)]
pub struct DataLoader {
    dataset: Dataset,
    batch_size: usize,
    shuffle: bool,
    rng: StdRng,
}

impl DataLoader {
    /// Creates a loader. A shuffling loader reorders the samples before every pass.
    pub fn new(dataset: Dataset, batch_size: usize, shuffle: bool, seed: u64) -> Self {
        Self {
            dataset,
            batch_size: batch_size.max(1),
            shuffle,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Gets the number of samples.
    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    /// Gets the batches of one pass over the dataset.
    pub fn batches(&mut self) -> Vec<(Array2<f32>, Array1<usize>)> {
        let mut indices: Vec<usize> = (0..self.dataset.len()).collect();
        if self.shuffle {
            indices.shuffle(&mut self.rng);
        }
        indices
            .chunks(self.batch_size)
            .map(|chunk| {
                (
                    self.dataset.features.select(Axis(0), chunk),
                    self.dataset.labels.select(Axis(0), chunk),
                )
            })
            .collect()
    }
}
