//! Model parameters and the strict schema used to load them.
//!
//! On the wire a model is a flat, ordered list of tensors ([`Parameters`]). The names of the
//! tensors are not transmitted: both sides agree on a [`ParameterSchema`], a versioned list of
//! `(key, shape)` pairs, and reassemble the named [`StateDict`] positionally. Every load checks
//! the version, the tensor count and each shape before anything is handed to the model.

use std::slice::Iter;

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// The flat representation of a model's parameters, tagged with the schema version.
pub struct Parameters {
    version: u32,
    tensors: Vec<ArrayD<f32>>,
}

#[allow(clippy::len_without_is_empty)]
impl Parameters {
    /// Creates parameters for the given schema version.
    pub fn new(version: u32, tensors: Vec<ArrayD<f32>>) -> Self {
        Self { version, tensors }
    }

    /// Gets the schema version these parameters were flattened with.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Gets the number of tensors.
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    /// Creates an iterator over the tensors in wire order.
    pub fn iter(&self) -> Iter<ArrayD<f32>> {
        self.tensors.iter()
    }

    /// Gets the tensors in wire order.
    pub fn tensors(&self) -> &[ArrayD<f32>] {
        &self.tensors
    }

    /// Gets the shape of every tensor in wire order.
    pub fn shapes(&self) -> Vec<Vec<usize>> {
        self.tensors.iter().map(|t| t.shape().to_vec()).collect()
    }

    /// Consumes the parameters and returns the tensors.
    pub fn into_tensors(self) -> Vec<ArrayD<f32>> {
        self.tensors
    }

    /// Checks that `other` has the same version, tensor count and shapes.
    ///
    /// Tensors are named by their position, as `#0`, `#1` and so on.
    pub fn check_compatible(&self, other: &Parameters) -> Result<(), SchemaMismatch> {
        if self.version != other.version {
            return Err(SchemaMismatch::Version {
                expected: self.version,
                actual: other.version,
            });
        }
        if self.len() != other.len() {
            return Err(SchemaMismatch::Count {
                expected: self.len(),
                actual: other.len(),
            });
        }
        for (position, (a, b)) in self.iter().zip(other.iter()).enumerate() {
            if a.shape() != b.shape() {
                return Err(SchemaMismatch::Shape {
                    key: format!("#{}", position),
                    expected: a.shape().to_vec(),
                    actual: b.shape().to_vec(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// A named tensor slot of a model.
pub struct SchemaEntry {
    pub key: String,
    pub shape: Vec<usize>,
}

#[derive(Debug, Error, PartialEq, Eq)]
/// An error related to the construction of a parameter schema.
pub enum SchemaError {
    #[error("duplicate schema key `{0}`")]
    DuplicateKey(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
/// A detailed reason why parameters do not fit a schema.
pub enum SchemaMismatch {
    #[error("schema version {actual} does not match the expected version {expected}")]
    Version { expected: u32, actual: u32 },
    #[error("expected {expected} tensors but got {actual}")]
    Count { expected: usize, actual: usize },
    #[error("expected key `{expected}` at position {position} but got `{actual}`")]
    Key {
        position: usize,
        expected: String,
        actual: String,
    },
    #[error("tensor `{key}` has shape {actual:?} but the schema requires {expected:?}")]
    Shape {
        key: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
/// An error related to loading parameters into a model.
pub enum LoadError {
    #[error("strict parameter load failed: {0}")]
    StrictLoadMismatch(#[from] SchemaMismatch),
}

#[derive(Debug, Clone, PartialEq, Default)]
/// The named tensors of a model in schema order.
pub struct StateDict(Vec<(String, ArrayD<f32>)>);

#[allow(clippy::len_without_is_empty)]
impl StateDict {
    /// Creates an empty state dict.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a named tensor.
    pub fn push(&mut self, key: impl Into<String>, tensor: ArrayD<f32>) {
        self.0.push((key.into(), tensor));
    }

    /// Gets the tensor stored under `key`.
    pub fn get(&self, key: &str) -> Option<&ArrayD<f32>> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, t)| t)
    }

    /// Gets the number of named tensors.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Creates an iterator over the keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    /// Creates an iterator over the named tensors in order.
    pub fn iter(&self) -> Iter<(String, ArrayD<f32>)> {
        self.0.iter()
    }

    /// Consumes the state dict and returns the named tensors.
    pub fn into_inner(self) -> Vec<(String, ArrayD<f32>)> {
        self.0
    }
}

impl std::iter::FromIterator<(String, ArrayD<f32>)> for StateDict {
    fn from_iter<I: IntoIterator<Item = (String, ArrayD<f32>)>>(iter: I) -> Self {
        StateDict(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// A fixed, versioned list of `(key, shape)` pairs describing a model's parameters.
pub struct ParameterSchema {
    version: u32,
    entries: Vec<SchemaEntry>,
}

#[allow(clippy::len_without_is_empty)]
impl ParameterSchema {
    /// Creates a schema from `(key, shape)` pairs in load order.
    ///
    /// # Errors
    /// Fails if a key occurs more than once.
    pub fn new<K, I>(version: u32, entries: I) -> Result<Self, SchemaError>
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Vec<usize>)>,
    {
        let mut checked: Vec<SchemaEntry> = Vec::new();
        for (key, shape) in entries {
            let key = key.into();
            if checked.iter().any(|entry| entry.key == key) {
                return Err(SchemaError::DuplicateKey(key));
            }
            checked.push(SchemaEntry { key, shape });
        }
        Ok(Self {
            version,
            entries: checked,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn entries(&self) -> &[SchemaEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Checks that the parameters can be loaded with this schema.
    pub fn check(&self, parameters: &Parameters) -> Result<(), SchemaMismatch> {
        if parameters.version() != self.version {
            return Err(SchemaMismatch::Version {
                expected: self.version,
                actual: parameters.version(),
            });
        }
        if parameters.len() != self.entries.len() {
            return Err(SchemaMismatch::Count {
                expected: self.entries.len(),
                actual: parameters.len(),
            });
        }
        for (entry, tensor) in self.entries.iter().zip(parameters.iter()) {
            check_shape(entry, tensor)?;
        }
        Ok(())
    }

    /// Reassembles the named tensors from the flat representation.
    ///
    /// # Errors
    /// Fails with [`LoadError::StrictLoadMismatch`] if the parameters do not fit the schema.
    pub fn unflatten(&self, parameters: Parameters) -> Result<StateDict, LoadError> {
        self.check(&parameters)?;
        Ok(self
            .entries
            .iter()
            .map(|entry| entry.key.clone())
            .zip(parameters.into_tensors())
            .collect())
    }

    /// Checks that the named tensors follow the schema order and shapes exactly.
    pub fn check_state(&self, state: &StateDict) -> Result<(), SchemaMismatch> {
        if state.len() != self.entries.len() {
            return Err(SchemaMismatch::Count {
                expected: self.entries.len(),
                actual: state.len(),
            });
        }
        for (position, (entry, (key, tensor))) in self.entries.iter().zip(state.iter()).enumerate()
        {
            if &entry.key != key {
                return Err(SchemaMismatch::Key {
                    position,
                    expected: entry.key.clone(),
                    actual: key.clone(),
                });
            }
            check_shape(entry, tensor)?;
        }
        Ok(())
    }

    /// Flattens the named tensors into the wire representation.
    ///
    /// # Errors
    /// Fails with [`LoadError::StrictLoadMismatch`] if the state dict does not fit the schema.
    pub fn flatten(&self, state: &StateDict) -> Result<Parameters, LoadError> {
        self.check_state(state)?;
        let tensors = state.iter().map(|(_, tensor)| tensor.clone()).collect();
        Ok(Parameters::new(self.version, tensors))
    }
}

fn check_shape(entry: &SchemaEntry, tensor: &ArrayD<f32>) -> Result<(), SchemaMismatch> {
    if tensor.shape() != entry.shape.as_slice() {
        return Err(SchemaMismatch::Shape {
            key: entry.key.clone(),
            expected: entry.shape.clone(),
            actual: tensor.shape().to_vec(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use ndarray::{ArrayD, IxDyn};

    use super::*;

    fn schema() -> ParameterSchema {
        ParameterSchema::new(1, vec![("fc.weight", vec![2, 3]), ("fc.bias", vec![2])]).unwrap()
    }

    fn state_dict() -> StateDict {
        let mut state = StateDict::new();
        state.push(
            "fc.weight",
            ArrayD::from_shape_vec(IxDyn(&[2, 3]), vec![0.1, -0.2, 0.3, 0.4, 0.5, -0.6]).unwrap(),
        );
        state.push(
            "fc.bias",
            ArrayD::from_shape_vec(IxDyn(&[2]), vec![1e-3, -7.5]).unwrap(),
        );
        state
    }

    #[test]
    fn test_duplicate_keys_are_rejected() {
        let err = ParameterSchema::new(1, vec![("a", vec![1]), ("a", vec![2])]).unwrap_err();
        assert_eq!(err, SchemaError::DuplicateKey("a".to_string()));
    }

    #[test]
    fn test_check_compatible() {
        let parameters = schema().flatten(&state_dict()).unwrap();
        assert!(parameters.check_compatible(&parameters.clone()).is_ok());

        let other_version = Parameters::new(2, parameters.tensors().to_vec());
        assert!(matches!(
            parameters.check_compatible(&other_version),
            Err(SchemaMismatch::Version { expected: 1, actual: 2 })
        ));
        let mut tensors = parameters.tensors().to_vec();
        tensors.swap(0, 1);
        assert!(matches!(
            parameters.check_compatible(&Parameters::new(1, tensors)),
            Err(SchemaMismatch::Shape { .. })
        ));
    }

    #[test]
    fn test_flatten_keeps_schema_order() {
        let parameters = schema().flatten(&state_dict()).unwrap();
        assert_eq!(parameters.version(), 1);
        assert_eq!(parameters.shapes(), vec![vec![2, 3], vec![2]]);
    }

    #[test]
    fn test_flatten_then_unflatten() {
        let schema = schema();
        let state = state_dict();
        let restored = schema.unflatten(schema.flatten(&state).unwrap()).unwrap();

        assert_eq!(restored.keys().collect::<Vec<_>>(), vec!["fc.weight", "fc.bias"]);
        for ((_, original), (_, loaded)) in state.iter().zip(restored.iter()) {
            for (a, b) in original.iter().zip(loaded.iter()) {
                assert!((a - b).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_unflatten_wire_roundtrip() {
        let schema = schema();
        let parameters = schema.flatten(&state_dict()).unwrap();
        let bytes = bincode::serialize(&parameters).unwrap();
        let decoded: Parameters = bincode::deserialize(&bytes).unwrap();
        assert_eq!(schema.unflatten(decoded).unwrap(), state_dict());
    }

    #[test]
    fn test_unflatten_count_mismatch() {
        let tensors = schema().flatten(&state_dict()).unwrap().into_tensors();
        let truncated = Parameters::new(1, tensors[..1].to_vec());
        assert_eq!(
            schema().unflatten(truncated).unwrap_err(),
            LoadError::StrictLoadMismatch(SchemaMismatch::Count {
                expected: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn test_unflatten_shape_mismatch() {
        let mut tensors = schema().flatten(&state_dict()).unwrap().into_tensors();
        tensors[1] = ArrayD::zeros(IxDyn(&[3]));
        let err = schema().unflatten(Parameters::new(1, tensors)).unwrap_err();
        assert_eq!(
            err,
            LoadError::StrictLoadMismatch(SchemaMismatch::Shape {
                key: "fc.bias".to_string(),
                expected: vec![2],
                actual: vec![3],
            })
        );
        assert!(err.to_string().contains("fc.bias"));
    }

    #[test]
    fn test_unflatten_version_mismatch() {
        let tensors = schema().flatten(&state_dict()).unwrap().into_tensors();
        assert_eq!(
            schema().unflatten(Parameters::new(2, tensors)).unwrap_err(),
            LoadError::StrictLoadMismatch(SchemaMismatch::Version {
                expected: 1,
                actual: 2
            })
        );
    }

    #[test]
    fn test_flatten_key_mismatch() {
        let swapped: StateDict = state_dict().into_inner().into_iter().rev().collect();
        assert!(matches!(
            schema().flatten(&swapped),
            Err(LoadError::StrictLoadMismatch(SchemaMismatch::Key { position: 0, .. }))
        ));
    }
}
