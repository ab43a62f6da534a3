//! Identifiers and scalar maps shared by the coordinator and the clients.

use std::{collections::BTreeMap, str::FromStr};

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(
    Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Copy, Clone, Display, Serialize, Deserialize,
)]
/// A unique random client identifier, handed out by the coordinator on registration.
pub struct ClientId(Uuid);

impl ClientId {
    /// Returns a new random client identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for ClientId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A single value of a [`Metrics`] or [`Config`] map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, From)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
}

impl Scalar {
    /// Returns the value as a float if it is numeric.
    ///
    /// Integers are widened, every other variant yields `None`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Float(value) => Some(*value),
            Scalar::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    /// Returns the value as an integer if it is one.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::Int(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Str(value.to_string())
    }
}

/// Named metrics reported by a client or produced by an aggregation.
pub type Metrics = BTreeMap<String, Scalar>;

/// Named configuration values the coordinator passes along with a task.
pub type Config = BTreeMap<String, Scalar>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_from_str() {
        let id = ClientId::new();
        let parsed: ClientId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<ClientId>().is_err());
    }

    #[test]
    fn test_scalar_as_f64() {
        assert_eq!(Scalar::from(0.25).as_f64(), Some(0.25));
        assert_eq!(Scalar::from(3_i64).as_f64(), Some(3.0));
        assert_eq!(Scalar::from(true).as_f64(), None);
        assert_eq!(Scalar::from("0.5").as_f64(), None);
    }
}
