//! `fedround-core` provides the types shared by the fedround coordinator and its clients.
//!
//! - [`parameters`]: model parameters as they travel over the wire, and the versioned schema
//!   a model uses to load them back strictly.
//! - [`aggregation`]: the weighted reductions the coordinator applies after each phase, most
//!   notably [`weighted_average`] for evaluation metrics.
//! - [`message`]: the tasks handed out by the coordinator and the messages clients send back.
//! - [`common`]: client identifiers and the scalar maps used for metrics and configs.

pub mod aggregation;
pub mod common;
pub mod message;
pub mod parameters;

pub use self::{
    aggregation::{
        federated_average,
        weighted_average,
        weighted_loss_avg,
        AggregationError,
        MetricsAggregationFn,
        ACCURACY,
    },
    common::{ClientId, Config, Metrics, Scalar},
    parameters::{
        LoadError,
        ParameterSchema,
        Parameters,
        SchemaEntry,
        SchemaError,
        SchemaMismatch,
        StateDict,
    },
};
