//! # fedround participant
//!
//! A participant trains a local model on its own data and takes part in the federated
//! averaging rounds run by a fedround coordinator.
//!
//! - The [`learner`] module holds the local model, its datasets and the training loop.
//! - A [`LocalClient`] wraps a learner and answers the coordinator's tasks.
//! - The [`Agent`] registers with the coordinator over [`HttpClient`], polls for tasks and
//!   sends back the results.

pub mod agent;
pub mod client;
pub mod context;
pub mod http;
pub mod learner;
pub mod settings;
pub mod traits;

pub use self::{
    agent::{Agent, AgentError},
    client::LocalClient,
    context::ClientContext,
    http::{HttpClient, HttpError},
    traits::{Client, ClientError, CoordinatorClient, Delivery},
};
