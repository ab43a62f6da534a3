//! # fedround coordinator
//!
//! The coordinator runs a fixed number of federated averaging rounds over a population of
//! clients that register and poll for tasks through a small HTTP API.
//!
//! A run starts by asking one client for the initial global parameters. Every round then
//!
//! 1. samples clients for local training and averages their parameter updates, weighted by the
//!    number of local training examples, into new global parameters;
//! 2. samples clients for local evaluation and reduces their losses and accuracies, again
//!    weighted by the number of local examples, into the round history.
//!
//! The moving parts are
//! - the [`state_machine`], which drives the rounds and owns all coordinator state,
//! - the [`strategy`], which decides how many and which clients take part and how their results
//!   are reduced,
//! - the [`services`] and the [`rest`] API through which clients talk to the state machine,
//! - the [`settings`] read from a configuration file and the environment.

pub mod rest;
pub mod services;
pub mod settings;
pub mod state_machine;
pub mod strategy;
