//! The services the REST layer builds on.
//!
//! - [`Fetcher`] answers read-only requests from the events published by the state machine.
//! - [`MessageHandler`] decodes client messages and forwards them to the state machine.

mod fetcher;
mod messages;

pub use self::{
    fetcher::Fetcher,
    messages::{MessageError, MessageHandler},
};
