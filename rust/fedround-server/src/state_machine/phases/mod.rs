//! This module provides the `PhaseStates` of the [`StateMachine`].
//!
//! [`StateMachine`]: crate::state_machine::StateMachine

mod evaluate;
mod failure;
mod fit;
mod handler;
mod idle;
mod init;
mod participation;
mod phase;
mod shutdown;

pub use self::{
    evaluate::{Evaluate, EvaluateError},
    failure::{Failure, PhaseError},
    fit::{Fit, FitError},
    handler::Handler,
    idle::Idle,
    init::{Init, InitError},
    participation::Participation,
    phase::{Phase, PhaseName, PhaseState, Shared},
    shutdown::Shutdown,
};
