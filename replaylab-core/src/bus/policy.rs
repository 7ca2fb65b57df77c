//! Handler failure policy — what the dispatcher does when a subscriber errors.
//!
//! Failure handling is an explicit, injectable decision rather than an
//! implicit catch-all: the dispatcher collects each handler's outcome and
//! asks the policy whether to keep consuming.

use crate::bus::handler::HandlerError;
use crate::events::Event;

/// Decision returned by a [`FailurePolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Keep dispatching; the failure is logged and counted.
    Continue,
    /// Stop the consumer. Remaining queued events are never dispatched and
    /// `drain` reports an unknown state.
    Halt,
}

pub trait FailurePolicy: Send + Sync {
    fn on_handler_error(&self, event: &Event, error: &HandlerError) -> FailureAction;
}

/// Default policy: a faulty subscriber never halts the simulation.
#[derive(Debug, Default)]
pub struct LogAndContinue;

impl FailurePolicy for LogAndContinue {
    fn on_handler_error(&self, _event: &Event, _error: &HandlerError) -> FailureAction {
        FailureAction::Continue
    }
}

/// Strict policy for environments where a handler failure means the run
/// results cannot be trusted.
#[derive(Debug, Default)]
pub struct HaltOnError;

impl FailurePolicy for HaltOnError {
    fn on_handler_error(&self, _event: &Event, _error: &HandlerError) -> FailureAction {
        FailureAction::Halt
    }
}
