//! The booking run.
//!
//! This module provides:
//! - Bounded waits and the slot poller (`wait`)
//! - The run state machine (`BookingState`, `BookingSession`)
//! - Abort reason codes (`AbortReason`)
//! - `run_booking`, which loads the solver, owns the browser and drives a run

mod error;
mod sequencer;
mod state;
pub mod wait;

#[cfg(test)]
pub(crate) mod fake;

pub use error::{AbortCode, AbortReason};
pub use sequencer::{run_booking, BookingReport, BookingSession};
pub use state::BookingState;
pub use wait::{poll_for_slot, PollOutcome};
