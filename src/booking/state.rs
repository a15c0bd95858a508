//! Booking run states.
//!
//! INIT → AUTHENTICATING → AUTHENTICATED → POLLING → SLOT_FOUND → CLICKED →
//! CONFIRMED, with ABORTED reachable from every non-terminal state.

use std::fmt;
use std::time::Instant;

use crate::browser::ElementHandle;

use super::error::AbortReason;

#[derive(Debug, Clone, PartialEq)]
pub enum BookingState {
    /// Browser open, nothing loaded yet
    Init,
    /// On the login page
    Authenticating,
    /// Logged in
    Authenticated,
    /// Waiting for a slot to open
    Polling,
    /// Slot detected as clickable at the given instant
    SlotFound(ElementHandle, Instant),
    /// Slot clicked
    Clicked,
    /// Booking done. `verified` is false when no confirmation was observed
    Confirmed { verified: bool },
    Aborted(AbortReason),
}

impl BookingState {
    /// Short stage name used in logs and abort reasons.
    pub fn stage(&self) -> &'static str {
        match self {
            BookingState::Init => "init",
            BookingState::Authenticating => "authenticating",
            BookingState::Authenticated => "authenticated",
            BookingState::Polling => "polling",
            BookingState::SlotFound(..) => "slot_found",
            BookingState::Clicked => "clicked",
            BookingState::Confirmed { .. } => "confirmed",
            BookingState::Aborted(_) => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingState::Confirmed { .. } | BookingState::Aborted(_))
    }
}

impl fmt::Display for BookingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookingState::Init => write!(f, "Init"),
            BookingState::Authenticating => write!(f, "Authenticating"),
            BookingState::Authenticated => write!(f, "Authenticated"),
            BookingState::Polling => write!(f, "Polling for slot"),
            BookingState::SlotFound(..) => write!(f, "Slot found"),
            BookingState::Clicked => write!(f, "Slot clicked"),
            BookingState::Confirmed { verified: true } => write!(f, "Confirmed"),
            BookingState::Confirmed { verified: false } => write!(f, "Confirmed (unverified)"),
            BookingState::Aborted(reason) => write!(f, "Aborted: {}", reason),
        }
    }
}
