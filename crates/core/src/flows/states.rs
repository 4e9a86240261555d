use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingState {
    Initial,
    Searched,
    RoomSelected,
    GuestInfoCollected,
    Confirmed,
    Failed,
}

impl BookingState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "INITIAL",
            Self::Searched => "SEARCHED",
            Self::RoomSelected => "ROOM_SELECTED",
            Self::GuestInfoCollected => "GUEST_INFO_COLLECTED",
            Self::Confirmed => "CONFIRMED",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed)
    }
}

impl fmt::Display for BookingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingEvent {
    SearchCompleted,
    RoomChosen,
    GuestDetailsAccepted,
    BookingConfirmed,
    ExternalFailure,
    StartOverRequested,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowPolicy {
    /// Lets a confirmed session re-select a room without `start_over`.
    pub allow_confirmed_amendments: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: BookingState,
    pub to: BookingState,
    pub event: BookingEvent,
}
