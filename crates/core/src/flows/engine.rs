use thiserror::Error;

use crate::flows::states::{BookingEvent, BookingState, FlowPolicy, TransitionOutcome};

/// Legal-transition table for a booking session. Pure: it never touches the
/// store or any adapter.
#[derive(Clone, Debug, Default)]
pub struct BookingFlow {
    policy: FlowPolicy,
}

impl BookingFlow {
    pub fn new(policy: FlowPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> FlowPolicy {
        self.policy
    }

    pub fn initial_state(&self) -> BookingState {
        BookingState::Initial
    }

    pub fn transition(
        &self,
        current: BookingState,
        event: BookingEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_booking(current, event, self.policy)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("invalid transition from {state} using event {event:?}")]
    InvalidTransition { state: BookingState, event: BookingEvent },
}

fn transition_booking(
    current: BookingState,
    event: BookingEvent,
    policy: FlowPolicy,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use BookingEvent::{
        BookingConfirmed, ExternalFailure, GuestDetailsAccepted, RoomChosen, SearchCompleted,
        StartOverRequested,
    };
    use BookingState::{Confirmed, Failed, GuestInfoCollected, Initial, RoomSelected, Searched};

    let to = match (current, event) {
        (_, StartOverRequested) => Initial,
        (_, SearchCompleted) => Searched,
        (Searched, RoomChosen) | (RoomSelected, RoomChosen) => RoomSelected,
        (Confirmed, RoomChosen) if policy.allow_confirmed_amendments => RoomSelected,
        (RoomSelected, GuestDetailsAccepted) => GuestInfoCollected,
        (GuestInfoCollected, BookingConfirmed) => Confirmed,
        (state, ExternalFailure) if !state.is_terminal() => Failed,
        _ => return Err(FlowTransitionError::InvalidTransition { state: current, event }),
    };

    Ok(TransitionOutcome { from: current, to, event })
}

#[cfg(test)]
mod tests {
    use crate::flows::engine::{BookingFlow, FlowTransitionError};
    use crate::flows::states::{BookingEvent, BookingState, FlowPolicy};

    #[test]
    fn happy_path_reaches_confirmed() {
        let flow = BookingFlow::default();
        let mut state = flow.initial_state();

        for (event, expected) in [
            (BookingEvent::SearchCompleted, BookingState::Searched),
            (BookingEvent::RoomChosen, BookingState::RoomSelected),
            (BookingEvent::GuestDetailsAccepted, BookingState::GuestInfoCollected),
            (BookingEvent::BookingConfirmed, BookingState::Confirmed),
        ] {
            let outcome = flow.transition(state, event);
            assert!(outcome.is_ok(), "{event:?} should be legal from {state}");
            state = outcome.map(|o| o.to).unwrap_or(state);
            assert_eq!(state, expected);
        }
    }

    #[test]
    fn search_is_legal_from_every_state() {
        let flow = BookingFlow::default();
        for state in [
            BookingState::Initial,
            BookingState::Searched,
            BookingState::RoomSelected,
            BookingState::GuestInfoCollected,
            BookingState::Confirmed,
            BookingState::Failed,
        ] {
            let outcome = flow.transition(state, BookingEvent::SearchCompleted);
            assert_eq!(outcome.map(|o| o.to), Ok(BookingState::Searched));

            let reset = flow.transition(state, BookingEvent::StartOverRequested);
            assert_eq!(reset.map(|o| o.to), Ok(BookingState::Initial));
        }
    }

    #[test]
    fn room_choice_before_search_is_rejected() {
        let flow = BookingFlow::default();
        let error = flow.transition(BookingState::Initial, BookingEvent::RoomChosen);

        assert_eq!(
            error,
            Err(FlowTransitionError::InvalidTransition {
                state: BookingState::Initial,
                event: BookingEvent::RoomChosen,
            })
        );
    }

    #[test]
    fn guest_details_require_a_selected_room() {
        let flow = BookingFlow::default();
        assert!(flow.transition(BookingState::Searched, BookingEvent::GuestDetailsAccepted).is_err());
        assert!(flow.transition(BookingState::RoomSelected, BookingEvent::RoomChosen).is_ok());
    }

    #[test]
    fn confirmed_sessions_need_policy_to_amend() {
        let strict = BookingFlow::default();
        assert!(strict.transition(BookingState::Confirmed, BookingEvent::RoomChosen).is_err());

        let lenient = BookingFlow::new(FlowPolicy { allow_confirmed_amendments: true });
        assert_eq!(
            lenient.transition(BookingState::Confirmed, BookingEvent::RoomChosen).map(|o| o.to),
            Ok(BookingState::RoomSelected)
        );
        assert!(lenient.transition(BookingState::Failed, BookingEvent::RoomChosen).is_err());
    }

    #[test]
    fn external_failure_only_moves_non_terminal_states() {
        let flow = BookingFlow::default();
        assert_eq!(
            flow.transition(BookingState::RoomSelected, BookingEvent::ExternalFailure)
                .map(|o| o.to),
            Ok(BookingState::Failed)
        );
        assert!(flow.transition(BookingState::Confirmed, BookingEvent::ExternalFailure).is_err());
        assert!(flow.transition(BookingState::Failed, BookingEvent::ExternalFailure).is_err());
    }
}
