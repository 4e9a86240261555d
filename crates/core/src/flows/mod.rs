pub mod engine;
pub mod states;

pub use engine::{BookingFlow, FlowTransitionError};
pub use states::{BookingEvent, BookingState, FlowPolicy, TransitionOutcome};
