use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::adapters::AdapterError;
use crate::domain::booking::BookingStatus;
use crate::domain::session::SessionId;
use crate::flows::{BookingState, FlowTransitionError};
use crate::session::SessionStoreError;
use crate::tools::{ArgumentError, FunctionName};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid booking transition from {from:?} to {to:?}")]
    InvalidBookingTransition { from: BookingStatus, to: BookingStatus },
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    /// Machine-readable code returned next to `error` in request-level failures.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => "malformed_request",
            Self::ServiceUnavailable { .. } | Self::Internal { .. } => "infrastructure_error",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest { .. } => 400,
            Self::ServiceUnavailable { .. } | Self::Internal { .. } => 500,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        match value {
            ApplicationError::Domain(_) => Self::BadRequest {
                message: "domain validation failed".to_owned(),
                correlation_id: "unassigned".to_owned(),
            },
            ApplicationError::Persistence(message) | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: "unassigned".to_owned() }
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownFunction,
    ValidationError,
    Conflict,
    SessionNotFound,
    ExternalServiceError,
    InfrastructureError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnknownFunction => "unknown_function",
            Self::ValidationError => "validation_error",
            Self::Conflict => "conflict",
            Self::SessionNotFound => "session_not_found",
            Self::ExternalServiceError => "external_service_error",
            Self::InfrastructureError => "infrastructure_error",
        }
    }
}

/// Failure of a single tool call. Everything except `Infrastructure` stays
/// local to its call; `Infrastructure` aborts the whole request.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ToolCallError {
    #[error("unknown function `{name}`")]
    UnknownFunction { name: String },
    #[error(transparent)]
    InvalidArguments(#[from] ArgumentError),
    #[error("{function} cannot run while the booking is {state}")]
    InvalidSequence { function: FunctionName, state: BookingState },
    #[error("room choice {choice} is out of range, {available} options are available")]
    RoomChoiceOutOfRange { choice: u32, available: usize },
    #[error("payment details were refused: {0}")]
    PaymentRefused(String),
    #[error("session `{session_id}` changed concurrently (expected version {expected}, found {actual})")]
    Conflict { session_id: SessionId, expected: u64, actual: u64 },
    #[error("session `{session_id}` was not found or has expired")]
    SessionNotFound { session_id: SessionId },
    #[error(transparent)]
    External(#[from] AdapterError),
    #[error("infrastructure failure: {0}")]
    Infrastructure(String),
}

impl ToolCallError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownFunction { .. } => ErrorKind::UnknownFunction,
            Self::InvalidArguments(_)
            | Self::InvalidSequence { .. }
            | Self::RoomChoiceOutOfRange { .. }
            | Self::PaymentRefused(_) => ErrorKind::ValidationError,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::SessionNotFound { .. } => ErrorKind::SessionNotFound,
            Self::External(_) => ErrorKind::ExternalServiceError,
            Self::Infrastructure(_) => ErrorKind::InfrastructureError,
        }
    }

    /// Finer-grained cause for validation failures.
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            Self::InvalidArguments(error) => Some(error.reason()),
            Self::InvalidSequence { .. } => Some("invalid_sequence"),
            Self::RoomChoiceOutOfRange { .. } => Some("room_choice_out_of_range"),
            Self::PaymentRefused(_) => Some("payment_refused"),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Conflict { .. } => true,
            Self::External(error) => error.is_retryable(),
            _ => false,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Infrastructure(_))
    }

    pub fn missing_fields(&self) -> Option<&[String]> {
        match self {
            Self::InvalidArguments(ArgumentError::MissingFields(fields)) => Some(fields),
            _ => None,
        }
    }

    /// Sentence the assistant can read back to the caller.
    pub fn voice_message(&self) -> String {
        match self {
            Self::UnknownFunction { .. } => {
                "I'm sorry, I can't help with that request right now.".to_owned()
            }
            Self::InvalidArguments(error) => error.voice_message(),
            Self::InvalidSequence { function, .. } => match function {
                FunctionName::SelectRoom => {
                    "Let's first find available rooms. What dates would you like to stay?"
                        .to_owned()
                }
                FunctionName::CompleteBooking => {
                    "Please choose one of the available rooms before we complete the booking."
                        .to_owned()
                }
                FunctionName::SearchHotel | FunctionName::StartOver => {
                    "I can't do that at this point in the booking.".to_owned()
                }
            },
            Self::RoomChoiceOutOfRange { available: 0, .. } => {
                "There are no rooms to choose from yet. Would you like to search different dates?"
                    .to_owned()
            }
            Self::RoomChoiceOutOfRange { available, .. } => {
                format!("Please choose a room option between 1 and {available}.")
            }
            Self::PaymentRefused(_) => {
                "That card number doesn't look right. Could you read it to me again?".to_owned()
            }
            Self::Conflict { .. } => {
                "Your booking was just updated. Let me check where we are and try again."
                    .to_owned()
            }
            Self::SessionNotFound { .. } => {
                "I couldn't find your booking session. Let's start a new search. What dates would you like to stay?"
                    .to_owned()
            }
            Self::External(error) if error.is_retryable() => {
                "I'm having trouble reaching our booking system. Please give me a moment and try again."
                    .to_owned()
            }
            Self::External(_) => {
                "I'm sorry, we couldn't complete your booking. Let's start over with a new search."
                    .to_owned()
            }
            Self::Infrastructure(_) => "Something went wrong on our side.".to_owned(),
        }
    }

    pub fn into_application(self) -> ApplicationError {
        match self {
            Self::Infrastructure(message) => ApplicationError::Persistence(message),
            Self::External(error) => ApplicationError::Integration(error.to_string()),
            other => ApplicationError::Domain(DomainError::InvariantViolation(other.to_string())),
        }
    }
}

impl From<SessionStoreError> for ToolCallError {
    fn from(value: SessionStoreError) -> Self {
        match value {
            SessionStoreError::NotFound(session_id) => Self::SessionNotFound { session_id },
            SessionStoreError::Conflict { session_id, expected, actual } => {
                Self::Conflict { session_id, expected, actual }
            }
            SessionStoreError::Unavailable(message) => Self::Infrastructure(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::adapters::AdapterError;
    use crate::domain::session::SessionId;
    use crate::errors::{ApplicationError, DomainError, ErrorKind, InterfaceError, ToolCallError};
    use crate::session::SessionStoreError;
    use crate::tools::ArgumentError;

    #[test]
    fn domain_error_maps_to_bad_request_interface_error() {
        let interface = ApplicationError::from(DomainError::InvariantViolation(
            "selected room is missing".to_owned(),
        ))
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
        assert_eq!(interface.code(), "malformed_request");
        assert_eq!(interface.status_code(), 400);
    }

    #[test]
    fn store_shutdown_is_fatal_infrastructure() {
        let error = ToolCallError::from(SessionStoreError::Unavailable("closed".to_owned()));

        assert!(error.is_fatal());
        assert_eq!(error.kind(), ErrorKind::InfrastructureError);

        let interface = error.into_application().into_interface("call-1");
        assert_eq!(interface.status_code(), 500);
        assert_eq!(interface.code(), "infrastructure_error");
        assert_eq!(interface.correlation_id(), "call-1");
    }

    #[test]
    fn retryability_follows_the_adapter_failure_mode() {
        let timeout = ToolCallError::from(AdapterError::Timeout {
            service: "payment_tokenizer",
            timeout_ms: 5_000,
        });
        let rejected = ToolCallError::from(AdapterError::Rejected {
            service: "booking_repository",
            message: "hotel closed".to_owned(),
        });
        let conflict = ToolCallError::Conflict {
            session_id: SessionId("BK-1".to_owned()),
            expected: 2,
            actual: 3,
        };

        assert!(timeout.is_retryable());
        assert!(!rejected.is_retryable());
        assert!(conflict.is_retryable());
        assert_eq!(rejected.kind(), ErrorKind::ExternalServiceError);
    }

    #[test]
    fn missing_fields_are_exposed_for_the_response() {
        let error = ToolCallError::from(ArgumentError::MissingFields(vec![
            "first name".to_owned(),
            "email address".to_owned(),
        ]));

        assert_eq!(error.kind(), ErrorKind::ValidationError);
        assert_eq!(
            error.missing_fields().map(<[String]>::to_vec),
            Some(vec!["first name".to_owned(), "email address".to_owned()])
        );
        assert_eq!(error.voice_message(), "I still need your first name and email address.");
    }
}
