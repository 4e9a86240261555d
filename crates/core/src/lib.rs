pub mod adapters;
pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod orchestrator;
pub mod session;
pub mod tools;
pub mod webhook;

pub use adapters::{AdapterError, BookingRepository, HotelSearch, PaymentTokenizer};
pub use config::{AppConfig, ConfigError, LoadOptions};
pub use domain::booking::{BookingId, BookingRecord, BookingStatus, NewBooking, UserId};
pub use domain::guest::{CardDetails, CardVendor, GuestInfo, PaymentReference};
pub use domain::search::{RoomOffer, RoomOption, SearchCriteria};
pub use domain::session::{Session, SessionId};
pub use errors::{ApplicationError, DomainError, ErrorKind, InterfaceError, ToolCallError};
pub use flows::{BookingEvent, BookingFlow, BookingState, FlowPolicy};
pub use orchestrator::{
    BookingOrchestrator, CallContext, OrchestratorSettings, StepFailure, StepOutcome,
};
pub use session::{Mutation, SessionStore, SessionStoreError};
pub use tools::{FunctionName, ToolInvocation};
pub use webhook::{DispatchError, DispatchOutcome, RequestStatus, WebhookDispatcher};
