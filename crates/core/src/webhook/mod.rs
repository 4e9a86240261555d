mod dispatcher;
pub mod envelope;
pub mod response;

pub use dispatcher::{DispatchError, DispatchOutcome, RequestStatus, WebhookDispatcher};
pub use envelope::{ToolCall, WebhookRequest, UNKNOWN_TOOL_CALL_ID};
pub use response::{NextStep, ResultEnvelope, ToolCallResult};
