use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use thiserror::Error;
use tracing::{info, warn};

use crate::errors::{InterfaceError, ToolCallError};
use crate::orchestrator::{BookingOrchestrator, CallContext, StepFailure, StepResult};
use crate::tools::{FunctionName, ToolInvocation};
use crate::webhook::envelope::{ToolCall, WebhookRequest};
use crate::webhook::response::{format_outcome, ResultEnvelope};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestStatus {
    Accepted,
    /// No tool call in the request named a known function.
    Unroutable,
}

impl RequestStatus {
    pub fn status_code(self) -> u16 {
        match self {
            Self::Accepted => 200,
            Self::Unroutable => 400,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DispatchOutcome {
    pub status: RequestStatus,
    pub envelope: ResultEnvelope,
}

/// A request aborted before every call ran, carrying the results of the calls
/// that completed first.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct DispatchError {
    pub error: InterfaceError,
    pub completed: ResultEnvelope,
}

impl From<InterfaceError> for DispatchError {
    fn from(error: InterfaceError) -> Self {
        Self { error, completed: ResultEnvelope::default() }
    }
}

impl From<DispatchError> for InterfaceError {
    fn from(value: DispatchError) -> Self {
        value.error
    }
}

pub struct WebhookDispatcher {
    orchestrator: Arc<BookingOrchestrator>,
}

impl WebhookDispatcher {
    pub fn new(orchestrator: Arc<BookingOrchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &Arc<BookingOrchestrator> {
        &self.orchestrator
    }

    pub async fn handle_body(&self, body: &[u8]) -> Result<DispatchOutcome, DispatchError> {
        let request = WebhookRequest::parse(body).map_err(|error| {
            warn!(event_name = "webhook.malformed_request", error = %error, "webhook rejected");
            DispatchError::from(error)
        })?;
        self.dispatch(request).await
    }

    /// Runs the batch in request order. One call's failure never stops its
    /// siblings; only infrastructure failures abort the request, and the
    /// results gathered up to that point travel with the error.
    pub async fn dispatch(
        &self,
        request: WebhookRequest,
    ) -> Result<DispatchOutcome, DispatchError> {
        if !request.is_tool_call_batch() {
            info!(
                event_name = "webhook.ignored",
                message_type = %request.message_type,
                call_id = request.call_id.as_deref().unwrap_or_default(),
                "webhook message carries no tool calls"
            );
            return Ok(DispatchOutcome {
                status: RequestStatus::Accepted,
                envelope: ResultEnvelope::default(),
            });
        }

        let today = Utc::now().date_naive();
        let mut envelope = ResultEnvelope { results: Vec::with_capacity(request.tool_calls.len()) };
        let mut routed = 0usize;

        for call in &request.tool_calls {
            let ctx = CallContext::new(call.id.clone(), request.call_id.clone());
            let (function, result) = self.run(&ctx, call, today).await;
            if function.is_some() {
                routed += 1;
            }

            if let Err(failure) = &result {
                if failure.error.is_fatal() {
                    let error = failure.error.clone().into_application();
                    return Err(DispatchError {
                        error: error.into_interface(&ctx.tool_call_id),
                        completed: envelope,
                    });
                }
            }
            log_call(&ctx, function, &result);
            envelope.results.push(format_outcome(&call.id, &result));
        }

        let status = if routed == 0 { RequestStatus::Unroutable } else { RequestStatus::Accepted };
        Ok(DispatchOutcome { status, envelope })
    }

    async fn run(
        &self,
        ctx: &CallContext,
        call: &ToolCall,
        today: NaiveDate,
    ) -> (Option<FunctionName>, StepResult) {
        let Some(function) = call.name.as_deref().and_then(FunctionName::parse) else {
            let name = call.name.clone().unwrap_or_default();
            return (None, Err(StepFailure::new(ToolCallError::UnknownFunction { name })));
        };

        let invocation = match call
            .arguments()
            .and_then(|arguments| ToolInvocation::parse(function, &arguments, today))
        {
            Ok(invocation) => invocation,
            Err(error) => return (Some(function), Err(error.into())),
        };

        // The call runs on its own task so it finishes even if this future is
        // dropped mid-way, for example when the caller hangs up.
        let orchestrator = Arc::clone(&self.orchestrator);
        let task_ctx = ctx.clone();
        let task =
            tokio::spawn(async move { orchestrator.execute(&task_ctx, invocation).await });
        let result = task.await.unwrap_or_else(|error| {
            Err(StepFailure::new(ToolCallError::Infrastructure(format!(
                "tool call task did not finish: {error}"
            ))))
        });
        (Some(function), result)
    }
}

fn log_call(ctx: &CallContext, function: Option<FunctionName>, result: &StepResult) {
    let function = function.map(FunctionName::as_str).unwrap_or("unknown");
    let call_id = ctx.call_id.as_deref().unwrap_or_default();
    match result {
        Ok(outcome) => info!(
            event_name = "webhook.tool_call_completed",
            correlation_id = %ctx.tool_call_id,
            call_id,
            function,
            session_id = outcome.session().map(|s| s.session_id.as_str()).unwrap_or_default(),
            "tool call completed"
        ),
        Err(failure) => warn!(
            event_name = "webhook.tool_call_failed",
            correlation_id = %ctx.tool_call_id,
            call_id,
            function,
            session_id = failure.session_id.as_ref().map(|id| id.as_str()).unwrap_or_default(),
            kind = failure.error.kind().as_str(),
            reason = failure.error.reason().unwrap_or_default(),
            error = %failure.error,
            "tool call failed"
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use crate::adapters::{
        AdapterError, BookingRepository, HmacTokenizer, HotelSearch, InMemoryBookingRepository,
        StaticHotelSearch,
    };
    use crate::audit::InMemoryAuditSink;
    use crate::domain::booking::{BookingId, BookingRecord, BookingStatus, NewBooking, UserId};
    use crate::domain::guest::GuestInfo;
    use crate::domain::search::{RoomOffer, SearchCriteria};
    use crate::domain::session::SessionId;
    use crate::errors::InterfaceError;
    use crate::flows::BookingState;
    use crate::orchestrator::{BookingOrchestrator, OrchestratorSettings};
    use crate::session::SessionStore;
    use crate::webhook::{DispatchError, DispatchOutcome, RequestStatus, WebhookDispatcher};

    fn static_search() -> Arc<dyn HotelSearch> {
        Arc::new(StaticHotelSearch::new("SFPROPER", "San Francisco Proper Hotel"))
    }

    fn dispatcher_with(
        store: Arc<SessionStore>,
        search: Arc<dyn HotelSearch>,
        repository: Arc<dyn BookingRepository>,
    ) -> WebhookDispatcher {
        let orchestrator = BookingOrchestrator::new(
            store,
            search,
            Arc::new(HmacTokenizer::new("dispatcher-test-secret".to_owned().into())),
            repository,
            Arc::new(InMemoryAuditSink::default()),
            OrchestratorSettings::default(),
        );
        WebhookDispatcher::new(Arc::new(orchestrator))
    }

    fn dispatcher() -> (WebhookDispatcher, InMemoryBookingRepository) {
        let repository = InMemoryBookingRepository::new();
        let store = Arc::new(SessionStore::new(chrono::Duration::minutes(30)));
        let dispatcher = dispatcher_with(store, static_search(), Arc::new(repository.clone()));
        (dispatcher, repository)
    }

    /// Holds the CONFIRMED update back long enough for the request to go away.
    struct SlowConfirmation {
        inner: InMemoryBookingRepository,
    }

    #[async_trait]
    impl BookingRepository for SlowConfirmation {
        async fn upsert_user(
            &self,
            email: &str,
            profile: &GuestInfo,
        ) -> Result<UserId, AdapterError> {
            self.inner.upsert_user(email, profile).await
        }

        async fn create_booking(&self, booking: NewBooking) -> Result<BookingId, AdapterError> {
            self.inner.create_booking(booking).await
        }

        async fn set_booking_status(
            &self,
            id: &BookingId,
            status: BookingStatus,
        ) -> Result<(), AdapterError> {
            if status == BookingStatus::Confirmed {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            self.inner.set_booking_status(id, status).await
        }

        async fn find_booking(
            &self,
            id: &BookingId,
        ) -> Result<Option<BookingRecord>, AdapterError> {
            self.inner.find_booking(id).await
        }
    }

    /// Answers normally but shuts the store down while doing so.
    struct ClosingSearch {
        store: Arc<SessionStore>,
    }

    #[async_trait]
    impl HotelSearch for ClosingSearch {
        async fn search(&self, criteria: &SearchCriteria) -> Result<Vec<RoomOffer>, AdapterError> {
            self.store.close();
            StaticHotelSearch::new("SFPROPER", "San Francisco Proper Hotel").search(criteria).await
        }
    }

    fn guest_and_card(session_id: &Value) -> Value {
        json!({
            "session_id": session_id,
            "first_name": "Ada",
            "last_name": "Lovelace",
            "email": "ada@example.com",
            "phone": "(415) 555-0100",
            "address": "45 McAllister St",
            "zip_code": "94102",
            "city": "San Francisco",
            "state": "CA",
            "country": "US",
            "card_number": "4111 1111 1111 1111",
            "expiry_month": "12",
            "expiry_year": "2099",
            "cvv": "123",
            "cardholder_name": "Ada Lovelace"
        })
    }

    fn tool_calls(calls: Value) -> Vec<u8> {
        json!({
            "message": {"type": "tool-calls", "toolCalls": calls},
            "call": {"id": "call-1"}
        })
        .to_string()
        .into_bytes()
    }

    fn call(id: &str, name: &str, arguments: Value) -> Value {
        json!({"id": id, "function": {"name": name, "arguments": arguments}})
    }

    fn data(outcome: &DispatchOutcome, index: usize) -> Value {
        outcome.envelope.results[index].data.clone().unwrap_or_default()
    }

    fn search() -> Value {
        json!({"check_in_date": "2025-02-15", "check_out_date": "2025-02-17", "adults": 2})
    }

    #[tokio::test]
    async fn malformed_bodies_fail_before_dispatch() {
        let (dispatcher, _) = dispatcher();
        let result = dispatcher.handle_body(b"{\"message\": {\"type\": \"tool-ca").await;

        assert!(matches!(
            result,
            Err(DispatchError { error: InterfaceError::BadRequest { .. }, .. })
        ));
        assert_eq!(dispatcher.orchestrator().store().len().await, 0);
    }

    #[tokio::test]
    async fn non_tool_call_messages_are_accepted_with_no_results() -> Result<(), InterfaceError> {
        let (dispatcher, _) = dispatcher();
        let body = json!({"message": {"type": "end-of-call-report"}}).to_string();
        let outcome = dispatcher.handle_body(body.as_bytes()).await?;

        assert_eq!(outcome.status, RequestStatus::Accepted);
        assert!(outcome.envelope.results.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn only_unknown_functions_is_unroutable() -> Result<(), InterfaceError> {
        let (dispatcher, _) = dispatcher();

        let body = tool_calls(json!([call("tc-1", "cancel_hotel", json!({}))]));
        let outcome = dispatcher.handle_body(&body).await?;
        assert_eq!(outcome.status, RequestStatus::Unroutable);
        assert_eq!(outcome.status.status_code(), 400);
        assert_eq!(outcome.envelope.results[0].tool_call_id, "tc-1");
        assert_eq!(data(&outcome, 0)["error"]["kind"], json!("unknown_function"));

        let empty = dispatcher.handle_body(&tool_calls(json!([]))).await?;
        assert_eq!(empty.status, RequestStatus::Unroutable);
        assert!(empty.envelope.results.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn batch_failures_stay_local_and_keep_request_order() -> Result<(), InterfaceError> {
        let (dispatcher, _) = dispatcher();
        let body = tool_calls(json!([
            call("tc-1", "cancel_hotel", json!({})),
            call("tc-2", "search_hotel", search()),
            {"function": {"name": "book_hotel_1", "arguments": {"room_choice": 1}}}
        ]));
        let outcome = dispatcher.handle_body(&body).await?;

        assert_eq!(outcome.status, RequestStatus::Accepted);
        let ids: Vec<&str> =
            outcome.envelope.results.iter().map(|result| result.tool_call_id.as_str()).collect();
        assert_eq!(ids, vec!["tc-1", "tc-2", "unknown"]);
        assert_eq!(data(&outcome, 1)["success"], json!(true));
        assert_eq!(data(&outcome, 2)["error"]["missing_fields"], json!(["session id"]));
        Ok(())
    }

    #[tokio::test]
    async fn search_select_and_start_over_scenario() -> Result<(), InterfaceError> {
        let (dispatcher, _) = dispatcher();

        let body = tool_calls(json!([call("tc-1", "search_hotel", search())]));
        let searched = dispatcher.handle_body(&body).await?;
        assert_eq!(searched.status, RequestStatus::Accepted);
        let session_id = data(&searched, 0)["session_id"].as_str().unwrap_or_default().to_owned();
        assert!(session_id.starts_with("BK-"));
        assert!(!data(&searched, 0)["room_options"].as_array().map_or(true, Vec::is_empty));

        let selected = dispatcher
            .handle_body(&tool_calls(json!([call(
                "tc-2",
                "book_hotel_1",
                json!({"session_id": session_id, "room_choice": "1"})
            )])))
            .await?;
        assert_eq!(data(&selected, 0)["state"], json!("ROOM_SELECTED"));

        let reset = dispatcher
            .handle_body(&tool_calls(json!([call(
                "tc-3",
                "start_over",
                json!({"session_id": session_id})
            )])))
            .await?;
        assert_eq!(data(&reset, 0)["state"], json!("INITIAL"));
        assert_eq!(data(&reset, 0)["session_cleared"], json!(true));
        assert_eq!(data(&reset, 0)["room_options"], json!([]));
        Ok(())
    }

    #[tokio::test]
    async fn full_booking_in_one_batch() -> Result<(), InterfaceError> {
        let (dispatcher, repository) = dispatcher();
        let body = tool_calls(json!([call("tc-1", "search_hotel", search())]));
        let searched = dispatcher.handle_body(&body).await?;
        let session_id = data(&searched, 0)["session_id"].clone();

        let body = tool_calls(json!([
            call("tc-2", "book_hotel_1", json!({"session_id": session_id, "room_choice": 2})),
            call("tc-3", "book_hotel_2", guest_and_card(&session_id))
        ]));
        let outcome = dispatcher.handle_body(&body).await?;

        let confirmed = data(&outcome, 1);
        assert_eq!(confirmed["state"], json!("CONFIRMED"));
        assert_eq!(confirmed["booking_status"], json!("CONFIRMED"));
        assert_eq!(confirmed["next_step"], json!("booking_complete"));
        assert!(confirmed["guest_info"].get("card_number").is_none());
        assert!(!outcome.envelope.results[1].result.contains("4111"));

        let bookings = repository.bookings();
        assert_eq!(bookings.len(), 1);
        assert_eq!(json!(bookings[0].confirmation_number), confirmed["confirmation_number"]);
        Ok(())
    }

    #[tokio::test]
    async fn stopped_store_aborts_the_request() {
        let (dispatcher, _) = dispatcher();
        dispatcher.orchestrator().store().close();

        let body = tool_calls(json!([call("tc-9", "search_hotel", search())]));
        let result = dispatcher.handle_body(&body).await;
        let Err(DispatchError { error, completed }) = result else {
            panic!("expected an infrastructure failure");
        };
        assert_eq!(error.status_code(), 500);
        assert_eq!(error.code(), "infrastructure_error");
        assert_eq!(error.correlation_id(), "tc-9");
        assert!(completed.results.is_empty());
    }

    #[tokio::test]
    async fn booking_finishes_after_the_request_is_dropped() -> Result<(), InterfaceError> {
        let inner = InMemoryBookingRepository::new();
        let store = Arc::new(SessionStore::new(chrono::Duration::minutes(30)));
        let dispatcher = dispatcher_with(
            Arc::clone(&store),
            static_search(),
            Arc::new(SlowConfirmation { inner: inner.clone() }),
        );
        let body = tool_calls(json!([call("tc-1", "search_hotel", search())]));
        let searched = dispatcher.handle_body(&body).await?;
        let session_id = data(&searched, 0)["session_id"].clone();

        let body = tool_calls(json!([
            call("tc-2", "book_hotel_1", json!({"session_id": session_id, "room_choice": 1})),
            call("tc-3", "book_hotel_2", guest_and_card(&session_id))
        ]));
        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), dispatcher.handle_body(&body)).await;
        assert!(abandoned.is_err(), "request should still be running when dropped");

        tokio::time::sleep(Duration::from_millis(400)).await;
        let bookings = inner.bookings();
        assert_eq!(bookings.len(), 1);
        assert_eq!(bookings[0].status, BookingStatus::Confirmed);

        let session_id = SessionId(session_id.as_str().unwrap_or_default().to_owned());
        let stored = store.get(&session_id).await.map_err(|error| InterfaceError::Internal {
            message: error.to_string(),
            correlation_id: "test".to_owned(),
        })?;
        assert_eq!(stored.state, BookingState::Confirmed);
        assert!(stored.booking.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn aborted_batches_keep_the_results_already_committed() {
        let store = Arc::new(SessionStore::new(chrono::Duration::minutes(30)));
        let dispatcher = dispatcher_with(
            Arc::clone(&store),
            Arc::new(ClosingSearch { store: Arc::clone(&store) }),
            Arc::new(InMemoryBookingRepository::new()),
        );

        let body = tool_calls(json!([
            call("tc-1", "search_hotel", search()),
            call("tc-2", "search_hotel", search())
        ]));
        let Err(DispatchError { error, completed }) = dispatcher.handle_body(&body).await else {
            panic!("expected the second call to abort the request");
        };

        assert_eq!(error.status_code(), 500);
        assert_eq!(error.correlation_id(), "tc-2");
        assert_eq!(completed.results.len(), 1);
        assert_eq!(completed.results[0].tool_call_id, "tc-1");
        let first = completed.results[0].data.clone().unwrap_or_default();
        assert_eq!(first["success"], json!(true));
        assert!(first["session_id"].as_str().is_some_and(|id| id.starts_with("BK-")));
    }
}
