use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::adapters::{with_timeout, AdapterError, BookingRepository, HotelSearch, PaymentTokenizer};
use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::booking::{
    generate_confirmation_number, BookingId, BookingStatus, ConfirmedBooking, NewBooking,
};
use crate::domain::guest::{GuestInfo, PaymentReference};
use crate::domain::search::{RoomOption, SearchCriteria};
use crate::domain::session::{Session, SessionId};
use crate::errors::ToolCallError;
use crate::flows::{BookingEvent, BookingFlow, BookingState, FlowPolicy, TransitionOutcome};
use crate::session::{Mutation, SessionStore};
use crate::tools::{
    ArgumentError, CompleteBookingArgs, FunctionName, SearchHotelArgs, SelectRoomArgs,
    StartOverArgs, ToolInvocation,
};

const SEARCH_SERVICE: &str = "hotel_search";
const PAYMENT_SERVICE: &str = "payment_tokenizer";
const REPOSITORY_SERVICE: &str = "booking_repository";
const CONFIRMATION_ATTEMPTS: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub search_timeout: Duration,
    pub payment_timeout: Duration,
    pub repository_timeout: Duration,
    pub policy: FlowPolicy,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            search_timeout: Duration::from_secs(10),
            payment_timeout: Duration::from_secs(10),
            repository_timeout: Duration::from_secs(5),
            policy: FlowPolicy::default(),
        }
    }
}

/// Identifies the tool call being served, for logs and audit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallContext {
    pub tool_call_id: String,
    pub call_id: Option<String>,
}

impl CallContext {
    pub fn new(tool_call_id: impl Into<String>, call_id: Option<String>) -> Self {
        Self { tool_call_id: tool_call_id.into(), call_id }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Searched(Session),
    RoomSelected(Session),
    Confirmed(Session),
    Reset { session: Option<Session>, cleared: bool },
}

impl StepOutcome {
    pub fn session(&self) -> Option<&Session> {
        match self {
            Self::Searched(session) | Self::RoomSelected(session) | Self::Confirmed(session) => {
                Some(session)
            }
            Self::Reset { session, .. } => session.as_ref(),
        }
    }
}

/// A failed step, with the session it ran against when one was resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepFailure {
    pub error: ToolCallError,
    pub session_id: Option<SessionId>,
    pub state: Option<BookingState>,
}

impl StepFailure {
    pub fn new(error: ToolCallError) -> Self {
        Self { error, session_id: None, state: None }
    }

    pub fn in_session(mut self, session: &Session) -> Self {
        self.session_id = Some(session.session_id.clone());
        self.state = Some(session.state);
        self
    }
}

impl From<ToolCallError> for StepFailure {
    fn from(error: ToolCallError) -> Self {
        Self::new(error)
    }
}

impl From<ArgumentError> for StepFailure {
    fn from(error: ArgumentError) -> Self {
        Self::new(ToolCallError::from(error))
    }
}

pub type StepResult = Result<StepOutcome, StepFailure>;

type Attempt = Result<(), ToolCallError>;

/// Runs booking transitions: checks the flow table, calls adapters while the
/// session lock is held, and commits the resulting session in one step.
pub struct BookingOrchestrator {
    store: Arc<SessionStore>,
    search: Arc<dyn HotelSearch>,
    tokenizer: Arc<dyn PaymentTokenizer>,
    repository: Arc<dyn BookingRepository>,
    audit: Arc<dyn AuditSink>,
    flow: BookingFlow,
    settings: OrchestratorSettings,
}

impl BookingOrchestrator {
    pub fn new(
        store: Arc<SessionStore>,
        search: Arc<dyn HotelSearch>,
        tokenizer: Arc<dyn PaymentTokenizer>,
        repository: Arc<dyn BookingRepository>,
        audit: Arc<dyn AuditSink>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            search,
            tokenizer,
            repository,
            audit,
            flow: BookingFlow::new(settings.policy),
            settings,
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn settings(&self) -> OrchestratorSettings {
        self.settings
    }

    pub async fn search_hotel(&self, ctx: &CallContext, args: SearchHotelArgs) -> StepResult {
        let function = FunctionName::SearchHotel;
        let SearchHotelArgs { session_id, criteria } = args;
        let session = self
            .store
            .get_or_create(session_id.as_ref(), ctx.call_id.as_deref())
            .await
            .map_err(ToolCallError::from)?;

        let (session, attempt) = self
            .transact(&session.session_id, None, |current| async move {
                let event = BookingEvent::SearchCompleted;
                let step = match self.advance(ctx, &current, function, event) {
                    Ok(step) => step,
                    Err(rejected) => return Ok(Mutation::discard(Err(rejected))),
                };

                let searched = with_timeout(
                    SEARCH_SERVICE,
                    self.settings.search_timeout,
                    self.search.search(&criteria),
                )
                .await;
                let offers = match searched {
                    Ok(offers) => offers,
                    Err(error) => return Ok(self.external_failure(ctx, current, function, error)),
                };

                info!(
                    event_name = "booking.search_completed",
                    correlation_id = %ctx.tool_call_id,
                    session_id = %current.session_id,
                    check_in_date = %criteria.check_in_date,
                    check_out_date = %criteria.check_out_date,
                    adults = criteria.adults,
                    offers = offers.len(),
                    "hotel search completed"
                );

                let mut next = current;
                next.record_search(criteria, offers);
                next.state = step.to;
                self.audit_applied(ctx, &next, &step, function);
                Ok(Mutation::commit(next, Ok(())))
            })
            .await?;

        conclude(session, attempt, StepOutcome::Searched)
    }

    pub async fn select_room(&self, ctx: &CallContext, args: SelectRoomArgs) -> StepResult {
        let function = FunctionName::SelectRoom;
        let SelectRoomArgs { session_id, room_choice, version } = args;

        let (session, attempt) = self
            .transact(&session_id, version, |current| async move {
                let step = match self.advance(ctx, &current, function, BookingEvent::RoomChosen) {
                    Ok(step) => step,
                    Err(rejected) => return Ok(Mutation::discard(Err(rejected))),
                };
                if current.option(room_choice).is_none() {
                    let error = ToolCallError::RoomChoiceOutOfRange {
                        choice: room_choice,
                        available: current.room_options.len(),
                    };
                    return self.reject(ctx, &current, function, error);
                }

                let mut next = current;
                next.select(room_choice);
                next.state = step.to;
                self.audit_applied(ctx, &next, &step, function);
                Ok(Mutation::commit(next, Ok(())))
            })
            .await?;

        conclude(session, attempt, StepOutcome::RoomSelected)
    }

    /// Tokenizes the card, records the booking and confirms the session in a
    /// single commit. Raw card data is dropped right after tokenization.
    pub async fn complete_booking(
        &self,
        ctx: &CallContext,
        args: CompleteBookingArgs,
    ) -> StepResult {
        let function = FunctionName::CompleteBooking;
        let CompleteBookingArgs { session_id, guest, card, version } = args;

        let (session, attempt) = self
            .transact(&session_id, version, |current| async move {
                let event = BookingEvent::GuestDetailsAccepted;
                let collected = match self.advance(ctx, &current, function, event) {
                    Ok(step) => step,
                    Err(rejected) => return Ok(Mutation::discard(Err(rejected))),
                };
                let confirmed =
                    match self.flow.transition(collected.to, BookingEvent::BookingConfirmed) {
                        Ok(step) => step,
                        Err(_) => {
                            let error = out_of_order(function, &current);
                            return self.reject(ctx, &current, function, error);
                        }
                    };
                let (Some(option), Some(criteria)) =
                    (current.selected_option().cloned(), current.search_criteria.clone())
                else {
                    let error = out_of_order(function, &current);
                    return self.reject(ctx, &current, function, error);
                };

                let tokenized = with_timeout(
                    PAYMENT_SERVICE,
                    self.settings.payment_timeout,
                    self.tokenizer.tokenize(&card),
                )
                .await;
                drop(card);
                let payment = match tokenized {
                    Ok(reference) => reference,
                    Err(AdapterError::InvalidInput { message, .. }) => {
                        let error = ToolCallError::PaymentRefused(message);
                        return self.reject(ctx, &current, function, error);
                    }
                    Err(error) => return Ok(self.external_failure(ctx, current, function, error)),
                };
                info!(
                    event_name = "booking.payment_tokenized",
                    correlation_id = %ctx.tool_call_id,
                    session_id = %current.session_id,
                    card_vendor = payment.card_vendor.code(),
                    last_four = %payment.last_four,
                    "payment card tokenized"
                );

                let booking = match self
                    .persist_booking(ctx, &current, &guest, &option, &criteria, &payment)
                    .await
                {
                    Ok(booking) => booking,
                    Err(error) => return Ok(self.external_failure(ctx, current, function, error)),
                };

                let mut next = current;
                next.guest_info = Some(guest);
                next.payment_reference = Some(payment);
                next.booking = Some(booking);
                next.state = confirmed.to;
                self.audit_applied(ctx, &next, &collected, function);
                self.audit_applied(ctx, &next, &confirmed, function);
                Ok(Mutation::commit(next, Ok(())))
            })
            .await?;

        conclude(session, attempt, StepOutcome::Confirmed)
    }

    /// Resets a session to `INITIAL`. Missing or unknown ids are reported as
    /// "nothing to clear" rather than as failures.
    pub async fn start_over(&self, ctx: &CallContext, args: StartOverArgs) -> StepResult {
        let function = FunctionName::StartOver;
        let Some(session_id) = args.session_id else {
            return Ok(StepOutcome::Reset { session: None, cleared: false });
        };

        let result = self
            .transact(&session_id, None, |current| async move {
                let event = BookingEvent::StartOverRequested;
                let step = match self.advance(ctx, &current, function, event) {
                    Ok(step) => step,
                    Err(rejected) => return Ok(Mutation::discard(Err(rejected))),
                };

                let mut next = current;
                next.reset();
                next.state = step.to;
                self.audit_applied(ctx, &next, &step, function);
                Ok(Mutation::commit(next, Ok(())))
            })
            .await;

        match result {
            Ok((session, Ok(()))) => {
                Ok(StepOutcome::Reset { session: Some(session), cleared: true })
            }
            Ok((session, Err(error))) => Err(StepFailure::new(error).in_session(&session)),
            Err(ToolCallError::SessionNotFound { .. }) => {
                Ok(StepOutcome::Reset { session: None, cleared: false })
            }
            Err(error) => Err(error.into()),
        }
    }

    pub async fn execute(&self, ctx: &CallContext, invocation: ToolInvocation) -> StepResult {
        match invocation {
            ToolInvocation::SearchHotel(args) => self.search_hotel(ctx, args).await,
            ToolInvocation::SelectRoom(args) => self.select_room(ctx, args).await,
            ToolInvocation::CompleteBooking(args) => self.complete_booking(ctx, args).await,
            ToolInvocation::StartOver(args) => self.start_over(ctx, args).await,
        }
    }

    async fn transact<F, Fut>(
        &self,
        session_id: &SessionId,
        expected_version: Option<u64>,
        apply: F,
    ) -> Result<(Session, Attempt), ToolCallError>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = Result<Mutation<Attempt>, ToolCallError>>,
    {
        self.store.mutate(session_id, expected_version, apply).await
    }

    async fn persist_booking(
        &self,
        ctx: &CallContext,
        session: &Session,
        guest: &GuestInfo,
        option: &RoomOption,
        criteria: &SearchCriteria,
        payment: &PaymentReference,
    ) -> Result<ConfirmedBooking, AdapterError> {
        let limit = self.settings.repository_timeout;
        let user_id = with_timeout(
            REPOSITORY_SERVICE,
            limit,
            self.repository.upsert_user(&guest.email, guest),
        )
        .await?;

        let mut attempt = 1;
        let (booking_id, confirmation_number) = loop {
            let booking_id = BookingId::generate();
            let confirmation_number = generate_confirmation_number();
            let new_booking = NewBooking {
                id: booking_id.clone(),
                user_id: user_id.clone(),
                session_id: session.session_id.to_string(),
                hotel_external_id: option.offer.hotel_id.clone(),
                hotel_name: option.offer.hotel_name.clone(),
                offer_id: option.offer.offer_id.clone(),
                room_type: option.offer.room_code.clone(),
                price: option.offer.total_with_fees,
                currency: option.offer.currency.clone(),
                check_in_date: criteria.check_in_date,
                check_out_date: criteria.check_out_date,
                guests_count: criteria.adults,
                confirmation_number: confirmation_number.clone(),
                payment: payment.clone(),
            };

            let created =
                with_timeout(REPOSITORY_SERVICE, limit, self.repository.create_booking(new_booking))
                    .await;
            match created {
                Ok(_) => break (booking_id, confirmation_number),
                Err(AdapterError::Duplicate { .. }) if attempt < CONFIRMATION_ATTEMPTS => {
                    warn!(
                        event_name = "booking.confirmation_number_taken",
                        correlation_id = %ctx.tool_call_id,
                        session_id = %session.session_id,
                        attempt,
                        "confirmation number already in use, generating another"
                    );
                    attempt += 1;
                }
                // The insert may have committed before the outcome was lost.
                Err(error) if error.is_retryable() => {
                    self.compensate(ctx, session, &booking_id).await;
                    return Err(error);
                }
                Err(error) => return Err(error),
            }
        };

        let confirmed = with_timeout(
            REPOSITORY_SERVICE,
            limit,
            self.repository.set_booking_status(&booking_id, BookingStatus::Confirmed),
        )
        .await;
        if let Err(error) = confirmed {
            self.compensate(ctx, session, &booking_id).await;
            return Err(error);
        }

        info!(
            event_name = "booking.confirmed",
            correlation_id = %ctx.tool_call_id,
            session_id = %session.session_id,
            booking_id = %booking_id.0,
            confirmation_number = %confirmation_number,
            "booking confirmed"
        );
        Ok(ConfirmedBooking { booking_id, confirmation_number, status: BookingStatus::Confirmed })
    }

    async fn compensate(&self, ctx: &CallContext, session: &Session, booking_id: &BookingId) {
        let marked = with_timeout(
            REPOSITORY_SERVICE,
            self.settings.repository_timeout,
            self.repository.set_booking_status(booking_id, BookingStatus::Failed),
        )
        .await;

        match marked {
            Ok(()) => warn!(
                event_name = "booking.compensated",
                correlation_id = %ctx.tool_call_id,
                session_id = %session.session_id,
                booking_id = %booking_id.0,
                "booking marked FAILED after confirmation error"
            ),
            Err(error) => error!(
                event_name = "booking.compensation_failed",
                correlation_id = %ctx.tool_call_id,
                session_id = %session.session_id,
                booking_id = %booking_id.0,
                error = %error,
                "could not mark booking FAILED"
            ),
        }
    }

    /// Retryable failures leave the session as it was; anything else moves it
    /// to `FAILED`.
    fn external_failure(
        &self,
        ctx: &CallContext,
        current: Session,
        function: FunctionName,
        error: AdapterError,
    ) -> Mutation<Attempt> {
        warn!(
            event_name = "booking.external_failure",
            correlation_id = %ctx.tool_call_id,
            session_id = %current.session_id,
            function = %function,
            service = error.service(),
            retryable = error.is_retryable(),
            error = %error,
            "external service call failed"
        );

        if error.is_retryable() {
            self.audit_rejected(ctx, &current, function, &error.to_string());
            return Mutation::discard(Err(ToolCallError::External(error)));
        }

        match self.flow.transition(current.state, BookingEvent::ExternalFailure) {
            Ok(step) => {
                let mut next = current;
                next.state = step.to;
                self.audit_applied(ctx, &next, &step, function);
                Mutation::commit(next, Err(ToolCallError::External(error)))
            }
            Err(_) => Mutation::discard(Err(ToolCallError::External(error))),
        }
    }

    /// Looks up the transition for `event` from the session's state, auditing
    /// a rejection.
    fn advance(
        &self,
        ctx: &CallContext,
        current: &Session,
        function: FunctionName,
        event: BookingEvent,
    ) -> Result<TransitionOutcome, ToolCallError> {
        self.flow.transition(current.state, event).map_err(|error| {
            self.audit_rejected(ctx, current, function, &error.to_string());
            out_of_order(function, current)
        })
    }

    fn reject(
        &self,
        ctx: &CallContext,
        current: &Session,
        function: FunctionName,
        error: ToolCallError,
    ) -> Result<Mutation<Attempt>, ToolCallError> {
        self.audit_rejected(ctx, current, function, &error.to_string());
        Ok(Mutation::discard(Err(error)))
    }

    fn audit_context(&self, ctx: &CallContext, session: &Session) -> AuditContext {
        AuditContext::new(
            Some(session.session_id.clone()),
            ctx.call_id.clone(),
            ctx.tool_call_id.clone(),
            "orchestrator",
        )
    }

    fn audit_applied(
        &self,
        ctx: &CallContext,
        session: &Session,
        step: &TransitionOutcome,
        function: FunctionName,
    ) {
        self.audit.emit(
            AuditEvent::new(
                &self.audit_context(ctx, session),
                "session.transition_applied",
                AuditCategory::Session,
                AuditOutcome::Success,
            )
            .with_metadata("function", function.as_str())
            .with_metadata("from", step.from.as_str())
            .with_metadata("to", step.to.as_str())
            .with_metadata("event", format!("{:?}", step.event)),
        );
    }

    fn audit_rejected(
        &self,
        ctx: &CallContext,
        session: &Session,
        function: FunctionName,
        reason: &str,
    ) {
        self.audit.emit(
            AuditEvent::new(
                &self.audit_context(ctx, session),
                "session.transition_rejected",
                AuditCategory::Session,
                AuditOutcome::Rejected,
            )
            .with_metadata("function", function.as_str())
            .with_metadata("state", session.state.as_str())
            .with_metadata("error", reason),
        );
    }
}

fn out_of_order(function: FunctionName, session: &Session) -> ToolCallError {
    ToolCallError::InvalidSequence { function, state: session.state }
}

fn conclude(
    session: Session,
    attempt: Attempt,
    outcome: impl FnOnce(Session) -> StepOutcome,
) -> StepResult {
    match attempt {
        Ok(()) => Ok(outcome(session)),
        Err(error) => Err(StepFailure::new(error).in_session(&session)),
    }
}
