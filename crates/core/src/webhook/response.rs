use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::domain::search::RoomOption;
use crate::domain::session::Session;
use crate::errors::ToolCallError;
use crate::flows::BookingState;
use crate::orchestrator::{StepFailure, StepOutcome, StepResult};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub results: Vec<ToolCallResult>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    pub tool_call_id: String,
    /// Spoken back to the caller by the assistant.
    pub result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NextStep {
    CollectDates,
    SelectRoom,
    CollectGuestAndPaymentInfo,
    BookingComplete,
}

impl NextStep {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CollectDates => "collect_dates",
            Self::SelectRoom => "select_room",
            Self::CollectGuestAndPaymentInfo => "collect_guest_and_payment_info",
            Self::BookingComplete => "booking_complete",
        }
    }

    pub fn for_session(session: &Session) -> Self {
        match session.state {
            BookingState::Searched if session.room_options.is_empty() => Self::CollectDates,
            state => Self::for_state(state),
        }
    }

    pub fn for_state(state: BookingState) -> Self {
        match state {
            BookingState::Initial | BookingState::Failed => Self::CollectDates,
            BookingState::Searched => Self::SelectRoom,
            BookingState::RoomSelected | BookingState::GuestInfoCollected => {
                Self::CollectGuestAndPaymentInfo
            }
            BookingState::Confirmed => Self::BookingComplete,
        }
    }
}

pub fn format_outcome(tool_call_id: &str, result: &StepResult) -> ToolCallResult {
    match result {
        Ok(outcome) => success(tool_call_id, outcome),
        Err(failure) => failure_result(tool_call_id, failure),
    }
}

pub fn success(tool_call_id: &str, outcome: &StepOutcome) -> ToolCallResult {
    let (result, data) = match outcome {
        StepOutcome::Searched(session) => searched(session),
        StepOutcome::RoomSelected(session) => room_selected(session),
        StepOutcome::Confirmed(session) => confirmed(session),
        StepOutcome::Reset { session, cleared } => reset(session.as_ref(), *cleared),
    };
    ToolCallResult {
        tool_call_id: tool_call_id.to_owned(),
        result,
        data: Some(Value::Object(data)),
    }
}

pub fn failure_result(tool_call_id: &str, failure: &StepFailure) -> ToolCallResult {
    let error = &failure.error;
    let mut detail = Map::new();
    detail.insert("kind".to_owned(), json!(error.kind().as_str()));
    detail.insert("message".to_owned(), json!(error.to_string()));
    detail.insert("retryable".to_owned(), json!(error.is_retryable()));
    if let Some(reason) = error.reason() {
        detail.insert("reason".to_owned(), json!(reason));
    }
    if let Some(fields) = error.missing_fields() {
        detail.insert("missing_fields".to_owned(), json!(fields));
    }

    let mut data = Map::new();
    data.insert("success".to_owned(), json!(false));
    data.insert("error".to_owned(), Value::Object(detail));
    if let Some(session_id) = &failure.session_id {
        data.insert("session_id".to_owned(), json!(session_id.as_str()));
    }
    if let Some(state) = failure.state {
        data.insert("state".to_owned(), json!(state.as_str()));
    }
    let next_step = match (error, failure.state) {
        (ToolCallError::SessionNotFound { .. }, _) => Some(NextStep::CollectDates),
        (_, Some(state)) => Some(NextStep::for_state(state)),
        (_, None) => None,
    };
    if let Some(next_step) = next_step {
        data.insert("next_step".to_owned(), json!(next_step.as_str()));
    }

    ToolCallResult {
        tool_call_id: tool_call_id.to_owned(),
        result: error.voice_message(),
        data: Some(Value::Object(data)),
    }
}

fn base(session: &Session) -> Map<String, Value> {
    let mut data = Map::new();
    data.insert("success".to_owned(), json!(true));
    data.insert("session_id".to_owned(), json!(session.session_id.as_str()));
    data.insert("state".to_owned(), json!(session.state.as_str()));
    data.insert("version".to_owned(), json!(session.version));
    data.insert("next_step".to_owned(), json!(NextStep::for_session(session).as_str()));
    data
}

fn searched(session: &Session) -> (String, Map<String, Value>) {
    let mut data = base(session);
    data.insert("search_completed".to_owned(), json!(true));
    if let Some(criteria) = &session.search_criteria {
        data.insert("check_in_date".to_owned(), json!(criteria.check_in_date));
        data.insert("check_out_date".to_owned(), json!(criteria.check_out_date));
        data.insert("adults".to_owned(), json!(criteria.adults));
    }
    let options: Vec<Value> = session.room_options.iter().map(option_json).collect();
    data.insert("room_options".to_owned(), Value::Array(options));

    let dates = session
        .search_criteria
        .as_ref()
        .map(|criteria| {
            let check_in = spoken_date(criteria.check_in_date);
            format!(" from {check_in} to {}", spoken_date(criteria.check_out_date))
        })
        .unwrap_or_default();

    let summary = if session.room_options.is_empty() {
        format!(
            "I'm sorry, there's no availability{dates}. Would you like to try different dates?"
        )
    } else {
        let listed: Vec<String> = session
            .room_options
            .iter()
            .map(|option| {
                format!(
                    "Option {}: {} at {} per night",
                    option.choice_number,
                    option.offer.description(),
                    whole_dollars(option.offer.price_before_tax)
                )
            })
            .collect();
        format!(
            "I found {} room {}{dates}. {}. Which option would you like?",
            session.room_options.len(),
            if session.room_options.len() == 1 { "option" } else { "options" },
            listed.join(". ")
        )
    };
    (summary, data)
}

fn room_selected(session: &Session) -> (String, Map<String, Value>) {
    let mut data = base(session);
    let Some(option) = session.selected_option() else {
        return ("Your room is selected.".to_owned(), data);
    };
    data.insert("selected_room".to_owned(), option_json(option));

    let summary = format!(
        "Great choice. The {} comes to {} in total including taxes and fees. \
         To complete the booking I'll need the guest's name and contact details, \
         followed by the card details.",
        option.offer.description(),
        whole_dollars(option.offer.total_with_fees)
    );
    (summary, data)
}

fn confirmed(session: &Session) -> (String, Map<String, Value>) {
    let mut data = base(session);
    if let Some(option) = session.selected_option() {
        data.insert("selected_room".to_owned(), option_json(option));
    }
    if let Some(guest) = &session.guest_info {
        data.insert(
            "guest_info".to_owned(),
            json!({
                "first_name": guest.first_name,
                "last_name": guest.last_name,
                "email": guest.email,
                "phone": guest.phone,
                "address": guest.address,
                "zip_code": guest.zip_code,
                "city": guest.city,
                "state": guest.state,
                "country": guest.country,
            }),
        );
    }
    let Some(booking) = &session.booking else {
        return ("Your booking is confirmed.".to_owned(), data);
    };
    data.insert("booking_id".to_owned(), json!(booking.booking_id.0));
    data.insert("confirmation_number".to_owned(), json!(booking.confirmation_number));
    data.insert("booking_status".to_owned(), json!(booking.status.as_str()));

    let greeting = session
        .guest_info
        .as_ref()
        .map(|guest| format!("You're all set, {}!", guest.first_name))
        .unwrap_or_else(|| "You're all set!".to_owned());
    let stay = match (session.selected_option(), &session.search_criteria) {
        (Some(option), Some(criteria)) => format!(
            " Your {} at {} is booked from {} to {}.",
            option.offer.room_name,
            option.offer.hotel_name,
            spoken_date(criteria.check_in_date),
            spoken_date(criteria.check_out_date)
        ),
        _ => String::new(),
    };
    let email = session
        .guest_info
        .as_ref()
        .map(|guest| format!(" We'll send the details to {}.", guest.email))
        .unwrap_or_default();
    let summary = format!(
        "{greeting}{stay} Your confirmation number is {}.{email}",
        booking.confirmation_number
    );
    (summary, data)
}

fn reset(session: Option<&Session>, cleared: bool) -> (String, Map<String, Value>) {
    let mut data = match session {
        Some(session) => base(session),
        None => {
            let mut data = Map::new();
            data.insert("success".to_owned(), json!(true));
            data.insert("state".to_owned(), json!(BookingState::Initial.as_str()));
            data.insert("next_step".to_owned(), json!(NextStep::CollectDates.as_str()));
            data
        }
    };
    data.insert("session_cleared".to_owned(), json!(cleared));
    data.insert("room_options".to_owned(), Value::Array(Vec::new()));
    (
        "No problem, let's start fresh. What dates would you like to stay?".to_owned(),
        data,
    )
}

fn option_json(option: &RoomOption) -> Value {
    json!({
        "choice_number": option.choice_number,
        "offer_id": option.offer.offer_id,
        "room_code": option.offer.room_code,
        "room_name": option.offer.room_name,
        "rate_package": option.offer.rate_package,
        "hotel_id": option.offer.hotel_id,
        "hotel_name": option.offer.hotel_name,
        "price_before_tax": option.offer.price_before_tax.to_string(),
        "total_with_fees": option.offer.total_with_fees.to_string(),
        "currency": option.offer.currency,
    })
}

/// `$289`, rounding half away from zero.
pub fn whole_dollars(amount: Decimal) -> String {
    let rounded =
        amount.round_dp_with_strategy(0, rust_decimal::RoundingStrategy::MidpointAwayFromZero);
    format!("${}", rounded.normalize())
}

fn spoken_date(date: NaiveDate) -> String {
    date.format("%B %-d").to_string()
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::{failure_result, format_outcome, success, whole_dollars, NextStep};
    use crate::adapters::AdapterError;
    use crate::domain::search::{room_name_for_code, RoomOffer, SearchCriteria};
    use crate::domain::session::{Session, SessionId};
    use crate::errors::ToolCallError;
    use crate::flows::BookingState;
    use crate::orchestrator::{StepFailure, StepOutcome};
    use crate::tools::ArgumentError;

    fn offer(code: &str, nightly: i64, total: i64) -> RoomOffer {
        RoomOffer {
            offer_id: format!("BAR-{code}"),
            room_code: code.to_owned(),
            room_name: room_name_for_code(code),
            rate_package: Some("Best Available Rate".to_owned()),
            hotel_id: "SFPROPER".to_owned(),
            hotel_name: "San Francisco Proper Hotel".to_owned(),
            price_before_tax: Decimal::new(nightly, 2),
            total_with_fees: Decimal::new(total, 2),
            currency: "USD".to_owned(),
        }
    }

    fn searched_session(offers: Vec<RoomOffer>) -> Session {
        let now = Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).single().unwrap_or_else(Utc::now);
        let mut session =
            Session::new(SessionId("BK-test".to_owned()), None, now, chrono::Duration::minutes(30));
        session.record_search(
            SearchCriteria {
                check_in_date: chrono::NaiveDate::from_ymd_opt(2025, 2, 15).unwrap_or_default(),
                check_out_date: chrono::NaiveDate::from_ymd_opt(2025, 2, 17).unwrap_or_default(),
                adults: 2,
                occasion: None,
            },
            offers,
        );
        session.state = BookingState::Searched;
        session.version = 1;
        session
    }

    #[test]
    fn whole_dollar_prices() {
        assert_eq!(whole_dollars(Decimal::new(28900, 2)), "$289");
        assert_eq!(whole_dollars(Decimal::new(67048, 2)), "$670");
        assert_eq!(whole_dollars(Decimal::new(33450, 2)), "$335");
    }

    #[test]
    fn search_results_list_numbered_options() {
        let session =
            searched_session(vec![offer("PRKG", 28900, 67048), offer("JSTE", 45900, 106488)]);
        let formatted = success("tc-1", &StepOutcome::Searched(session));

        assert_eq!(formatted.tool_call_id, "tc-1");
        assert!(formatted
            .result
            .starts_with("I found 2 room options from February 15 to February 17"));
        assert!(formatted
            .result
            .contains("Option 1: Proper King Room (Best Available Rate) at $289 per night"));

        let data = formatted.data.unwrap_or_default();
        assert_eq!(data["success"], json!(true));
        assert_eq!(data["session_id"], json!("BK-test"));
        assert_eq!(data["state"], json!("SEARCHED"));
        assert_eq!(data["next_step"], json!("select_room"));
        assert_eq!(data["room_options"][1]["choice_number"], json!(2));
        assert_eq!(data["room_options"][1]["room_code"], json!("JSTE"));
    }

    #[test]
    fn empty_search_asks_for_new_dates() {
        let formatted = success("tc-1", &StepOutcome::Searched(searched_session(Vec::new())));

        assert!(formatted.result.contains("no availability"));
        let data = formatted.data.unwrap_or_default();
        assert_eq!(data["room_options"], json!([]));
        assert_eq!(data["next_step"], json!(NextStep::CollectDates.as_str()));
    }

    #[test]
    fn failures_carry_kind_retryability_and_missing_fields() {
        let fields = vec!["first name".to_owned(), "email address".to_owned()];
        let missing =
            StepFailure::new(ToolCallError::InvalidArguments(ArgumentError::MissingFields(fields)));
        let formatted = failure_result("tc-2", &missing);
        let data = formatted.data.unwrap_or_default();

        assert_eq!(formatted.result, "I still need your first name and email address.");
        assert_eq!(data["success"], json!(false));
        assert_eq!(data["error"]["kind"], json!("validation_error"));
        assert_eq!(data["error"]["retryable"], json!(false));
        assert_eq!(data["error"]["missing_fields"], json!(["first name", "email address"]));
        assert!(data.get("next_step").is_none());

        let session = searched_session(vec![offer("PRKG", 28900, 67048)]);
        let timeout = StepFailure::new(ToolCallError::External(AdapterError::Timeout {
            service: "hotel_search",
            timeout_ms: 10_000,
        }))
        .in_session(&session);
        let data = format_outcome("tc-3", &Err(timeout)).data.unwrap_or_default();
        assert_eq!(data["error"]["kind"], json!("external_service_error"));
        assert_eq!(data["error"]["retryable"], json!(true));
        assert_eq!(data["session_id"], json!("BK-test"));
        assert_eq!(data["next_step"], json!("select_room"));
    }

    #[test]
    fn unknown_sessions_point_back_to_search() {
        let failure = StepFailure::new(ToolCallError::SessionNotFound {
            session_id: SessionId("BK-gone".to_owned()),
        });
        let data = failure_result("tc-4", &failure).data.unwrap_or_default();

        assert_eq!(data["error"]["kind"], json!("session_not_found"));
        assert_eq!(data["next_step"], json!("collect_dates"));
    }

    #[test]
    fn reset_without_session_reports_nothing_cleared() {
        let formatted = success("tc-5", &StepOutcome::Reset { session: None, cleared: false });
        let data = formatted.data.unwrap_or_default();

        assert_eq!(data["session_cleared"], json!(false));
        assert_eq!(data["state"], json!("INITIAL"));
        assert!(data.get("session_id").is_none());
    }

    #[test]
    fn envelope_uses_camel_case_ids() {
        let formatted = success("tc-6", &StepOutcome::Reset { session: None, cleared: false });
        let encoded = serde_json::to_value(&formatted).unwrap_or_default();

        assert_eq!(encoded["toolCallId"], json!("tc-6"));
        assert!(encoded.get("tool_call_id").is_none());
    }
}
