use std::fmt;

use chrono::NaiveDate;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::guest::{CardDetails, GuestInfo};
use crate::domain::search::SearchCriteria;
use crate::domain::session::SessionId;
use crate::tools::validation::{
    friendly_name, normalize_card_number, parse_count, parse_expiry, parse_iso_date,
    validate_cvv, validate_email, validate_phone, FieldReader,
};

/// The closed set of functions the voice assistant may call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FunctionName {
    SearchHotel,
    SelectRoom,
    CompleteBooking,
    StartOver,
}

impl FunctionName {
    pub const ALL: [FunctionName; 4] =
        [Self::SearchHotel, Self::SelectRoom, Self::CompleteBooking, Self::StartOver];

    /// Wire name as configured on the voice platform.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SearchHotel => "search_hotel",
            Self::SelectRoom => "book_hotel_1",
            Self::CompleteBooking => "book_hotel_2",
            Self::StartOver => "start_over",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|function| function.as_str() == name.trim())
    }
}

impl fmt::Display for FunctionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ArgumentError {
    #[error("missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("arguments could not be parsed: {0}")]
    Malformed(String),
}

impl ArgumentError {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MissingFields(_) => "missing_fields",
            Self::Invalid { .. } => "invalid_field",
            Self::Malformed(_) => "malformed_arguments",
        }
    }

    pub fn voice_message(&self) -> String {
        match self {
            Self::MissingFields(fields) => format!("I still need your {}.", spoken_list(fields)),
            Self::Invalid { field: "check_out_date", .. } => {
                "The check-out date needs to be after the check-in date. What dates would you like?"
                    .to_owned()
            }
            Self::Invalid { field: "adults", .. } => {
                "How many adults will be staying? I need at least one.".to_owned()
            }
            Self::Invalid { field: "room_choice", .. } => {
                "Which room option number would you like?".to_owned()
            }
            Self::Invalid { field, .. } => {
                format!("The {} doesn't look right. Could you repeat it?", friendly_name(field))
            }
            Self::Malformed(_) => {
                "I didn't catch that properly. Could you say it again?".to_owned()
            }
        }
    }
}

fn spoken_list(items: &[String]) -> String {
    match items {
        [] => String::new(),
        [only] => only.clone(),
        [init @ .., last] => format!("{} and {last}", init.join(", ")),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchHotelArgs {
    pub session_id: Option<SessionId>,
    pub criteria: SearchCriteria,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectRoomArgs {
    pub session_id: SessionId,
    pub room_choice: u32,
    pub version: Option<u64>,
}

#[derive(Debug)]
pub struct CompleteBookingArgs {
    pub session_id: SessionId,
    pub guest: GuestInfo,
    pub card: CardDetails,
    pub version: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StartOverArgs {
    pub session_id: Option<SessionId>,
}

/// A tool call whose arguments passed boundary validation.
#[derive(Debug)]
pub enum ToolInvocation {
    SearchHotel(SearchHotelArgs),
    SelectRoom(SelectRoomArgs),
    CompleteBooking(CompleteBookingArgs),
    StartOver(StartOverArgs),
}

impl ToolInvocation {
    pub fn function(&self) -> FunctionName {
        match self {
            Self::SearchHotel(_) => FunctionName::SearchHotel,
            Self::SelectRoom(_) => FunctionName::SelectRoom,
            Self::CompleteBooking(_) => FunctionName::CompleteBooking,
            Self::StartOver(_) => FunctionName::StartOver,
        }
    }

    /// `today` anchors the card expiry check.
    pub fn parse(
        function: FunctionName,
        arguments: &Map<String, Value>,
        today: NaiveDate,
    ) -> Result<Self, ArgumentError> {
        match function {
            FunctionName::SearchHotel => parse_search(arguments).map(Self::SearchHotel),
            FunctionName::SelectRoom => parse_select(arguments).map(Self::SelectRoom),
            FunctionName::CompleteBooking => {
                parse_complete(arguments, today).map(Self::CompleteBooking)
            }
            FunctionName::StartOver => Ok(Self::StartOver(StartOverArgs {
                session_id: FieldReader::new(arguments).optional("session_id").map(SessionId),
            })),
        }
    }
}

fn parse_search(arguments: &Map<String, Value>) -> Result<SearchHotelArgs, ArgumentError> {
    let mut reader = FieldReader::new(arguments);
    let check_in = reader.required("check_in_date");
    let check_out = reader.required("check_out_date");
    reader.required("adults");
    let session_id = reader.optional("session_id").map(SessionId);
    let occasion = reader.optional("occasion");
    reader.finish()?;

    let check_in_date = parse_iso_date("check_in_date", &check_in)?;
    let check_out_date = parse_iso_date("check_out_date", &check_out)?;
    if check_out_date <= check_in_date {
        return Err(ArgumentError::Invalid {
            field: "check_out_date",
            reason: "check-out date must be after check-in date".to_owned(),
        });
    }

    let adults = arguments
        .get("adults")
        .map(|raw| parse_count("adults", raw))
        .transpose()?
        .unwrap_or_default();
    if adults == 0 {
        return Err(ArgumentError::Invalid {
            field: "adults",
            reason: "at least one adult is required".to_owned(),
        });
    }
    let adults = u32::try_from(adults).map_err(|_| ArgumentError::Invalid {
        field: "adults",
        reason: format!("{adults} adults is out of range"),
    })?;

    Ok(SearchHotelArgs {
        session_id,
        criteria: SearchCriteria { check_in_date, check_out_date, adults, occasion },
    })
}

fn parse_select(arguments: &Map<String, Value>) -> Result<SelectRoomArgs, ArgumentError> {
    let mut reader = FieldReader::new(arguments);
    let session_id = SessionId(reader.required("session_id"));
    reader.required("room_choice");
    reader.finish()?;

    let room_choice = arguments
        .get("room_choice")
        .map(|raw| parse_count("room_choice", raw))
        .transpose()?
        .and_then(|choice| u32::try_from(choice).ok())
        .ok_or_else(|| ArgumentError::Invalid {
            field: "room_choice",
            reason: "room choice must be a positive number".to_owned(),
        })?;

    Ok(SelectRoomArgs { session_id, room_choice, version: parse_version(arguments)? })
}

fn parse_complete(
    arguments: &Map<String, Value>,
    today: NaiveDate,
) -> Result<CompleteBookingArgs, ArgumentError> {
    let mut reader = FieldReader::new(arguments);
    let session_id = SessionId(reader.required("session_id"));
    let first_name = reader.required("first_name");
    let last_name = reader.required("last_name");
    let email = reader.required("email");
    let phone = reader.required("phone");
    let address = reader.required("address");
    let zip_code = reader.required("zip_code");
    let city = reader.required("city");
    let state = reader.required("state");
    let country = reader.required("country");
    let card_number = reader.required("card_number");
    let expiry_month = reader.required("expiry_month");
    let expiry_year = reader.required("expiry_year");
    let cvv = reader.required("cvv");
    let holder_name = reader.required("cardholder_name");
    reader.finish()?;

    let email = validate_email(&email)?;
    let phone = validate_phone(&phone)?;
    let card_number = normalize_card_number(&card_number)?;
    let (expiry_month, expiry_year) = parse_expiry(&expiry_month, &expiry_year, today)?;
    let cvv = validate_cvv(&cvv)?;

    Ok(CompleteBookingArgs {
        session_id,
        guest: GuestInfo {
            first_name,
            last_name,
            email,
            phone,
            address,
            zip_code,
            city,
            state,
            country,
        },
        card: CardDetails {
            number: card_number.into(),
            cvv: cvv.into(),
            expiry_month,
            expiry_year,
            holder_name,
        },
        version: parse_version(arguments)?,
    })
}

fn parse_version(arguments: &Map<String, Value>) -> Result<Option<u64>, ArgumentError> {
    match arguments.get("version") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) if text.trim().is_empty() => Ok(None),
        Some(raw) => parse_count("version", raw).map(Some),
    }
}
