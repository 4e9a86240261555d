use std::sync::OnceLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use serde_json::{Map, Value};

use crate::tools::args::ArgumentError;

const EMAIL_PATTERN: &str = r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}$";

/// Reads fields out of a tool-call argument object, collecting every missing
/// required field instead of stopping at the first.
pub(crate) struct FieldReader<'a> {
    arguments: &'a Map<String, Value>,
    missing: Vec<&'static str>,
}

impl<'a> FieldReader<'a> {
    pub(crate) fn new(arguments: &'a Map<String, Value>) -> Self {
        Self { arguments, missing: Vec::new() }
    }

    /// Required string. Blank values count as missing; numbers are accepted
    /// and rendered as text since speech-to-text often yields them.
    pub(crate) fn required(&mut self, field: &'static str) -> String {
        match self.optional(field) {
            Some(value) => value,
            None => {
                self.missing.push(field);
                String::new()
            }
        }
    }

    pub(crate) fn optional(&self, field: &str) -> Option<String> {
        match self.arguments.get(field)? {
            Value::String(text) => {
                let trimmed = text.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_owned())
            }
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        }
    }

    pub(crate) fn finish(self) -> Result<(), ArgumentError> {
        if self.missing.is_empty() {
            return Ok(());
        }
        Err(ArgumentError::MissingFields(
            self.missing.into_iter().map(|field| friendly_name(field).to_owned()).collect(),
        ))
    }
}

pub(crate) fn friendly_name(field: &str) -> &str {
    match field {
        "session_id" => "session id",
        "check_in_date" => "check-in date",
        "check_out_date" => "check-out date",
        "adults" => "number of adults",
        "room_choice" => "room choice",
        "first_name" => "first name",
        "last_name" => "last name",
        "email" => "email address",
        "phone" => "phone number",
        "address" => "street address",
        "zip_code" => "zip code",
        "city" => "city",
        "state" => "state",
        "country" => "country",
        "card_number" => "card number",
        "expiry_month" => "expiry month",
        "expiry_year" => "expiry year",
        "cvv" => "CVV",
        "cardholder_name" => "cardholder name",
        "version" => "version",
        other => other,
    }
}

pub(crate) fn parse_iso_date(field: &'static str, raw: &str) -> Result<NaiveDate, ArgumentError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| ArgumentError::Invalid {
        field,
        reason: format!("`{raw}` is not a YYYY-MM-DD date"),
    })
}

/// Whole number given as a JSON number, an integral float or a numeric string.
pub(crate) fn parse_count(field: &'static str, raw: &Value) -> Result<u64, ArgumentError> {
    let parsed = match raw {
        Value::Number(number) => number.as_u64().or_else(|| {
            number.as_f64().filter(|value| value.fract() == 0.0 && *value >= 0.0).map(|v| v as u64)
        }),
        Value::String(text) => text.trim().parse::<u64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| ArgumentError::Invalid {
        field,
        reason: format!("`{}` is not a whole number", display_value(raw)),
    })
}

pub(crate) fn validate_email(raw: &str) -> Result<String, ArgumentError> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| Regex::new(EMAIL_PATTERN).ok());

    let matches = pattern.as_ref().is_some_and(|regex| regex.is_match(raw));
    if !matches {
        return Err(ArgumentError::Invalid {
            field: "email",
            reason: format!("`{raw}` is not a valid email address"),
        });
    }
    Ok(raw.to_ascii_lowercase())
}

pub(crate) fn validate_phone(raw: &str) -> Result<String, ArgumentError> {
    let digits = raw.chars().filter(char::is_ascii_digit).count();
    if digits < 10 {
        return Err(ArgumentError::Invalid {
            field: "phone",
            reason: "phone number must contain at least 10 digits".to_owned(),
        });
    }
    Ok(raw.to_owned())
}

pub(crate) fn normalize_card_number(raw: &str) -> Result<String, ArgumentError> {
    let stripped: String = raw.chars().filter(|ch| !matches!(ch, ' ' | '-')).collect();
    let valid = stripped.chars().all(|ch| ch.is_ascii_digit())
        && (13..=19).contains(&stripped.len());
    if !valid {
        return Err(ArgumentError::Invalid {
            field: "card_number",
            reason: "card number must be 13 to 19 digits".to_owned(),
        });
    }
    Ok(stripped)
}

pub(crate) fn parse_expiry(
    month_raw: &str,
    year_raw: &str,
    today: NaiveDate,
) -> Result<(u32, i32), ArgumentError> {
    let month = month_raw
        .parse::<u32>()
        .ok()
        .filter(|month| (1..=12).contains(month))
        .ok_or_else(|| ArgumentError::Invalid {
            field: "expiry_month",
            reason: "expiry month must be between 1 and 12".to_owned(),
        })?;

    let year = match (year_raw.len(), year_raw.parse::<i32>()) {
        (2, Ok(short)) => 2000 + short,
        (4, Ok(full)) => full,
        _ => {
            return Err(ArgumentError::Invalid {
                field: "expiry_year",
                reason: "expiry year must have 2 or 4 digits".to_owned(),
            })
        }
    };

    if (year, month) < (today.year(), today.month()) {
        return Err(ArgumentError::Invalid {
            field: "expiry_year",
            reason: format!("card expired in {month:02}/{year}"),
        });
    }
    Ok((month, year))
}

pub(crate) fn validate_cvv(raw: &str) -> Result<String, ArgumentError> {
    let valid = raw.chars().all(|ch| ch.is_ascii_digit()) && (3..=4).contains(&raw.len());
    if !valid {
        return Err(ArgumentError::Invalid {
            field: "cvv",
            reason: "CVV must be 3 or 4 digits".to_owned(),
        });
    }
    Ok(raw.to_owned())
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
