use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::guest::PaymentReference;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BookingId(pub String);

impl BookingId {
    /// Assigned by the caller before the insert; repositories store it as is.
    pub fn generate() -> Self {
        Self(format!("bkg-{}", Uuid::new_v4().simple()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Failed,
}

impl BookingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::Cancelled => "CANCELLED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(Self::Pending),
            "CONFIRMED" => Some(Self::Confirmed),
            "CANCELLED" => Some(Self::Cancelled),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Confirmed)
                | (Self::Pending, Self::Failed)
                | (Self::Pending, Self::Cancelled)
                | (Self::Confirmed, Self::Cancelled)
        )
    }
}

/// Everything the repository needs to record a new reservation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewBooking {
    pub id: BookingId,
    pub user_id: UserId,
    pub session_id: String,
    pub hotel_external_id: String,
    pub hotel_name: String,
    pub offer_id: String,
    pub room_type: String,
    pub price: Decimal,
    pub currency: String,
    pub check_in_date: NaiveDate,
    pub check_out_date: NaiveDate,
    pub guests_count: u32,
    pub confirmation_number: String,
    pub payment: PaymentReference,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRecord {
    pub id: BookingId,
    pub user_id: UserId,
    pub session_id: String,
    pub hotel_external_id: String,
    pub offer_id: String,
    pub room_type: String,
    pub price: Decimal,
    pub currency: String,
    pub check_in_date: NaiveDate,
    pub check_out_date: NaiveDate,
    pub guests_count: u32,
    pub status: BookingStatus,
    pub confirmation_number: String,
    pub payment_token: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BookingRecord {
    pub fn transition_to(&mut self, next: BookingStatus) -> Result<(), DomainError> {
        if self.status == next {
            return Ok(());
        }
        if self.status.can_transition_to(next) {
            self.status = next;
            self.updated_at = Utc::now();
            return Ok(());
        }

        Err(DomainError::InvalidBookingTransition { from: self.status, to: next })
    }
}

/// The slice of a stored booking a session keeps after confirmation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedBooking {
    pub booking_id: BookingId,
    pub confirmation_number: String,
    pub status: BookingStatus,
}

pub fn generate_confirmation_number() -> String {
    let mut rng = rand::thread_rng();
    format!("VX{:08}", rng.gen_range(0..100_000_000u32))
}
