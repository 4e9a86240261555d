pub mod memory;
pub mod payment;
pub mod search;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::booking::{BookingId, BookingRecord, BookingStatus, NewBooking, UserId};
use crate::domain::guest::{CardDetails, GuestInfo, PaymentReference};
use crate::domain::search::{RoomOffer, SearchCriteria};

pub use memory::InMemoryBookingRepository;
pub use payment::HmacTokenizer;
pub use search::StaticHotelSearch;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AdapterError {
    #[error("{service} did not respond within {timeout_ms}ms")]
    Timeout { service: &'static str, timeout_ms: u64 },
    #[error("{service} is unavailable: {message}")]
    Unavailable { service: &'static str, message: String },
    #[error("{service} rejected the request: {message}")]
    Rejected { service: &'static str, message: String },
    #[error("{service} refused the input: {message}")]
    InvalidInput { service: &'static str, message: String },
    /// A unique value in the request is already taken; a fresh value may succeed.
    #[error("{service} already holds a matching record: {message}")]
    Duplicate { service: &'static str, message: String },
}

impl AdapterError {
    /// Timeouts and outages may succeed on a later attempt; rejections will not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Unavailable { .. })
    }

    pub fn service(&self) -> &'static str {
        match self {
            Self::Timeout { service, .. }
            | Self::Unavailable { service, .. }
            | Self::Rejected { service, .. }
            | Self::InvalidInput { service, .. }
            | Self::Duplicate { service, .. } => service,
        }
    }
}

#[async_trait]
pub trait HotelSearch: Send + Sync {
    /// Offers in provider ranking order.
    async fn search(&self, criteria: &SearchCriteria) -> Result<Vec<RoomOffer>, AdapterError>;
}

#[async_trait]
pub trait PaymentTokenizer: Send + Sync {
    async fn tokenize(&self, card: &CardDetails) -> Result<PaymentReference, AdapterError>;
}

#[async_trait]
pub trait BookingRepository: Send + Sync {
    /// Matches users by email; an existing profile is refreshed.
    async fn upsert_user(&self, email: &str, profile: &GuestInfo) -> Result<UserId, AdapterError>;
    /// Stores the booking as PENDING under `booking.id`. A taken confirmation
    /// number fails with `AdapterError::Duplicate`.
    async fn create_booking(&self, booking: NewBooking) -> Result<BookingId, AdapterError>;
    async fn set_booking_status(
        &self,
        id: &BookingId,
        status: BookingStatus,
    ) -> Result<(), AdapterError>;
    async fn find_booking(&self, id: &BookingId) -> Result<Option<BookingRecord>, AdapterError>;
}

/// Bounds an adapter call; an elapsed limit becomes `AdapterError::Timeout`.
pub async fn with_timeout<T, F>(
    service: &'static str,
    limit: Duration,
    call: F,
) -> Result<T, AdapterError>
where
    F: Future<Output = Result<T, AdapterError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(AdapterError::Timeout {
            service,
            timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}
