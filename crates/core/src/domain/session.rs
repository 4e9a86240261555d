use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::booking::ConfirmedBooking;
use crate::domain::guest::{GuestInfo, PaymentReference};
use crate::domain::search::{number_offers, RoomOffer, RoomOption, SearchCriteria};
use crate::flows::BookingState;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn generate() -> Self {
        Self(format!("BK-{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub state: BookingState,
    pub search_criteria: Option<SearchCriteria>,
    pub room_options: Vec<RoomOption>,
    pub selected_room: Option<u32>,
    pub guest_info: Option<GuestInfo>,
    pub payment_reference: Option<PaymentReference>,
    pub booking: Option<ConfirmedBooking>,
    pub call_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub version: u64,
}

impl Session {
    pub fn new(
        session_id: SessionId,
        call_id: Option<String>,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            session_id,
            state: BookingState::Initial,
            search_criteria: None,
            room_options: Vec::new(),
            selected_room: None,
            guest_info: None,
            payment_reference: None,
            booking: None,
            call_id,
            created_at: now,
            updated_at: now,
            expires_at: now + ttl,
            version: 0,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn option(&self, choice_number: u32) -> Option<&RoomOption> {
        self.room_options.iter().find(|option| option.choice_number == choice_number)
    }

    pub fn selected_option(&self) -> Option<&RoomOption> {
        self.selected_room.and_then(|choice| self.option(choice))
    }

    /// Replaces criteria and offers; everything downstream of the old search is dropped.
    pub fn record_search(&mut self, criteria: SearchCriteria, offers: Vec<RoomOffer>) {
        self.search_criteria = Some(criteria);
        self.room_options = number_offers(offers);
        self.clear_selection();
    }

    pub fn select(&mut self, choice_number: u32) {
        self.clear_selection();
        self.selected_room = Some(choice_number);
    }

    pub fn reset(&mut self) {
        self.state = BookingState::Initial;
        self.search_criteria = None;
        self.room_options.clear();
        self.clear_selection();
    }

    fn clear_selection(&mut self) {
        self.selected_room = None;
        self.guest_info = None;
        self.payment_reference = None;
        self.booking = None;
    }
}
