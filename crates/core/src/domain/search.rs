use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCriteria {
    pub check_in_date: NaiveDate,
    pub check_out_date: NaiveDate,
    pub adults: u32,
    pub occasion: Option<String>,
}

impl SearchCriteria {
    pub fn nights(&self) -> i64 {
        (self.check_out_date - self.check_in_date).num_days()
    }
}

/// One priced rate returned by a hotel search provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomOffer {
    pub offer_id: String,
    pub room_code: String,
    pub room_name: String,
    pub rate_package: Option<String>,
    pub hotel_id: String,
    pub hotel_name: String,
    pub price_before_tax: Decimal,
    pub total_with_fees: Decimal,
    pub currency: String,
}

impl RoomOffer {
    /// Spoken label, e.g. `Proper King Room (Best Available Rate)`.
    pub fn description(&self) -> String {
        match self.rate_package.as_deref().filter(|package| !package.trim().is_empty()) {
            Some(package) => format!("{} ({package})", self.room_name),
            None => self.room_name.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomOption {
    pub choice_number: u32,
    #[serde(flatten)]
    pub offer: RoomOffer,
}

/// Numbers offers from 1 in the order the provider ranked them.
pub fn number_offers(offers: Vec<RoomOffer>) -> Vec<RoomOption> {
    offers
        .into_iter()
        .zip(1u32..)
        .map(|(offer, choice_number)| RoomOption { choice_number, offer })
        .collect()
}

const ROOM_NAMES: &[(&str, &str)] = &[
    ("PRKG", "Proper King Room"),
    ("PRDD", "Proper Double Room"),
    ("SPKG", "Superior King Room"),
    ("SPDD", "Superior Double Room"),
    ("DLKG", "Deluxe King Room"),
    ("DLDD", "Deluxe Double Room"),
    ("JSTE", "Junior Suite"),
    ("CSTE", "Corner Suite"),
    ("PSTE", "Penthouse Suite"),
];

pub fn room_name_for_code(code: &str) -> String {
    let normalized = code.trim().to_ascii_uppercase();
    ROOM_NAMES
        .iter()
        .find(|(known, _)| *known == normalized)
        .map(|(_, name)| (*name).to_owned())
        .unwrap_or_else(|| format!("{} Room", code.trim()))
}
