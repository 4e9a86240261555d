use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestInfo {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub zip_code: String,
    pub city: String,
    pub state: String,
    pub country: String,
}

impl GuestInfo {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Raw card data as collected on the call. Lives only until tokenization.
#[derive(Debug)]
pub struct CardDetails {
    pub number: SecretString,
    pub cvv: SecretString,
    pub expiry_month: u32,
    pub expiry_year: i32,
    pub holder_name: String,
}

impl CardDetails {
    pub fn last_four(&self) -> String {
        let digits = self.number.expose_secret();
        let start = digits.len().saturating_sub(4);
        digits[start..].to_owned()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CardVendor {
    #[serde(rename = "VI")]
    Visa,
    #[serde(rename = "MC")]
    Mastercard,
    #[serde(rename = "AX")]
    Amex,
    #[serde(rename = "DS")]
    Discover,
    #[serde(rename = "OTHER")]
    Other,
}

impl CardVendor {
    pub fn from_card_number(digits: &str) -> Self {
        let prefix2 = digits.get(..2).and_then(|value| value.parse::<u32>().ok()).unwrap_or(0);
        let prefix4 = digits.get(..4).and_then(|value| value.parse::<u32>().ok()).unwrap_or(0);

        if digits.starts_with('4') {
            Self::Visa
        } else if (51..=55).contains(&prefix2) || (2221..=2720).contains(&prefix4) {
            Self::Mastercard
        } else if prefix2 == 34 || prefix2 == 37 {
            Self::Amex
        } else if digits.starts_with("6011") || prefix2 == 65 {
            Self::Discover
        } else {
            Self::Other
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::Visa => "VI",
            Self::Mastercard => "MC",
            Self::Amex => "AX",
            Self::Discover => "DS",
            Self::Other => "OTHER",
        }
    }

    pub fn from_code(code: &str) -> Self {
        match code {
            "VI" => Self::Visa,
            "MC" => Self::Mastercard,
            "AX" => Self::Amex,
            "DS" => Self::Discover,
            _ => Self::Other,
        }
    }
}

/// What survives of a card after tokenization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReference {
    pub token: String,
    pub card_vendor: CardVendor,
    pub last_four: String,
    pub expiry_month: u32,
    pub expiry_year: i32,
    pub holder_name: String,
}
