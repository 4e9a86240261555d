use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, warn};

use voxstay_core::domain::search::room_name_for_code;
use voxstay_core::{AdapterError, HotelSearch, RoomOffer, SearchCriteria};

const SERVICE: &str = "hotel_search";
const DATE_FORMAT: &str = "%m/%d/%Y";

/// Rate lookup against an AZDS-style availability API. The response order
/// is kept as the provider ranking.
#[derive(Clone, Debug)]
pub struct AzdsHotelSearch {
    client: Client,
    base_url: String,
    hotel_code: String,
    hotel_name: String,
    timeout: Duration,
}

impl AzdsHotelSearch {
    pub fn new(
        base_url: &str,
        hotel_code: impl Into<String>,
        hotel_name: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            hotel_code: hotel_code.into(),
            hotel_name: hotel_name.into(),
            timeout,
        })
    }

    fn rates_url(&self) -> String {
        format!("{}/{}/rates", self.base_url, self.hotel_code)
    }

    fn transport_error(&self, error: reqwest::Error) -> AdapterError {
        if error.is_timeout() {
            AdapterError::Timeout {
                service: SERVICE,
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }
        } else {
            AdapterError::Unavailable { service: SERVICE, message: error.to_string() }
        }
    }

    /// Rates without a positive nightly and total price are not bookable and
    /// are dropped.
    fn offer_from(&self, rate: AzdsRate) -> Option<RoomOffer> {
        let total = rate.tax.and_then(|tax| tax.total_with_taxes_and_fees);
        let (Some(price_before_tax), Some(total_with_fees)) = (rate.base_price_before_tax, total)
        else {
            warn!(
                event_name = "search.azds_rate_skipped",
                hotel_code = %self.hotel_code,
                offer_id = %rate.code,
                room_code = %rate.room_code,
                reason = "missing_price",
                "rate without a price skipped"
            );
            return None;
        };
        if price_before_tax <= Decimal::ZERO || total_with_fees <= Decimal::ZERO {
            warn!(
                event_name = "search.azds_rate_skipped",
                hotel_code = %self.hotel_code,
                offer_id = %rate.code,
                room_code = %rate.room_code,
                reason = "non_positive_price",
                "rate with a zero or negative price skipped"
            );
            return None;
        }

        Some(RoomOffer {
            room_name: room_name_for_code(&rate.room_code),
            offer_id: rate.code,
            room_code: rate.room_code,
            rate_package: rate.description.filter(|text| !text.trim().is_empty()),
            hotel_id: self.hotel_code.clone(),
            hotel_name: self.hotel_name.clone(),
            price_before_tax,
            total_with_fees,
            currency: rate.currency.unwrap_or_else(|| "USD".to_string()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct AzdsRatesResponse {
    #[serde(default)]
    rates: Vec<AzdsRate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzdsRate {
    code: String,
    room_code: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    base_price_before_tax: Option<Decimal>,
    #[serde(default)]
    tax: Option<AzdsTax>,
    #[serde(default)]
    currency: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzdsTax {
    #[serde(default)]
    total_with_taxes_and_fees: Option<Decimal>,
}

#[async_trait]
impl HotelSearch for AzdsHotelSearch {
    async fn search(&self, criteria: &SearchCriteria) -> Result<Vec<RoomOffer>, AdapterError> {
        let from = criteria.check_in_date.format(DATE_FORMAT).to_string();
        let to = criteria.check_out_date.format(DATE_FORMAT).to_string();
        let adults = criteria.adults.to_string();

        let response = self
            .client
            .get(self.rates_url())
            .query(&[
                ("from", from.as_str()),
                ("to", to.as_str()),
                ("adults", adults.as_str()),
                ("children", "0"),
                ("lang", "en"),
            ])
            .send()
            .await
            .map_err(|error| self.transport_error(error))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status));
        }

        let body: AzdsRatesResponse = response.json().await.map_err(|error| {
            AdapterError::Rejected {
                service: SERVICE,
                message: format!("unreadable rates response: {error}"),
            }
        })?;
        debug!(
            event_name = "search.azds_rates_received",
            hotel_code = %self.hotel_code,
            rate_count = body.rates.len(),
            "rates received"
        );

        Ok(body.rates.into_iter().filter_map(|rate| self.offer_from(rate)).collect())
    }
}

fn status_error(status: StatusCode) -> AdapterError {
    let message = format!("rates endpoint answered {status}");
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        AdapterError::Unavailable { service: SERVICE, message }
    } else {
        AdapterError::Rejected { service: SERVICE, message }
    }
}
