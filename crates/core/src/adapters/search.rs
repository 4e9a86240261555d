use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::adapters::{AdapterError, HotelSearch};
use crate::domain::search::{room_name_for_code, RoomOffer, SearchCriteria};

/// A nightly rate the static catalog can offer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatalogRate {
    pub rate_code: String,
    pub room_code: String,
    pub rate_package: Option<String>,
    pub nightly_price: Decimal,
    pub max_occupancy: u32,
}

impl CatalogRate {
    pub fn new(
        rate_code: &str,
        room_code: &str,
        rate_package: Option<&str>,
        nightly_price: Decimal,
        max_occupancy: u32,
    ) -> Self {
        Self {
            rate_code: rate_code.to_owned(),
            room_code: room_code.to_owned(),
            rate_package: rate_package.map(str::to_owned),
            nightly_price,
            max_occupancy,
        }
    }
}

/// Deterministic search provider for local runs and tests: priced per night
/// from a fixed catalog, filtered by occupancy, in catalog order.
#[derive(Clone, Debug)]
pub struct StaticHotelSearch {
    hotel_id: String,
    hotel_name: String,
    currency: String,
    tax_rate: Decimal,
    rates: Vec<CatalogRate>,
}

impl StaticHotelSearch {
    pub fn new(hotel_id: impl Into<String>, hotel_name: impl Into<String>) -> Self {
        Self::with_rates(hotel_id, hotel_name, default_catalog())
    }

    pub fn with_rates(
        hotel_id: impl Into<String>,
        hotel_name: impl Into<String>,
        rates: Vec<CatalogRate>,
    ) -> Self {
        Self {
            hotel_id: hotel_id.into(),
            hotel_name: hotel_name.into(),
            currency: "USD".to_owned(),
            tax_rate: Decimal::new(16, 2),
            rates,
        }
    }

    fn price(&self, rate: &CatalogRate, nights: i64) -> RoomOffer {
        let stay = rate.nightly_price * Decimal::from(nights);
        let total_with_fees = (stay * (Decimal::ONE + self.tax_rate)).round_dp(2);

        RoomOffer {
            offer_id: rate.rate_code.clone(),
            room_code: rate.room_code.clone(),
            room_name: room_name_for_code(&rate.room_code),
            rate_package: rate.rate_package.clone(),
            hotel_id: self.hotel_id.clone(),
            hotel_name: self.hotel_name.clone(),
            price_before_tax: rate.nightly_price,
            total_with_fees,
            currency: self.currency.clone(),
        }
    }
}

#[async_trait]
impl HotelSearch for StaticHotelSearch {
    async fn search(&self, criteria: &SearchCriteria) -> Result<Vec<RoomOffer>, AdapterError> {
        let nights = criteria.nights();
        if nights <= 0 {
            return Err(AdapterError::InvalidInput {
                service: "hotel_search",
                message: "stay must be at least one night".to_owned(),
            });
        }

        Ok(self
            .rates
            .iter()
            .filter(|rate| rate.max_occupancy >= criteria.adults)
            .map(|rate| self.price(rate, nights))
            .collect())
    }
}

fn default_catalog() -> Vec<CatalogRate> {
    vec![
        CatalogRate::new("BAR-PRKG", "PRKG", Some("Best Available Rate"), Decimal::new(289, 0), 2),
        CatalogRate::new("BAR-PRDD", "PRDD", Some("Best Available Rate"), Decimal::new(309, 0), 4),
        CatalogRate::new("BB-PRKG", "PRKG", Some("Bed & Breakfast"), Decimal::new(334, 0), 2),
        CatalogRate::new("BAR-JSTE", "JSTE", Some("Best Available Rate"), Decimal::new(459, 0), 3),
        CatalogRate::new("BAR-PSTE", "PSTE", Some("Best Available Rate"), Decimal::new(895, 0), 4),
    ]
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use crate::adapters::search::{CatalogRate, StaticHotelSearch};
    use crate::adapters::{AdapterError, HotelSearch};
    use crate::domain::search::SearchCriteria;

    fn criteria(adults: u32) -> SearchCriteria {
        SearchCriteria {
            check_in_date: NaiveDate::from_ymd_opt(2025, 2, 15).unwrap_or_default(),
            check_out_date: NaiveDate::from_ymd_opt(2025, 2, 17).unwrap_or_default(),
            adults,
            occasion: None,
        }
    }

    #[tokio::test]
    async fn prices_stays_per_night_with_taxes() -> Result<(), AdapterError> {
        let search = StaticHotelSearch::new("SFPROPER", "San Francisco Proper Hotel");
        let offers = search.search(&criteria(2)).await?;

        assert_eq!(offers.len(), 5);
        assert_eq!(offers[0].room_name, "Proper King Room");
        assert_eq!(offers[0].price_before_tax, Decimal::new(289, 0));
        // 289 * 2 nights * 1.16
        assert_eq!(offers[0].total_with_fees, Decimal::new(67048, 2));
        assert_eq!(offers[0].hotel_id, "SFPROPER");
        Ok(())
    }

    #[tokio::test]
    async fn large_parties_only_see_rooms_that_fit() -> Result<(), AdapterError> {
        let search = StaticHotelSearch::new("SFPROPER", "San Francisco Proper Hotel");
        let offers = search.search(&criteria(4)).await?;

        let codes: Vec<&str> = offers.iter().map(|offer| offer.room_code.as_str()).collect();
        assert_eq!(codes, vec!["PRDD", "PSTE"]);
        Ok(())
    }

    #[tokio::test]
    async fn empty_catalog_yields_no_offers() -> Result<(), AdapterError> {
        let search = StaticHotelSearch::with_rates("X", "Nowhere Inn", Vec::new());
        assert!(search.search(&criteria(1)).await?.is_empty());

        let tiny = StaticHotelSearch::with_rates(
            "X",
            "Nowhere Inn",
            vec![CatalogRate::new("R1", "ZZQ1", None, Decimal::new(100, 0), 1)],
        );
        let offers = tiny.search(&criteria(1)).await?;
        assert_eq!(offers[0].room_name, "ZZQ1 Room");
        Ok(())
    }
}
