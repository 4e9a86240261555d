use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::adapters::{AdapterError, BookingRepository};
use crate::domain::booking::{BookingId, BookingRecord, BookingStatus, NewBooking, UserId};
use crate::domain::guest::GuestInfo;

const SERVICE: &str = "booking_repository";

#[derive(Default)]
struct Tables {
    users_by_email: HashMap<String, (UserId, GuestInfo)>,
    hotels: HashMap<String, String>,
    bookings: HashMap<BookingId, BookingRecord>,
}

/// Process-local repository used when no database is configured and in tests.
#[derive(Clone, Default)]
pub struct InMemoryBookingRepository {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryBookingRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bookings(&self) -> Vec<BookingRecord> {
        let mut bookings: Vec<BookingRecord> = self.lock().bookings.values().cloned().collect();
        bookings.sort_by(|left, right| left.created_at.cmp(&right.created_at));
        bookings
    }

    pub fn user_count(&self) -> usize {
        self.lock().users_by_email.len()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        match self.tables.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl BookingRepository for InMemoryBookingRepository {
    async fn upsert_user(&self, email: &str, profile: &GuestInfo) -> Result<UserId, AdapterError> {
        let key = email.trim().to_ascii_lowercase();
        let mut tables = self.lock();
        let entry = tables
            .users_by_email
            .entry(key)
            .or_insert_with(|| (UserId(format!("usr-{}", Uuid::new_v4().simple())), profile.clone()));
        entry.1 = profile.clone();
        Ok(entry.0.clone())
    }

    async fn create_booking(&self, booking: NewBooking) -> Result<BookingId, AdapterError> {
        let mut tables = self.lock();
        if !tables.users_by_email.values().any(|(id, _)| *id == booking.user_id) {
            return Err(AdapterError::Rejected {
                service: SERVICE,
                message: format!("unknown user `{}`", booking.user_id.0),
            });
        }

        if tables.bookings.contains_key(&booking.id) {
            return Err(AdapterError::Rejected {
                service: SERVICE,
                message: format!("booking `{}` already exists", booking.id.0),
            });
        }
        let taken = tables
            .bookings
            .values()
            .any(|record| record.confirmation_number == booking.confirmation_number);
        if taken {
            return Err(AdapterError::Duplicate {
                service: SERVICE,
                message: format!(
                    "confirmation number `{}` is already in use",
                    booking.confirmation_number
                ),
            });
        }

        tables.hotels.entry(booking.hotel_external_id.clone()).or_insert(booking.hotel_name);
        let id = booking.id;
        let now = Utc::now();
        tables.bookings.insert(
            id.clone(),
            BookingRecord {
                id: id.clone(),
                user_id: booking.user_id,
                session_id: booking.session_id,
                hotel_external_id: booking.hotel_external_id,
                offer_id: booking.offer_id,
                room_type: booking.room_type,
                price: booking.price,
                currency: booking.currency,
                check_in_date: booking.check_in_date,
                check_out_date: booking.check_out_date,
                guests_count: booking.guests_count,
                status: BookingStatus::Pending,
                confirmation_number: booking.confirmation_number,
                payment_token: booking.payment.token,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn set_booking_status(
        &self,
        id: &BookingId,
        status: BookingStatus,
    ) -> Result<(), AdapterError> {
        let mut tables = self.lock();
        let record = tables.bookings.get_mut(id).ok_or_else(|| AdapterError::Rejected {
            service: SERVICE,
            message: format!("booking `{}` does not exist", id.0),
        })?;
        record
            .transition_to(status)
            .map_err(|error| AdapterError::Rejected { service: SERVICE, message: error.to_string() })
    }

    async fn find_booking(&self, id: &BookingId) -> Result<Option<BookingRecord>, AdapterError> {
        Ok(self.lock().bookings.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use crate::adapters::memory::InMemoryBookingRepository;
    use crate::adapters::{AdapterError, BookingRepository};
    use crate::domain::booking::{BookingId, BookingStatus, NewBooking, UserId};
    use crate::domain::guest::{CardVendor, GuestInfo, PaymentReference};

    fn guest(first_name: &str) -> GuestInfo {
        GuestInfo {
            first_name: first_name.to_owned(),
            last_name: "Lovelace".to_owned(),
            email: "ada@example.com".to_owned(),
            phone: "4155550100".to_owned(),
            address: "45 McAllister St".to_owned(),
            zip_code: "94102".to_owned(),
            city: "San Francisco".to_owned(),
            state: "CA".to_owned(),
            country: "US".to_owned(),
        }
    }

    fn new_booking(user_id: UserId) -> NewBooking {
        NewBooking {
            id: BookingId::generate(),
            user_id,
            session_id: "BK-1".to_owned(),
            hotel_external_id: "SFPROPER".to_owned(),
            hotel_name: "San Francisco Proper Hotel".to_owned(),
            offer_id: "BAR-PRKG".to_owned(),
            room_type: "PRKG".to_owned(),
            price: Decimal::new(67048, 2),
            currency: "USD".to_owned(),
            check_in_date: NaiveDate::from_ymd_opt(2025, 2, 15).unwrap_or_default(),
            check_out_date: NaiveDate::from_ymd_opt(2025, 2, 17).unwrap_or_default(),
            guests_count: 2,
            confirmation_number: "VX12345678".to_owned(),
            payment: PaymentReference {
                token: "tok_0123".to_owned(),
                card_vendor: CardVendor::Visa,
                last_four: "1111".to_owned(),
                expiry_month: 12,
                expiry_year: 2030,
                holder_name: "Ada Lovelace".to_owned(),
            },
        }
    }

    #[tokio::test]
    async fn users_are_matched_by_email_case_insensitively() -> Result<(), AdapterError> {
        let repository = InMemoryBookingRepository::new();
        let first = repository.upsert_user("Ada@Example.com", &guest("Ada")).await?;
        let second = repository.upsert_user("ada@example.com", &guest("Augusta")).await?;

        assert_eq!(first, second);
        assert_eq!(repository.user_count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn bookings_start_pending_and_follow_status_rules() -> Result<(), AdapterError> {
        let repository = InMemoryBookingRepository::new();
        let user_id = repository.upsert_user("ada@example.com", &guest("Ada")).await?;
        let id = repository.create_booking(new_booking(user_id)).await?;

        let stored = repository.find_booking(&id).await?;
        assert_eq!(stored.map(|record| record.status), Some(BookingStatus::Pending));

        repository.set_booking_status(&id, BookingStatus::Failed).await?;
        let revived = repository.set_booking_status(&id, BookingStatus::Confirmed).await;
        assert!(matches!(revived, Err(AdapterError::Rejected { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn taken_confirmation_numbers_are_duplicates() -> Result<(), AdapterError> {
        let repository = InMemoryBookingRepository::new();
        let user_id = repository.upsert_user("ada@example.com", &guest("Ada")).await?;
        let first = repository.create_booking(new_booking(user_id.clone())).await?;

        let second = repository.create_booking(new_booking(user_id)).await;
        assert!(matches!(second, Err(AdapterError::Duplicate { .. })), "{second:?}");
        assert!(!second.err().is_some_and(|error| error.is_retryable()));

        let bookings = repository.bookings();
        assert_eq!(bookings.len(), 1);
        assert_eq!(bookings[0].id, first);
        Ok(())
    }

    #[tokio::test]
    async fn bookings_for_unknown_users_are_rejected() {
        let repository = InMemoryBookingRepository::new();
        let result = repository.create_booking(new_booking(UserId("usr-ghost".to_owned()))).await;

        assert!(matches!(result, Err(AdapterError::Rejected { .. })));
        assert!(repository.bookings().is_empty());
    }
}
