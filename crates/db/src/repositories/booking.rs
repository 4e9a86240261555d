use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row};
use uuid::Uuid;

use voxstay_core::{
    AdapterError, BookingId, BookingRecord, BookingRepository, BookingStatus, DomainError,
    GuestInfo, NewBooking, UserId,
};

use super::RepositoryError;
use crate::DbPool;

const DATE_FORMAT: &str = "%Y-%m-%d";

pub struct SqlBookingRepository {
    pool: DbPool,
}

impl SqlBookingRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn upsert_user_row(
        &self,
        email: &str,
        profile: &GuestInfo,
    ) -> Result<UserId, RepositoryError> {
        let now = Utc::now().to_rfc3339();
        let id: String = sqlx::query_scalar(
            "INSERT INTO users (
                id, email, first_name, last_name, phone, address,
                zip_code, city, state, country, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(email) DO UPDATE SET
                first_name = excluded.first_name,
                last_name = excluded.last_name,
                phone = excluded.phone,
                address = excluded.address,
                zip_code = excluded.zip_code,
                city = excluded.city,
                state = excluded.state,
                country = excluded.country,
                updated_at = excluded.updated_at
             RETURNING id",
        )
        .bind(format!("usr-{}", Uuid::new_v4().simple()))
        .bind(email.trim().to_ascii_lowercase())
        .bind(&profile.first_name)
        .bind(&profile.last_name)
        .bind(&profile.phone)
        .bind(&profile.address)
        .bind(&profile.zip_code)
        .bind(&profile.city)
        .bind(&profile.state)
        .bind(&profile.country)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;

        Ok(UserId(id))
    }

    /// Hotel, payment reference and booking are written together or not at all.
    async fn insert_booking(&self, booking: NewBooking) -> Result<BookingId, RepositoryError> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let hotel_id: String = sqlx::query_scalar(
            "INSERT INTO hotels (id, external_id, name, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(external_id) DO UPDATE SET name = excluded.name
             RETURNING id",
        )
        .bind(format!("htl-{}", Uuid::new_v4().simple()))
        .bind(&booking.hotel_external_id)
        .bind(&booking.hotel_name)
        .bind(&now)
        .fetch_one(&mut *tx)
        .await?;

        let payment = &booking.payment;
        let payment_info_id: String = sqlx::query_scalar(
            "INSERT INTO payment_info (
                id, user_id, token, card_vendor, last_four,
                expiry_month, expiry_year, holder_name, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(user_id, token) DO UPDATE SET holder_name = excluded.holder_name
             RETURNING id",
        )
        .bind(format!("pay-{}", Uuid::new_v4().simple()))
        .bind(&booking.user_id.0)
        .bind(&payment.token)
        .bind(payment.card_vendor.code())
        .bind(&payment.last_four)
        .bind(i64::from(payment.expiry_month))
        .bind(i64::from(payment.expiry_year))
        .bind(&payment.holder_name)
        .bind(&now)
        .fetch_one(&mut *tx)
        .await?;

        let id = booking.id.clone();
        sqlx::query(
            "INSERT INTO bookings (
                id, user_id, hotel_id, payment_info_id, session_id, offer_id,
                room_type, check_in_date, check_out_date, price, currency,
                guests_count, status, confirmation_number, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id.0)
        .bind(&booking.user_id.0)
        .bind(&hotel_id)
        .bind(&payment_info_id)
        .bind(&booking.session_id)
        .bind(&booking.offer_id)
        .bind(&booking.room_type)
        .bind(booking.check_in_date.format(DATE_FORMAT).to_string())
        .bind(booking.check_out_date.format(DATE_FORMAT).to_string())
        .bind(booking.price.to_string())
        .bind(&booking.currency)
        .bind(i64::from(booking.guests_count))
        .bind(BookingStatus::Pending.as_str())
        .bind(&booking.confirmation_number)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(|error| taken_confirmation_number(error, &booking.confirmation_number))?;

        tx.commit().await?;
        Ok(id)
    }

    async fn update_status(
        &self,
        id: &BookingId,
        next: BookingStatus,
    ) -> Result<(), RepositoryError> {
        let current: Option<String> =
            sqlx::query_scalar("SELECT status FROM bookings WHERE id = ?")
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await?;
        let Some(current) = current else {
            return Err(RepositoryError::NotFound(format!("booking `{}`", id.0)));
        };
        let current = parse_status(&current)?;

        if current == next {
            return Ok(());
        }
        if !current.can_transition_to(next) {
            return Err(DomainError::InvalidBookingTransition { from: current, to: next }.into());
        }

        let updated = sqlx::query(
            "UPDATE bookings SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(next.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(&id.0)
        .bind(current.as_str())
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(RepositoryError::StaleStatus(id.0.clone()));
        }
        Ok(())
    }

    async fn load_booking(&self, id: &BookingId) -> Result<Option<BookingRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                b.id,
                b.user_id,
                b.session_id,
                h.external_id AS hotel_external_id,
                b.offer_id,
                b.room_type,
                b.price,
                b.currency,
                b.check_in_date,
                b.check_out_date,
                b.guests_count,
                b.status,
                b.confirmation_number,
                p.token AS payment_token,
                b.created_at,
                b.updated_at
             FROM bookings b
             JOIN hotels h ON h.id = b.hotel_id
             JOIN payment_info p ON p.id = b.payment_info_id
             WHERE b.id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(booking_from_row).transpose()
    }
}

#[async_trait]
impl BookingRepository for SqlBookingRepository {
    async fn upsert_user(&self, email: &str, profile: &GuestInfo) -> Result<UserId, AdapterError> {
        Ok(self.upsert_user_row(email, profile).await?)
    }

    async fn create_booking(&self, booking: NewBooking) -> Result<BookingId, AdapterError> {
        Ok(self.insert_booking(booking).await?)
    }

    async fn set_booking_status(
        &self,
        id: &BookingId,
        status: BookingStatus,
    ) -> Result<(), AdapterError> {
        Ok(self.update_status(id, status).await?)
    }

    async fn find_booking(&self, id: &BookingId) -> Result<Option<BookingRecord>, AdapterError> {
        Ok(self.load_booking(id).await?)
    }
}

fn taken_confirmation_number(error: sqlx::Error, confirmation_number: &str) -> RepositoryError {
    let taken = matches!(
        &error,
        sqlx::Error::Database(db) if db.is_unique_violation()
            && db.message().contains("confirmation_number")
    );
    if taken {
        RepositoryError::DuplicateConfirmation(confirmation_number.to_string())
    } else {
        RepositoryError::Database(error)
    }
}

fn booking_from_row(row: SqliteRow) -> Result<BookingRecord, RepositoryError> {
    let status = parse_status(&row.try_get::<String, _>("status")?)?;
    let price_raw = row.try_get::<String, _>("price")?;
    let price = Decimal::from_str(&price_raw).map_err(|error| {
        RepositoryError::Decode(format!("invalid price `{price_raw}` ({error})"))
    })?;
    let guests_count = row.try_get::<i64, _>("guests_count")?;

    Ok(BookingRecord {
        id: BookingId(row.try_get("id")?),
        user_id: UserId(row.try_get("user_id")?),
        session_id: row.try_get("session_id")?,
        hotel_external_id: row.try_get("hotel_external_id")?,
        offer_id: row.try_get("offer_id")?,
        room_type: row.try_get("room_type")?,
        price,
        currency: row.try_get("currency")?,
        check_in_date: parse_date("check_in_date", row.try_get("check_in_date")?)?,
        check_out_date: parse_date("check_out_date", row.try_get("check_out_date")?)?,
        guests_count: u32::try_from(guests_count).map_err(|_| {
            RepositoryError::Decode(format!("invalid value for `guests_count`: {guests_count}"))
        })?,
        status,
        confirmation_number: row.try_get("confirmation_number")?,
        payment_token: row.try_get("payment_token")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn parse_status(value: &str) -> Result<BookingStatus, RepositoryError> {
    BookingStatus::parse(value)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown booking status `{value}`")))
}

fn parse_date(column: &str, value: String) -> Result<NaiveDate, RepositoryError> {
    NaiveDate::parse_from_str(&value, DATE_FORMAT).map_err(|error| {
        RepositoryError::Decode(format!("invalid date in `{column}`: `{value}` ({error})"))
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}
