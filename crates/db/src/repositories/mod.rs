use thiserror::Error;

use voxstay_core::{AdapterError, DomainError};

pub mod booking;

pub use booking::SqlBookingRepository;

const SERVICE: &str = "booking_repository";

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("{0} was not found")]
    NotFound(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("booking `{0}` changed status concurrently")]
    StaleStatus(String),
    #[error("confirmation number `{0}` is already in use")]
    DuplicateConfirmation(String),
}

impl RepositoryError {
    /// Constraint violations and bad transitions will fail the same way again.
    fn is_permanent(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::Database(error)) => {
                error.is_unique_violation()
                    || error.is_foreign_key_violation()
                    || error.is_check_violation()
            }
            Self::Database(sqlx::Error::RowNotFound) => true,
            Self::Database(_) => false,
            Self::Decode(_)
            | Self::NotFound(_)
            | Self::Domain(_)
            | Self::StaleStatus(_)
            | Self::DuplicateConfirmation(_) => true,
        }
    }
}

impl From<RepositoryError> for AdapterError {
    fn from(error: RepositoryError) -> Self {
        let message = error.to_string();
        if matches!(error, RepositoryError::DuplicateConfirmation(_)) {
            AdapterError::Duplicate { service: SERVICE, message }
        } else if error.is_permanent() {
            AdapterError::Rejected { service: SERVICE, message }
        } else {
            AdapterError::Unavailable { service: SERVICE, message }
        }
    }
}

#[cfg(test)]
mod tests {
    use voxstay_core::{AdapterError, BookingStatus, DomainError};

    use super::RepositoryError;

    #[test]
    fn pool_failures_are_retryable() {
        let error = AdapterError::from(RepositoryError::Database(sqlx::Error::PoolTimedOut));
        assert!(matches!(error, AdapterError::Unavailable { service: "booking_repository", .. }));
        assert!(error.is_retryable());
    }

    #[test]
    fn taken_confirmation_numbers_map_to_duplicates() {
        let error =
            AdapterError::from(RepositoryError::DuplicateConfirmation("VX00000001".to_owned()));
        assert!(matches!(error, AdapterError::Duplicate { service: "booking_repository", .. }));
    }

    #[test]
    fn transition_and_lookup_failures_are_rejections() {
        let transition = RepositoryError::Domain(DomainError::InvalidBookingTransition {
            from: BookingStatus::Failed,
            to: BookingStatus::Confirmed,
        });
        for error in [transition, RepositoryError::NotFound("booking `bkg-1`".to_owned())] {
            let mapped = AdapterError::from(error);
            assert!(matches!(mapped, AdapterError::Rejected { .. }), "{mapped:?}");
        }
    }
}
