use chrono::NaiveDate;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Permission, ReservationStatus};

/// Errors surfaced by the reservation services and repositories.
///
/// "No table available" and "not refundable" are regular outcomes and never
/// show up here.
#[derive(Debug, Error)]
pub enum ReservationError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("reservation {0} not found")]
    NotFound(Uuid),

    #[error("{kind} {id} not found")]
    UnknownEntity { kind: &'static str, id: i64 },

    #[error("reservation {id} cannot be cancelled in status {status}")]
    NotCancellable { id: Uuid, status: ReservationStatus },

    #[error("reservation cannot move from {from} to {to}")]
    InvalidTransition {
        from: ReservationStatus,
        to: ReservationStatus,
    },

    #[error("missing permission: {0:?}")]
    Forbidden(Permission),

    /// The table already holds an overlapping active reservation.
    #[error("slot is no longer available")]
    SlotTaken,

    #[error("allocation lock for {0} is held by another request")]
    LockUnavailable(NaiveDate),

    #[error("database error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl From<validator::ValidationErrors> for ReservationError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ReservationError::Validation(errors.to_string())
    }
}

impl ReservationError {
    /// Whether the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReservationError::SlotTaken
                | ReservationError::LockUnavailable(_)
                | ReservationError::Redis(_)
        )
    }
}
