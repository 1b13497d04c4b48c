use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

use crate::error::ReservationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "reservation_status", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    /// Waiting for payment.
    Pending,
    Confirmed,
    Cancelled,
    Completed,
    NoShow,
}

impl ReservationStatus {
    /// Statuses that hold a table for their slot.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    pub fn can_transition_to(&self, next: ReservationStatus) -> bool {
        use ReservationStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending, Cancelled)
                | (Confirmed, Cancelled)
                | (Confirmed, Completed)
                | (Confirmed, NoShow)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
            Self::NoShow => "no_show",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_method", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    /// Pay at the table, no deposit.
    TableOnly,
    Prepay,
    Card,
}

impl PaymentMethod {
    pub fn initial_status(&self) -> ReservationStatus {
        match self {
            PaymentMethod::TableOnly => ReservationStatus::Confirmed,
            PaymentMethod::Prepay | PaymentMethod::Card => ReservationStatus::Pending,
        }
    }
}

/// The `[start, end)` interval a reservation occupies on a given date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Slot {
    /// Builds the slot for `duration_hours` starting at `start`.
    /// Returns `None` when the slot would run past midnight.
    pub fn for_duration(date: NaiveDate, start: NaiveTime, duration_hours: i32) -> Option<Self> {
        if duration_hours <= 0 {
            return None;
        }
        let (end, wrapped) = start.overflowing_add_signed(Duration::hours(duration_hours as i64));
        if wrapped != 0 {
            return None;
        }
        Some(Slot { date, start, end })
    }

    pub fn overlaps(&self, other: &Slot) -> bool {
        self.date == other.date && self.start < other.end && self.end > other.start
    }

    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.start)
    }
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Uuid,
    pub customer_id: i64,
    pub customer_email: Option<String>,
    pub table_id: Option<i64>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub duration_hours: i32,
    pub party_size: i32,
    pub status: ReservationStatus,
    pub payment_method: PaymentMethod,
    pub amount_paid: Decimal,
    pub created_at: NaiveDateTime,
}

impl Reservation {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        customer_id: i64,
        customer_email: Option<String>,
        table_id: i64,
        slot: Slot,
        duration_hours: i32,
        party_size: i32,
        payment_method: PaymentMethod,
        created_at: NaiveDateTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            customer_id,
            customer_email,
            table_id: Some(table_id),
            date: slot.date,
            start_time: slot.start,
            end_time: slot.end,
            duration_hours,
            party_size,
            status: payment_method.initial_status(),
            payment_method,
            amount_paid: Decimal::ZERO,
            created_at,
        }
    }

    pub fn slot(&self) -> Slot {
        Slot {
            date: self.date,
            start: self.start_time,
            end: self.end_time,
        }
    }

    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.start_time)
    }

    /// Only active reservations that have not started yet may be cancelled.
    pub fn is_cancellable(&self, now: NaiveDateTime) -> bool {
        !self.status.is_terminal() && self.starts_at() > now
    }

    /// Moves the reservation to a new start time and/or duration, keeping
    /// `end_time = start_time + duration_hours`.
    pub fn reschedule(
        &mut self,
        start_time: NaiveTime,
        duration_hours: i32,
    ) -> Result<(), ReservationError> {
        let slot = Slot::for_duration(self.date, start_time, duration_hours).ok_or_else(|| {
            ReservationError::Validation(format!(
                "{}h from {} does not fit in one day",
                duration_hours, start_time
            ))
        })?;
        self.start_time = slot.start;
        self.end_time = slot.end;
        self.duration_hours = duration_hours;
        Ok(())
    }

    pub fn transition(&mut self, to: ReservationStatus) -> Result<(), ReservationError> {
        if !self.status.can_transition_to(to) {
            return Err(ReservationError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    pub fn record_payment(&mut self, amount: Decimal) -> Result<(), ReservationError> {
        if amount <= Decimal::ZERO {
            return Err(ReservationError::Validation(
                "payment amount must be positive".to_string(),
            ));
        }
        self.amount_paid += amount;
        Ok(())
    }
}
