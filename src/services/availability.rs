//! availability.rs
//!
//! Decides which table, if any, can take a party for a requested slot.
//!
//! A table is busy for a slot when it holds another PENDING or CONFIRMED
//! reservation on the same date whose interval overlaps
//! (`existing.start < requested.end && existing.end > requested.start`).
//! Among the tables that are free and large enough the smallest one wins
//! (best fit), ties go to the lowest table number.
//!
//! Everything here is a pure query. Persisting the chosen table is the
//! caller's job and must happen under the same allocation lock.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::collections::BTreeSet;
use validator::Validate;

use crate::config::ReservationConfig;
use crate::error::ReservationError;
use crate::models::{Reservation, Slot, Table};

/// Upper bounds for a single request.
#[derive(Debug, Clone, Copy)]
pub struct SlotLimits {
    pub max_duration_hours: i32,
    pub max_party_size: i32,
}

impl Default for SlotLimits {
    fn default() -> Self {
        Self::from(&ReservationConfig::default())
    }
}

impl From<&ReservationConfig> for SlotLimits {
    fn from(config: &ReservationConfig) -> Self {
        Self {
            max_duration_hours: config.max_duration_hours as i32,
            max_party_size: config.max_party_size as i32,
        }
    }
}

#[derive(Debug, Validate)]
struct SlotInput {
    #[validate(range(min = 1, message = "duration must be at least one hour"))]
    duration_hours: i32,
    #[validate(range(min = 1, message = "party size must be positive"))]
    party_size: i32,
}

/// A validated "party of N at this date and time for H hours" request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRequest {
    pub slot: Slot,
    pub duration_hours: i32,
    pub party_size: i32,
}

impl SlotRequest {
    pub fn new(
        date: NaiveDate,
        start_time: NaiveTime,
        duration_hours: i32,
        party_size: i32,
        limits: SlotLimits,
    ) -> Result<Self, ReservationError> {
        SlotInput {
            duration_hours,
            party_size,
        }
        .validate()?;

        if duration_hours > limits.max_duration_hours {
            return Err(ReservationError::Validation(format!(
                "duration may not exceed {} hours",
                limits.max_duration_hours
            )));
        }
        if party_size > limits.max_party_size {
            return Err(ReservationError::Validation(format!(
                "party size may not exceed {}",
                limits.max_party_size
            )));
        }

        let slot = Slot::for_duration(date, start_time, duration_hours).ok_or_else(|| {
            ReservationError::Validation(format!(
                "a {}h reservation starting at {} would run past midnight",
                duration_hours, start_time
            ))
        })?;

        Ok(Self {
            slot,
            duration_hours,
            party_size,
        })
    }

    /// Rejects requests for a slot that has already started.
    pub fn ensure_future(&self, now: NaiveDateTime) -> Result<(), ReservationError> {
        if self.slot.starts_at() <= now {
            return Err(ReservationError::Validation(format!(
                "{} is in the past",
                self.slot.starts_at()
            )));
        }
        Ok(())
    }
}

/// Ids of tables already held for an interval overlapping `slot`.
pub fn occupied_tables(slot: &Slot, existing: &[Reservation]) -> BTreeSet<i64> {
    existing
        .iter()
        .filter(|r| r.status.is_active())
        .filter(|r| r.slot().overlaps(slot))
        .filter_map(|r| r.table_id)
        .collect()
}

/// Best-fit table for `request`, or `None` when nothing is free.
pub fn find_table<'a>(
    request: &SlotRequest,
    existing: &[Reservation],
    tables: &'a [Table],
) -> Option<&'a Table> {
    let occupied = occupied_tables(&request.slot, existing);

    tables
        .iter()
        .filter(|t| t.accepts(request.party_size))
        .filter(|t| !occupied.contains(&t.id))
        .min_by_key(|t| (t.capacity, t.number, t.id))
}

/// Validates the raw request with default limits and runs [`find_table`].
pub fn resolve(
    date: NaiveDate,
    start_time: NaiveTime,
    duration_hours: i32,
    party_size: i32,
    existing: &[Reservation],
    tables: &[Table],
) -> Result<Option<Table>, ReservationError> {
    let request = SlotRequest::new(
        date,
        start_time,
        duration_hours,
        party_size,
        SlotLimits::default(),
    )?;
    Ok(find_table(&request, existing, tables).cloned())
}
