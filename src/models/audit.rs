use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::{Actor, Reservation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "audit_action", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Created,
    Updated,
    Cancelled,
}

/// Snapshot of a reservation at the moment something happened to it.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub reservation_id: Uuid,
    pub action: AuditAction,
    pub actor: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub party_size: i32,
    pub recorded_at: NaiveDateTime,
}

impl AuditEntry {
    pub fn of(
        reservation: &Reservation,
        action: AuditAction,
        actor: &Actor,
        recorded_at: NaiveDateTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            reservation_id: reservation.id,
            action,
            actor: actor.label(),
            date: reservation.date,
            start_time: reservation.start_time,
            party_size: reservation.party_size,
            recorded_at,
        }
    }
}
