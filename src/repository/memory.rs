use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{AuditRepository, DeadLetterStore, ReservationRepository, TableRepository};
use crate::error::ReservationError;
use crate::models::{AuditEntry, Reservation, ReservationStatus, Table, TableStatus};
use crate::services::notification::DeadLetter;

#[derive(Default)]
struct State {
    tables: BTreeMap<i64, Table>,
    reservations: HashMap<Uuid, Reservation>,
    audit: Vec<AuditEntry>,
    dead_letters: Vec<DeadLetter>,
}

/// In-process store backing every repository trait.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
    fail_writes: AtomicBool,
    fail_audit: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tables(tables: impl IntoIterator<Item = Table>) -> Self {
        let state = State {
            tables: tables.into_iter().map(|t| (t.id, t)).collect(),
            ..State::default()
        };
        Self {
            state: RwLock::new(state),
            ..Self::default()
        }
    }

    /// Makes reservation writes fail as if the database were unreachable.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_audit(&self, fail: bool) {
        self.fail_audit.store(fail, Ordering::SeqCst);
    }

    pub async fn insert_table(&self, table: Table) {
        self.state.write().await.tables.insert(table.id, table);
    }

    /// Stores a reservation as-is, bypassing the overlap check.
    pub async fn seed(&self, reservation: Reservation) {
        self.state
            .write()
            .await
            .reservations
            .insert(reservation.id, reservation);
    }

    pub async fn audit_entries(&self) -> Vec<AuditEntry> {
        self.state.read().await.audit.clone()
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.read().await.dead_letters.clone()
    }

    fn check_writable(&self) -> Result<(), ReservationError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ReservationError::Storage(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

fn conflicts(existing: &Reservation, candidate: &Reservation) -> bool {
    existing.id != candidate.id
        && existing.status.is_active()
        && candidate.status.is_active()
        && existing.table_id.is_some()
        && existing.table_id == candidate.table_id
        && existing.slot().overlaps(&candidate.slot())
}

#[async_trait]
impl ReservationRepository for MemoryStore {
    async fn get(&self, id: Uuid) -> Result<Reservation, ReservationError> {
        self.state
            .read()
            .await
            .reservations
            .get(&id)
            .cloned()
            .ok_or(ReservationError::NotFound(id))
    }

    async fn list_for_date(&self, date: NaiveDate) -> Result<Vec<Reservation>, ReservationError> {
        let state = self.state.read().await;
        let mut found: Vec<Reservation> = state
            .reservations
            .values()
            .filter(|r| r.date == date)
            .cloned()
            .collect();
        found.sort_by_key(|r| (r.start_time, r.created_at));
        Ok(found)
    }

    async fn list_with_status(
        &self,
        status: ReservationStatus,
    ) -> Result<Vec<Reservation>, ReservationError> {
        let state = self.state.read().await;
        let mut found: Vec<Reservation> = state
            .reservations
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        found.sort_by_key(|r| (r.date, r.start_time));
        Ok(found)
    }

    async fn create(&self, reservation: &Reservation) -> Result<(), ReservationError> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        if state.reservations.values().any(|r| conflicts(r, reservation)) {
            return Err(ReservationError::SlotTaken);
        }
        state.reservations.insert(reservation.id, reservation.clone());
        Ok(())
    }

    async fn update(&self, reservation: &Reservation) -> Result<(), ReservationError> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        if !state.reservations.contains_key(&reservation.id) {
            return Err(ReservationError::NotFound(reservation.id));
        }
        if state.reservations.values().any(|r| conflicts(r, reservation)) {
            return Err(ReservationError::SlotTaken);
        }
        state.reservations.insert(reservation.id, reservation.clone());
        Ok(())
    }
}

#[async_trait]
impl TableRepository for MemoryStore {
    async fn list_tables(&self) -> Result<Vec<Table>, ReservationError> {
        Ok(self.state.read().await.tables.values().cloned().collect())
    }

    async fn get_table(&self, id: i64) -> Result<Table, ReservationError> {
        self.state
            .read()
            .await
            .tables
            .get(&id)
            .cloned()
            .ok_or(ReservationError::UnknownEntity { kind: "table", id })
    }

    async fn update_table_status(
        &self,
        id: i64,
        status: TableStatus,
    ) -> Result<(), ReservationError> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        let table = state
            .tables
            .get_mut(&id)
            .ok_or(ReservationError::UnknownEntity { kind: "table", id })?;
        table.status = status;
        Ok(())
    }
}

#[async_trait]
impl AuditRepository for MemoryStore {
    async fn record(&self, entry: &AuditEntry) -> Result<(), ReservationError> {
        if self.fail_audit.load(Ordering::SeqCst) {
            return Err(ReservationError::Storage(sqlx::Error::PoolTimedOut));
        }
        self.state.write().await.audit.push(entry.clone());
        Ok(())
    }
}

#[async_trait]
impl DeadLetterStore for MemoryStore {
    async fn store(&self, letter: &DeadLetter) -> Result<(), ReservationError> {
        self.state.write().await.dead_letters.push(letter.clone());
        Ok(())
    }
}
