//! Storage collaborators used by the services.
//!
//! `postgres` is the production backend; `memory` keeps everything in
//! process and enforces the same no-overlap rule, which makes it usable for
//! tests and single-node setups.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ReservationError;
use crate::models::{AuditEntry, Reservation, ReservationStatus, Table, TableStatus};
use crate::services::notification::DeadLetter;

#[async_trait]
pub trait ReservationRepository: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Reservation, ReservationError>;

    /// All reservations on `date`, whatever their status.
    async fn list_for_date(&self, date: NaiveDate) -> Result<Vec<Reservation>, ReservationError>;

    async fn list_with_status(
        &self,
        status: ReservationStatus,
    ) -> Result<Vec<Reservation>, ReservationError>;

    /// Fails with [`ReservationError::SlotTaken`] when the table already holds
    /// an overlapping active reservation.
    async fn create(&self, reservation: &Reservation) -> Result<(), ReservationError>;

    async fn update(&self, reservation: &Reservation) -> Result<(), ReservationError>;
}

#[async_trait]
pub trait TableRepository: Send + Sync {
    async fn list_tables(&self) -> Result<Vec<Table>, ReservationError>;

    async fn get_table(&self, id: i64) -> Result<Table, ReservationError>;

    async fn update_table_status(&self, id: i64, status: TableStatus)
        -> Result<(), ReservationError>;
}

#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn record(&self, entry: &AuditEntry) -> Result<(), ReservationError>;
}

#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    async fn store(&self, letter: &DeadLetter) -> Result<(), ReservationError>;
}

/// The set of stores the services are wired with.
#[derive(Clone)]
pub struct Repositories {
    pub reservations: Arc<dyn ReservationRepository>,
    pub tables: Arc<dyn TableRepository>,
    pub audit: Arc<dyn AuditRepository>,
    pub dead_letters: Arc<dyn DeadLetterStore>,
}

impl Repositories {
    /// Uses one backend for every concern.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: ReservationRepository + TableRepository + AuditRepository + DeadLetterStore + 'static,
    {
        Self {
            reservations: store.clone(),
            tables: store.clone(),
            audit: store.clone(),
            dead_letters: store,
        }
    }
}
