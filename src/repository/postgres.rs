use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::debug;
use uuid::Uuid;

use super::{AuditRepository, DeadLetterStore, ReservationRepository, TableRepository};
use crate::database::Database;
use crate::error::ReservationError;
use crate::models::{AuditEntry, Reservation, ReservationStatus, Table, TableStatus};
use crate::services::notification::DeadLetter;

// SQLSTATE exclusion_violation, raised by reservations_no_overlap
const EXCLUSION_VIOLATION: &str = "23P01";

const RESERVATION_COLUMNS: &str = "id, customer_id, customer_email, table_id, date, start_time, \
     end_time, duration_hours, party_size, status, payment_method, amount_paid, created_at";

fn map_write_error(e: sqlx::Error) -> ReservationError {
    if let sqlx::Error::Database(db) = &e {
        if db.code().as_deref() == Some(EXCLUSION_VIOLATION) {
            debug!("exclusion constraint rejected overlapping reservation");
            return ReservationError::SlotTaken;
        }
    }
    ReservationError::Storage(e)
}

/// Postgres-backed implementation of every repository trait.
#[derive(Clone)]
pub struct PgStore {
    db: Database,
}

impl PgStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ReservationRepository for PgStore {
    async fn get(&self, id: Uuid) -> Result<Reservation, ReservationError> {
        sqlx::query_as::<_, Reservation>(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db.pool)
        .await?
        .ok_or(ReservationError::NotFound(id))
    }

    async fn list_for_date(&self, date: NaiveDate) -> Result<Vec<Reservation>, ReservationError> {
        let rows = sqlx::query_as::<_, Reservation>(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations
             WHERE date = $1
             ORDER BY start_time, created_at"
        ))
        .bind(date)
        .fetch_all(&self.db.pool)
        .await?;
        Ok(rows)
    }

    async fn list_with_status(
        &self,
        status: ReservationStatus,
    ) -> Result<Vec<Reservation>, ReservationError> {
        let rows = sqlx::query_as::<_, Reservation>(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations
             WHERE status = $1
             ORDER BY date, start_time"
        ))
        .bind(status)
        .fetch_all(&self.db.pool)
        .await?;
        Ok(rows)
    }

    async fn create(&self, r: &Reservation) -> Result<(), ReservationError> {
        sqlx::query(&format!(
            "INSERT INTO reservations ({RESERVATION_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        ))
        .bind(r.id)
        .bind(r.customer_id)
        .bind(&r.customer_email)
        .bind(r.table_id)
        .bind(r.date)
        .bind(r.start_time)
        .bind(r.end_time)
        .bind(r.duration_hours)
        .bind(r.party_size)
        .bind(r.status)
        .bind(r.payment_method)
        .bind(r.amount_paid)
        .bind(r.created_at)
        .execute(&self.db.pool)
        .await
        .map_err(map_write_error)?;
        Ok(())
    }

    async fn update(&self, r: &Reservation) -> Result<(), ReservationError> {
        let result = sqlx::query(
            r#"
            UPDATE reservations
            SET customer_email = $2,
                table_id = $3,
                date = $4,
                start_time = $5,
                end_time = $6,
                duration_hours = $7,
                party_size = $8,
                status = $9,
                payment_method = $10,
                amount_paid = $11,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(r.id)
        .bind(&r.customer_email)
        .bind(r.table_id)
        .bind(r.date)
        .bind(r.start_time)
        .bind(r.end_time)
        .bind(r.duration_hours)
        .bind(r.party_size)
        .bind(r.status)
        .bind(r.payment_method)
        .bind(r.amount_paid)
        .execute(&self.db.pool)
        .await
        .map_err(map_write_error)?;

        if result.rows_affected() == 0 {
            return Err(ReservationError::NotFound(r.id));
        }
        Ok(())
    }
}

#[async_trait]
impl TableRepository for PgStore {
    async fn list_tables(&self) -> Result<Vec<Table>, ReservationError> {
        let tables = sqlx::query_as::<_, Table>(
            "SELECT id, number, capacity, category, status FROM restaurant_tables ORDER BY number",
        )
        .fetch_all(&self.db.pool)
        .await?;
        Ok(tables)
    }

    async fn get_table(&self, id: i64) -> Result<Table, ReservationError> {
        sqlx::query_as::<_, Table>(
            "SELECT id, number, capacity, category, status FROM restaurant_tables WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.db.pool)
        .await?
        .ok_or(ReservationError::UnknownEntity { kind: "table", id })
    }

    async fn update_table_status(
        &self,
        id: i64,
        status: TableStatus,
    ) -> Result<(), ReservationError> {
        let result = sqlx::query("UPDATE restaurant_tables SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(&self.db.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ReservationError::UnknownEntity { kind: "table", id });
        }
        Ok(())
    }
}

#[async_trait]
impl AuditRepository for PgStore {
    async fn record(&self, e: &AuditEntry) -> Result<(), ReservationError> {
        sqlx::query(
            r#"
            INSERT INTO reservation_audit
                (id, reservation_id, action, actor, date, start_time, party_size, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(e.id)
        .bind(e.reservation_id)
        .bind(e.action)
        .bind(&e.actor)
        .bind(e.date)
        .bind(e.start_time)
        .bind(e.party_size)
        .bind(e.recorded_at)
        .execute(&self.db.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl DeadLetterStore for PgStore {
    async fn store(&self, letter: &DeadLetter) -> Result<(), ReservationError> {
        sqlx::query(
            r#"
            INSERT INTO notification_dead_letters
                (id, template, recipient, data, attempts, last_error, failed_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            "#,
        )
        .bind(letter.notification.id)
        .bind(letter.notification.template.as_str())
        .bind(&letter.notification.recipient)
        .bind(&letter.notification.data)
        .bind(letter.attempts as i32)
        .bind(&letter.last_error)
        .execute(&self.db.pool)
        .await?;
        Ok(())
    }
}
