//! booking.rs
//!
//! Reservation lifecycle: reserve, confirm payment, cancel, complete.
//!
//! Allocation runs under the per-date [`AllocationLock`]: the day's
//! reservations are read, a table is picked and the new reservation is
//! written before the lock is let go. If storage still reports an overlap
//! (another node without the lock, a stale read) the allocation is re-read and
//! retried a bounded number of times.
//!
//! Storage failures on the reservation itself are returned to the caller.
//! Table floor status, audit and notification failures are logged and never
//! undo a committed change.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::config::ReservationConfig;
use crate::error::ReservationError;
use crate::models::{
    Actor, AuditAction, AuditEntry, PaymentMethod, Permission, Reservation, ReservationStatus,
    Role, Table, TableStatus,
};
use crate::repository::{Repositories, ReservationRepository};
use crate::services::availability::{find_table, SlotLimits, SlotRequest};
use crate::services::lock::AllocationLock;
use crate::services::notification::{NotificationQueue, Template};
use crate::services::refund::{Refund, RefundPolicy};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewReservationRequest {
    /// Ignored for customers, who always book for themselves.
    pub customer_id: i64,
    #[validate(email(message = "customer email is not a valid address"))]
    pub customer_email: Option<String>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub duration_hours: i32,
    pub party_size: i32,
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReservationOutcome {
    Reserved {
        reservation: Reservation,
        table: Table,
    },
    /// No table fits the party for that slot. Nothing was written.
    NoAvailability,
}

impl ReservationOutcome {
    pub fn reservation(&self) -> Option<&Reservation> {
        match self {
            ReservationOutcome::Reserved { reservation, .. } => Some(reservation),
            ReservationOutcome::NoAvailability => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CancellationOutcome {
    pub reservation: Reservation,
    pub refund: Refund,
}

pub struct BookingService {
    repos: Repositories,
    lock: Arc<dyn AllocationLock>,
    notifications: NotificationQueue,
    limits: SlotLimits,
    refunds: RefundPolicy,
    allocation_retries: u32,
    payment_window_minutes: i64,
}

impl BookingService {
    pub fn new(
        repos: Repositories,
        lock: Arc<dyn AllocationLock>,
        notifications: NotificationQueue,
        config: &ReservationConfig,
        refunds: RefundPolicy,
    ) -> Self {
        Self {
            repos,
            lock,
            notifications,
            limits: SlotLimits::from(config),
            refunds,
            allocation_retries: config.allocation_retries,
            payment_window_minutes: config.payment_window_minutes,
        }
    }

    pub fn reservations(&self) -> &Arc<dyn ReservationRepository> {
        &self.repos.reservations
    }

    pub async fn reserve(
        &self,
        actor: &Actor,
        request: NewReservationRequest,
        now: NaiveDateTime,
    ) -> Result<ReservationOutcome, ReservationError> {
        actor.require(Permission::CreateReservation)?;
        request.validate()?;
        let slot_request = SlotRequest::new(
            request.date,
            request.start_time,
            request.duration_hours,
            request.party_size,
            self.limits,
        )?;
        slot_request.ensure_future(now)?;

        let customer_id = match actor.role {
            Role::Customer => actor.id,
            Role::Staff => request.customer_id,
        };

        let token = self.lock.acquire(request.date).await?;
        let allocated = self
            .allocate(customer_id, &request, &slot_request, now)
            .await;
        if let Err(e) = self.lock.release(token).await {
            warn!("failed to release allocation lock for {}: {}", request.date, e);
        }

        let outcome = allocated?;
        match &outcome {
            ReservationOutcome::Reserved { reservation, table } => {
                info!(
                    "reservation {} created: table {} for {} on {} at {}",
                    reservation.id,
                    table.number,
                    reservation.party_size,
                    reservation.date,
                    reservation.start_time
                );
                self.audit(reservation, AuditAction::Created, actor, now)
                    .await;
                let template = match reservation.status {
                    ReservationStatus::Pending => Template::PaymentRequired,
                    _ => Template::ReservationConfirmed,
                };
                self.notify(template, reservation, Some(table));
            }
            ReservationOutcome::NoAvailability => {
                info!(
                    "no table for {} on {} at {} ({}h)",
                    request.party_size, request.date, request.start_time, request.duration_hours
                );
            }
        }
        Ok(outcome)
    }

    async fn allocate(
        &self,
        customer_id: i64,
        request: &NewReservationRequest,
        slot_request: &SlotRequest,
        now: NaiveDateTime,
    ) -> Result<ReservationOutcome, ReservationError> {
        let tables = self.repos.tables.list_tables().await?;

        for attempt in 0..=self.allocation_retries {
            let existing = self.repos.reservations.list_for_date(request.date).await?;
            let Some(table) = find_table(slot_request, &existing, &tables) else {
                return Ok(ReservationOutcome::NoAvailability);
            };

            let reservation = Reservation::new(
                customer_id,
                request.customer_email.clone(),
                table.id,
                slot_request.slot,
                slot_request.duration_hours,
                slot_request.party_size,
                request.payment_method,
                now,
            );

            match self.repos.reservations.create(&reservation).await {
                Ok(()) => {
                    // The reservation is committed; the floor status is advisory
                    let mut table = table.clone();
                    if table.status == TableStatus::Free {
                        match self
                            .repos
                            .tables
                            .update_table_status(table.id, TableStatus::Reserved)
                            .await
                        {
                            Ok(()) => table.status = TableStatus::Reserved,
                            Err(e) => error!(
                                "failed to mark table {} reserved for {}: {}",
                                table.number, reservation.id, e
                            ),
                        }
                    }
                    return Ok(ReservationOutcome::Reserved { reservation, table });
                }
                Err(ReservationError::SlotTaken) => {
                    warn!(
                        "table {} was taken concurrently (attempt {}), re-reading {}",
                        table.number,
                        attempt + 1,
                        request.date
                    );
                }
                Err(e) => return Err(e),
            }
        }

        warn!(
            "giving up on {} after {} conflicting allocations",
            request.date,
            self.allocation_retries + 1
        );
        Ok(ReservationOutcome::NoAvailability)
    }

    pub async fn confirm_payment(
        &self,
        actor: &Actor,
        id: Uuid,
        amount: Decimal,
        now: NaiveDateTime,
    ) -> Result<Reservation, ReservationError> {
        actor.require(Permission::ConfirmPayment)?;
        let mut reservation = self.repos.reservations.get(id).await?;
        if reservation.status != ReservationStatus::Pending {
            return Err(ReservationError::InvalidTransition {
                from: reservation.status,
                to: ReservationStatus::Confirmed,
            });
        }

        reservation.record_payment(amount)?;
        reservation.transition(ReservationStatus::Confirmed)?;
        self.repos.reservations.update(&reservation).await?;

        info!("payment of {} confirmed for reservation {}", amount, id);
        self.audit(&reservation, AuditAction::Updated, actor, now)
            .await;
        self.notify(Template::PaymentReceived, &reservation, None);
        Ok(reservation)
    }

    pub async fn cancel(
        &self,
        actor: &Actor,
        id: Uuid,
        now: NaiveDateTime,
    ) -> Result<CancellationOutcome, ReservationError> {
        let reservation = self.repos.reservations.get(id).await?;
        if actor.role == Role::Customer && reservation.customer_id == actor.id {
            actor.require(Permission::CancelOwnReservation)?;
        } else {
            actor.require(Permission::CancelAnyReservation)?;
        }

        if !reservation.is_cancellable(now) {
            return Err(ReservationError::NotCancellable {
                id,
                status: reservation.status,
            });
        }

        let refund = self.refunds.calculate(&reservation, now);
        let reservation = self
            .close(reservation, ReservationStatus::Cancelled, actor, now)
            .await?;

        info!(
            "reservation {} cancelled by {}, refund {} ({})",
            id,
            actor.label(),
            refund.amount,
            refund.message()
        );
        self.notify_with(
            Template::ReservationCancelled,
            &reservation,
            json!({
                "refund_amount": refund.amount.to_string(),
                "refund_message": refund.message(),
            }),
        );
        Ok(CancellationOutcome {
            reservation,
            refund,
        })
    }

    pub async fn complete(
        &self,
        actor: &Actor,
        id: Uuid,
        now: NaiveDateTime,
    ) -> Result<Reservation, ReservationError> {
        actor.require(Permission::CompleteReservation)?;
        let reservation = self.repos.reservations.get(id).await?;
        let reservation = self
            .close(reservation, ReservationStatus::Completed, actor, now)
            .await?;
        info!("reservation {} completed", id);
        Ok(reservation)
    }

    /// Moves an active reservation into `to`, persists it, frees its table and
    /// records the change.
    pub(crate) async fn close(
        &self,
        mut reservation: Reservation,
        to: ReservationStatus,
        actor: &Actor,
        now: NaiveDateTime,
    ) -> Result<Reservation, ReservationError> {
        reservation.transition(to)?;
        self.repos.reservations.update(&reservation).await?;
        if let Err(e) = self.release_table(&reservation).await {
            error!(
                "failed to release table of reservation {}: {}",
                reservation.id, e
            );
        }

        let action = match to {
            ReservationStatus::Cancelled => AuditAction::Cancelled,
            _ => AuditAction::Updated,
        };
        self.audit(&reservation, action, actor, now).await;
        Ok(reservation)
    }

    /// Puts the reservation's table back to `Free` if it is still marked
    /// `Reserved`. Occupied and maintenance tables are left alone.
    pub async fn release_table(&self, reservation: &Reservation) -> Result<(), ReservationError> {
        let Some(table_id) = reservation.table_id else {
            return Ok(());
        };
        let table = self.repos.tables.get_table(table_id).await?;
        if table.status == TableStatus::Reserved {
            self.repos
                .tables
                .update_table_status(table_id, TableStatus::Free)
                .await?;
            debug!("table {} released by reservation {}", table.number, reservation.id);
        }
        Ok(())
    }

    async fn audit(
        &self,
        reservation: &Reservation,
        action: AuditAction,
        actor: &Actor,
        now: NaiveDateTime,
    ) {
        let entry = AuditEntry::of(reservation, action, actor, now);
        if let Err(e) = self.repos.audit.record(&entry).await {
            error!(
                "failed to audit {:?} of reservation {}: {}",
                action, reservation.id, e
            );
        }
    }

    pub(crate) fn notify(&self, template: Template, reservation: &Reservation, table: Option<&Table>) {
        let extra = match table {
            Some(t) => json!({ "table_number": t.number }),
            None => json!({}),
        };
        self.notify_with(template, reservation, extra);
    }

    fn notify_with(&self, template: Template, reservation: &Reservation, extra: Value) {
        let Some(recipient) = reservation.customer_email.as_deref() else {
            debug!(
                "reservation {} has no email, skipping {}",
                reservation.id,
                template.as_str()
            );
            return;
        };

        let mut data = json!({
            "reservation_id": reservation.id,
            "date": reservation.date.to_string(),
            "start_time": reservation.start_time.format("%H:%M").to_string(),
            "party_size": reservation.party_size,
            "amount_paid": reservation.amount_paid.to_string(),
            "payment_window_minutes": self.payment_window_minutes,
        });
        if let (Value::Object(base), Value::Object(extra)) = (&mut data, extra) {
            base.extend(extra);
        }
        self.notifications
            .send_notification(template, data, recipient);
    }
}
