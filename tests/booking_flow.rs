use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use fake::{faker::internet::en::SafeEmail, Fake};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::test;
use uuid::Uuid;

use reservation_system::error::ReservationError;
use reservation_system::models::{
    Actor, AuditAction, PaymentMethod, Permission, Reservation, ReservationStatus, Table,
    TableStatus,
};
use reservation_system::repository::memory::MemoryStore;
use reservation_system::repository::{ReservationRepository, TableRepository};
use reservation_system::services::booking::ReservationOutcome;
use reservation_system::services::notification::Template;
use reservation_system::services::refund::RefundReason;

mod common;
use common::*;

#[test]
async fn party_of_three_gets_the_first_four_seat_table() -> anyhow::Result<()> {
    let h = harness(dining_room());
    let outcome = h
        .booking
        .reserve(
            &Actor::customer(7),
            request(at(19, 0), 2, 3, PaymentMethod::TableOnly),
            on_day(12, 0),
        )
        .await?;

    let ReservationOutcome::Reserved { reservation, table } = outcome else {
        panic!("expected a table");
    };
    assert_eq!(table.id, 2);
    assert_eq!(table.capacity, 4);
    assert_eq!(reservation.customer_id, 7);
    assert_eq!(reservation.status, ReservationStatus::Confirmed);
    assert_eq!(reservation.end_time, at(21, 0));
    assert_eq!(h.store.get_table(2).await?.status, TableStatus::Reserved);

    let audit = h.store.audit_entries().await;
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, AuditAction::Created);
    assert_eq!(audit[0].actor, "customer:7");
    Ok(())
}

#[test]
async fn overlapping_requests_never_share_a_table() -> anyhow::Result<()> {
    let h = harness(vec![table(1, 4)]);
    let guest = Actor::customer(1);

    let first = h
        .booking
        .reserve(&guest, request(at(19, 0), 2, 2, PaymentMethod::TableOnly), on_day(9, 0))
        .await?;
    assert!(first.reservation().is_some());

    let overlapping = h
        .booking
        .reserve(&guest, request(at(20, 0), 1, 2, PaymentMethod::TableOnly), on_day(9, 0))
        .await?;
    assert_eq!(overlapping, ReservationOutcome::NoAvailability);

    let adjacent = h
        .booking
        .reserve(&guest, request(at(21, 0), 1, 2, PaymentMethod::TableOnly), on_day(9, 0))
        .await?;
    assert!(adjacent.reservation().is_some());

    assert_eq!(h.store.list_for_date(day()).await?.len(), 2);
    Ok(())
}

#[test]
async fn concurrent_requests_for_one_table_yield_one_booking() -> anyhow::Result<()> {
    let h = harness(vec![table(1, 4)]);

    let mut handles = Vec::new();
    for customer in 1..=8 {
        let booking = h.booking.clone();
        handles.push(tokio::spawn(async move {
            booking
                .reserve(
                    &Actor::customer(customer),
                    request(at(19, 0), 2, 2, PaymentMethod::TableOnly),
                    on_day(9, 0),
                )
                .await
        }));
    }

    let mut reserved = 0;
    for handle in handles {
        if handle.await??.reservation().is_some() {
            reserved += 1;
        }
    }
    assert_eq!(reserved, 1);
    Ok(())
}

#[test]
async fn prepaid_booking_waits_for_payment() -> anyhow::Result<()> {
    let h = harness(dining_room());
    let outcome = h
        .booking
        .reserve(
            &Actor::customer(3),
            request(at(19, 0), 2, 2, PaymentMethod::Prepay),
            on_day(12, 0),
        )
        .await?;
    let reservation = outcome.reservation().cloned().expect("reserved");
    assert_eq!(reservation.status, ReservationStatus::Pending);

    let err = h
        .booking
        .confirm_payment(&Actor::customer(3), reservation.id, Decimal::from(30), on_day(12, 5))
        .await
        .unwrap_err();
    assert!(matches!(err, ReservationError::Forbidden(Permission::ConfirmPayment)));

    let err = h
        .booking
        .confirm_payment(&Actor::staff(9), reservation.id, Decimal::ZERO, on_day(12, 5))
        .await
        .unwrap_err();
    assert!(matches!(err, ReservationError::Validation(_)));

    let paid = h
        .booking
        .confirm_payment(&Actor::staff(9), reservation.id, Decimal::from(30), on_day(12, 5))
        .await?;
    assert_eq!(paid.status, ReservationStatus::Confirmed);
    assert_eq!(paid.amount_paid, Decimal::from(30));

    let err = h
        .booking
        .confirm_payment(&Actor::staff(9), reservation.id, Decimal::from(30), on_day(12, 6))
        .await
        .unwrap_err();
    assert!(matches!(err, ReservationError::InvalidTransition { .. }));
    Ok(())
}

async fn paid_reservation(h: &Harness, customer: i64) -> anyhow::Result<Reservation> {
    let outcome = h
        .booking
        .reserve(
            &Actor::customer(customer),
            request(at(19, 0), 2, 2, PaymentMethod::Card),
            on_day(12, 0),
        )
        .await?;
    let id = outcome.reservation().map(|r| r.id).expect("reserved");
    Ok(h
        .booking
        .confirm_payment(&Actor::system(), id, Decimal::from(30), on_day(12, 1))
        .await?)
}

#[test]
async fn fast_cancellation_refunds_in_full_and_frees_the_slot() -> anyhow::Result<()> {
    let h = harness(vec![table(1, 2)]);
    let reservation = paid_reservation(&h, 5).await?;

    let outcome = h
        .booking
        .cancel(&Actor::customer(5), reservation.id, on_day(12, 10))
        .await?;
    assert_eq!(outcome.refund.amount, Decimal::from(30));
    assert_eq!(outcome.refund.reason, RefundReason::FastCancellation);
    assert_eq!(outcome.reservation.status, ReservationStatus::Cancelled);
    assert_eq!(h.store.get_table(1).await?.status, TableStatus::Free);

    let again = h
        .booking
        .reserve(
            &Actor::customer(6),
            request(at(19, 0), 2, 2, PaymentMethod::TableOnly),
            on_day(12, 15),
        )
        .await?;
    assert!(again.reservation().is_some());

    let actions: Vec<AuditAction> = h.store.audit_entries().await.iter().map(|e| e.action).collect();
    assert!(actions.contains(&AuditAction::Cancelled));
    Ok(())
}

#[test]
async fn later_cancellation_uses_notice_tiers() -> anyhow::Result<()> {
    let h = harness(dining_room());
    let reservation = paid_reservation(&h, 5).await?;

    // 19:00 start, cancelled at 18:15 with 45 minutes left
    let outcome = h
        .booking
        .cancel(&Actor::staff(2), reservation.id, on_day(18, 15))
        .await?;
    assert_eq!(outcome.refund.amount, Decimal::from(10));
    assert_eq!(outcome.refund.reason, RefundReason::LateNotice);
    Ok(())
}

#[test]
async fn customers_cannot_cancel_other_customers_bookings() -> anyhow::Result<()> {
    let h = harness(dining_room());
    let reservation = paid_reservation(&h, 5).await?;

    let err = h
        .booking
        .cancel(&Actor::customer(6), reservation.id, on_day(13, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, ReservationError::Forbidden(Permission::CancelAnyReservation)));
    assert_eq!(
        h.store.get(reservation.id).await?.status,
        ReservationStatus::Confirmed
    );
    Ok(())
}

#[test]
async fn started_or_closed_reservations_are_not_cancellable() -> anyhow::Result<()> {
    let h = harness(dining_room());
    let reservation = paid_reservation(&h, 5).await?;

    let err = h
        .booking
        .cancel(&Actor::customer(5), reservation.id, on_day(19, 30))
        .await
        .unwrap_err();
    assert!(matches!(err, ReservationError::NotCancellable { .. }));

    h.booking
        .complete(&Actor::staff(1), reservation.id, on_day(21, 0))
        .await?;
    let err = h
        .booking
        .cancel(&Actor::staff(1), reservation.id, on_day(21, 5))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReservationError::NotCancellable { status: ReservationStatus::Completed, .. }
    ));

    let missing = h
        .booking
        .cancel(&Actor::staff(1), Uuid::new_v4(), on_day(12, 0))
        .await
        .unwrap_err();
    assert!(matches!(missing, ReservationError::NotFound(_)));
    Ok(())
}

#[test]
async fn invalid_requests_are_rejected_before_allocation() {
    let h = harness(dining_room());
    let guest = Actor::customer(1);

    let mut bad_email = request(at(19, 0), 2, 2, PaymentMethod::TableOnly);
    bad_email.customer_email = Some("not-an-address".to_string());
    let err = h.booking.reserve(&guest, bad_email, on_day(12, 0)).await.unwrap_err();
    assert!(matches!(err, ReservationError::Validation(_)));

    let past = request(at(11, 0), 1, 2, PaymentMethod::TableOnly);
    let err = h.booking.reserve(&guest, past, on_day(12, 0)).await.unwrap_err();
    assert!(matches!(err, ReservationError::Validation(_)));

    let too_long = request(at(12, 0), 5, 2, PaymentMethod::TableOnly);
    let err = h.booking.reserve(&guest, too_long, on_day(9, 0)).await.unwrap_err();
    assert!(matches!(err, ReservationError::Validation(_)));

    assert!(h.store.list_for_date(day()).await.unwrap().is_empty());
}

#[test]
async fn storage_failures_propagate_and_release_the_lock() -> anyhow::Result<()> {
    let h = harness(dining_room());
    let guest = Actor::customer(1);

    h.store.set_fail_writes(true);
    let err = h
        .booking
        .reserve(&guest, request(at(19, 0), 2, 2, PaymentMethod::TableOnly), on_day(9, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, ReservationError::Storage(_)));

    h.store.set_fail_writes(false);
    let outcome = h
        .booking
        .reserve(&guest, request(at(19, 0), 2, 2, PaymentMethod::TableOnly), on_day(9, 0))
        .await?;
    assert!(outcome.reservation().is_some());
    Ok(())
}

#[test]
async fn audit_failures_do_not_fail_the_booking() -> anyhow::Result<()> {
    let h = harness(dining_room());
    h.store.set_fail_audit(true);

    let outcome = h
        .booking
        .reserve(
            &Actor::customer(1),
            request(at(19, 0), 2, 2, PaymentMethod::TableOnly),
            on_day(9, 0),
        )
        .await?;
    assert!(outcome.reservation().is_some());
    assert!(h.store.audit_entries().await.is_empty());
    Ok(())
}

#[test]
async fn booking_confirmation_is_emailed() -> anyhow::Result<()> {
    let h = harness(dining_room());
    let email: String = SafeEmail().fake();

    let mut req = request(at(19, 0), 2, 4, PaymentMethod::TableOnly);
    req.customer_email = Some(email.clone());
    h.booking.reserve(&Actor::customer(1), req, on_day(9, 0)).await?;

    let mut pending = request(at(19, 0), 2, 2, PaymentMethod::Prepay);
    pending.customer_email = Some(email.clone());
    h.booking.reserve(&Actor::customer(1), pending, on_day(9, 0)).await?;

    let sent = wait_for_sent(&h.sender, 2).await;
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|n| n.recipient == email));
    let templates: Vec<Template> = sent.iter().map(|n| n.template).collect();
    assert!(templates.contains(&Template::ReservationConfirmed));
    assert!(templates.contains(&Template::PaymentRequired));
    let confirmed = sent
        .iter()
        .find(|n| n.template == Template::ReservationConfirmed)
        .expect("confirmation");
    assert_eq!(confirmed.data["table_number"], 2);
    assert_eq!(confirmed.data["start_time"], "19:00");
    Ok(())
}

/// Hides the day's reservations on the first read, as a replica lagging
/// behind another node would.
struct StaleFirstRead {
    inner: Arc<MemoryStore>,
    stale: AtomicBool,
}

#[async_trait]
impl ReservationRepository for StaleFirstRead {
    async fn get(&self, id: Uuid) -> Result<Reservation, ReservationError> {
        self.inner.get(id).await
    }

    async fn list_for_date(&self, date: NaiveDate) -> Result<Vec<Reservation>, ReservationError> {
        if self.stale.swap(false, Ordering::SeqCst) {
            return Ok(Vec::new());
        }
        self.inner.list_for_date(date).await
    }

    async fn list_with_status(
        &self,
        status: ReservationStatus,
    ) -> Result<Vec<Reservation>, ReservationError> {
        self.inner.list_with_status(status).await
    }

    async fn create(&self, reservation: &Reservation) -> Result<(), ReservationError> {
        self.inner.create(reservation).await
    }

    async fn update(&self, reservation: &Reservation) -> Result<(), ReservationError> {
        self.inner.update(reservation).await
    }
}

#[test]
async fn storage_conflict_is_retried_on_a_fresh_read() -> anyhow::Result<()> {
    let h = harness(vec![table(1, 4), table(2, 6)]);
    // Holds table 1 before the stale view is installed
    let taken = h
        .booking
        .reserve(
            &Actor::customer(1),
            request(at(19, 0), 2, 2, PaymentMethod::TableOnly),
            on_day(9, 0),
        )
        .await?;
    assert_eq!(taken.reservation().and_then(|r| r.table_id), Some(1));

    let store = h.store.clone();
    let stale = harness_with_repos(Vec::new(), move |mut repos| {
        let reservations: Arc<dyn ReservationRepository> = Arc::new(StaleFirstRead {
            inner: store.clone(),
            stale: AtomicBool::new(true),
        });
        let tables: Arc<dyn TableRepository> = store;
        repos.reservations = reservations;
        repos.tables = tables;
        repos
    });

    let outcome = stale
        .booking
        .reserve(
            &Actor::customer(2),
            request(at(19, 0), 2, 2, PaymentMethod::TableOnly),
            on_day(9, 0) + Duration::minutes(1),
        )
        .await?;
    assert_eq!(outcome.reservation().and_then(|r| r.table_id), Some(2));
    Ok(())
}

/// Table store whose floor status writes can be switched to fail.
struct FlakyTableStatus {
    inner: Arc<dyn TableRepository>,
    fail: Arc<AtomicBool>,
}

#[async_trait]
impl TableRepository for FlakyTableStatus {
    async fn list_tables(&self) -> Result<Vec<Table>, ReservationError> {
        self.inner.list_tables().await
    }

    async fn get_table(&self, id: i64) -> Result<Table, ReservationError> {
        self.inner.get_table(id).await
    }

    async fn update_table_status(
        &self,
        id: i64,
        status: TableStatus,
    ) -> Result<(), ReservationError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ReservationError::Storage(sqlx::Error::PoolTimedOut));
        }
        self.inner.update_table_status(id, status).await
    }
}

fn flaky_table_harness(tables: Vec<Table>, fail: Arc<AtomicBool>) -> Harness {
    harness_with_repos(tables, move |mut repos| {
        let tables: Arc<dyn TableRepository> = Arc::new(FlakyTableStatus {
            inner: repos.tables.clone(),
            fail,
        });
        repos.tables = tables;
        repos
    })
}

#[test]
async fn table_status_failure_does_not_strand_a_committed_booking() -> anyhow::Result<()> {
    let fail = Arc::new(AtomicBool::new(true));
    let h = flaky_table_harness(dining_room(), fail);
    let email: String = SafeEmail().fake();

    let mut req = request(at(19, 0), 2, 2, PaymentMethod::TableOnly);
    req.customer_email = Some(email.clone());
    let outcome = h.booking.reserve(&Actor::customer(1), req, on_day(9, 0)).await?;
    let ReservationOutcome::Reserved { reservation, table } = outcome else {
        panic!("expected a reservation");
    };
    assert_eq!(table.id, 1);
    assert_eq!(table.status, TableStatus::Free);
    assert_eq!(h.store.get(reservation.id).await?.status, ReservationStatus::Confirmed);

    let audit = h.store.audit_entries().await;
    assert!(audit
        .iter()
        .any(|e| e.reservation_id == reservation.id && e.action == AuditAction::Created));
    let sent = wait_for_sent(&h.sender, 1).await;
    assert!(sent
        .iter()
        .any(|n| n.template == Template::ReservationConfirmed && n.recipient == email));

    // The booked slot still counts against table 1
    let next = h
        .booking
        .reserve(
            &Actor::customer(2),
            request(at(19, 0), 2, 2, PaymentMethod::TableOnly),
            on_day(9, 5),
        )
        .await?;
    assert_eq!(next.reservation().and_then(|r| r.table_id), Some(2));
    Ok(())
}

#[test]
async fn cancellation_survives_a_table_release_failure() -> anyhow::Result<()> {
    let fail = Arc::new(AtomicBool::new(false));
    let h = flaky_table_harness(vec![table(1, 2)], fail.clone());
    let reservation = paid_reservation(&h, 5).await?;
    assert_eq!(h.store.get_table(1).await?.status, TableStatus::Reserved);

    fail.store(true, Ordering::SeqCst);
    let outcome = h
        .booking
        .cancel(&Actor::customer(5), reservation.id, on_day(12, 10))
        .await?;
    assert_eq!(outcome.refund.amount, Decimal::from(30));
    assert_eq!(outcome.refund.reason, RefundReason::FastCancellation);
    assert_eq!(outcome.reservation.status, ReservationStatus::Cancelled);
    assert_eq!(h.store.get(reservation.id).await?.status, ReservationStatus::Cancelled);

    let actions: Vec<AuditAction> = h.store.audit_entries().await.iter().map(|e| e.action).collect();
    assert!(actions.contains(&AuditAction::Cancelled));

    // The slot is open again even though the floor status is stale
    fail.store(false, Ordering::SeqCst);
    let again = h
        .booking
        .reserve(
            &Actor::customer(6),
            request(at(19, 0), 2, 2, PaymentMethod::TableOnly),
            on_day(12, 15),
        )
        .await?;
    assert_eq!(again.reservation().and_then(|r| r.table_id), Some(1));
    Ok(())
}
