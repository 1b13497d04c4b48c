#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};

use reservation_system::config::ReservationConfig;
use reservation_system::models::{PaymentMethod, Table, TableCategory, TableStatus};
use reservation_system::repository::memory::MemoryStore;
use reservation_system::repository::Repositories;
use reservation_system::services::booking::{BookingService, NewReservationRequest};
use reservation_system::services::cleanup::CleanupService;
use reservation_system::services::lock::LocalAllocationLock;
use reservation_system::services::notification::{
    DeliveryError, DispatcherSettings, Notification, NotificationDispatcher, NotificationSender,
};
use reservation_system::services::refund::RefundPolicy;

/// Remembers every notification it was asked to deliver.
#[derive(Default)]
pub struct RecordingSender {
    pub sent: Mutex<Vec<Notification>>,
}

#[async_trait]
impl NotificationSender for RecordingSender {
    async fn send(&self, notification: &Notification) -> Result<(), DeliveryError> {
        self.sent.lock().await.push(notification.clone());
        Ok(())
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub booking: Arc<BookingService>,
    pub cleanup: CleanupService,
    pub sender: Arc<RecordingSender>,
}

pub fn table(id: i64, capacity: i32) -> Table {
    Table {
        id,
        number: id as i32,
        capacity,
        category: TableCategory::Standard,
        status: TableStatus::Free,
    }
}

/// Tables of capacity 2, 4, 4 and 6.
pub fn dining_room() -> Vec<Table> {
    vec![table(1, 2), table(2, 4), table(3, 4), table(4, 6)]
}

pub fn harness(tables: Vec<Table>) -> Harness {
    harness_with_repos(tables, |repos| repos)
}

/// Builds the services over an in-memory store, letting the caller swap
/// individual repositories.
pub fn harness_with_repos(
    tables: Vec<Table>,
    customize: impl FnOnce(Repositories) -> Repositories,
) -> Harness {
    let store = Arc::new(MemoryStore::with_tables(tables));
    let repos = customize(Repositories::from_store(store.clone()));
    let sender = Arc::new(RecordingSender::default());

    let (queue, dispatcher) = NotificationDispatcher::new(
        sender.clone(),
        repos.dead_letters.clone(),
        DispatcherSettings {
            capacity: 64,
            max_attempts: 3,
            retry_base: Duration::from_millis(1),
        },
    );
    dispatcher.spawn();

    let config = ReservationConfig::default();
    let booking = Arc::new(BookingService::new(
        repos,
        Arc::new(LocalAllocationLock::with_wait(Duration::from_millis(500))),
        queue,
        &config,
        RefundPolicy::default(),
    ));
    let cleanup = CleanupService::new(booking.clone(), &config);

    Harness {
        store,
        booking,
        cleanup,
        sender,
    }
}

pub fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 6, 12).unwrap()
}

pub fn at(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

pub fn on_day(h: u32, m: u32) -> NaiveDateTime {
    day().and_time(at(h, m))
}

pub fn request(
    start: NaiveTime,
    hours: i32,
    party: i32,
    payment: PaymentMethod,
) -> NewReservationRequest {
    NewReservationRequest {
        customer_id: 0,
        customer_email: None,
        date: day(),
        start_time: start,
        duration_hours: hours,
        party_size: party,
        payment_method: payment,
    }
}

/// Polls the recording sender until `count` notifications arrived.
pub async fn wait_for_sent(sender: &RecordingSender, count: usize) -> Vec<Notification> {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let sent = sender.sent.lock().await.clone();
        if sent.len() >= count || Instant::now() >= deadline {
            return sent;
        }
        sleep(Duration::from_millis(5)).await;
    }
}
