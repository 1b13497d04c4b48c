pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod redis_client;
pub mod repository;
pub mod services;

use std::sync::Arc;

use config::Config;
use models::CartRegistry;
use repository::Repositories;
use services::booking::BookingService;
use services::cleanup::CleanupService;
use services::lock::AllocationLock;
use services::notification::{
    DispatcherSettings, NotificationDispatcher, NotificationQueue, NotificationSender,
};
use services::refund::RefundPolicy;

// Shared state for the whole process
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub booking: Arc<BookingService>,
    pub cleanup: Arc<CleanupService>,
    pub notifications: NotificationQueue,
    pub carts: Arc<CartRegistry>,
}

impl AppState {
    /// Wires the services together. The returned dispatcher must be spawned
    /// for queued notifications to go out.
    pub fn new(
        config: Config,
        repos: Repositories,
        lock: Arc<dyn AllocationLock>,
        sender: Arc<dyn NotificationSender>,
    ) -> (Self, NotificationDispatcher) {
        let (notifications, dispatcher) = NotificationDispatcher::new(
            sender,
            repos.dead_letters.clone(),
            DispatcherSettings::from(&config.notifications),
        );

        let booking = Arc::new(BookingService::new(
            repos,
            lock,
            notifications.clone(),
            &config.reservations,
            RefundPolicy::from(&config.refunds),
        ));
        let cleanup = Arc::new(CleanupService::new(booking.clone(), &config.reservations));

        let state = Self {
            config,
            booking,
            cleanup,
            notifications,
            carts: Arc::new(CartRegistry::new()),
        };
        (state, dispatcher)
    }
}
