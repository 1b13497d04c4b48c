use chrono::{Duration, NaiveDateTime};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::ReservationConfig;
use crate::error::ReservationError;
use crate::models::{Actor, Permission, Reservation, ReservationStatus};
use crate::services::booking::BookingService;
use crate::services::notification::Template;

/// Periodic housekeeping over reservations nobody acted on.
pub struct CleanupService {
    booking: Arc<BookingService>,
    payment_window: Duration,
    no_show_grace: Duration,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    pub expired_pending: usize,
    pub no_shows: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupStats {
    pub unpaid_past_window: usize,
    pub confirmed_past_grace: usize,
}

impl CleanupStats {
    pub fn total_items_to_cleanup(&self) -> usize {
        self.unpaid_past_window + self.confirmed_past_grace
    }
}

impl CleanupService {
    pub fn new(booking: Arc<BookingService>, config: &ReservationConfig) -> Self {
        Self {
            booking,
            payment_window: Duration::minutes(config.payment_window_minutes),
            no_show_grace: Duration::minutes(config.no_show_grace_minutes),
        }
    }

    /// Runs both sweeps: unpaid holds first, then no-shows.
    pub async fn run_full_cleanup(
        &self,
        now: NaiveDateTime,
    ) -> Result<CleanupReport, ReservationError> {
        info!("🧹 Starting full cleanup at {}", now);
        let report = CleanupReport {
            expired_pending: self.expire_unpaid(now).await?,
            no_shows: self.mark_no_shows(now).await?,
        };
        info!(
            "✅ Cleanup finished: {} unpaid expired, {} no-shows",
            report.expired_pending, report.no_shows
        );
        Ok(report)
    }

    /// Manual sweep triggered by a person rather than the scheduler.
    pub async fn run_requested_by(
        &self,
        actor: &Actor,
        now: NaiveDateTime,
    ) -> Result<CleanupReport, ReservationError> {
        actor.require(Permission::RunSweeps)?;
        info!("Cleanup requested by {}", actor.label());
        self.run_full_cleanup(now).await
    }

    /// Cancels `Pending` reservations whose payment window has passed.
    pub async fn expire_unpaid(&self, now: NaiveDateTime) -> Result<usize, ReservationError> {
        let expired = self.unpaid_past_window(now).await?;
        if expired.is_empty() {
            info!("💳 No unpaid reservations to expire");
            return Ok(0);
        }

        info!("💳 Found {} unpaid reservations to expire", expired.len());
        let mut done = 0;
        for reservation in expired {
            let id = reservation.id;
            match self
                .booking
                .close(reservation, ReservationStatus::Cancelled, &Actor::system(), now)
                .await
            {
                Ok(closed) => {
                    done += 1;
                    self.booking
                        .notify(Template::ReservationCancelled, &closed, None);
                }
                Err(e) if e.is_retryable() => {
                    warn!("Reservation {} busy, expiring it next sweep: {}", id, e)
                }
                Err(e) => error!("Failed to expire reservation {}: {}", id, e),
            }
        }
        Ok(done)
    }

    /// Marks `Confirmed` reservations as no-shows once the grace period after
    /// their start has passed.
    pub async fn mark_no_shows(&self, now: NaiveDateTime) -> Result<usize, ReservationError> {
        let missed = self.confirmed_past_grace(now).await?;
        if missed.is_empty() {
            info!("🪑 No no-shows to record");
            return Ok(0);
        }

        info!("🪑 Found {} no-shows", missed.len());
        let mut done = 0;
        for reservation in missed {
            let id = reservation.id;
            match self
                .booking
                .close(reservation, ReservationStatus::NoShow, &Actor::system(), now)
                .await
            {
                Ok(closed) => {
                    done += 1;
                    self.booking.notify(Template::NoShow, &closed, None);
                }
                Err(e) if e.is_retryable() => {
                    warn!("Reservation {} busy, marking it next sweep: {}", id, e)
                }
                Err(e) => error!("Failed to mark reservation {} as no-show: {}", id, e),
            }
        }
        Ok(done)
    }

    /// What the next sweep would touch, for monitoring.
    pub async fn pending_stats(&self, now: NaiveDateTime) -> Result<CleanupStats, ReservationError> {
        Ok(CleanupStats {
            unpaid_past_window: self.unpaid_past_window(now).await?.len(),
            confirmed_past_grace: self.confirmed_past_grace(now).await?.len(),
        })
    }

    async fn unpaid_past_window(
        &self,
        now: NaiveDateTime,
    ) -> Result<Vec<Reservation>, ReservationError> {
        let cutoff = now - self.payment_window;
        let pending = self
            .booking
            .reservations()
            .list_with_status(ReservationStatus::Pending)
            .await?;
        Ok(pending.into_iter().filter(|r| r.created_at < cutoff).collect())
    }

    async fn confirmed_past_grace(
        &self,
        now: NaiveDateTime,
    ) -> Result<Vec<Reservation>, ReservationError> {
        let cutoff = now - self.no_show_grace;
        let confirmed = self
            .booking
            .reservations()
            .list_with_status(ReservationStatus::Confirmed)
            .await?;
        Ok(confirmed
            .into_iter()
            .filter(|r| r.starts_at() < cutoff)
            .collect())
    }
}
