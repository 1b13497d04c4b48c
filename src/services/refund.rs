//! Tiered cancellation refunds.
//!
//! Rules are checked in order and the first match wins:
//! 1. nothing paid, or the reservation is no longer PENDING/CONFIRMED: nothing back;
//! 2. cancelled within the fast window after booking: the full amount;
//! 3. otherwise by time left before the slot starts: already started gets
//!    nothing, at least the early notice gets the early amount, at least the
//!    late notice gets the late amount, anything shorter gets nothing.

use chrono::{Duration, NaiveDateTime};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::config::RefundConfig;
use crate::models::Reservation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundReason {
    NotRefundable,
    FastCancellation,
    AlreadyPassed,
    EarlyNotice,
    LateNotice,
    TooLate,
}

impl RefundReason {
    /// User-facing text. `window` is the tier boundary that applied.
    pub fn message(&self, window: Duration) -> String {
        let window = describe_window(window);
        match self {
            RefundReason::NotRefundable => "not refundable.".to_string(),
            RefundReason::FastCancellation => {
                format!("full refund: fast cancellation within {}.", window)
            }
            RefundReason::AlreadyPassed => "reservation already passed: not refundable.".to_string(),
            RefundReason::EarlyNotice | RefundReason::LateNotice => {
                format!("partial refund: cancelled at least {} ahead.", window)
            }
            RefundReason::TooLate => format!("less than {} remaining: not refundable.", window),
        }
    }
}

fn describe_window(window: Duration) -> String {
    let minutes = window.num_minutes();
    match (minutes / 60, minutes % 60) {
        (1, 0) => "1 hour".to_string(),
        (hours, 0) if hours > 1 => format!("{} hours", hours),
        (_, _) if minutes == 1 => "1 minute".to_string(),
        _ => format!("{} minutes", minutes),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Refund {
    pub amount: Decimal,
    pub reason: RefundReason,
    /// Boundary of the tier that decided the refund. Zero when no tier applied.
    #[serde(skip)]
    pub window: Duration,
}

impl Refund {
    fn none(reason: RefundReason, window: Duration) -> Self {
        Self {
            amount: Decimal::ZERO,
            reason,
            window,
        }
    }

    pub fn message(&self) -> String {
        self.reason.message(self.window)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefundPolicy {
    pub fast_window: Duration,
    pub full_amount: Decimal,
    pub early_notice: Duration,
    pub early_amount: Decimal,
    pub late_notice: Duration,
    pub late_amount: Decimal,
}

impl Default for RefundPolicy {
    fn default() -> Self {
        Self::from(&RefundConfig::default())
    }
}

impl From<&RefundConfig> for RefundPolicy {
    fn from(config: &RefundConfig) -> Self {
        Self {
            fast_window: Duration::minutes(config.fast_window_minutes),
            full_amount: Decimal::from(config.full_amount),
            early_notice: Duration::minutes(config.early_notice_minutes),
            early_amount: Decimal::from(config.early_amount),
            late_notice: Duration::minutes(config.late_notice_minutes),
            late_amount: Decimal::from(config.late_amount),
        }
    }
}

impl RefundPolicy {
    pub fn calculate(&self, reservation: &Reservation, now: NaiveDateTime) -> Refund {
        if reservation.amount_paid <= Decimal::ZERO || !reservation.status.is_active() {
            return Refund::none(RefundReason::NotRefundable, Duration::zero());
        }

        if now - reservation.created_at <= self.fast_window {
            return Refund {
                amount: self.full_amount,
                reason: RefundReason::FastCancellation,
                window: self.fast_window,
            };
        }

        let until_start = reservation.starts_at() - now;
        if until_start < Duration::zero() {
            Refund::none(RefundReason::AlreadyPassed, Duration::zero())
        } else if until_start >= self.early_notice {
            Refund {
                amount: self.early_amount,
                reason: RefundReason::EarlyNotice,
                window: self.early_notice,
            }
        } else if until_start >= self.late_notice {
            Refund {
                amount: self.late_amount,
                reason: RefundReason::LateNotice,
                window: self.late_notice,
            }
        } else {
            Refund::none(RefundReason::TooLate, self.late_notice)
        }
    }
}

/// Refund under the default tiers (30 / 15 / 10).
pub fn calculate_refund(reservation: &Reservation, now: NaiveDateTime) -> Refund {
    RefundPolicy::default().calculate(reservation, now)
}
