//! notification.rs
//!
//! Customer notifications (booking confirmations, payment reminders,
//! cancellations).
//!
//! Key pieces:
//! 1.  **NotificationQueue**: the handle the services hold. Enqueuing never
//!     blocks and never fails the caller; a full or closed queue is logged.
//! 2.  **NotificationDispatcher**: background worker that delivers queued
//!     notifications, retries transient failures with exponential backoff and
//!     parks anything it gives up on in a [`DeadLetterStore`].
//! 3.  **BrevoClient**: transactional email over HTTPS. Every call goes through
//!     a circuit breaker so a failing provider is not hammered; while the
//!     breaker is open deliveries fail as transient and get retried later.

use async_trait::async_trait;
use failsafe::futures::CircuitBreaker as _;
use failsafe::{backoff, failure_policy, Config as BreakerConfig, StateMachine};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{CircuitBreakerConfig, NotificationConfig};
use crate::repository::DeadLetterStore;

const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Template {
    ReservationConfirmed,
    PaymentRequired,
    PaymentReceived,
    ReservationCancelled,
    NoShow,
}

impl Template {
    pub fn as_str(&self) -> &'static str {
        match self {
            Template::ReservationConfirmed => "reservation_confirmed",
            Template::PaymentRequired => "payment_required",
            Template::PaymentReceived => "payment_received",
            Template::ReservationCancelled => "reservation_cancelled",
            Template::NoShow => "no_show",
        }
    }

    pub fn subject(&self) -> &'static str {
        match self {
            Template::ReservationConfirmed => "Your table is booked",
            Template::PaymentRequired => "Complete your payment to keep your table",
            Template::PaymentReceived => "Payment received, see you soon",
            Template::ReservationCancelled => "Your reservation was cancelled",
            Template::NoShow => "We missed you today",
        }
    }

    /// Renders the HTML body from the notification data.
    pub fn render(&self, data: &Value) -> String {
        let f = |key: &str| field(data, key);
        let body = match self {
            Template::ReservationConfirmed => format!(
                "<p>Your table for {} is confirmed on {} at {}.</p><p>Table {}.</p>",
                f("party_size"),
                f("date"),
                f("start_time"),
                f("table_number")
            ),
            Template::PaymentRequired => format!(
                "<p>We are holding a table for {} on {} at {}.</p>\
                 <p>Please complete the payment within {} minutes or the hold is released.</p>",
                f("party_size"),
                f("date"),
                f("start_time"),
                f("payment_window_minutes")
            ),
            Template::PaymentReceived => format!(
                "<p>We received {}. Your reservation on {} at {} is confirmed.</p>",
                f("amount_paid"),
                f("date"),
                f("start_time")
            ),
            Template::ReservationCancelled => format!(
                "<p>Your reservation on {} at {} has been cancelled.</p><p>Refund: {} ({})</p>",
                f("date"),
                f("start_time"),
                f("refund_amount"),
                f("refund_message")
            ),
            Template::NoShow => format!(
                "<p>Your reservation on {} at {} was released after you did not arrive.</p>",
                f("date"),
                f("start_time")
            ),
        };
        format!("<html><body>{}</body></html>", body)
    }
}

fn field(data: &Value, key: &str) -> String {
    match data.get(key) {
        Some(Value::String(s)) => escape_html(s),
        Some(Value::Null) | None => "-".to_string(),
        Some(other) => escape_html(&other.to_string()),
    }
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub template: Template,
    pub data: Value,
    pub recipient: String,
}

impl Notification {
    pub fn new(template: Template, data: Value, recipient: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            template,
            data,
            recipient: recipient.into(),
        }
    }
}

/// A notification the dispatcher gave up on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub notification: Notification,
    pub attempts: u32,
    pub last_error: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// Worth retrying: network trouble, provider overload, breaker open.
    #[error("transient delivery failure: {0}")]
    Transient(String),

    /// Retrying will not help: rejected address, bad credentials.
    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), DeliveryError>;
}

/// Sender used when no email provider is configured.
#[derive(Debug, Default)]
pub struct LogOnlySender;

#[async_trait]
impl NotificationSender for LogOnlySender {
    async fn send(&self, notification: &Notification) -> Result<(), DeliveryError> {
        info!(
            "notification {} ({}) for {} not sent: email delivery is not configured",
            notification.id,
            notification.template.as_str(),
            notification.recipient
        );
        Ok(())
    }
}

// --- Email provider API ---

#[derive(Debug, Serialize)]
struct EmailAddress<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendEmailRequest<'a> {
    sender: EmailAddress<'a>,
    to: Vec<EmailAddress<'a>>,
    subject: &'a str,
    html_content: String,
}

type Breaker = StateMachine<failure_policy::ConsecutiveFailures<backoff::Constant>, ()>;

/// Client for the Brevo transactional email API.
#[derive(Clone)]
pub struct BrevoClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    sender_email: String,
    sender_name: String,
    breaker: Breaker,
}

impl BrevoClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        sender_email: impl Into<String>,
        sender_name: impl Into<String>,
        breaker: &CircuitBreakerConfig,
    ) -> Result<Self, reqwest::Error> {
        let policy = failure_policy::consecutive_failures(
            breaker.failure_threshold,
            backoff::constant(Duration::from_secs(breaker.timeout_seconds)),
        );
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            sender_email: sender_email.into(),
            sender_name: sender_name.into(),
            breaker: BreakerConfig::new().failure_policy(policy).build(),
        })
    }

    /// Builds the client when both the API key and a verified sender are set.
    pub fn from_config(
        config: &NotificationConfig,
        breaker: &CircuitBreakerConfig,
    ) -> Result<Option<Self>, reqwest::Error> {
        match (&config.api_key, &config.sender_email) {
            (Some(key), Some(sender)) => Ok(Some(Self::new(
                &config.api_url,
                key,
                sender,
                &config.sender_name,
                breaker,
            )?)),
            _ => Ok(None),
        }
    }

    async fn post(&self, notification: &Notification) -> Result<(), DeliveryError> {
        let request = SendEmailRequest {
            sender: EmailAddress {
                email: &self.sender_email,
                name: Some(&self.sender_name),
            },
            to: vec![EmailAddress {
                email: &notification.recipient,
                name: None,
            }],
            subject: notification.template.subject(),
            html_content: notification.template.render(&notification.data),
        };

        let response = self
            .http
            .post(format!("{}/v3/smtp/email", self.base_url))
            .header("api-key", &self.api_key)
            .header("accept", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| DeliveryError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let message = format!("{}: {}", status, body);
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Err(DeliveryError::Transient(message))
        } else {
            Err(DeliveryError::Permanent(message))
        }
    }
}

#[async_trait]
impl NotificationSender for BrevoClient {
    async fn send(&self, notification: &Notification) -> Result<(), DeliveryError> {
        // Only transient failures count against the provider's health.
        let counts_as_failure = |e: &DeliveryError| matches!(e, DeliveryError::Transient(_));

        match self
            .breaker
            .call_with(counts_as_failure, self.post(notification))
            .await
        {
            Ok(()) => Ok(()),
            Err(failsafe::Error::Inner(e)) => Err(e),
            Err(failsafe::Error::Rejected) => {
                warn!("circuit breaker is open, deferring email {}", notification.id);
                Err(DeliveryError::Transient("circuit breaker open".to_string()))
            }
        }
    }
}

// --- Queue and worker ---

#[derive(Debug)]
struct Job {
    notification: Notification,
    attempts: u32,
}

/// Cheap, cloneable handle for enqueuing notifications.
#[derive(Clone)]
pub struct NotificationQueue {
    tx: mpsc::Sender<Job>,
}

impl NotificationQueue {
    /// Fire-and-forget. Returns the notification id when it was queued.
    pub fn send_notification(
        &self,
        template: Template,
        data: Value,
        recipient: impl Into<String>,
    ) -> Option<Uuid> {
        let notification = Notification::new(template, data, recipient);
        let id = notification.id;
        match self.tx.try_send(Job {
            notification,
            attempts: 0,
        }) {
            Ok(()) => {
                debug!("queued {} notification {}", template.as_str(), id);
                Some(id)
            }
            Err(TrySendError::Full(job)) => {
                error!(
                    "notification queue full, dropping {} for {}",
                    job.notification.id, job.notification.recipient
                );
                None
            }
            Err(TrySendError::Closed(job)) => {
                error!(
                    "notification dispatcher stopped, dropping {}",
                    job.notification.id
                );
                None
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DispatcherSettings {
    pub capacity: usize,
    pub max_attempts: u32,
    pub retry_base: Duration,
}

impl From<&NotificationConfig> for DispatcherSettings {
    fn from(config: &NotificationConfig) -> Self {
        Self {
            capacity: config.queue_capacity.max(1),
            max_attempts: config.max_attempts.max(1),
            retry_base: Duration::from_millis(config.retry_base_ms),
        }
    }
}

impl DispatcherSettings {
    fn retry_delay(&self, attempts: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempts.saturating_sub(1));
        self.retry_base
            .checked_mul(factor)
            .unwrap_or(MAX_RETRY_DELAY)
            .min(MAX_RETRY_DELAY)
    }
}

/// Delivers queued notifications until every queue handle is dropped.
pub struct NotificationDispatcher {
    rx: mpsc::Receiver<Job>,
    retry_tx: mpsc::WeakSender<Job>,
    sender: Arc<dyn NotificationSender>,
    dead_letters: Arc<dyn DeadLetterStore>,
    settings: DispatcherSettings,
}

impl NotificationDispatcher {
    pub fn new(
        sender: Arc<dyn NotificationSender>,
        dead_letters: Arc<dyn DeadLetterStore>,
        settings: DispatcherSettings,
    ) -> (NotificationQueue, Self) {
        let (tx, rx) = mpsc::channel(settings.capacity);
        let dispatcher = Self {
            rx,
            retry_tx: tx.downgrade(),
            sender,
            dead_letters,
            settings,
        };
        (NotificationQueue { tx }, dispatcher)
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        info!("notification dispatcher started");
        while let Some(job) = self.rx.recv().await {
            self.deliver(job).await;
        }
        info!("notification queue closed, dispatcher stopped");
    }

    async fn deliver(&self, mut job: Job) {
        let id = job.notification.id;
        loop {
            job.attempts += 1;
            match self.sender.send(&job.notification).await {
                Ok(()) => {
                    info!(
                        "notification {} ({}) delivered to {} on attempt {}",
                        id,
                        job.notification.template.as_str(),
                        job.notification.recipient,
                        job.attempts
                    );
                    return;
                }
                Err(DeliveryError::Transient(msg)) if job.attempts < self.settings.max_attempts => {
                    warn!(
                        "notification {} failed (attempt {}/{}): {}",
                        id, job.attempts, self.settings.max_attempts, msg
                    );
                    let delay = self.settings.retry_delay(job.attempts);
                    match self.retry_tx.upgrade() {
                        Some(tx) => {
                            // Requeue later so other notifications are not held up
                            tokio::spawn(async move {
                                sleep(delay).await;
                                if let Err(e) = tx.send(job).await {
                                    error!("could not requeue notification {}", e.0.notification.id);
                                }
                            });
                            return;
                        }
                        // Queue is closed and draining: retry in place
                        None => sleep(delay).await,
                    }
                }
                Err(e) => {
                    error!("notification {} gave up after {} attempts: {}", id, job.attempts, e);
                    self.dead_letter(job, e.to_string()).await;
                    return;
                }
            }
        }
    }

    async fn dead_letter(&self, job: Job, last_error: String) {
        let letter = DeadLetter {
            notification: job.notification,
            attempts: job.attempts,
            last_error,
        };
        if let Err(e) = self.dead_letters.store(&letter).await {
            error!(
                "failed to store dead letter for notification {}: {}",
                letter.notification.id, e
            );
        }
    }
}
