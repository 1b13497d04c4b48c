use serde::Deserialize;
use std::env;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} has an invalid value {value:?}")]
    Invalid { key: &'static str, value: String },
}

// Top-level configuration, one section per concern
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub reservations: ReservationConfig,
    pub refunds: RefundConfig,
    pub notifications: NotificationConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

// Process settings
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub environment: String,
    pub rust_log: String,
    pub log_format: LogFormat,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(()),
        }
    }
}

// Postgres connection
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
}

// Redis is only used for the per-date allocation lock
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: Option<String>,
    pub lock_ttl_ms: u64,
    pub lock_wait_ms: u64,
}

// Booking rules
#[derive(Debug, Clone, Deserialize)]
pub struct ReservationConfig {
    pub max_duration_hours: u32,
    pub max_party_size: u32,
    pub allocation_retries: u32,
    /// Minutes a PENDING reservation may wait for payment.
    pub payment_window_minutes: i64,
    /// Minutes after start before a CONFIRMED reservation becomes a no-show.
    pub no_show_grace_minutes: i64,
}

// Cancellation refund tiers (amounts in currency units)
#[derive(Debug, Clone, Deserialize)]
pub struct RefundConfig {
    pub fast_window_minutes: i64,
    pub full_amount: i64,
    pub early_notice_minutes: i64,
    pub early_amount: i64,
    pub late_notice_minutes: i64,
    pub late_amount: i64,
}

// Transactional email delivery
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub sender_email: Option<String>,
    pub sender_name: String,
    pub queue_capacity: usize,
    pub max_attempts: u32,
    pub retry_base_ms: u64,
}

// Circuit breaker around the email API
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub timeout_seconds: u64,
}

fn var_or<T: FromStr>(key: &'static str, default: &str) -> Result<T, ConfigError> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    raw.parse()
        .map_err(|_| ConfigError::Invalid { key, value: raw })
}

fn optional(key: &'static str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Config {
            app: AppConfig {
                environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
                rust_log: env::var("RUST_LOG")
                    .unwrap_or_else(|_| "reservation_system=debug".to_string()),
                log_format: var_or("LOG_FORMAT", "pretty")?,
                sweep_interval_secs: var_or("SWEEP_INTERVAL_SECS", "300")?,
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
                pool_size: var_or("DB_POOL_SIZE", "10")?,
            },
            redis: RedisConfig {
                url: optional("REDIS_URL"),
                lock_ttl_ms: var_or("ALLOCATION_LOCK_TTL_MS", "5000")?,
                lock_wait_ms: var_or("ALLOCATION_LOCK_WAIT_MS", "2000")?,
            },
            reservations: ReservationConfig {
                max_duration_hours: var_or("MAX_DURATION_HOURS", "4")?,
                max_party_size: var_or("MAX_PARTY_SIZE", "20")?,
                allocation_retries: var_or("ALLOCATION_RETRIES", "3")?,
                payment_window_minutes: var_or("PAYMENT_WINDOW_MINUTES", "15")?,
                no_show_grace_minutes: var_or("NO_SHOW_GRACE_MINUTES", "30")?,
            },
            refunds: RefundConfig {
                fast_window_minutes: var_or("REFUND_FAST_WINDOW_MINUTES", "20")?,
                full_amount: var_or("REFUND_FULL_AMOUNT", "30")?,
                early_notice_minutes: var_or("REFUND_EARLY_NOTICE_MINUTES", "60")?,
                early_amount: var_or("REFUND_EARLY_AMOUNT", "15")?,
                late_notice_minutes: var_or("REFUND_LATE_NOTICE_MINUTES", "30")?,
                late_amount: var_or("REFUND_LATE_AMOUNT", "10")?,
            },
            notifications: NotificationConfig {
                api_url: env::var("EMAIL_API_URL")
                    .unwrap_or_else(|_| "https://api.brevo.com".to_string()),
                api_key: optional("BREVO_API_KEY"),
                sender_email: optional("DEFAULT_SENDER_EMAIL"),
                sender_name: env::var("EMAIL_SENDER_NAME")
                    .unwrap_or_else(|_| "The Steakhouse".to_string()),
                queue_capacity: var_or("NOTIFICATION_QUEUE_CAPACITY", "1024")?,
                max_attempts: var_or("NOTIFICATION_MAX_ATTEMPTS", "5")?,
                retry_base_ms: var_or("NOTIFICATION_RETRY_BASE_MS", "500")?,
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: var_or("CIRCUIT_BREAKER_FAILURE_THRESHOLD", "5")?,
                timeout_seconds: var_or("CIRCUIT_BREAKER_TIMEOUT_SECONDS", "60")?,
            },
        })
    }
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            max_duration_hours: 4,
            max_party_size: 20,
            allocation_retries: 3,
            payment_window_minutes: 15,
            no_show_grace_minutes: 30,
        }
    }
}

impl Default for RefundConfig {
    fn default() -> Self {
        Self {
            fast_window_minutes: 20,
            full_amount: 30,
            early_notice_minutes: 60,
            early_amount: 15,
            late_notice_minutes: 30,
            late_amount: 10,
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.brevo.com".to_string(),
            api_key: None,
            sender_email: None,
            sender_name: "The Steakhouse".to_string(),
            queue_capacity: 1024,
            max_attempts: 5,
            retry_base_ms: 500,
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout_seconds: 60,
        }
    }
}
