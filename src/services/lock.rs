//! Serializes table allocation per date.
//!
//! Reading the day's reservations and inserting the new one must not
//! interleave with another request for the same date, otherwise both can see
//! the same table as free. The storage exclusion constraint is the final
//! guard; this lock keeps the constraint from being the common path.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ReservationError;
use crate::redis_client::RedisClient;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

// Deletes the key only if it still holds our token
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Proof of holding the allocation lock for one date.
#[derive(Debug)]
pub struct LockToken {
    pub date: NaiveDate,
    value: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl LockToken {
    fn remote(date: NaiveDate) -> Self {
        Self {
            date,
            value: Uuid::new_v4().to_string(),
            guard: None,
        }
    }
}

#[async_trait]
pub trait AllocationLock: Send + Sync {
    async fn acquire(&self, date: NaiveDate) -> Result<LockToken, ReservationError>;
    async fn release(&self, token: LockToken) -> Result<(), ReservationError>;
}

fn lock_key(date: NaiveDate) -> String {
    format!("alloc:{}", date)
}

/// Lock shared by every process talking to the same Redis.
pub struct RedisAllocationLock {
    redis: RedisClient,
    ttl: Duration,
    wait: Duration,
}

impl RedisAllocationLock {
    pub fn new(redis: RedisClient, ttl: Duration, wait: Duration) -> Self {
        Self { redis, ttl, wait }
    }
}

#[async_trait]
impl AllocationLock for RedisAllocationLock {
    async fn acquire(&self, date: NaiveDate) -> Result<LockToken, ReservationError> {
        let token = LockToken::remote(date);
        let key = lock_key(date);
        let mut conn = self.redis.conn.clone();
        let deadline = Instant::now() + self.wait;

        loop {
            // SET NX PX: atomic, expires on its own if the holder dies
            let acquired: Option<String> = redis::cmd("SET")
                .arg(&key)
                .arg(&token.value)
                .arg("NX")
                .arg("PX")
                .arg(self.ttl.as_millis() as u64)
                .query_async(&mut conn)
                .await?;

            if acquired.is_some() {
                debug!("allocation lock for {} acquired", date);
                return Ok(token);
            }
            if Instant::now() >= deadline {
                warn!("allocation lock for {} still busy after {:?}", date, self.wait);
                return Err(ReservationError::LockUnavailable(date));
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn release(&self, token: LockToken) -> Result<(), ReservationError> {
        let mut conn = self.redis.conn.clone();
        let deleted: i32 = redis::Script::new(RELEASE_SCRIPT)
            .key(lock_key(token.date))
            .arg(&token.value)
            .invoke_async(&mut conn)
            .await?;
        if deleted == 0 {
            warn!("allocation lock for {} had already expired", token.date);
        }
        Ok(())
    }
}

/// In-process lock: one async mutex per date.
#[derive(Default)]
pub struct LocalAllocationLock {
    dates: Mutex<HashMap<NaiveDate, Arc<AsyncMutex<()>>>>,
    wait: Option<Duration>,
}

impl LocalAllocationLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_wait(wait: Duration) -> Self {
        Self {
            wait: Some(wait),
            ..Self::default()
        }
    }

    fn mutex_for(&self, date: NaiveDate) -> Arc<AsyncMutex<()>> {
        let mut dates = self.dates.lock().unwrap_or_else(|e| e.into_inner());
        dates.entry(date).or_default().clone()
    }

    /// Forgets the date's mutex once nobody holds or waits on it.
    fn prune(&self, date: NaiveDate) {
        let mut dates = self.dates.lock().unwrap_or_else(|e| e.into_inner());
        if dates.get(&date).is_some_and(|m| Arc::strong_count(m) == 1) {
            dates.remove(&date);
        }
    }

    #[cfg(test)]
    fn tracked_dates(&self) -> usize {
        self.dates.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl AllocationLock for LocalAllocationLock {
    async fn acquire(&self, date: NaiveDate) -> Result<LockToken, ReservationError> {
        let mutex = self.mutex_for(date);
        let guard = match self.wait {
            Some(wait) => match tokio::time::timeout(wait, mutex.lock_owned()).await {
                Ok(guard) => guard,
                Err(_) => {
                    self.prune(date);
                    return Err(ReservationError::LockUnavailable(date));
                }
            },
            None => mutex.lock_owned().await,
        };
        Ok(LockToken {
            date,
            value: String::new(),
            guard: Some(guard),
        })
    }

    async fn release(&self, token: LockToken) -> Result<(), ReservationError> {
        let date = token.date;
        drop(token);
        self.prune(date);
        Ok(())
    }
}
