use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{AsyncCommands, aio::ConnectionManager};

use crate::error::AppError;

/// Requests allowed per identifier per hour bucket.
pub const HOURLY_REQUEST_LIMIT: u64 = 50;

const STORAGE_PREFIX: &str = "ratelimit:";
const BUCKET_RETENTION_SECS: i64 = 2 * 60 * 60;

/// Truncates a timestamp to its hour, which names the counter bucket.
pub fn hour_bucket(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%dT%H").to_string()
}

#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Counts this request against the bucket and returns the total after
    /// counting. Insert-if-absent, else atomic increment.
    async fn register(&self, identifier: &str, bucket: &str) -> Result<u64, AppError>;
}

pub struct RedisRateLimit {
    connection: ConnectionManager,
}

impl RedisRateLimit {
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl RateLimitStore for RedisRateLimit {
    async fn register(&self, identifier: &str, bucket: &str) -> Result<u64, AppError> {
        let key = format!("{STORAGE_PREFIX}{identifier}:{bucket}");
        let mut conn = self.connection.clone();

        let count: u64 = conn
            .incr(&key, 1u64)
            .await
            .map_err(|e| AppError::CacheStore(e.to_string()))?;

        if count == 1 {
            // fresh bucket, expire it well after its hour has passed
            let _: bool = conn
                .expire(&key, BUCKET_RETENTION_SECS)
                .await
                .map_err(|e| AppError::CacheStore(e.to_string()))?;
        }

        Ok(count)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{collections::HashMap, sync::Mutex};

    use super::*;

    /// In-memory counter with the same insert-or-increment contract.
    #[derive(Default)]
    pub struct MemoryRateLimit {
        pub counts: Mutex<HashMap<String, u64>>,
    }

    #[async_trait]
    impl RateLimitStore for MemoryRateLimit {
        async fn register(&self, identifier: &str, bucket: &str) -> Result<u64, AppError> {
            let mut counts = self.counts.lock().unwrap();
            let count = counts.entry(format!("{identifier}:{bucket}")).or_insert(0);
            *count += 1;
            Ok(*count)
        }
    }

    /// A counter backed by nothing, for exercising the degraded path.
    pub struct FailingRateLimit;

    #[async_trait]
    impl RateLimitStore for FailingRateLimit {
        async fn register(&self, _identifier: &str, _bucket: &str) -> Result<u64, AppError> {
            Err(AppError::CacheStore("store unreachable".into()))
        }
    }
}
