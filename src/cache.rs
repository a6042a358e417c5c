//! Proximity cache for places lookups.
//!
//! Results are keyed by the query origin rounded to 4 decimal places
//! (~11 m), plus radius and category. A key hit alone is not enough to
//! reuse an entry: the requesting origin must also be within
//! [`REUSE_THRESHOLD_METERS`] of the origin the entry was fetched under.
//! Rounding absorbs GPS jitter, the distance check handles points that
//! straddle a rounding boundary.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{AsyncCommands, aio::ConnectionManager};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    error::AppError,
    geo::{Coordinate, distance_meters},
    places::PlacesResult,
};

pub const REUSE_THRESHOLD_METERS: f64 = 100.0;

const STORAGE_PREFIX: &str = "poi:";

/// A prior lookup as stored: the result plus the exact origin it was
/// fetched under. Entries are overwritten on every fresh fetch and never
/// expire on their own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedLookup {
    pub cache_key: String,
    pub origin: Coordinate,
    pub radius_meters: u32,
    pub category: String,
    pub result: PlacesResult,
    pub stored_at: DateTime<Utc>,
}

/// Derives the storage key for a query. Two origins that agree to 4
/// decimal places collide to the same key regardless of request order.
pub fn cache_key(origin: Coordinate, radius_meters: u32, category: &str) -> String {
    format!(
        "{:.4}:{:.4}:{}:{}",
        origin.latitude,
        origin.longitude,
        radius_meters,
        sanitize_category(category)
    )
}

// The key format is colon-delimited, so the category segment must never
// contain one.
fn sanitize_category(raw: &str) -> String {
    let clean = Regex::new(r"[^a-z0-9._-]").unwrap();
    clean.replace_all(&raw.to_lowercase(), "").into_owned()
}

/// The reuse policy: a cached result may stand in for a fresh fetch iff
/// the requester is still within `threshold_meters` of where the cached
/// data was fetched.
pub fn should_reuse(cached_origin: Coordinate, query_origin: Coordinate, threshold_meters: f64) -> bool {
    distance_meters(cached_origin, query_origin) < threshold_meters
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Exact-key lookup. A miss is `Ok(None)`, never an error.
    async fn get(&self, key: &str) -> Result<Option<CachedLookup>, AppError>;

    /// Upsert. Overwrites any existing entry for the key.
    async fn put(&self, entry: &CachedLookup) -> Result<(), AppError>;
}

pub struct RedisCache {
    connection: ConnectionManager,
}

impl RedisCache {
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<CachedLookup>, AppError> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn
            .get(format!("{STORAGE_PREFIX}{key}"))
            .await
            .map_err(|e| AppError::CacheStore(e.to_string()))?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        match serde_json::from_str(&raw) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                // an undecodable blob is as good as a miss
                warn!("discarding unreadable cache entry for {key}: {e}");
                Ok(None)
            }
        }
    }

    async fn put(&self, entry: &CachedLookup) -> Result<(), AppError> {
        let payload =
            serde_json::to_string(entry).map_err(|e| AppError::CacheStore(e.to_string()))?;

        let mut conn = self.connection.clone();
        let _: () = conn
            .set(format!("{}{}", STORAGE_PREFIX, entry.cache_key), payload)
            .await
            .map_err(|e| AppError::CacheStore(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{collections::HashMap, sync::Mutex};

    use super::*;

    /// In-memory stand-in for the Redis store.
    #[derive(Default)]
    pub struct MemoryCache {
        pub entries: Mutex<HashMap<String, CachedLookup>>,
    }

    #[async_trait]
    impl CacheStore for MemoryCache {
        async fn get(&self, key: &str) -> Result<Option<CachedLookup>, AppError> {
            Ok(self.entries.lock().unwrap().get(key).cloned())
        }

        async fn put(&self, entry: &CachedLookup) -> Result<(), AppError> {
            self.entries
                .lock()
                .unwrap()
                .insert(entry.cache_key.clone(), entry.clone());
            Ok(())
        }
    }

    /// A store whose reads and writes always fail.
    pub struct FailingCache;

    #[async_trait]
    impl CacheStore for FailingCache {
        async fn get(&self, _key: &str) -> Result<Option<CachedLookup>, AppError> {
            Err(AppError::CacheStore("store unreachable".into()))
        }

        async fn put(&self, _entry: &CachedLookup) -> Result<(), AppError> {
            Err(AppError::CacheStore("store unreachable".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MemoryCache;
    use super::*;
    use crate::places::PlacesResult;

    fn origin(latitude: f64, longitude: f64) -> Coordinate {
        Coordinate {
            latitude,
            longitude,
        }
    }

    fn entry(key: &str, at: Coordinate, marker: &str) -> CachedLookup {
        CachedLookup {
            cache_key: key.to_string(),
            origin: at,
            radius_meters: 5000,
            category: "tourism".to_string(),
            result: PlacesResult {
                places: Vec::new(),
                generated_at: marker.to_string(),
            },
            stored_at: Utc::now(),
        }
    }

    #[test]
    fn key_is_deterministic() {
        let o = origin(40.0, -73.0);
        assert_eq!(cache_key(o, 5000, "tourism"), "40.0000:-73.0000:5000:tourism");
        assert_eq!(cache_key(o, 5000, "tourism"), cache_key(o, 5000, "tourism"));
    }

    #[test]
    fn fifth_decimal_does_not_change_the_key() {
        let a = origin(40.00001, -73.00002);
        let b = origin(40.00002, -73.00001);
        assert_eq!(cache_key(a, 5000, "tourism"), cache_key(b, 5000, "tourism"));
    }

    #[test]
    fn radius_and_category_are_part_of_the_key() {
        let o = origin(40.0, -73.0);
        assert_ne!(cache_key(o, 5000, "tourism"), cache_key(o, 1000, "tourism"));
        assert_ne!(
            cache_key(o, 5000, "tourism"),
            cache_key(o, 5000, "catering.restaurant")
        );
    }

    #[test]
    fn category_cannot_smuggle_the_delimiter() {
        let key = cache_key(origin(40.0, -73.0), 5000, "Tourism: Sights");
        assert_eq!(key.matches(':').count(), 3);
        assert_eq!(key, "40.0000:-73.0000:5000:tourismsights");
    }

    #[test]
    fn reuse_boundary_is_strict_at_100_meters() {
        let cached = origin(40.0, -73.0);
        // 0.00089 degrees of latitude is ~99 m, 0.00091 is ~101 m
        assert!(should_reuse(cached, origin(40.00089, -73.0), REUSE_THRESHOLD_METERS));
        assert!(!should_reuse(cached, origin(40.00091, -73.0), REUSE_THRESHOLD_METERS));
        assert!(should_reuse(cached, cached, REUSE_THRESHOLD_METERS));
    }

    #[tokio::test]
    async fn put_then_get_returns_the_entry() {
        let store = MemoryCache::default();
        let e = entry("k", origin(40.0, -73.0), "first");

        store.put(&e).await.unwrap();

        let found = store.get("k").await.unwrap().unwrap();
        assert_eq!(found.result.generated_at, "first");
        assert!(store.get("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn last_write_wins_per_key() {
        let store = MemoryCache::default();
        store.put(&entry("k", origin(40.0, -73.0), "first")).await.unwrap();
        store.put(&entry("k", origin(40.0, -73.0), "second")).await.unwrap();

        let found = store.get("k").await.unwrap().unwrap();
        assert_eq!(found.result.generated_at, "second");
    }
}
