//! Find-places lookup.
//!
//! Per query: validate, rate check, derive the cache key, probe the
//! proximity cache, and only when nothing reusable is stored go out to
//! the provider. A reused entry skips both the paid provider call and
//! the persist step. Cache failures never fail the lookup, they only
//! cost the saved fetch.
use std::sync::Arc;

use axum::{Json, extract::State};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    auth::AuthUser,
    cache::{CacheStore, CachedLookup, REUSE_THRESHOLD_METERS, cache_key, should_reuse},
    error::AppError,
    geo::Coordinate,
    provider::PlacesProvider,
    rate_limit::{HOURLY_REQUEST_LIMIT, RateLimitStore, hour_bucket},
    state::AppState,
};

pub const DEFAULT_RADIUS_METERS: u32 = 5000;
pub const DEFAULT_LIMIT: u32 = 20;
pub const MAX_LIMIT: u32 = 50;
pub const DEFAULT_CATEGORY: &str = "tourism";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Place {
    pub id: String,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub address_line1: String,
    pub address_line2: String,
    pub formatted: String,
    pub street: String,
    pub city: String,
    pub state: String,
    pub country: String,
    pub postcode: String,
    pub categories: Vec<String>,
    pub distance_meters: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacesResult {
    pub places: Vec<Place>,
    pub generated_at: String,
}

#[derive(Debug, Deserialize)]
pub struct FindPlacesRequest {
    // presence is explicit so (0, 0) stays a legitimate origin
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[serde(default)]
    pub radius_meters: i64,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub limit: i64,
}

/// A validated lookup with all defaults applied.
#[derive(Debug, Clone)]
pub struct PlaceQuery {
    pub user_id: String,
    pub origin: Coordinate,
    pub radius_meters: u32,
    pub category: String,
    pub limit: u32,
}

impl PlaceQuery {
    pub fn from_request(user_id: &str, request: FindPlacesRequest) -> Result<Self, AppError> {
        let latitude = request
            .latitude
            .ok_or_else(|| AppError::Validation("latitude is required".to_string()))?;
        let longitude = request
            .longitude
            .ok_or_else(|| AppError::Validation("longitude is required".to_string()))?;

        let origin = Coordinate {
            latitude,
            longitude,
        };
        if !origin.in_range() {
            return Err(AppError::Validation(
                "latitude must be in [-90, 90] and longitude in [-180, 180]".to_string(),
            ));
        }

        let radius_meters = if request.radius_meters <= 0 {
            DEFAULT_RADIUS_METERS
        } else {
            request.radius_meters as u32
        };

        let limit = if request.limit < 1 {
            DEFAULT_LIMIT
        } else {
            request.limit.min(MAX_LIMIT as i64) as u32
        };

        let category = request
            .categories
            .first()
            .cloned()
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());

        Ok(Self {
            user_id: user_id.to_string(),
            origin,
            radius_meters,
            category,
            limit,
        })
    }
}

pub struct LookupService {
    cache: Arc<dyn CacheStore>,
    rate_limiter: Arc<dyn RateLimitStore>,
    provider: Arc<dyn PlacesProvider>,
}

impl LookupService {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        rate_limiter: Arc<dyn RateLimitStore>,
        provider: Arc<dyn PlacesProvider>,
    ) -> Self {
        Self {
            cache,
            rate_limiter,
            provider,
        }
    }

    pub async fn find_places(
        &self,
        user_id: &str,
        request: FindPlacesRequest,
    ) -> Result<PlacesResult, AppError> {
        let query = PlaceQuery::from_request(user_id, request)?;

        let bucket = hour_bucket(Utc::now());
        match self.rate_limiter.register(&query.user_id, &bucket).await {
            Ok(count) if count > HOURLY_REQUEST_LIMIT => return Err(AppError::RateLimited),
            Ok(_) => {}
            Err(e) => warn!("rate limit store unavailable, letting the request through: {e}"),
        }

        let key = cache_key(query.origin, query.radius_meters, &query.category);

        match self.cache.get(&key).await {
            Ok(Some(entry))
                if should_reuse(entry.origin, query.origin, REUSE_THRESHOLD_METERS) =>
            {
                debug!("serving {key} from cache");
                return Ok(entry.result);
            }
            Ok(Some(_)) => debug!("cached origin for {key} too far from requester, refetching"),
            Ok(None) => {}
            Err(e) => warn!("cache read for {key} failed, falling back to fetch: {e}"),
        }

        let places = self.provider.fetch_places(&query).await?;

        let result = PlacesResult {
            places,
            generated_at: Utc::now().to_rfc3339(),
        };

        let entry = CachedLookup {
            cache_key: key,
            origin: query.origin,
            radius_meters: query.radius_meters,
            category: query.category,
            result: result.clone(),
            stored_at: Utc::now(),
        };
        if let Err(e) = self.cache.put(&entry).await {
            warn!(
                "cache write for {} failed, serving uncached result: {e}",
                entry.cache_key
            );
        }

        Ok(result)
    }
}

pub async fn find_places_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(request): Json<FindPlacesRequest>,
) -> Result<Json<PlacesResult>, AppError> {
    let result = state.lookup.find_places(&user.uuid, request).await?;
    Ok(Json(result))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::cache::testing::{FailingCache, MemoryCache};
    use crate::rate_limit::testing::{FailingRateLimit, MemoryRateLimit};

    struct StubProvider {
        calls: AtomicUsize,
        places: Vec<Place>,
    }

    impl StubProvider {
        fn new(places: Vec<Place>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                places,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PlacesProvider for StubProvider {
        async fn fetch_places(&self, _query: &PlaceQuery) -> Result<Vec<Place>, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.places.clone())
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl PlacesProvider for FailingProvider {
        async fn fetch_places(&self, _query: &PlaceQuery) -> Result<Vec<Place>, AppError> {
            Err(AppError::Provider("upstream down".to_string()))
        }
    }

    fn sample_place(id: &str) -> Place {
        Place {
            id: id.to_string(),
            name: "City Museum".to_string(),
            lat: 40.0002,
            lon: -73.0001,
            address_line1: String::new(),
            address_line2: String::new(),
            formatted: String::new(),
            street: "Main St".to_string(),
            city: "Springfield".to_string(),
            state: "IL".to_string(),
            country: "United States".to_string(),
            postcode: "62701".to_string(),
            categories: vec!["tourism".to_string()],
            distance_meters: 42.5,
        }
    }

    fn request(latitude: f64, longitude: f64) -> FindPlacesRequest {
        FindPlacesRequest {
            latitude: Some(latitude),
            longitude: Some(longitude),
            radius_meters: 5000,
            categories: vec!["tourism".to_string()],
            limit: 20,
        }
    }

    #[test]
    fn defaults_are_substituted() {
        let query = PlaceQuery::from_request(
            "u-1",
            FindPlacesRequest {
                latitude: Some(40.0),
                longitude: Some(-73.0),
                radius_meters: -5,
                categories: Vec::new(),
                limit: 0,
            },
        )
        .unwrap();

        assert_eq!(query.radius_meters, DEFAULT_RADIUS_METERS);
        assert_eq!(query.limit, DEFAULT_LIMIT);
        assert_eq!(query.category, DEFAULT_CATEGORY);
    }

    #[test]
    fn limit_is_capped() {
        let query = PlaceQuery::from_request(
            "u-1",
            FindPlacesRequest {
                latitude: Some(40.0),
                longitude: Some(-73.0),
                radius_meters: 5000,
                categories: vec!["tourism".to_string()],
                limit: 500,
            },
        )
        .unwrap();

        assert_eq!(query.limit, MAX_LIMIT);
    }

    #[test]
    fn missing_or_out_of_range_origin_is_rejected() {
        let missing = PlaceQuery::from_request(
            "u-1",
            FindPlacesRequest {
                latitude: None,
                longitude: Some(-73.0),
                radius_meters: 0,
                categories: Vec::new(),
                limit: 0,
            },
        );
        assert!(matches!(missing, Err(AppError::Validation(_))));

        let out_of_range = PlaceQuery::from_request("u-1", request(95.0, -73.0));
        assert!(matches!(out_of_range, Err(AppError::Validation(_))));
    }

    #[test]
    fn equator_and_prime_meridian_are_legitimate() {
        let query = PlaceQuery::from_request("u-1", request(0.0, 0.0)).unwrap();
        assert_eq!(query.origin.latitude, 0.0);
        assert_eq!(query.origin.longitude, 0.0);
    }

    #[tokio::test]
    async fn first_query_fetches_and_persists() {
        let cache = Arc::new(MemoryCache::default());
        let provider = StubProvider::new(vec![sample_place("p-1")]);
        let service = LookupService::new(
            cache.clone(),
            Arc::new(MemoryRateLimit::default()),
            provider.clone(),
        );

        let result = service.find_places("u-1", request(40.0, -73.0)).await.unwrap();

        assert_eq!(provider.calls(), 1);
        assert_eq!(result.places, vec![sample_place("p-1")]);
        assert!(!result.generated_at.is_empty());

        let entries = cache.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        let entry = entries.values().next().unwrap();
        assert_eq!(entry.origin.latitude, 40.0);
        assert_eq!(entry.radius_meters, 5000);
    }

    #[tokio::test]
    async fn repeat_query_reuses_the_cache_and_skips_the_provider() {
        let cache = Arc::new(MemoryCache::default());
        let provider = StubProvider::new(vec![sample_place("p-1")]);
        let service = LookupService::new(
            cache.clone(),
            Arc::new(MemoryRateLimit::default()),
            provider.clone(),
        );

        let first = service.find_places("u-1", request(40.0, -73.0)).await.unwrap();
        let second = service.find_places("u-1", request(40.0, -73.0)).await.unwrap();

        assert_eq!(provider.calls(), 1);
        assert_eq!(second.places, first.places);
        assert_eq!(second.generated_at, first.generated_at);
    }

    #[tokio::test]
    async fn gps_jitter_within_the_rounding_cell_still_reuses() {
        let provider = StubProvider::new(vec![sample_place("p-1")]);
        let service = LookupService::new(
            Arc::new(MemoryCache::default()),
            Arc::new(MemoryRateLimit::default()),
            provider.clone(),
        );

        service.find_places("u-1", request(40.0, -73.0)).await.unwrap();
        service
            .find_places("u-1", request(40.00002, -73.00002))
            .await
            .unwrap();

        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn stale_cached_origin_forces_a_refetch_and_overwrite() {
        let cache = Arc::new(MemoryCache::default());
        let provider = StubProvider::new(vec![sample_place("fresh")]);
        let service = LookupService::new(
            cache.clone(),
            Arc::new(MemoryRateLimit::default()),
            provider.clone(),
        );

        let query_origin = Coordinate {
            latitude: 40.0,
            longitude: -73.0,
        };
        let key = cache_key(query_origin, 5000, "tourism");
        // an entry under the same key, fetched ~200 m north of the requester
        cache
            .put(&CachedLookup {
                cache_key: key.clone(),
                origin: Coordinate {
                    latitude: 40.0018,
                    longitude: -73.0,
                },
                radius_meters: 5000,
                category: "tourism".to_string(),
                result: PlacesResult {
                    places: vec![sample_place("stale")],
                    generated_at: "2026-01-01T00:00:00Z".to_string(),
                },
                stored_at: Utc::now(),
            })
            .await
            .unwrap();

        let result = service.find_places("u-1", request(40.0, -73.0)).await.unwrap();

        assert_eq!(provider.calls(), 1);
        assert_eq!(result.places[0].id, "fresh");

        let entries = cache.entries.lock().unwrap();
        let entry = entries.get(&key).unwrap();
        assert_eq!(entry.origin, query_origin);
        assert_eq!(entry.result.places[0].id, "fresh");
    }

    #[tokio::test]
    async fn fifty_first_request_in_an_hour_is_rejected() {
        let cache = Arc::new(MemoryCache::default());
        let provider = StubProvider::new(vec![sample_place("p-1")]);
        let service = LookupService::new(
            cache.clone(),
            Arc::new(MemoryRateLimit::default()),
            provider.clone(),
        );

        for _ in 0..50 {
            service.find_places("u-1", request(40.0, -73.0)).await.unwrap();
        }

        let rejected = service.find_places("u-1", request(40.0, -73.0)).await;
        assert!(matches!(rejected, Err(AppError::RateLimited)));

        // only the very first request reached the provider or wrote the cache
        assert_eq!(provider.calls(), 1);
        assert_eq!(cache.entries.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rate_limit_is_per_identifier() {
        let provider = StubProvider::new(vec![sample_place("p-1")]);
        let service = LookupService::new(
            Arc::new(MemoryCache::default()),
            Arc::new(MemoryRateLimit::default()),
            provider.clone(),
        );

        for _ in 0..50 {
            service.find_places("u-1", request(40.0, -73.0)).await.unwrap();
        }

        assert!(service.find_places("u-1", request(40.0, -73.0)).await.is_err());
        assert!(service.find_places("u-2", request(40.0, -73.0)).await.is_ok());
    }

    #[tokio::test]
    async fn cache_failures_degrade_to_always_fetch() {
        let provider = StubProvider::new(vec![sample_place("p-1")]);
        let service = LookupService::new(
            Arc::new(FailingCache),
            Arc::new(MemoryRateLimit::default()),
            provider.clone(),
        );

        let first = service.find_places("u-1", request(40.0, -73.0)).await.unwrap();
        let second = service.find_places("u-1", request(40.0, -73.0)).await.unwrap();

        assert_eq!(first.places, second.places);
        // no reuse possible, every query pays for a fetch
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn rate_limit_store_failure_lets_the_request_through() {
        let provider = StubProvider::new(vec![sample_place("p-1")]);
        let service = LookupService::new(
            Arc::new(MemoryCache::default()),
            Arc::new(FailingRateLimit),
            provider.clone(),
        );

        let result = service.find_places("u-1", request(40.0, -73.0)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn provider_failure_is_terminal_and_caches_nothing() {
        let cache = Arc::new(MemoryCache::default());
        let service = LookupService::new(
            cache.clone(),
            Arc::new(MemoryRateLimit::default()),
            Arc::new(FailingProvider),
        );

        let result = service.find_places("u-1", request(40.0, -73.0)).await;
        assert!(matches!(result, Err(AppError::Provider(_))));
        assert!(cache.entries.lock().unwrap().is_empty());
    }
}
