//! Geoapify places adapter.
//!
//! One GET per fetch, circle-filtered around the query origin. The
//! upstream feature collection puts longitude first in every coordinate
//! pair; that ordering is preserved here when mapping into [`Place`].
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::{
    config::Config,
    error::AppError,
    places::{Place, PlaceQuery},
};

#[async_trait]
pub trait PlacesProvider: Send + Sync {
    async fn fetch_places(&self, query: &PlaceQuery) -> Result<Vec<Place>, AppError>;
}

pub struct GeoapifyClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GeoapifyClient {
    pub fn new(config: &Config) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.provider_timeout_secs))
            .build()
            .expect("Failed to build http client");

        Self {
            http,
            base_url: config.geoapify_url.clone(),
            api_key: config.geoapify_key.clone(),
        }
    }
}

#[async_trait]
impl PlacesProvider for GeoapifyClient {
    async fn fetch_places(&self, query: &PlaceQuery) -> Result<Vec<Place>, AppError> {
        // the circle filter takes longitude before latitude
        let url = format!(
            "{}?categories={}&filter=circle:{:.6},{:.6},{}&limit={}&apiKey={}",
            self.base_url,
            query.category,
            query.origin.longitude,
            query.origin.latitude,
            query.radius_meters,
            query.limit,
            self.api_key
        );

        // without_url keeps the api key out of error strings and logs
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| AppError::Provider(e.without_url().to_string()))?
            .error_for_status()
            .map_err(|e| AppError::Provider(e.without_url().to_string()))?;

        let collection: FeatureCollection = response
            .json()
            .await
            .map_err(|e| AppError::Provider(e.without_url().to_string()))?;

        Ok(map_features(collection))
    }
}

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    #[serde(default)]
    properties: FeatureProperties,
    geometry: Option<FeatureGeometry>,
}

#[derive(Debug, Default, Deserialize)]
struct FeatureProperties {
    place_id: Option<String>,
    name: Option<String>,
    street: Option<String>,
    city: Option<String>,
    state: Option<String>,
    postcode: Option<String>,
    country: Option<String>,
    formatted: Option<String>,
    address_line1: Option<String>,
    address_line2: Option<String>,
    #[serde(default)]
    distance: f64,
    #[serde(default)]
    categories: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct FeatureGeometry {
    #[serde(default)]
    coordinates: Vec<f64>,
}

fn map_features(collection: FeatureCollection) -> Vec<Place> {
    let mut places = Vec::with_capacity(collection.features.len());

    for (index, feature) in collection.features.into_iter().enumerate() {
        let coordinates = feature
            .geometry
            .as_ref()
            .map(|g| g.coordinates.as_slice())
            .unwrap_or(&[]);

        // upstream occasionally ships features without a usable geometry
        let &[lon, lat, ..] = coordinates else {
            warn!("skipping feature {index} with short coordinate array");
            continue;
        };

        let p = feature.properties;
        places.push(Place {
            id: p
                .place_id
                .unwrap_or_else(|| format!("place_{}", index + 1)),
            name: p.name.unwrap_or_default(),
            lat,
            lon,
            address_line1: p.address_line1.unwrap_or_default(),
            address_line2: p.address_line2.unwrap_or_default(),
            formatted: p.formatted.unwrap_or_default(),
            street: p.street.unwrap_or_default(),
            city: p.city.unwrap_or_default(),
            state: p.state.unwrap_or_default(),
            country: p.country.unwrap_or_default(),
            postcode: p.postcode.unwrap_or_default(),
            categories: p.categories,
            distance_meters: p.distance,
        });
    }

    places
}
