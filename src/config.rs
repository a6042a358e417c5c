use std::{env, fmt::Display, str::FromStr};

use tracing::{info, warn};

pub struct Config {
    pub port: u16,
    pub redis_url: String,
    pub geoapify_url: String,
    pub geoapify_key: String,
    pub jwt_secret: String,
    pub provider_timeout_secs: u64,
}

impl Config {
    pub fn load() -> Self {
        Self {
            port: try_load("ROAM_PORT", "8080"),
            redis_url: try_load("REDIS_URL", "redis://127.0.0.1:6379"),
            geoapify_url: try_load("GEOAPIFY_URL", "https://api.geoapify.com/v2/places"),
            geoapify_key: must_load("GEOAPIFY_API_KEY"),
            jwt_secret: must_load("JWT_SECRET"),
            provider_timeout_secs: try_load("PROVIDER_TIMEOUT_SECS", "10"),
        }
    }
}

fn try_load<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    env::var(key)
        .unwrap_or_else(|_| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e| {
            warn!("Invalid {key} value: {e}");
        })
        .expect("Environment misconfigured!")
}

fn must_load(key: &str) -> String {
    env::var(key)
        .map_err(|_| {
            warn!("{key} missing in environment");
        })
        .expect("Environment misconfigured!")
}
