//! # Redis
//!
//! Backing store for everything the service persists.
//!
//! ## Keyspace
//!
//! - `poi:{lat}:{lon}:{radius}:{category}` -- cached places lookup, one JSON
//!   blob per derived cache key. Written with a plain `SET`, so an overwrite
//!   is atomic and the last write wins.
//! - `ratelimit:{identifier}:{hour}` -- hourly request counter, `INCR` plus a
//!   first-write `EXPIRE` so stale buckets clean themselves up.
//! - `user:{uuid}` -- profile hash (email, name, password_hash, preferences,
//!   timestamps).
//! - `user:email:{email}` -- email to uuid index, claimed with `SET NX` so
//!   two concurrent signups cannot share an address.
//! - `saved:{uuid}` -- sorted set of saved place ids, scored by save time.
//! - `visits:{uuid}` -- visit history list, newest first.
//!
//! All writes are single commands, which is the only atomicity the handlers
//! rely on. There is no in-process locking anywhere.
use std::time::Duration;

use redis::{
    Client,
    aio::{ConnectionManager, ConnectionManagerConfig},
};

pub async fn init_redis(redis_url: &str) -> ConnectionManager {
    let config = ConnectionManagerConfig::new()
        .set_number_of_retries(1)
        .set_connection_timeout(Duration::from_millis(100));

    let client = Client::open(redis_url).unwrap();
    let connection_manager = client
        .get_connection_manager_with_config(config)
        .await
        .unwrap();

    connection_manager
}
