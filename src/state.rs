use std::sync::Arc;

use crate::{
    actions::ActionStore,
    cache::RedisCache,
    config::Config,
    database::init_redis,
    places::LookupService,
    provider::GeoapifyClient,
    rate_limit::RedisRateLimit,
    users::UserStore,
};

pub struct AppState {
    pub config: Config,
    pub lookup: LookupService,
    pub users: UserStore,
    pub actions: ActionStore,
}

impl AppState {
    pub async fn new() -> Arc<Self> {
        let config = Config::load();

        let redis_connection = init_redis(&config.redis_url).await;

        let lookup = LookupService::new(
            Arc::new(RedisCache::new(redis_connection.clone())),
            Arc::new(RedisRateLimit::new(redis_connection.clone())),
            Arc::new(GeoapifyClient::new(&config)),
        );

        Arc::new(Self {
            lookup,
            users: UserStore::new(redis_connection.clone()),
            actions: ActionStore::new(redis_connection),
            config,
        })
    }
}
