//! Travel places backend: signup/login/JWT refresh, a find-nearby-places
//! lookup with a proximity-aware response cache, and per-user saved
//! places and visit history. One Redis instance backs everything.
use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    http::{
        Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::{delete, get, post},
};

use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tokio::{net::TcpListener, signal};
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

pub mod actions;
pub mod auth;
pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod geo;
pub mod places;
pub mod provider;
pub mod rate_limit;
pub mod state;
pub mod users;

use state::AppState;

pub async fn start_server() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Initializing state...");
    let state = AppState::new().await;

    info!("Starting server...");

    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .max_age(Duration::from_secs(60 * 60));

    let app = router(state.clone()).layer(cors);

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address).await.unwrap();
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    println!("Server shutting down...");
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/signup", post(auth::signup_handler))
        .route("/login", post(auth::login_handler))
        .route("/refresh", post(auth::refresh_handler))
        .route("/findplaces", post(places::find_places_handler))
        .route(
            "/api/user/profile",
            get(users::get_profile_handler).put(users::update_profile_handler),
        )
        .route("/api/user/stats", get(users::get_stats_handler))
        .route("/api/user/save-place", post(actions::save_place_handler))
        .route(
            "/api/user/save-place/{place_id}",
            delete(actions::remove_saved_place_handler),
        )
        .route("/api/user/saved-places", get(actions::get_saved_places_handler))
        .route("/api/user/visit", post(actions::log_visit_handler))
        .route("/api/user/visit-history", get(actions::get_visit_history_handler))
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        ctrl_c().await.expect("Failed to install Ctrl+C handler");

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        signal(SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
