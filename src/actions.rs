//! Saved places and visit history.
use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
};
use chrono::Utc;
use redis::{AsyncCommands, aio::ConnectionManager};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{auth::AuthUser, error::AppError, state::AppState};

fn saved_key(uuid: &str) -> String {
    format!("saved:{uuid}")
}

fn visits_key(uuid: &str) -> String {
    format!("visits:{uuid}")
}

pub struct ActionStore {
    connection: ConnectionManager,
}

impl ActionStore {
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }

    /// Saving an already-saved place just refreshes its save time.
    pub async fn save_place(&self, uuid: &str, place_id: &str) -> Result<(), AppError> {
        let mut conn = self.connection.clone();
        let _: () = conn
            .zadd(saved_key(uuid), place_id, Utc::now().timestamp())
            .await?;
        Ok(())
    }

    pub async fn remove_saved_place(&self, uuid: &str, place_id: &str) -> Result<(), AppError> {
        let mut conn = self.connection.clone();
        let _: u64 = conn.zrem(saved_key(uuid), place_id).await?;
        Ok(())
    }

    /// Saved place ids, most recently saved first.
    pub async fn saved_places(&self, uuid: &str) -> Result<Vec<String>, AppError> {
        let mut conn = self.connection.clone();
        let places: Vec<String> = conn.zrevrange(saved_key(uuid), 0, -1).await?;
        Ok(places)
    }

    pub async fn log_visit(&self, uuid: &str, place_id: &str) -> Result<(), AppError> {
        let mut conn = self.connection.clone();
        let _: () = conn.lpush(visits_key(uuid), place_id).await?;
        Ok(())
    }

    /// Visited place ids, most recent first.
    pub async fn visit_history(&self, uuid: &str) -> Result<Vec<String>, AppError> {
        let mut conn = self.connection.clone();
        let visits: Vec<String> = conn.lrange(visits_key(uuid), 0, -1).await?;
        Ok(visits)
    }

    pub async fn counts(&self, uuid: &str) -> Result<(u64, u64), AppError> {
        let mut conn = self.connection.clone();
        let saved: u64 = conn.zcard(saved_key(uuid)).await?;
        let visits: u64 = conn.llen(visits_key(uuid)).await?;
        Ok((saved, visits))
    }
}

#[derive(Deserialize)]
pub struct PlaceRequest {
    #[serde(default)]
    pub place_id: String,
}

pub async fn save_place_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(request): Json<PlaceRequest>,
) -> Result<Json<Value>, AppError> {
    if request.place_id.is_empty() {
        return Err(AppError::Validation("place_id is required".to_string()));
    }

    state.actions.save_place(&user.uuid, &request.place_id).await?;
    Ok(Json(json!({ "status": "saved" })))
}

pub async fn remove_saved_place_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(place_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    if place_id.is_empty() {
        return Err(AppError::Validation("place_id is required".to_string()));
    }

    state.actions.remove_saved_place(&user.uuid, &place_id).await?;
    Ok(Json(json!({ "status": "removed" })))
}

pub async fn get_saved_places_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Value>, AppError> {
    let places = state.actions.saved_places(&user.uuid).await?;
    Ok(Json(json!({ "saved_places": places })))
}

pub async fn log_visit_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(request): Json<PlaceRequest>,
) -> Result<Json<Value>, AppError> {
    if request.place_id.is_empty() {
        return Err(AppError::Validation("place_id is required".to_string()));
    }

    state.actions.log_visit(&user.uuid, &request.place_id).await?;
    Ok(Json(json!({ "status": "visited" })))
}

pub async fn get_visit_history_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Value>, AppError> {
    let visits = state.actions.visit_history(&user.uuid).await?;
    Ok(Json(json!({ "visit_history": visits })))
}
