//! Profile storage and handlers, one Redis hash per user.
use std::{collections::HashMap, sync::Arc};

use axum::{Json, extract::State, http::StatusCode};
use chrono::Utc;
use redis::{AsyncCommands, aio::ConnectionManager};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::{auth::AuthUser, error::AppError, state::AppState};

fn user_key(uuid: &str) -> String {
    format!("user:{uuid}")
}

fn email_key(email: &str) -> String {
    format!("user:email:{email}")
}

#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub uuid: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub preferences: Value,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub preferences: Option<Value>,
}

pub struct UserStore {
    connection: ConnectionManager,
}

impl UserStore {
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }

    /// Registers a new user, claiming the email first so two concurrent
    /// signups for the same address cannot both succeed.
    pub async fn create(
        &self,
        email: &str,
        password_hash: &str,
        name: &str,
    ) -> Result<String, AppError> {
        let uid = Uuid::new_v4().to_string();
        let mut conn = self.connection.clone();

        let claimed: bool = conn.set_nx(email_key(email), &uid).await?;
        if !claimed {
            return Err(AppError::Validation("email already registered".to_string()));
        }

        let now = Utc::now().to_rfc3339();
        let _: () = conn
            .hset_multiple(
                user_key(&uid),
                &[
                    ("email", email.to_string()),
                    ("password_hash", password_hash.to_string()),
                    ("name", name.to_string()),
                    ("preferences", "{}".to_string()),
                    ("created_at", now.clone()),
                    ("updated_at", now),
                ],
            )
            .await?;

        Ok(uid)
    }

    pub async fn find_credentials(&self, email: &str) -> Result<Option<(String, String)>, AppError> {
        let mut conn = self.connection.clone();

        let uid: Option<String> = conn.get(email_key(email)).await?;
        let Some(uid) = uid else {
            return Ok(None);
        };

        let hash: Option<String> = conn.hget(user_key(&uid), "password_hash").await?;
        Ok(hash.map(|hash| (uid, hash)))
    }

    pub async fn record_login(&self, uuid: &str) -> Result<(), AppError> {
        let mut conn = self.connection.clone();
        let _: () = conn
            .hset(user_key(uuid), "last_login", Utc::now().to_rfc3339())
            .await?;
        Ok(())
    }

    pub async fn profile(&self, uuid: &str) -> Result<Option<UserProfile>, AppError> {
        let mut conn = self.connection.clone();
        let fields: HashMap<String, String> = conn.hgetall(user_key(uuid)).await?;

        if fields.is_empty() {
            return Ok(None);
        }

        // an unreadable preferences blob degrades to an empty object
        let preferences = fields
            .get("preferences")
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_else(|| json!({}));

        Ok(Some(UserProfile {
            uuid: uuid.to_string(),
            email: fields.get("email").cloned().unwrap_or_default(),
            phone: fields.get("phone").cloned(),
            name: fields.get("name").cloned().unwrap_or_default(),
            avatar_url: fields.get("avatar_url").cloned(),
            preferences,
            created_at: fields.get("created_at").cloned().unwrap_or_default(),
            updated_at: fields.get("updated_at").cloned().unwrap_or_default(),
            last_login: fields.get("last_login").cloned(),
        }))
    }

    /// Writes only the fields the caller provided.
    pub async fn update(&self, uuid: &str, update: ProfileUpdate) -> Result<(), AppError> {
        let mut fields: Vec<(&str, String)> = Vec::new();

        if let Some(name) = update.name {
            fields.push(("name", name));
        }
        if let Some(phone) = update.phone {
            fields.push(("phone", phone));
        }
        if let Some(preferences) = update.preferences {
            fields.push(("preferences", serde_json::to_string(&preferences)?));
        }
        fields.push(("updated_at", Utc::now().to_rfc3339()));

        let mut conn = self.connection.clone();
        let _: () = conn.hset_multiple(user_key(uuid), &fields).await?;

        Ok(())
    }
}

pub async fn get_profile_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<UserProfile>, AppError> {
    let profile = state
        .users
        .profile(&user.uuid)
        .await?
        .ok_or(AppError::NotFound("user"))?;

    Ok(Json(profile))
}

pub async fn update_profile_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(update): Json<ProfileUpdate>,
) -> Result<StatusCode, AppError> {
    state.users.update(&user.uuid, update).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
pub struct UserStats {
    pub saved_places: u64,
    pub visits: u64,
}

pub async fn get_stats_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<UserStats>, AppError> {
    let (saved_places, visits) = state.actions.counts(&user.uuid).await?;
    Ok(Json(UserStats {
        saved_places,
        visits,
    }))
}
