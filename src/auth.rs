//! Signup, login, token refresh and bearer authentication.
use std::sync::Arc;

use axum::{
    Json,
    extract::{FromRequestParts, State},
    http::{header::AUTHORIZATION, request::Parts},
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{error::AppError, state::AppState};

const ACCESS_TOKEN_TTL_SECS: i64 = 2 * 60 * 60;
const REFRESH_TOKEN_TTL_SECS: i64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub exp: i64,
    #[serde(rename = "type")]
    pub token_type: TokenType,
}

pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub generated_at: DateTime<Utc>,
    pub access_expires: DateTime<Utc>,
}

/// Issues the access + refresh pair for a freshly authenticated user.
pub fn issue_pair(secret: &str, uuid: &str, email: &str) -> Result<TokenPair, AppError> {
    let generated_at = Utc::now();
    let access_expires = generated_at + Duration::seconds(ACCESS_TOKEN_TTL_SECS);
    let refresh_expires = generated_at + Duration::seconds(REFRESH_TOKEN_TTL_SECS);

    Ok(TokenPair {
        access_token: sign(secret, uuid, email, TokenType::Access, access_expires)?,
        refresh_token: sign(secret, uuid, email, TokenType::Refresh, refresh_expires)?,
        generated_at,
        access_expires,
    })
}

fn sign(
    secret: &str,
    uuid: &str,
    email: &str,
    token_type: TokenType,
    expires: DateTime<Utc>,
) -> Result<String, AppError> {
    let claims = Claims {
        sub: uuid.to_string(),
        email: email.to_string(),
        exp: expires.timestamp(),
        token_type,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(Box::new(e)))
}

/// Validates signature, expiry and token type.
pub fn validate_token(secret: &str, token: &str, expected: TokenType) -> Result<Claims, AppError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|_| AppError::Unauthorized("invalid or expired token"))?;

    if data.claims.token_type != expected {
        return Err(AppError::Unauthorized("invalid token type"));
    }

    Ok(data.claims)
}

/// The authenticated caller, extracted from the bearer header. Every
/// protected handler takes one.
pub struct AuthUser {
    pub uuid: String,
    pub email: String,
}

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();

        let token = header
            .strip_prefix("Bearer ")
            .ok_or(AppError::Unauthorized("missing or invalid token"))?;

        let claims = validate_token(&state.config.jwt_secret, token, TokenType::Access)?;

        Ok(AuthUser {
            uuid: claims.sub,
            email: claims.email,
        })
    }
}

#[derive(Deserialize)]
pub struct SignupRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub name: String,
}

pub async fn signup_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SignupRequest>,
) -> Result<Json<Value>, AppError> {
    if request.email.is_empty() || request.password.is_empty() {
        return Err(AppError::Validation(
            "email and password are required".to_string(),
        ));
    }

    let hashed = bcrypt::hash(&request.password, bcrypt::DEFAULT_COST)?;
    let uid = state
        .users
        .create(&request.email, &hashed, &request.name)
        .await?;

    Ok(Json(json!({
        "message": "Signup successful",
        "uid": uid,
    })))
}

#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<Value>, AppError> {
    // same message whether the email or the password was wrong
    let rejection = AppError::Unauthorized("invalid email or password");

    let Some((uid, stored_hash)) = state.users.find_credentials(&request.email).await? else {
        return Err(rejection);
    };

    if !bcrypt::verify(&request.password, &stored_hash)? {
        return Err(rejection);
    }

    let pair = issue_pair(&state.config.jwt_secret, &uid, &request.email)?;
    state.users.record_login(&uid).await?;

    Ok(Json(json!({
        "message": "Login successful",
        "uid": uid,
        "accessToken": pair.access_token,
        "refreshToken": pair.refresh_token,
        "generatedAt": pair.generated_at.to_rfc3339(),
        "accessExpires": pair.access_expires.to_rfc3339(),
    })))
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: String,
}

pub async fn refresh_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<Value>, AppError> {
    let claims = validate_token(
        &state.config.jwt_secret,
        &request.refresh_token,
        TokenType::Refresh,
    )
    .map_err(|_| AppError::Unauthorized("invalid refresh token"))?;

    let generated_at = Utc::now();
    let expires_at = generated_at + Duration::seconds(ACCESS_TOKEN_TTL_SECS);
    let access_token = sign(
        &state.config.jwt_secret,
        &claims.sub,
        &claims.email,
        TokenType::Access,
        expires_at,
    )?;

    Ok(Json(json!({
        "access_token": access_token,
        "generated_at": generated_at.to_rfc3339(),
        "expires_at": expires_at.to_rfc3339(),
    })))
}
