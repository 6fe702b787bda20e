use axum::{
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, header, request::Parts},
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::AppError, models::Shopper, state::AppState};

/// Header carrying an anonymous shopper's session token.
pub const SESSION_HEADER: &str = "x-session-token";

const MIN_SESSION_TOKEN_LEN: usize = 8;
const MAX_SESSION_TOKEN_LEN: usize = 128;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub exp: usize,
}

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: String,
}

pub fn ensure_role(user: &AuthUser, role: &str) -> Result<(), AppError> {
    if user.role != role {
        return Err(AppError::Forbidden);
    }
    Ok(())
}

pub fn ensure_admin(user: &AuthUser) -> Result<(), AppError> {
    ensure_role(user, "admin")
}

fn bearer_user(headers: &HeaderMap, secret: Option<&str>) -> Result<AuthUser, AppError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| AppError::BadRequest("Missing Authorization header".into()))?;

    let auth_str = auth_header
        .to_str()
        .map_err(|_| AppError::BadRequest("Invalid Authorization header".into()))?;

    let token = auth_str
        .strip_prefix("Bearer ")
        .map(str::trim)
        .ok_or_else(|| AppError::BadRequest("Invalid Authorization scheme".into()))?;

    let secret =
        secret.ok_or_else(|| AppError::Internal(anyhow::anyhow!("JWT_SECRET is not set")))?;

    let decoded = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| AppError::BadRequest("Invalid or expired token".into()))?;

    let user_id = Uuid::parse_str(&decoded.claims.sub)
        .map_err(|_| AppError::BadRequest("Invalid user id in token".into()))?;

    Ok(AuthUser {
        user_id,
        role: decoded.claims.role,
    })
}

fn session_token(headers: &HeaderMap) -> Result<String, AppError> {
    let raw = headers.get(SESSION_HEADER).ok_or_else(|| {
        AppError::BadRequest("Missing Authorization or X-Session-Token header".into())
    })?;
    let token = raw
        .to_str()
        .map_err(|_| AppError::BadRequest("Invalid X-Session-Token header".into()))?
        .trim();

    let well_formed = (MIN_SESSION_TOKEN_LEN..=MAX_SESSION_TOKEN_LEN).contains(&token.len())
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !well_formed {
        return Err(AppError::BadRequest("Invalid X-Session-Token header".into()));
    }
    Ok(token.to_string())
}

impl<S> FromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        bearer_user(&parts.headers, state.jwt_secret.as_deref())
    }
}

/// A bearer token makes the caller a user; otherwise the session header makes
/// them a guest.
impl<S> FromRequestParts<S> for Shopper
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if parts.headers.contains_key(header::AUTHORIZATION) {
            let state = AppState::from_ref(state);
            let user = bearer_user(&parts.headers, state.jwt_secret.as_deref())?;
            return Ok(Shopper::User(user.user_id));
        }
        Ok(Shopper::Guest(session_token(&parts.headers)?))
    }
}
