use axum::http::{header, HeaderMap};
use bcrypt::{hash, verify};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::User;
use crate::state::AppState;
use crate::store;

/// Hashes a password or an OTP.
pub fn hash_secret(secret: &str, cost: u32) -> Result<String, ApiError> {
    hash(secret, cost).map_err(|e| ApiError::Internal(format!("bcrypt hash: {e}")))
}

/// A malformed stored hash counts as a mismatch.
pub fn verify_secret(secret: &str, hash: &str) -> bool {
    verify(secret, hash).unwrap_or(false)
}

/// Six lowercase hex characters from three random bytes.
pub fn generate_otp() -> String {
    let bytes: [u8; 3] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub user_id: Uuid,
    pub iat: i64,
}

/// Signs an HS256 session token. Tokens carry no expiry.
pub fn issue_token(user_id: Uuid, secret: &str) -> Result<String, ApiError> {
    let claims = Claims {
        user_id,
        iat: Utc::now().timestamp(),
    };
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(format!("jwt encode: {e}")))
}

pub fn decode_token(token: &str, secret: &str) -> Result<Claims, ApiError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;
    validation.set_required_spec_claims::<&str>(&[]);

    jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map(|data| data.claims)
        .map_err(|_| ApiError::InvalidToken)
}

/// The credential part of `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split_whitespace().nth(1))
}

/// Resolves the bearer token to a stored user.
pub async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<User, ApiError> {
    let token = bearer_token(headers).ok_or(ApiError::MissingToken)?;
    user_for_token(state, token).await
}

pub async fn user_for_token(state: &AppState, token: &str) -> Result<User, ApiError> {
    let claims = decode_token(token, &state.auth.jwt_secret)?;
    store::find_by_id(&state.db, claims.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))
}
