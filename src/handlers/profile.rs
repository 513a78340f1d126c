//! Endpoints that act on the caller identified by the bearer token.

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::{log_update, message, remove, AuthToken};
use crate::auth::{authenticate, bearer_token, hash_secret, issue_token, user_for_token, verify_secret};
use crate::error::ApiError;
use crate::extract::JsonBody;
use crate::models::LanguageCounts;
use crate::state::AppState;
use crate::store;
use crate::validation::{normalize_email, required, validate_email, validate_password, validate_username};

#[derive(Debug, Deserialize)]
pub struct ProtectedQuery {
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProtectedData {
    msg: &'static str,
    username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeUsername {
    #[serde(default)]
    new_username: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEmail {
    #[serde(default)]
    new_email: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePassword {
    #[serde(default)]
    new_password: Option<String>,
    #[serde(default)]
    confirm_password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PasswordCheck {
    #[serde(default)]
    password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PasswordChanged {
    msg: &'static str,
    #[serde(flatten)]
    session: AuthToken,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageCounts {
    generate_code_count: LanguageCounts,
    refactor_code_count: LanguageCounts,
    run_code_count: LanguageCounts,
}

/// Returns the caller's profile. Also refreshes a stale `lastLogin`, so
/// this read can write.
pub async fn protected(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ProtectedQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let user = authenticate(&state, &headers).await?;

    let now = Utc::now();
    let stale_before = now - state.auth.last_login_refresh;
    if let Some(refreshed) = store::refresh_last_login(&state.db, user.id, now, stale_before).await? {
        log_update(&state, &refreshed).await?;
    }

    let include_email = query.email.as_deref() == Some("true");
    Ok(Json(ProtectedData {
        msg: "Protected data",
        username: user.username,
        email: include_email.then_some(user.email),
    }))
}

pub async fn change_username(
    State(state): State<AppState>,
    headers: HeaderMap,
    JsonBody(body): JsonBody<ChangeUsername>,
) -> Result<impl IntoResponse, ApiError> {
    let token = bearer_token(&headers).ok_or(ApiError::MissingToken)?;
    let new_username = required(&body.new_username, "New username is required")?.trim();
    validate_username(new_username)?;

    let user = user_for_token(&state, token).await?;
    if store::find_by_username(&state.db, new_username).await?.is_some() {
        return Err(ApiError::Conflict("Username is already taken".into()));
    }

    let user = store::set_username(&state.db, user.id, new_username).await?;
    log_update(&state, &user).await?;
    Ok(message("Username updated successfully"))
}

pub async fn change_email(
    State(state): State<AppState>,
    headers: HeaderMap,
    JsonBody(body): JsonBody<ChangeEmail>,
) -> Result<impl IntoResponse, ApiError> {
    let token = bearer_token(&headers).ok_or(ApiError::MissingToken)?;
    let new_email = normalize_email(required(&body.new_email, "New email is required")?);
    validate_email(&new_email)?;

    let user = user_for_token(&state, token).await?;
    if store::find_by_email(&state.db, &new_email).await?.is_some() {
        return Err(ApiError::Conflict("Email is already taken".into()));
    }

    let user = store::set_email(&state.db, user.id, &new_email).await?;
    log_update(&state, &user).await?;
    Ok(message("Email updated successfully"))
}

/// Replaces the password and hands back a fresh token.
pub async fn change_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    JsonBody(body): JsonBody<ChangePassword>,
) -> Result<impl IntoResponse, ApiError> {
    let token = bearer_token(&headers).ok_or(ApiError::MissingToken)?;
    let (Some(new_password), Some(confirm)) = (
        body.new_password.as_deref().filter(|p| !p.is_empty()),
        body.confirm_password.as_deref().filter(|p| !p.is_empty()),
    ) else {
        return Err(ApiError::validation(
            "New password and confirm password are required",
        ));
    };
    if new_password != confirm {
        return Err(ApiError::validation(
            "New password and confirm password do not match",
        ));
    }
    validate_password(new_password)?;

    let user = user_for_token(&state, token).await?;
    let password_hash = hash_secret(new_password, state.auth.bcrypt_cost)?;
    let user = store::set_password(&state.db, user.id, &password_hash).await?;
    log_update(&state, &user).await?;

    let token = issue_token(user.id, &state.auth.jwt_secret)?;
    Ok(Json(PasswordChanged {
        msg: "Password updated successfully",
        session: AuthToken {
            token,
            username: user.username,
        },
    }))
}

pub async fn delete_account(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user = authenticate(&state, &headers).await?;
    remove(&state, &user).await?;

    tracing::info!(user_id = %user.id, "account deleted");
    Ok(message("Account deleted successfully"))
}

pub async fn verify_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    JsonBody(body): JsonBody<PasswordCheck>,
) -> Result<impl IntoResponse, ApiError> {
    let token = bearer_token(&headers).ok_or(ApiError::MissingToken)?;
    let password = body.password.as_deref().unwrap_or_default();
    validate_password(password)?;

    let user = user_for_token(&state, token).await?;
    if !verify_secret(password, &user.password_hash) {
        return Err(ApiError::IncorrectPassword);
    }
    Ok(message("Password verified"))
}

pub async fn usage_counts(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user = authenticate(&state, &headers).await?;
    Ok(Json(UsageCounts {
        generate_code_count: user.generate_counts,
        refactor_code_count: user.refactor_counts,
        run_code_count: user.run_counts,
    }))
}
