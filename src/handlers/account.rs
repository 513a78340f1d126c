//! Registration, login and the OTP-gated verification and reset flows.

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::Deserialize;

use super::{create, log_update, message, remove, AuthToken, Message};
use crate::auth::{hash_secret, issue_token, verify_secret};
use crate::error::{ApiError, StoreError};
use crate::extract::JsonBody;
use crate::models::User;
use crate::otp;
use crate::state::AppState;
use crate::store;
use crate::validation::{
    normalize_email, required, validate_email, validate_password, validate_username,
};

#[derive(Debug, Deserialize)]
pub struct RegisterUser {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginUser {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OtpSubmission {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    otp: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EmailOnly {
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResendQuery {
    #[serde(default, rename = "forgot-password")]
    forgot_password: Option<String>,
}

impl ResendQuery {
    /// `forgot-password=false` counts as absent; any other value, empty included, sets it.
    fn is_forgot_password(&self) -> bool {
        matches!(self.forgot_password.as_deref(), Some(v) if v != "false")
    }
}

async fn user_by_email(state: &AppState, email: &str) -> Result<User, ApiError> {
    store::find_by_email(&state.db, email)
        .await?
        .ok_or(ApiError::UserNotFound)
}

/// Issues a fresh code, stores it, then mails it. A failed send leaves the
/// new code stored; the caller can only recover by resending.
async fn send_fresh_otp(state: &AppState, user: &User) -> Result<User, ApiError> {
    let otp = otp::issue(Utc::now(), state.auth.otp_ttl, state.auth.bcrypt_cost)?;
    let user = store::set_otp(&state.db, user.id, &otp.hash, otp.expires).await?;
    log_update(state, &user).await?;
    state.mailer.send_otp(&user.email, &otp.code).await?;
    Ok(user)
}

/// Registering an address that is still pending just reissues its code.
async fn retry_registration(state: &AppState, user: User) -> Result<Json<Message>, ApiError> {
    if user.is_email_verified {
        return Err(ApiError::Conflict("Email already in use".into()));
    }
    let user = send_fresh_otp(state, &user).await?;
    tracing::info!(user_id = %user.id, "registration retried, otp reissued");
    Ok(message("Email not verified."))
}

pub async fn register_user(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<RegisterUser>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalize_email(required(&body.email, "Email is required")?);

    if let Some(user) = store::find_by_email(&state.db, &email).await? {
        return retry_registration(&state, user).await;
    }

    let username = required(&body.username, "Username is required")?.trim();
    if let Some(taken) = store::find_by_username(&state.db, username).await? {
        if taken.email == email {
            return retry_registration(&state, taken).await;
        }
        return Err(ApiError::Conflict("Username already taken".into()));
    }
    validate_username(username)?;
    validate_email(&email)?;
    let password = body.password.as_deref().unwrap_or_default();
    validate_password(password)?;

    let now = Utc::now();
    let password_hash = hash_secret(password, state.auth.bcrypt_cost)?;
    let otp = otp::issue(now, state.auth.otp_ttl, state.auth.bcrypt_cost)?;
    let mut user = User::new(username.to_string(), email, password_hash, now);
    user.otp_hash = Some(otp.hash);
    user.otp_expires = Some(otp.expires);

    match create(&state, &user).await {
        Ok(()) => {}
        // a concurrent registration got its insert in first
        Err(ApiError::Store(StoreError::Conflict(field))) => {
            return match store::find_by_email(&state.db, &user.email).await? {
                Some(existing) => retry_registration(&state, existing).await,
                None => Err(ApiError::Store(StoreError::Conflict(field))),
            };
        }
        Err(err) => return Err(err),
    }
    state.mailer.send_otp(&user.email, &otp.code).await?;

    tracing::info!(user_id = %user.id, "user registered");
    Ok(message(
        "Registration successful, please check your email for the OTP to verify your email address.",
    ))
}

pub async fn login_user(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<LoginUser>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalize_email(body.email.as_deref().unwrap_or_default());
    validate_email(&email)?;
    let password = body.password.as_deref().unwrap_or_default();
    validate_password(password)?;

    let user = store::find_by_email(&state.db, &email)
        .await?
        .ok_or(ApiError::InvalidCredentials)?;
    if !user.is_email_verified {
        return Err(ApiError::EmailNotVerified);
    }
    if !verify_secret(password, &user.password_hash) {
        return Err(ApiError::InvalidCredentials);
    }

    let user = store::set_last_login(&state.db, user.id, Utc::now()).await?;
    log_update(&state, &user).await?;

    let token = issue_token(user.id, &state.auth.jwt_secret)?;
    tracing::info!(user_id = %user.id, "user logged in");
    Ok(Json(AuthToken {
        token,
        username: user.username,
    }))
}

/// Confirms registration. The password supplied here replaces the one given at registration.
pub async fn verify_otp(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<OtpSubmission>,
) -> Result<impl IntoResponse, ApiError> {
    if body.otp.as_deref().map_or(true, str::is_empty) {
        return Err(ApiError::OtpRequired);
    }
    let password = body.password.as_deref().unwrap_or_default();
    validate_password(password)?;

    let email = normalize_email(body.email.as_deref().unwrap_or_default());
    let user = user_by_email(&state, &email).await?;
    if user.is_email_verified {
        return Err(ApiError::Conflict("Email is already verified".into()));
    }
    let checked = otp::check(&user, body.otp.as_deref(), Utc::now())?;

    let password_hash = hash_secret(password, state.auth.bcrypt_cost)?;
    let user = store::verify_email(&state.db, user.id, checked, &password_hash)
        .await?
        .ok_or(ApiError::InvalidOtp)?;
    log_update(&state, &user).await?;

    let token = issue_token(user.id, &state.auth.jwt_secret)?;
    tracing::info!(user_id = %user.id, "email verified");
    Ok(Json(AuthToken {
        token,
        username: user.username,
    }))
}

pub async fn resend_otp(
    State(state): State<AppState>,
    Query(query): Query<ResendQuery>,
    JsonBody(body): JsonBody<EmailOnly>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalize_email(required(&body.email, "Email is required")?);
    let user = user_by_email(&state, &email).await?;

    if !query.is_forgot_password() && user.is_email_verified {
        return Err(ApiError::Conflict("Email is already verified".into()));
    }

    send_fresh_otp(&state, &user).await?;
    Ok(message("OTP resent successfully"))
}

/// Drops an unverified registration so the user can start over with another address.
pub async fn delete_wrong_email(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<EmailOnly>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalize_email(required(&body.email, "Email is required")?);
    let user = user_by_email(&state, &email).await?;

    if user.is_email_verified {
        return Err(ApiError::Conflict("Email is already verified".into()));
    }

    remove(&state, &user).await?;
    tracing::info!(user_id = %user.id, "unverified registration discarded");
    Ok(message("Unverified account deleted successfully"))
}

pub async fn check_email_exists(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<EmailOnly>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalize_email(body.email.as_deref().unwrap_or_default());
    user_by_email(&state, &email).await?;
    Ok(message("Email exists"))
}

pub async fn forgot_password(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<EmailOnly>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalize_email(body.email.as_deref().unwrap_or_default());
    let user = user_by_email(&state, &email).await?;

    if !user.is_email_verified {
        return Err(ApiError::validation("Email not verified"));
    }

    send_fresh_otp(&state, &user).await?;
    Ok(message("OTP sent to your email"))
}

/// Checks a reset code without consuming it.
pub async fn reset_password(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<OtpSubmission>,
) -> Result<impl IntoResponse, ApiError> {
    if body.otp.as_deref().map_or(true, |c| c.trim().is_empty()) {
        return Err(ApiError::OtpRequired);
    }

    let email = normalize_email(body.email.as_deref().unwrap_or_default());
    let user = user_by_email(&state, &email).await?;
    otp::check(&user, body.otp.as_deref(), Utc::now())?;

    Ok(message("OTP verified successfully"))
}

pub async fn update_password(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<OtpSubmission>,
) -> Result<impl IntoResponse, ApiError> {
    if body.otp.as_deref().map_or(true, |c| c.trim().is_empty()) {
        return Err(ApiError::OtpRequired);
    }
    let password = body.password.as_deref().unwrap_or_default();
    validate_password(password)?;

    let email = normalize_email(body.email.as_deref().unwrap_or_default());
    let user = user_by_email(&state, &email).await?;
    let checked = otp::check(&user, body.otp.as_deref(), Utc::now())?;

    let password_hash = hash_secret(password, state.auth.bcrypt_cost)?;
    let user = store::reset_password(&state.db, user.id, checked, &password_hash)
        .await?
        .ok_or(ApiError::InvalidOtp)?;
    log_update(&state, &user).await?;

    tracing::info!(user_id = %user.id, "password reset");
    Ok(message("Password updated successfully"))
}
