pub mod account;
pub mod profile;
pub mod shared_links;
pub mod usage;

use axum::Json;
use serde::Serialize;

use crate::error::ApiError;
use crate::models::{ActionType, User};
use crate::state::AppState;
use crate::store;

#[derive(Debug, Serialize)]
pub struct Message {
    pub msg: String,
}

pub(crate) fn message(msg: &str) -> Json<Message> {
    Json(Message { msg: msg.to_string() })
}

#[derive(Debug, Serialize)]
pub struct AuthToken {
    pub token: String,
    pub username: String,
}

/// Logs a record a store write just returned.
pub(crate) async fn log_update(state: &AppState, user: &User) -> Result<(), ApiError> {
    store::append_log(&state.db, user, ActionType::Update).await?;
    Ok(())
}

pub(crate) async fn create(state: &AppState, user: &User) -> Result<(), ApiError> {
    store::insert_user(&state.db, user).await?;
    store::append_log(&state.db, user, ActionType::Create).await?;
    Ok(())
}

/// Deletes the account and logs it. A record that is already gone is a 404
/// and leaves no log entry.
pub(crate) async fn remove(state: &AppState, user: &User) -> Result<(), ApiError> {
    if !store::delete_user(&state.db, user.id).await? {
        return Err(ApiError::NotFound("User not found".to_string()));
    }
    store::append_log(&state.db, user, ActionType::Delete).await?;
    Ok(())
}
