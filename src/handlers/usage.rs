use axum::{extract::State, http::StatusCode};
use serde::Deserialize;

use super::log_update;
use crate::error::ApiError;
use crate::extract::JsonBody;
use crate::models::{CounterKind, Language};
use crate::state::AppState;
use crate::store;

#[derive(Debug, Deserialize)]
pub struct CountAction {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    language: Option<String>,
}

async fn count(state: &AppState, kind: CounterKind, body: CountAction) -> Result<StatusCode, ApiError> {
    let username = body.username.as_deref().unwrap_or_default();
    let user = store::find_by_username(&state.db, username)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    let language = body
        .language
        .as_deref()
        .and_then(Language::from_tag)
        .ok_or(ApiError::UnsupportedLanguage)?;

    let user = store::increment_usage(&state.db, user.id, kind, language).await?;
    log_update(state, &user).await?;

    tracing::debug!(user_id = %user.id, ?kind, ?language, "usage counted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn count_run(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<CountAction>,
) -> Result<StatusCode, ApiError> {
    count(&state, CounterKind::Run, body).await
}

pub async fn count_generate(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<CountAction>,
) -> Result<StatusCode, ApiError> {
    count(&state, CounterKind::Generate, body).await
}

pub async fn count_refactor(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<CountAction>,
) -> Result<StatusCode, ApiError> {
    count(&state, CounterKind::Refactor, body).await
}
