//! Registry of snippet links the user has published on the file host.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{log_update, message};
use crate::auth::{authenticate, bearer_token, user_for_token};
use crate::error::ApiError;
use crate::extract::JsonBody;
use crate::models::{SharedLink, User};
use crate::state::AppState;
use crate::store;

/// Link lifetime in minutes, sent either as a number or a numeric string.
/// Fractions are truncated toward zero.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Minutes {
    Number(i64),
    Fraction(f64),
    Text(String),
}

impl Minutes {
    fn value(&self) -> Option<i64> {
        match self {
            Minutes::Number(n) => Some(*n),
            Minutes::Fraction(f) => whole_minutes(*f),
            Minutes::Text(s) => {
                let s = s.trim();
                s.parse().ok().or_else(|| s.parse().ok().and_then(whole_minutes))
            }
        }
    }
}

fn whole_minutes(f: f64) -> Option<i64> {
    f.is_finite().then(|| f.trunc() as i64)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSharedLink {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    share_id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    expiry_time: Option<Minutes>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareIdBody {
    #[serde(default)]
    share_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedLinks {
    shared_links: Vec<SharedLink>,
}

/// Longest lifetime the file host offers (one week).
const MAX_LINK_MINUTES: i64 = 7 * 24 * 60;

/// Records a link. Recording a `shareId` the user already has is a no-op.
pub async fn record_shared_link(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<NewSharedLink>,
) -> Result<impl IntoResponse, ApiError> {
    let (Some(username), Some(share_id), Some(title)) = (
        non_empty(&body.username),
        non_empty(&body.share_id),
        non_empty(&body.title),
    ) else {
        return Err(ApiError::validation(
            "Missing required fields: username, shareId, or title",
        ));
    };

    let user = store::find_by_username(&state.db, username)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    if user.has_shared_link(share_id) {
        return Ok(StatusCode::NO_CONTENT);
    }

    let minutes = body
        .expiry_time
        .as_ref()
        .and_then(Minutes::value)
        .filter(|m| (1..=MAX_LINK_MINUTES).contains(m))
        .ok_or_else(|| ApiError::validation("Invalid expiry time"))?;

    let link = SharedLink {
        share_id: share_id.to_string(),
        title: title.to_string(),
        expiry_time: Utc::now() + Duration::minutes(minutes),
    };
    // None: the same link landed from a concurrent request
    let Some(user) = store::add_shared_link(&state.db, user.id, &link).await? else {
        return Ok(StatusCode::NO_CONTENT);
    };
    log_update(&state, &user).await?;

    tracing::debug!(user_id = %user.id, share_id, minutes, "shared link recorded");
    Ok(StatusCode::NO_CONTENT)
}

/// Lists the caller's links, dropping expired ones first.
pub async fn list_shared_links(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user = authenticate(&state, &headers).await?;

    let (pruned, user) = store::prune_expired_links(&state.db, user.id, Utc::now()).await?;
    if pruned > 0 {
        log_update(&state, &user).await?;
        tracing::debug!(user_id = %user.id, pruned, "expired shared links pruned");
    }

    Ok(Json(SharedLinks {
        shared_links: user.shared_links,
    }))
}

/// Deletes a link by id alone. The file host calls this when it expires a file.
pub async fn delete_shared_link(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<ShareIdBody>,
) -> Result<impl IntoResponse, ApiError> {
    let share_id = non_empty(&body.share_id).ok_or_else(|| ApiError::validation("ShareId is required"))?;

    let user = store::find_by_share_id(&state.db, share_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Shared link not found".to_string()))?;

    unlink(&state, user, share_id).await
}

/// Deletes one of the caller's links. Without a token the owner is looked up by `shareId`.
pub async fn delete_user_shared_link(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(share_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let user = match bearer_token(&headers) {
        Some(token) => user_for_token(&state, token).await.map_err(|e| match e {
            ApiError::NotFound(_) => ApiError::NotFound("User or Shared link not found".to_string()),
            other => other,
        })?,
        None => store::find_by_share_id(&state.db, &share_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("User or Shared link not found".to_string()))?,
    };

    unlink(&state, user, &share_id).await
}

async fn unlink(state: &AppState, user: User, share_id: &str) -> Result<impl IntoResponse, ApiError> {
    let user = store::remove_shared_link(&state.db, user.id, share_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Shared link not found".to_string()))?;
    log_update(state, &user).await?;

    tracing::debug!(user_id = %user.id, share_id, "shared link deleted");
    Ok(message("Shared link deleted successfully"))
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
