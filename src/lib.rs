pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod mailer;
pub mod models;
pub mod otp;
pub mod state;
pub mod store;
pub mod validation;

use axum::{
    http::{header, Method},
    routing::{delete, get, post, put},
    Json, Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::handlers::{account, profile, shared_links, usage};
use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/health", get(health))
        .route("/api/register", post(account::register_user))
        .route("/api/login", post(account::login_user))
        .route("/api/verify-otp", post(account::verify_otp))
        .route("/api/resend-otp", post(account::resend_otp))
        .route("/api/wrong-email", delete(account::delete_wrong_email))
        .route("/api/check-email-exists", post(account::check_email_exists))
        .route("/api/forgot-password", post(account::forgot_password))
        .route("/api/reset-password", post(account::reset_password))
        .route("/api/update-password", post(account::update_password))
        .route("/api/protected", get(profile::protected))
        .route("/api/change-username", put(profile::change_username))
        .route("/api/change-email", put(profile::change_email))
        .route("/api/change-password", put(profile::change_password))
        .route("/api/account", delete(profile::delete_account))
        .route("/api/verify-password", post(profile::verify_password))
        .route("/api/user/usage", get(profile::usage_counts))
        .route("/api/runCode/count", post(usage::count_run))
        .route("/api/generateCode/count", post(usage::count_generate))
        .route("/api/refactorCode/count", post(usage::count_refactor))
        .route("/api/sharedLink/count", post(shared_links::record_shared_link))
        .route("/api/user/sharedLinks", post(shared_links::list_shared_links))
        .route("/api/sharedLink", delete(shared_links::delete_shared_link))
        .route(
            "/api/user/sharedLink/:share_id",
            delete(shared_links::delete_user_shared_link),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
