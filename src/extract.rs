//! Request extractors whose rejections render as [`ApiError`].

use axum::extract::FromRequest;

use crate::error::ApiError;

/// `axum::Json` with malformed or mistyped bodies reported as a 400 `{"msg"}`.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct JsonBody<T>(pub T);
