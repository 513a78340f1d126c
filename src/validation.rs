use std::sync::OnceLock;

use regex::Regex;

use crate::error::ApiError;

pub const MIN_PASSWORD_LEN: usize = 8;

fn username_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z0-9_.-]{5,30}$").expect("valid username regex"))
}

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9_.+-]+@[a-zA-Z0-9-]+\.[a-zA-Z0-9-.]+$").expect("valid email regex")
    })
}

/// Emails are matched case-insensitively, so they are stored lowercased.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn validate_username(username: &str) -> Result<(), ApiError> {
    if username_re().is_match(username) {
        Ok(())
    } else {
        Err(ApiError::validation(
            "Username can only contain letters, numbers, underscores, hyphens, and periods (5-30 characters).",
        ))
    }
}

pub fn validate_email(email: &str) -> Result<(), ApiError> {
    if email_re().is_match(email) {
        Ok(())
    } else {
        Err(ApiError::validation("Invalid email format"))
    }
}

pub fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.chars().count() >= MIN_PASSWORD_LEN {
        Ok(())
    } else {
        Err(ApiError::validation("Password must be at least 8 characters long"))
    }
}

/// Unwraps an optional request field, treating blank strings as absent.
pub fn required<'a>(value: &'a Option<String>, msg: &str) -> Result<&'a str, ApiError> {
    match value.as_deref() {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ApiError::validation(msg)),
    }
}
