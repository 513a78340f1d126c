//! One-time code lifecycle for email verification and password reset.
//!
//! A code is issued onto an unverified account at registration and consumed
//! by verification. Password reset reuses the same issue/check cycle on a
//! verified account.

use chrono::{DateTime, Duration, Utc};

use crate::auth::{generate_otp, hash_secret, verify_secret};
use crate::error::ApiError;
use crate::models::User;

/// A freshly generated code: the plain text goes to the mailer, the hash and
/// expiry to the store.
#[derive(Debug)]
pub struct IssuedOtp {
    pub code: String,
    pub hash: String,
    pub expires: DateTime<Utc>,
}

pub fn issue(now: DateTime<Utc>, ttl: Duration, cost: u32) -> Result<IssuedOtp, ApiError> {
    let code = generate_otp();
    Ok(IssuedOtp {
        hash: hash_secret(&code, cost)?,
        expires: now + ttl,
        code,
    })
}

/// Checks `code` against the stored hash, then its expiry. Returns the hash
/// that matched so the consuming write can make sure it is still current.
pub fn check<'u>(user: &'u User, code: Option<&str>, now: DateTime<Utc>) -> Result<&'u str, ApiError> {
    let code = code.map(str::trim).filter(|c| !c.is_empty()).ok_or(ApiError::OtpRequired)?;

    let (Some(hash), Some(expires)) = (user.otp_hash.as_deref(), user.otp_expires) else {
        return Err(ApiError::InvalidOtp);
    };
    if !verify_secret(code, hash) {
        return Err(ApiError::InvalidOtp);
    }
    if expires < now {
        return Err(ApiError::OtpExpired);
    }
    Ok(hash)
}
