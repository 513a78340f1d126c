use std::env;
use std::net::SocketAddr;

use chrono::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Service configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    /// `None` disables outbound OTP mail.
    pub mail: Option<MailConfig>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env(),
            auth: AuthConfig::from_env()?,
            mail: MailConfig::from_env(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_var("PORT", 5000)?,
        })
    }

    pub fn address(&self) -> Result<SocketAddr, ConfigError> {
        let raw = format!("{}:{}", self.host, self.port);
        raw.parse().map_err(|_| ConfigError::Invalid {
            key: "HOST",
            value: raw,
        })
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// File path of the SQLite store, or `:memory:`.
    pub path: String,
}

impl DatabaseConfig {
    fn from_env() -> Self {
        Self {
            path: env::var("DATABASE_PATH").unwrap_or_else(|_| "playground.db".to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// HMAC secret for HS256 session tokens.
    pub jwt_secret: String,
    pub bcrypt_cost: u32,
    /// How long an emailed OTP stays valid.
    pub otp_ttl: Duration,
    /// `lastLogin` is rewritten on a protected read once it is older than this.
    pub last_login_refresh: Duration,
}

impl AuthConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let jwt_secret = env::var("JWT_SECRET")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigError::Missing("JWT_SECRET"))?;
        let bcrypt_cost: u32 = parse_var("BCRYPT_COST", 10)?;
        if !(4..=31).contains(&bcrypt_cost) {
            return Err(ConfigError::Invalid {
                key: "BCRYPT_COST",
                value: bcrypt_cost.to_string(),
            });
        }

        Ok(Self {
            jwt_secret,
            bcrypt_cost,
            otp_ttl: bounded_duration(
                "OTP_TTL_MINUTES",
                parse_var("OTP_TTL_MINUTES", 10)?,
                1,
                Duration::try_minutes,
            )?,
            last_login_refresh: bounded_duration(
                "LAST_LOGIN_REFRESH_SECS",
                parse_var("LAST_LOGIN_REFRESH_SECS", 300)?,
                0,
                Duration::try_seconds,
            )?,
        })
    }

    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            bcrypt_cost: bcrypt::DEFAULT_COST,
            otp_ttl: Duration::minutes(10),
            last_login_refresh: Duration::minutes(5),
        }
    }
}

/// Transactional mail provider settings.
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub api_url: String,
    pub api_key: String,
    pub sender_email: String,
    pub sender_name: Option<String>,
    /// Link placed in the OTP email.
    pub app_url: String,
}

impl MailConfig {
    fn from_env() -> Option<Self> {
        let api_key = non_empty_var("MAIL_API_KEY")?;
        let sender_email = non_empty_var("OTP_EMAIL_USER")?;

        Some(Self {
            api_url: non_empty_var("MAIL_API_URL")
                .unwrap_or_else(|| "https://api.brevo.com/v3/smtp/email".to_string()),
            api_key,
            sender_email,
            sender_name: non_empty_var("MAIL_SENDER_NAME"),
            app_url: non_empty_var("APP_URL")
                .unwrap_or_else(|| "https://online-ide-cyan.vercel.app/".to_string()),
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid { key, value: raw }),
        Err(_) => Ok(default),
    }
}

/// Longest interval any duration setting may span.
const MAX_SETTING_DAYS: i64 = 365;

/// Builds a duration setting from `amount` units, rejecting values below
/// `min` or past [`MAX_SETTING_DAYS`] instead of overflowing.
fn bounded_duration(
    key: &'static str,
    amount: i64,
    min: i64,
    unit: fn(i64) -> Option<Duration>,
) -> Result<Duration, ConfigError> {
    let max = Duration::days(MAX_SETTING_DAYS);
    unit(amount)
        .filter(|d| amount >= min && *d <= max)
        .ok_or(ConfigError::Invalid {
            key,
            value: amount.to_string(),
        })
}
