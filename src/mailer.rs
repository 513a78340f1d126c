use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;

use crate::config::MailConfig;

const OTP_SUBJECT: &str = "Online IDE - Your OTP for Email Verification";

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail transport: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("mail provider rejected message (status={status}): {body}")]
    Rejected { status: u16, body: String },
}

/// Outbound delivery of verification codes.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_otp(&self, to: &str, code: &str) -> Result<(), MailError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmailAddress {
    email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendEmailBody {
    sender: EmailAddress,
    to: Vec<EmailAddress>,
    subject: String,
    html_content: String,
}

/// Sends through a transactional-email HTTP API.
pub struct HttpMailer {
    client: Client,
    config: MailConfig,
}

impl HttpMailer {
    pub fn new(config: MailConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send_otp(&self, to: &str, code: &str) -> Result<(), MailError> {
        let body = SendEmailBody {
            sender: EmailAddress {
                email: self.config.sender_email.clone(),
                name: self.config.sender_name.clone(),
            },
            to: vec![EmailAddress {
                email: to.to_string(),
                name: None,
            }],
            subject: OTP_SUBJECT.to_string(),
            html_content: otp_email_html(code, &self.config.app_url),
        };

        let resp = self
            .client
            .post(&self.config.api_url)
            .header("api-key", &self.config.api_key)
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            tracing::debug!(to, "otp email sent");
            return Ok(());
        }

        let body = resp.text().await.unwrap_or_default();
        Err(MailError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

/// Used when no mail provider is configured. Codes only reach the debug log.
pub struct DisabledMailer;

#[async_trait]
impl Mailer for DisabledMailer {
    async fn send_otp(&self, to: &str, code: &str) -> Result<(), MailError> {
        tracing::warn!(to, "mail delivery disabled, otp not sent");
        tracing::debug!(to, code, "undelivered otp");
        Ok(())
    }
}

pub fn otp_email_html(code: &str, app_url: &str) -> String {
    format!(
        r#"<html>
    <body>
        <h2>Welcome to Our Online IDE!</h2>
        <p>We received a request to verify your email address.</p>
        <p>To complete your email verification, please use the OTP below:</p>
        <h3 style="color: #4CAF50;">Your OTP: <strong>{code}</strong></h3>
        <p><i>This OTP will expire in 10 minutes. If you did not request this, please ignore this email.</i></p>
        <p><a href="{app_url}" target="_blank" style="color: #007BFF;">Online IDE</a></p>
        <p>Thank you for choosing our service!</p>
    </body>
</html>"#
    )
}
