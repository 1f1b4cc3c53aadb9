//! SMTP email notifications via lettre.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::{Notifier, NotifyError};
use crate::config::{EffectiveEmailConfig, SmtpConnectionMethod, SmtpSettings};
use crate::db::{ProbeResult, Status};

const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct EmailNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    recipients: Vec<Mailbox>,
    subject_template: String,
}

impl EmailNotifier {
    pub fn new(config: &EffectiveEmailConfig) -> Result<Self, NotifyError> {
        let smtp = config
            .smtp
            .as_ref()
            .ok_or_else(|| NotifyError::Invalid("smtp settings missing".to_string()))?;

        let transport = build_transport(smtp)?;

        let from: Mailbox = smtp
            .from_email
            .parse()
            .map_err(|_| NotifyError::Invalid(format!("invalid from address '{}'", smtp.from_email)))?;
        let recipients = config
            .recipients
            .iter()
            .map(|r| {
                r.parse().map_err(|_| {
                    NotifyError::Invalid(format!("invalid recipient address '{r}'"))
                })
            })
            .collect::<Result<Vec<Mailbox>, NotifyError>>()?;

        Ok(Self {
            transport,
            from,
            recipients,
            subject_template: config.subject_template.clone(),
        })
    }

    fn render_subject(&self, endpoint: &str, status: Status) -> String {
        self.subject_template
            .replace("{endpoint_name}", endpoint)
            .replace("{status}", &status.as_str().to_uppercase())
    }

    fn render_body(endpoint: &str, status: Status, result: &ProbeResult) -> String {
        let latency = match result.latency_ms() {
            Some(ms) => format!("{ms} ms"),
            None => "n/a".to_string(),
        };
        format!(
            "Endpoint: {endpoint}\n\
             Status: {status}\n\
             Timestamp: {timestamp}\n\
             Latency: {latency}\n\
             Detail: {detail}\n",
            status = status.as_str().to_uppercase(),
            timestamp = result.timestamp.to_rfc3339(),
            detail = result.detail,
        )
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn channel(&self) -> &'static str {
        "email"
    }

    async fn send(
        &self,
        endpoint: &str,
        status: Status,
        result: &ProbeResult,
    ) -> Result<(), NotifyError> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(self.render_subject(endpoint, status));
        for recipient in &self.recipients {
            builder = builder.to(recipient.clone());
        }
        let message = builder
            .body(Self::render_body(endpoint, status, result))
            .map_err(|e| NotifyError::Smtp(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| NotifyError::Smtp(e.to_string()))?;
        Ok(())
    }
}

fn build_transport(
    smtp: &SmtpSettings,
) -> Result<AsyncSmtpTransport<Tokio1Executor>, NotifyError> {
    let builder = match smtp.connection_method {
        SmtpConnectionMethod::Starttls => {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)
                .map_err(|e| NotifyError::Smtp(e.to_string()))?
        }
        SmtpConnectionMethod::Ssl => AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host)
            .map_err(|e| NotifyError::Smtp(e.to_string()))?,
        SmtpConnectionMethod::Plain => {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp.host)
        }
    };

    let mut builder = builder.port(smtp.port).timeout(Some(SMTP_TIMEOUT));
    if let Some((username, password)) = resolve_smtp_credentials(
        smtp.username.as_deref(),
        smtp.password.as_deref(),
        std::env::var("SMTP_USERNAME").ok(),
        std::env::var("SMTP_PASSWORD").ok(),
    ) {
        builder = builder.credentials(Credentials::new(username, password));
    }
    Ok(builder.build())
}

/// Effective SMTP credentials: the `SMTP_USERNAME` / `SMTP_PASSWORD`
/// environment variables override the configured values field by field.
/// Returns `None` when no complete credential pair is available.
pub fn resolve_smtp_credentials(
    configured_username: Option<&str>,
    configured_password: Option<&str>,
    env_username: Option<String>,
    env_password: Option<String>,
) -> Option<(String, String)> {
    let username = env_username.or_else(|| configured_username.map(str::to_string))?;
    let password = env_password.or_else(|| configured_password.map(str::to_string))?;
    Some((username, password))
}
