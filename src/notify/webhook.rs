//! Webhook notifications over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde_json::{json, Value};

use super::{Notifier, NotifyError};
use crate::config::EffectiveWebhookConfig;
use crate::db::{ProbeResult, Status};

pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    method: Method,
    headers: HeaderMap,
}

impl WebhookNotifier {
    pub fn new(config: &EffectiveWebhookConfig) -> Result<Self, NotifyError> {
        let settings = config
            .webhook
            .as_ref()
            .ok_or_else(|| NotifyError::Invalid("webhook settings missing".to_string()))?;

        let method = Method::from_bytes(settings.method.as_bytes())
            .map_err(|_| NotifyError::Invalid(format!("invalid webhook method '{}'", settings.method)))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &settings.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| NotifyError::Invalid(format!("invalid header name '{name}'")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| NotifyError::Invalid(format!("invalid header value for '{name}'")))?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout))
            .build()?;

        Ok(Self {
            client,
            url: settings.url.clone(),
            method,
            headers,
        })
    }

    fn payload(endpoint: &str, status: Status, result: &ProbeResult) -> Value {
        json!({
            "endpoint": endpoint,
            "status": status.as_str(),
            "timestamp": result.timestamp.to_rfc3339(),
            "latency_ms": result.latency_ms(),
            "detail": result.detail,
            "success": result.success,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn channel(&self) -> &'static str {
        "webhook"
    }

    async fn send(
        &self,
        endpoint: &str,
        status: Status,
        result: &ProbeResult,
    ) -> Result<(), NotifyError> {
        let response = self
            .client
            .request(self.method.clone(), &self.url)
            .headers(self.headers.clone())
            .json(&Self::payload(endpoint, status, result))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(NotifyError::UnexpectedStatus(response.status().as_u16()));
        }
        Ok(())
    }
}
