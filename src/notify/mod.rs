//! Notification dispatch with bounded retry.
//!
//! Delivery is best-effort: the alert machine's transitions are never rolled
//! back on a failed send. Each channel is owned by a single endpoint task, so
//! sends for one endpoint/channel pair are naturally serialized.

mod email;
mod webhook;

pub use email::{resolve_smtp_credentials, EmailNotifier};
pub use webhook::WebhookNotifier;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::alert::{AlertAction, EndpointActions};
use crate::config::{EffectiveEmailConfig, EffectiveWebhookConfig};
use crate::db::{ProbeResult, Status};
use crate::metrics::Metrics;

/// Notification error types.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("smtp error: {0}")]
    Smtp(String),
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("webhook returned status {0}")]
    UnexpectedStatus(u16),
    #[error("invalid notification settings: {0}")]
    Invalid(String),
}

/// One delivery channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Label used in logs and the `notification_failures` metric.
    fn channel(&self) -> &'static str;

    async fn send(
        &self,
        endpoint: &str,
        status: Status,
        result: &ProbeResult,
    ) -> Result<(), NotifyError>;
}

/// Backoff before each retry. Three retries after the initial attempt.
const RETRY_BACKOFF: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

/// Resolved notifiers for one endpoint.
pub struct Dispatcher {
    email: Option<EmailNotifier>,
    webhook: Option<WebhookNotifier>,
    metrics: Arc<Metrics>,
}

impl Dispatcher {
    /// Build the channel transports for one endpoint from its effective
    /// configuration. Disabled channels get no transport at all.
    pub fn new(
        email: Option<&EffectiveEmailConfig>,
        webhook: Option<&EffectiveWebhookConfig>,
        metrics: Arc<Metrics>,
    ) -> Result<Self, NotifyError> {
        let email = match email {
            Some(config) if config.enabled => Some(EmailNotifier::new(config)?),
            _ => None,
        };
        let webhook = match webhook {
            Some(config) if config.enabled => Some(WebhookNotifier::new(config)?),
            _ => None,
        };
        Ok(Self { email, webhook, metrics })
    }

    /// Deliver whatever the alert machines decided for this result.
    pub async fn dispatch(&self, actions: &EndpointActions, result: &ProbeResult) {
        if let Some(notifier) = &self.email {
            self.deliver(notifier, actions.email, result).await;
        }
        if let Some(notifier) = &self.webhook {
            self.deliver(notifier, actions.webhook, result).await;
        }
    }

    async fn deliver(&self, notifier: &dyn Notifier, action: AlertAction, result: &ProbeResult) {
        let status = match action {
            AlertAction::None => return,
            AlertAction::NotifyFailure => Status::Down,
            AlertAction::NotifyRecovery => Status::Up,
        };

        let attempts = RETRY_BACKOFF.len() + 1;
        for attempt in 0..attempts {
            match notifier.send(&result.endpoint, status, result).await {
                Ok(()) => {
                    tracing::info!(
                        endpoint = %result.endpoint,
                        channel = notifier.channel(),
                        status = %status,
                        "notification sent"
                    );
                    return;
                }
                Err(e) if attempt + 1 < attempts => {
                    let backoff = RETRY_BACKOFF[attempt];
                    tracing::warn!(
                        endpoint = %result.endpoint,
                        channel = notifier.channel(),
                        error = %e,
                        retry_in_secs = backoff.as_secs(),
                        "notification attempt failed"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    tracing::error!(
                        endpoint = %result.endpoint,
                        channel = notifier.channel(),
                        error = %e,
                        "notification abandoned after retries"
                    );
                    self.metrics
                        .notification_failures
                        .with_label_values(&[notifier.channel()])
                        .inc();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::EndpointActions;
    use crate::config::EventSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FlakyNotifier {
        calls: Arc<AtomicUsize>,
        succeed_on: usize,
    }

    #[async_trait]
    impl Notifier for FlakyNotifier {
        fn channel(&self) -> &'static str {
            "webhook"
        }

        async fn send(
            &self,
            _endpoint: &str,
            _status: Status,
            _result: &ProbeResult,
        ) -> Result<(), NotifyError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call >= self.succeed_on {
                Ok(())
            } else {
                Err(NotifyError::UnexpectedStatus(503))
            }
        }
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher {
            email: None,
            webhook: None,
            metrics: Arc::new(Metrics::new()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let dispatcher = dispatcher();
        let calls = Arc::new(AtomicUsize::new(0));
        let notifier = FlakyNotifier { calls: calls.clone(), succeed_on: 3 };
        let result = ProbeResult::down("api", "http", None, "status 500, expected 200");

        dispatcher
            .deliver(&notifier, AlertAction::NotifyFailure, &result)
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            dispatcher.metrics.notification_failures.with_label_values(&["webhook"]).get(),
            0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_counts_a_failure() {
        let dispatcher = dispatcher();
        let calls = Arc::new(AtomicUsize::new(0));
        let notifier = FlakyNotifier { calls: calls.clone(), succeed_on: usize::MAX };
        let result = ProbeResult::down("api", "http", None, "status 500, expected 200");

        dispatcher
            .deliver(&notifier, AlertAction::NotifyFailure, &result)
            .await;

        // Initial attempt plus three retries.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(
            dispatcher.metrics.notification_failures.with_label_values(&["webhook"]).get(),
            1
        );
    }

    #[tokio::test]
    async fn none_action_sends_nothing() {
        let dispatcher = dispatcher();
        let calls = Arc::new(AtomicUsize::new(0));
        let notifier = FlakyNotifier { calls: calls.clone(), succeed_on: 1 };
        let result = ProbeResult::up("api", "http", Duration::from_millis(1), "200");

        dispatcher.deliver(&notifier, AlertAction::None, &result).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn disabled_channels_build_no_transport() {
        let email = EffectiveEmailConfig {
            enabled: false,
            events: EventSet { failure: true, recovery: true },
            failure_threshold: 1,
            suppress_repeated: true,
            smtp: None,
            recipients: vec![],
            subject_template: "x".to_string(),
        };
        let dispatcher =
            Dispatcher::new(Some(&email), None, Arc::new(Metrics::new())).expect("build");
        assert!(dispatcher.email.is_none());
        assert!(dispatcher.webhook.is_none());
    }

    #[tokio::test]
    async fn dispatch_ignores_noop_actions() {
        let dispatcher = dispatcher();
        let actions = EndpointActions { email: AlertAction::None, webhook: AlertAction::None };
        let result = ProbeResult::up("api", "http", Duration::from_millis(1), "200");
        // No transports, no actions: must simply return.
        dispatcher.dispatch(&actions, &result).await;
    }
}
