//! The engine: one scheduler task per enabled endpoint.
//!
//! Each task owns its endpoint's state exclusively, so per-endpoint results,
//! state transitions, and notifications keep a strict total order. The global
//! semaphore bounds how many probes run at once across all endpoints.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::alert::{ChannelAlert, EndpointState};
use crate::config::{EffectiveEmailConfig, EffectiveWebhookConfig};
use crate::db::{ProbeResult, ResultStore};
use crate::metrics::Metrics;
use crate::notify::{Dispatcher, NotifyError};
use crate::probe::CheckSpec;

const DRAIN_DEADLINE: Duration = Duration::from_secs(10);

/// One endpoint as the engine sees it: probe spec plus resolved notification
/// channels. Immutable for the lifetime of the run.
pub struct MonitoredEndpoint {
    pub name: String,
    pub interval: Duration,
    pub spec: CheckSpec,
    pub email: Option<EffectiveEmailConfig>,
    pub webhook: Option<EffectiveWebhookConfig>,
}

/// Owns the scheduler tasks and the shared resources they draw on.
pub struct Engine {
    endpoints: Vec<MonitoredEndpoint>,
    store: Arc<dyn ResultStore>,
    metrics: Arc<Metrics>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    tasks: JoinSet<()>,
}

impl Engine {
    pub fn new(
        endpoints: Vec<MonitoredEndpoint>,
        store: Arc<dyn ResultStore>,
        metrics: Arc<Metrics>,
        max_concurrent_checks: usize,
    ) -> Self {
        Self {
            endpoints,
            store,
            metrics,
            semaphore: Arc::new(Semaphore::new(max_concurrent_checks)),
            cancel: CancellationToken::new(),
            tasks: JoinSet::new(),
        }
    }

    /// Root token; cancelling it stops every scheduler.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn one scheduler task per endpoint.
    pub fn start(&mut self) -> Result<(), NotifyError> {
        tracing::info!(endpoints = self.endpoints.len(), "starting engine");

        for endpoint in std::mem::take(&mut self.endpoints) {
            let dispatcher = Dispatcher::new(
                endpoint.email.as_ref(),
                endpoint.webhook.as_ref(),
                self.metrics.clone(),
            )?;
            let state = EndpointState::new(
                endpoint.email.as_ref().map(ChannelAlert::from_email),
                endpoint.webhook.as_ref().map(ChannelAlert::from_webhook),
            );
            let worker = EndpointWorker {
                endpoint,
                state,
                dispatcher,
                store: self.store.clone(),
                metrics: self.metrics.clone(),
                semaphore: self.semaphore.clone(),
                cancel: self.cancel.child_token(),
            };
            self.tasks.spawn(worker.run());
        }
        Ok(())
    }

    /// Cancel all schedulers and wait for them to finish, up to the drain
    /// deadline. Stragglers are aborted and logged.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();

        let drained = tokio::time::timeout(DRAIN_DEADLINE, async {
            while self.tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                remaining = self.tasks.len(),
                "drain deadline exceeded, aborting in-flight monitors"
            );
            self.tasks.shutdown().await;
        }
        tracing::info!("engine stopped");
    }
}

struct EndpointWorker {
    endpoint: MonitoredEndpoint,
    state: EndpointState,
    dispatcher: Dispatcher,
    store: Arc<dyn ResultStore>,
    metrics: Arc<Metrics>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl EndpointWorker {
    async fn run(mut self) {
        let anchor = Instant::now();
        tracing::info!(endpoint = %self.endpoint.name, interval_secs = self.endpoint.interval.as_secs(), "monitor started");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let Some(permit) = self.acquire_slot().await else {
                break;
            };

            let result = tokio::select! {
                _ = self.cancel.cancelled() => {
                    ProbeResult::cancelled(&self.endpoint.name, self.endpoint.spec.kind())
                }
                result = self.endpoint.spec.run(&self.endpoint.name) => result,
            };
            // Free the slot before fan-out; only the probe itself is bounded.
            drop(permit);

            if result.is_cancelled() {
                tracing::debug!(endpoint = %self.endpoint.name, "probe cancelled during shutdown");
                break;
            }
            self.handle(result).await;

            let next = next_tick(anchor, Instant::now(), self.endpoint.interval);
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep_until(next) => {}
            }
        }

        tracing::info!(endpoint = %self.endpoint.name, "monitor stopped");
    }

    /// Admission control: take a probe slot, counting a backpressure event
    /// when one is not immediately free.
    async fn acquire_slot(&self) -> Option<tokio::sync::OwnedSemaphorePermit> {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(_) => {
                self.metrics.scheduler_backpressure_events.inc();
                tracing::debug!(endpoint = %self.endpoint.name, "waiting for a free probe slot");
                tokio::select! {
                    _ = self.cancel.cancelled() => None,
                    permit = self.semaphore.clone().acquire_owned() => permit.ok(),
                }
            }
        }
    }

    /// Fan one result out to the store, the metrics registry, and the alert
    /// machines, then deliver whatever the machines decided. A store failure
    /// never blocks the rest.
    async fn handle(&mut self, result: ProbeResult) {
        if let Err(e) = self.store.record(&result).await {
            self.metrics.store_write_errors.inc();
            tracing::error!(endpoint = %result.endpoint, error = %e, "failed to persist probe result");
        }

        self.metrics.record_result(&result);
        let actions = self.state.observe(&result);

        tracing::debug!(
            endpoint = %result.endpoint,
            success = result.success,
            detail = %result.detail,
            consecutive_failures = self.state.consecutive_failures,
            "check completed"
        );

        if !actions.is_noop() {
            self.dispatcher.dispatch(&actions, &result).await;
        }
    }
}

/// The first anchored tick boundary strictly after `now`, except that a tick
/// landing exactly on a boundary fires immediately. A probe that overruns its
/// interval therefore gets at most one immediate catch-up, never a queue of
/// them.
fn next_tick(anchor: Instant, now: Instant, interval: Duration) -> Instant {
    let elapsed = now.saturating_duration_since(anchor);
    let interval_ns = interval.as_nanos().max(1);
    let periods = elapsed.as_nanos().div_ceil(interval_ns);
    anchor + Duration::from_nanos((periods * interval_ns) as u64)
}
