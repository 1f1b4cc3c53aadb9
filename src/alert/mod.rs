//! Per-endpoint alert state machines.
//!
//! Each notification channel runs its own machine so email and webhook can
//! carry different thresholds for the same endpoint. State always advances on
//! every result; event filtering and muting only gate whether a notification
//! is dispatched.

use crate::config::{EffectiveEmailConfig, EffectiveWebhookConfig, EventSet};
use crate::db::ProbeResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertState {
    Ok,
    /// `1 <= k < threshold` consecutive failures observed.
    Degraded(u32),
    /// A down alert was (or would have been) dispatched and not yet cleared.
    Firing,
}

/// What the dispatcher should do after one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertAction {
    None,
    NotifyFailure,
    NotifyRecovery,
}

/// Alert machine for one channel of one endpoint.
#[derive(Debug, Clone)]
pub struct ChannelAlert {
    state: AlertState,
    threshold: u32,
    suppress_repeated: bool,
    events: EventSet,
    enabled: bool,
}

impl ChannelAlert {
    pub fn new(threshold: u32, suppress_repeated: bool, events: EventSet, enabled: bool) -> Self {
        Self {
            state: AlertState::Ok,
            threshold: threshold.max(1),
            suppress_repeated,
            events,
            enabled,
        }
    }

    pub fn from_email(config: &EffectiveEmailConfig) -> Self {
        Self::new(
            config.failure_threshold,
            config.suppress_repeated,
            config.events,
            config.enabled,
        )
    }

    pub fn from_webhook(config: &EffectiveWebhookConfig) -> Self {
        Self::new(
            config.failure_threshold,
            config.suppress_repeated,
            config.events,
            config.enabled,
        )
    }

    pub fn state(&self) -> AlertState {
        self.state
    }

    /// Feed one probe outcome through the machine.
    pub fn observe(&mut self, success: bool) -> AlertAction {
        use AlertState::*;

        let (next, action) = match (self.state, success) {
            (Ok, true) => (Ok, AlertAction::None),
            (Ok, false) | (Degraded(_), false) => {
                let failures = match self.state {
                    Degraded(k) => k + 1,
                    _ => 1,
                };
                if failures >= self.threshold {
                    let action = if self.events.failure {
                        AlertAction::NotifyFailure
                    } else {
                        AlertAction::None
                    };
                    (Firing, action)
                } else {
                    (Degraded(failures), AlertAction::None)
                }
            }
            // The down alert was never sent; recover silently.
            (Degraded(_), true) => (Ok, AlertAction::None),
            (Firing, false) => {
                let action = if !self.suppress_repeated && self.events.failure {
                    AlertAction::NotifyFailure
                } else {
                    AlertAction::None
                };
                (Firing, action)
            }
            (Firing, true) => {
                let action = if self.events.recovery {
                    AlertAction::NotifyRecovery
                } else {
                    AlertAction::None
                };
                (Ok, action)
            }
        };

        self.state = next;
        if !self.enabled {
            return AlertAction::None;
        }
        action
    }
}

/// Dispatch decisions for both channels of one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointActions {
    pub email: AlertAction,
    pub webhook: AlertAction,
}

impl EndpointActions {
    pub fn is_noop(&self) -> bool {
        self.email == AlertAction::None && self.webhook == AlertAction::None
    }
}

/// Mutable per-endpoint record, owned exclusively by that endpoint's
/// scheduler task.
#[derive(Debug)]
pub struct EndpointState {
    pub consecutive_failures: u32,
    pub currently_down: bool,
    pub last_notified_down: bool,
    pub last_result: Option<ProbeResult>,
    email: Option<ChannelAlert>,
    webhook: Option<ChannelAlert>,
}

impl EndpointState {
    pub fn new(email: Option<ChannelAlert>, webhook: Option<ChannelAlert>) -> Self {
        Self {
            consecutive_failures: 0,
            currently_down: false,
            last_notified_down: false,
            last_result: None,
            email,
            webhook,
        }
    }

    /// Update bookkeeping and both channel machines for one result.
    pub fn observe(&mut self, result: &ProbeResult) -> EndpointActions {
        if result.success {
            self.consecutive_failures = 0;
            self.currently_down = false;
            self.last_notified_down = false;
        } else {
            self.consecutive_failures += 1;
            self.currently_down = true;
        }

        let actions = EndpointActions {
            email: self
                .email
                .as_mut()
                .map_or(AlertAction::None, |c| c.observe(result.success)),
            webhook: self
                .webhook
                .as_mut()
                .map_or(AlertAction::None, |c| c.observe(result.success)),
        };

        if actions.email == AlertAction::NotifyFailure
            || actions.webhook == AlertAction::NotifyFailure
        {
            self.last_notified_down = true;
        }

        self.last_result = Some(result.clone());
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ProbeResult;
    use std::time::Duration;

    fn both() -> EventSet {
        EventSet { failure: true, recovery: true }
    }

    fn run_trace(alert: &mut ChannelAlert, trace: &str) -> Vec<AlertAction> {
        trace
            .chars()
            .map(|c| alert.observe(c == 'S'))
            .collect()
    }

    fn count(actions: &[AlertAction], wanted: AlertAction) -> usize {
        actions.iter().filter(|a| **a == wanted).count()
    }

    #[test]
    fn threshold_three_with_suppression() {
        let mut alert = ChannelAlert::new(3, true, both(), true);
        let actions = run_trace(&mut alert, "FFFFFSFFFS");

        // One alert after the third F, recovery on S, one more alert after the
        // third F of the second run, and a final recovery.
        assert_eq!(
            actions,
            vec![
                AlertAction::None,
                AlertAction::None,
                AlertAction::NotifyFailure,
                AlertAction::None,
                AlertAction::None,
                AlertAction::NotifyRecovery,
                AlertAction::None,
                AlertAction::None,
                AlertAction::NotifyFailure,
                AlertAction::NotifyRecovery,
            ]
        );
        assert_eq!(count(&actions, AlertAction::NotifyFailure), 2);
        assert_eq!(count(&actions, AlertAction::NotifyRecovery), 2);
    }

    #[test]
    fn threshold_one_fires_immediately() {
        let mut alert = ChannelAlert::new(1, true, both(), true);
        assert_eq!(alert.observe(false), AlertAction::NotifyFailure);
        assert_eq!(alert.state(), AlertState::Firing);
    }

    #[test]
    fn repeats_fire_when_not_suppressed() {
        let mut alert = ChannelAlert::new(1, false, both(), true);
        let actions = run_trace(&mut alert, "FFF");
        assert_eq!(count(&actions, AlertAction::NotifyFailure), 3);
    }

    #[test]
    fn repeats_suppressed_while_firing() {
        let mut alert = ChannelAlert::new(1, true, both(), true);
        let actions = run_trace(&mut alert, "FFFF");
        assert_eq!(count(&actions, AlertAction::NotifyFailure), 1);
    }

    #[test]
    fn degraded_recovery_is_silent() {
        let mut alert = ChannelAlert::new(3, true, both(), true);
        let actions = run_trace(&mut alert, "FFS");
        assert_eq!(count(&actions, AlertAction::NotifyFailure), 0);
        assert_eq!(count(&actions, AlertAction::NotifyRecovery), 0);
        assert_eq!(alert.state(), AlertState::Ok);
    }

    #[test]
    fn recovery_ignores_suppress_flag() {
        let mut alert = ChannelAlert::new(1, true, both(), true);
        let actions = run_trace(&mut alert, "FFS");
        assert_eq!(count(&actions, AlertAction::NotifyRecovery), 1);
    }

    #[test]
    fn failure_only_events_skip_recovery() {
        let events = EventSet { failure: true, recovery: false };
        let mut alert = ChannelAlert::new(1, true, events, true);
        let actions = run_trace(&mut alert, "FS");
        assert_eq!(count(&actions, AlertAction::NotifyFailure), 1);
        assert_eq!(count(&actions, AlertAction::NotifyRecovery), 0);
    }

    #[test]
    fn recovery_only_events_skip_failures_but_track_state() {
        let events = EventSet { failure: false, recovery: true };
        let mut alert = ChannelAlert::new(2, true, events, true);
        let actions = run_trace(&mut alert, "FFS");
        assert_eq!(count(&actions, AlertAction::NotifyFailure), 0);
        // The machine still reached Firing, so the recovery is real.
        assert_eq!(count(&actions, AlertAction::NotifyRecovery), 1);
    }

    #[test]
    fn disabled_channel_never_notifies() {
        let mut alert = ChannelAlert::new(1, false, both(), false);
        let actions = run_trace(&mut alert, "FFSFS");
        assert!(actions.iter().all(|a| *a == AlertAction::None));
        // State still tracks reality underneath.
        assert_eq!(alert.state(), AlertState::Ok);
    }

    #[test]
    fn independent_channel_thresholds() {
        let email = ChannelAlert::new(3, true, both(), true);
        let webhook = ChannelAlert::new(1, true, both(), true);
        let mut state = EndpointState::new(Some(email), Some(webhook));

        let fail = ProbeResult::down("api", "http", None, "status 500, expected 200");
        let first = state.observe(&fail);
        assert_eq!(first.email, AlertAction::None);
        assert_eq!(first.webhook, AlertAction::NotifyFailure);

        let second = state.observe(&fail);
        assert!(second.is_noop());

        let third = state.observe(&fail);
        assert_eq!(third.email, AlertAction::NotifyFailure);
        assert_eq!(third.webhook, AlertAction::None);
    }

    #[test]
    fn consecutive_failures_bookkeeping() {
        let mut state = EndpointState::new(None, None);
        let fail = ProbeResult::down("api", "http", None, "timeout after 30s");
        let ok = ProbeResult::up("api", "http", Duration::from_millis(5), "200");

        state.observe(&fail);
        state.observe(&fail);
        assert_eq!(state.consecutive_failures, 2);
        assert!(state.currently_down);

        state.observe(&ok);
        assert_eq!(state.consecutive_failures, 0);
        assert!(!state.currently_down);
        assert!(!state.last_notified_down);
        assert!(state.last_result.as_ref().is_some_and(|r| r.success));
    }

    #[test]
    fn last_notified_down_set_on_dispatch() {
        let webhook = ChannelAlert::new(2, true, both(), true);
        let mut state = EndpointState::new(None, Some(webhook));
        let fail = ProbeResult::down("api", "http", None, "status 500, expected 200");

        state.observe(&fail);
        assert!(!state.last_notified_down);
        state.observe(&fail);
        assert!(state.last_notified_down);
    }
}
