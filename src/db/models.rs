//! Core value types shared by the store, metrics, and alerting.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Up/down classification of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Up,
    Down,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Up => "up",
            Status::Down => "down",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one probe execution. Immutable once produced; moved by value
/// from the executor to the store, metrics registry, and alert machine.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub endpoint: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub status: Status,
    /// Wall-clock duration of the probe; `None` when the probe failed before
    /// anything measurable happened (timeout, refused connection).
    pub latency: Option<Duration>,
    /// Short human-readable summary: status code, error reason, days to expiry.
    pub detail: String,
    pub metric_tags: HashMap<String, String>,
}

impl ProbeResult {
    pub fn up(endpoint: &str, kind: &str, latency: Duration, detail: impl Into<String>) -> Self {
        Self::new(endpoint, kind, true, Some(latency), detail)
    }

    pub fn down(
        endpoint: &str,
        kind: &str,
        latency: Option<Duration>,
        detail: impl Into<String>,
    ) -> Self {
        Self::new(endpoint, kind, false, latency, detail)
    }

    /// Synthetic result produced when a probe is cut short by shutdown.
    /// Never persisted, never counted, never fed to the alert machine.
    pub fn cancelled(endpoint: &str, kind: &str) -> Self {
        Self::new(endpoint, kind, false, None, "cancelled")
    }

    fn new(
        endpoint: &str,
        kind: &str,
        success: bool,
        latency: Option<Duration>,
        detail: impl Into<String>,
    ) -> Self {
        let mut metric_tags = HashMap::new();
        metric_tags.insert("kind".to_string(), kind.to_string());
        Self {
            endpoint: endpoint.to_string(),
            timestamp: Utc::now(),
            success,
            status: if success { Status::Up } else { Status::Down },
            latency,
            detail: detail.into(),
            metric_tags,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        !self.success && self.detail == "cancelled"
    }

    /// Latency in whole milliseconds, as persisted.
    pub fn latency_ms(&self) -> Option<i64> {
        self.latency.map(|d| d.as_millis() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn up_result_carries_status_and_tags() {
        let r = ProbeResult::up("api", "http", Duration::from_millis(42), "200");
        assert!(r.success);
        assert_eq!(r.status, Status::Up);
        assert_eq!(r.latency_ms(), Some(42));
        assert_eq!(r.metric_tags.get("kind").map(String::as_str), Some("http"));
    }

    #[test]
    fn down_result_without_latency() {
        let r = ProbeResult::down("db", "tcp", None, "connection refused");
        assert!(!r.success);
        assert_eq!(r.status, Status::Down);
        assert_eq!(r.latency_ms(), None);
    }

    #[test]
    fn cancelled_is_detected() {
        assert!(ProbeResult::cancelled("api", "http").is_cancelled());
        assert!(!ProbeResult::down("api", "http", None, "timeout").is_cancelled());
    }

    #[test]
    fn status_renders_lowercase() {
        assert_eq!(Status::Up.to_string(), "up");
        assert_eq!(Status::Down.as_str(), "down");
    }
}
