//! In-process metrics registry.
//!
//! Lock-free prometheus primitives owned by a private registry, plus a small
//! sliding window per endpoint that feeds the derived success-rate and
//! average-latency gauges. The HTTP exposition layer only ever sees the
//! encoded text snapshot.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Instant;

use prometheus::{
    Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, IntCounter, IntCounterVec,
    IntGaugeVec, Opts, Registry, TextEncoder,
};

use crate::db::ProbeResult;

/// Number of recent results the derived gauges are computed over.
const WINDOW_SIZE: usize = 100;

const LATENCY_BUCKETS: &[f64] = &[
    0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0,
];

struct WindowEntry {
    success: bool,
    latency_secs: Option<f64>,
}

pub struct Metrics {
    registry: Registry,

    pub checks_total: IntCounterVec,
    pub response_time_seconds: HistogramVec,
    pub endpoint_up: IntGaugeVec,
    pub uptime_seconds: Gauge,
    pub endpoint_success_rate: GaugeVec,
    pub endpoint_avg_response_time: GaugeVec,

    pub store_write_errors: IntCounter,
    pub notification_failures: IntCounterVec,
    pub scheduler_backpressure_events: IntCounter,

    started: Instant,
    windows: Mutex<HashMap<String, VecDeque<WindowEntry>>>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let checks_total = IntCounterVec::new(
            Opts::new("server_monitor_checks_total", "Total number of health checks performed"),
            &["endpoint", "status"],
        )
        .unwrap();
        registry.register(Box::new(checks_total.clone())).unwrap();

        let response_time_seconds = HistogramVec::new(
            HistogramOpts::new(
                "server_monitor_response_time_seconds",
                "Response time of health checks in seconds",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["endpoint"],
        )
        .unwrap();
        registry.register(Box::new(response_time_seconds.clone())).unwrap();

        let endpoint_up = IntGaugeVec::new(
            Opts::new("server_monitor_endpoint_up", "Whether the endpoint is up (1) or down (0)"),
            &["endpoint"],
        )
        .unwrap();
        registry.register(Box::new(endpoint_up.clone())).unwrap();

        let uptime_seconds = Gauge::new("server_monitor_uptime_seconds", "Monitor uptime in seconds").unwrap();
        registry.register(Box::new(uptime_seconds.clone())).unwrap();

        let endpoint_success_rate = GaugeVec::new(
            Opts::new(
                "server_monitor_endpoint_success_rate",
                "Success rate of endpoint checks over the recent window (0-1)",
            ),
            &["endpoint"],
        )
        .unwrap();
        registry.register(Box::new(endpoint_success_rate.clone())).unwrap();

        let endpoint_avg_response_time = GaugeVec::new(
            Opts::new(
                "server_monitor_endpoint_avg_response_time_seconds",
                "Average response time over the recent window in seconds",
            ),
            &["endpoint"],
        )
        .unwrap();
        registry.register(Box::new(endpoint_avg_response_time.clone())).unwrap();

        let store_write_errors = IntCounter::new(
            "server_monitor_store_write_errors_total",
            "Probe results dropped because the store write failed",
        )
        .unwrap();
        registry.register(Box::new(store_write_errors.clone())).unwrap();

        let notification_failures = IntCounterVec::new(
            Opts::new(
                "server_monitor_notification_failures_total",
                "Notification deliveries abandoned after retry exhaustion",
            ),
            &["channel"],
        )
        .unwrap();
        registry.register(Box::new(notification_failures.clone())).unwrap();

        let scheduler_backpressure_events = IntCounter::new(
            "server_monitor_scheduler_backpressure_events_total",
            "Ticks that had to wait for a free probe slot",
        )
        .unwrap();
        registry.register(Box::new(scheduler_backpressure_events.clone())).unwrap();

        Metrics {
            registry,
            checks_total,
            response_time_seconds,
            endpoint_up,
            uptime_seconds,
            endpoint_success_rate,
            endpoint_avg_response_time,
            store_write_errors,
            notification_failures,
            scheduler_backpressure_events,
            started: Instant::now(),
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Record one completed (non-cancelled) probe and refresh the derived
    /// gauges for its endpoint.
    pub fn record_result(&self, result: &ProbeResult) {
        self.checks_total
            .with_label_values(&[&result.endpoint, result.status.as_str()])
            .inc();
        if let Some(latency) = result.latency {
            self.response_time_seconds
                .with_label_values(&[&result.endpoint])
                .observe(latency.as_secs_f64());
        }
        self.endpoint_up
            .with_label_values(&[&result.endpoint])
            .set(i64::from(result.success));

        let (rate, avg) = {
            let mut windows = self.windows.lock().unwrap();
            let window = windows.entry(result.endpoint.clone()).or_default();
            if window.len() == WINDOW_SIZE {
                window.pop_front();
            }
            window.push_back(WindowEntry {
                success: result.success,
                latency_secs: result.latency.map(|d| d.as_secs_f64()),
            });

            let successes = window.iter().filter(|e| e.success).count();
            let rate = successes as f64 / window.len() as f64;
            let latencies: Vec<f64> = window.iter().filter_map(|e| e.latency_secs).collect();
            let avg = if latencies.is_empty() {
                0.0
            } else {
                latencies.iter().sum::<f64>() / latencies.len() as f64
            };
            (rate, avg)
        };

        self.endpoint_success_rate
            .with_label_values(&[&result.endpoint])
            .set(rate);
        self.endpoint_avg_response_time
            .with_label_values(&[&result.endpoint])
            .set(avg);
        self.uptime_seconds.set(self.uptime());
    }

    pub fn uptime(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Prometheus text exposition snapshot.
    pub fn encode(&self) -> String {
        self.uptime_seconds.set(self.uptime());
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&families, &mut buffer).unwrap();
        String::from_utf8(buffer).unwrap()
    }
}
