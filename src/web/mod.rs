//! Read-only HTTP exposition: Prometheus metrics and container health.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::metrics::Metrics;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub struct Server {
    port: u16,
    metrics: Arc<Metrics>,
}

impl Server {
    pub fn new(port: u16, metrics: Arc<Metrics>) -> Self {
        Self { port, metrics }
    }

    fn routes(&self) -> Router {
        Router::new()
            .route("/metrics", get(handle_metrics))
            .route("/health", get(handle_health))
            .with_state(self.metrics.clone())
    }

    /// Serve until the cancellation token fires.
    pub async fn start(self, cancel: CancellationToken) -> Result<(), std::io::Error> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let router = self.routes();

        tracing::info!("metrics server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
    }
}

async fn handle_metrics(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        metrics.encode(),
    )
}

async fn handle_health(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "uptime_seconds": metrics.uptime(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ProbeResult;
    use std::time::Duration;

    async fn get_body(addr: SocketAddr, path: &str) -> (u16, String) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let mut stream = tokio::net::TcpStream::connect(addr).await.expect("connect");
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.expect("write");
        let mut response = String::new();
        stream.read_to_string(&mut response).await.expect("read");
        let status: u16 = response
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .expect("status line");
        let body = response.split("\r\n\r\n").nth(1).unwrap_or("").to_string();
        (status, body)
    }

    #[tokio::test]
    async fn serves_metrics_and_health() {
        let metrics = Arc::new(Metrics::new());
        metrics.record_result(&ProbeResult::up("api", "http", Duration::from_millis(5), "200"));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let router = Server::new(0, metrics).routes();
        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
                .expect("serve");
        });

        let (status, body) = get_body(addr, "/metrics").await;
        assert_eq!(status, 200);
        assert!(body.contains("server_monitor_checks_total"));

        let (status, body) = get_body(addr, "/health").await;
        assert_eq!(status, 200);
        assert!(body.contains("\"status\":\"healthy\""));

        cancel.cancel();
    }
}
