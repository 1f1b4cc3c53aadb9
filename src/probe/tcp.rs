//! TCP connect probe executor.

use std::time::{Duration, Instant};

use tokio::net::TcpStream;

use crate::config::TcpCheckConfig;
use crate::db::ProbeResult;

/// Checks that a TCP three-way handshake completes. No payload is exchanged;
/// the connection is dropped as soon as it is established.
#[derive(Debug)]
pub struct TcpProbe {
    host: String,
    port: u16,
    timeout: Duration,
}

impl TcpProbe {
    pub fn from_config(config: &TcpCheckConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            timeout: Duration::from_secs(config.timeout),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn run(&self, endpoint: &str) -> ProbeResult {
        let start = Instant::now();
        let connect = TcpStream::connect((self.host.as_str(), self.port));

        match tokio::time::timeout(self.timeout, connect).await {
            Ok(Ok(stream)) => {
                let latency = start.elapsed();
                drop(stream);
                ProbeResult::up(endpoint, "tcp", latency, "connected")
            }
            Ok(Err(e)) => ProbeResult::down(endpoint, "tcp", None, e.to_string()),
            Err(_) => ProbeResult::down(
                endpoint,
                "tcp",
                None,
                format!("connect timeout after {}s", self.timeout.as_secs()),
            ),
        }
    }
}
