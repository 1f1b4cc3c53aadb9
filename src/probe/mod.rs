//! Probe executors for the supported check kinds.
//!
//! Every executor turns one check attempt into a [`ProbeResult`]; failures of
//! any kind are folded into the result, never raised to the caller.

mod http;
mod tcp;
mod tls;

pub use http::HttpProbe;
pub use tcp::TcpProbe;
pub use tls::TlsProbe;

use std::time::Duration;

use crate::config::{CheckKind, ConfigError, EndpointConfig};
use crate::db::ProbeResult;

/// Tagged probe specification, built from configuration at startup.
#[derive(Debug)]
pub enum CheckSpec {
    Http(HttpProbe),
    Tcp(TcpProbe),
    Tls(TlsProbe),
}

impl CheckSpec {
    /// Build the executor for an endpoint. Compiles the content matcher and
    /// constructs the HTTP/TLS clients so per-probe work is allocation-light.
    pub fn from_config(config: &EndpointConfig) -> Result<Self, ConfigError> {
        let missing = |kind: &str| {
            ConfigError::Invalid(format!(
                "endpoint '{}': {kind} settings are required for {kind} checks",
                config.name
            ))
        };
        match config.kind {
            CheckKind::Http => {
                let http = config.http.as_ref().ok_or_else(|| missing("http"))?;
                Ok(CheckSpec::Http(HttpProbe::from_config(http)?))
            }
            CheckKind::Tcp => {
                let tcp = config.tcp.as_ref().ok_or_else(|| missing("tcp"))?;
                Ok(CheckSpec::Tcp(TcpProbe::from_config(tcp)))
            }
            CheckKind::Tls => {
                let tls = config.tls.as_ref().ok_or_else(|| missing("tls"))?;
                Ok(CheckSpec::Tls(TlsProbe::from_config(tls)?))
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CheckSpec::Http(_) => "http",
            CheckSpec::Tcp(_) => "tcp",
            CheckSpec::Tls(_) => "tls",
        }
    }

    /// Configured hard upper bound on one probe.
    pub fn timeout(&self) -> Duration {
        match self {
            CheckSpec::Http(p) => p.timeout(),
            CheckSpec::Tcp(p) => p.timeout(),
            CheckSpec::Tls(p) => p.timeout(),
        }
    }

    /// Execute one probe. The short random delay spreads simultaneous ticks
    /// across endpoints so they do not hit the network in lockstep; it stays
    /// under the 100ms dispatch grace.
    pub async fn run(&self, endpoint: &str) -> ProbeResult {
        let jitter = rand::random::<u64>() % 100;
        tokio::time::sleep(Duration::from_millis(jitter)).await;

        match self {
            CheckSpec::Http(p) => p.run(endpoint).await,
            CheckSpec::Tcp(p) => p.run(endpoint).await,
            CheckSpec::Tls(p) => p.run(endpoint).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HttpCheckConfig, TcpCheckConfig};

    fn endpoint(kind: CheckKind) -> EndpointConfig {
        EndpointConfig {
            name: "probe-test".to_string(),
            kind,
            interval: 60,
            enabled: true,
            http: None,
            tcp: None,
            tls: None,
            email_notifications: None,
            webhook_notifications: None,
        }
    }

    #[test]
    fn dispatch_requires_matching_payload() {
        let err = CheckSpec::from_config(&endpoint(CheckKind::Tcp)).unwrap_err();
        assert!(err.to_string().contains("tcp settings are required"));
    }

    #[test]
    fn builds_tcp_spec() {
        let mut config = endpoint(CheckKind::Tcp);
        config.tcp = Some(TcpCheckConfig {
            host: "127.0.0.1".to_string(),
            port: 9,
            timeout: 1,
        });
        let spec = CheckSpec::from_config(&config).expect("build");
        assert_eq!(spec.kind(), "tcp");
        assert_eq!(spec.timeout(), Duration::from_secs(1));
    }

    #[test]
    fn builds_http_spec() {
        let mut config = endpoint(CheckKind::Http);
        config.http = Some(HttpCheckConfig {
            url: "http://127.0.0.1:1/".to_string(),
            method: "GET".to_string(),
            headers: Default::default(),
            body: None,
            timeout: 2,
            expected_status: crate::config::ExpectedStatus::One(200),
            content_match: None,
            content_regex: false,
            follow_redirects: true,
            verify_ssl: true,
        });
        let spec = CheckSpec::from_config(&config).expect("build");
        assert_eq!(spec.kind(), "http");
    }
}
