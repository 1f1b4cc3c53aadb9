//! TLS certificate probe executor.
//!
//! Completes a full TLS handshake with SNI, then inspects the peer's leaf
//! certificate for time to expiry. Certificates inside the warning window
//! stay successful; only handshake failures (which include expired and
//! not-yet-valid certificates, rejected by the verifier) count as down.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::config::{ConfigError, TlsCheckConfig};
use crate::db::ProbeResult;

const SECONDS_PER_DAY: i64 = 86_400;

pub struct TlsProbe {
    host: String,
    port: u16,
    timeout: Duration,
    warning_days: i64,
    server_name: ServerName<'static>,
    connector: TlsConnector,
}

impl std::fmt::Debug for TlsProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsProbe")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("timeout", &self.timeout)
            .field("warning_days", &self.warning_days)
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

impl TlsProbe {
    pub fn from_config(config: &TlsCheckConfig) -> Result<Self, ConfigError> {
        let server_name = ServerName::try_from(config.host.clone())
            .map_err(|_| ConfigError::Invalid(format!("invalid TLS host '{}'", config.host)))?;

        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        Ok(Self {
            host: config.host.clone(),
            port: config.port,
            timeout: Duration::from_secs(config.timeout),
            warning_days: i64::from(config.cert_expiry_warning_days),
            server_name,
            connector: TlsConnector::from(Arc::new(tls_config)),
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn run(&self, endpoint: &str) -> ProbeResult {
        let start = Instant::now();

        let handshake = async {
            let tcp = TcpStream::connect((self.host.as_str(), self.port)).await?;
            self.connector.connect(self.server_name.clone(), tcp).await
        };

        let stream = match tokio::time::timeout(self.timeout, handshake).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return ProbeResult::down(endpoint, "tls", None, format!("handshake failed: {e}"));
            }
            Err(_) => {
                return ProbeResult::down(
                    endpoint,
                    "tls",
                    None,
                    format!("handshake timeout after {}s", self.timeout.as_secs()),
                );
            }
        };
        let latency = start.elapsed();

        let (_, connection) = stream.get_ref();
        let leaf = match connection.peer_certificates().and_then(|certs| certs.first()) {
            Some(leaf) => leaf,
            None => {
                return ProbeResult::down(endpoint, "tls", Some(latency), "no peer certificate presented");
            }
        };

        let not_after = match leaf_not_after(leaf.as_ref()) {
            Ok(ts) => ts,
            Err(e) => {
                return ProbeResult::down(
                    endpoint,
                    "tls",
                    Some(latency),
                    format!("certificate parse error: {e}"),
                );
            }
        };

        let days = days_remaining(not_after, Utc::now().timestamp());
        if days <= 0 {
            // The verifier rejects expired certs during the handshake, so this
            // only triggers when the clock moves between handshake and check.
            return ProbeResult::down(endpoint, "tls", Some(latency), "certificate has expired");
        }

        let detail = if days <= self.warning_days {
            format!("expires in {days} days")
        } else {
            format!("certificate ok, {days} days until expiry")
        };
        ProbeResult::up(endpoint, "tls", latency, detail)
    }
}

/// `notAfter` of the leaf certificate as a unix timestamp.
fn leaf_not_after(der: &[u8]) -> Result<i64, String> {
    let (_, cert) = x509_parser::parse_x509_certificate(der).map_err(|e| e.to_string())?;
    Ok(cert.validity().not_after.timestamp())
}

/// Whole days until expiry, rounded towards negative infinity.
fn days_remaining(not_after: i64, now: i64) -> i64 {
    (not_after - now).div_euclid(SECONDS_PER_DAY)
}
