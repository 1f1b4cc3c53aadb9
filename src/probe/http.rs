//! HTTP(S) probe executor.

use std::time::{Duration, Instant};

use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::redirect::Policy;
use reqwest::Method;

use crate::config::{ConfigError, ExpectedStatus, HttpCheckConfig};
use crate::db::ProbeResult;

const MAX_REDIRECTS: usize = 10;

/// Content assertion applied to the response body.
#[derive(Debug)]
enum ContentMatcher {
    Literal(String),
    Pattern(Regex),
}

impl ContentMatcher {
    fn is_match(&self, body: &str) -> bool {
        match self {
            ContentMatcher::Literal(needle) => body.contains(needle),
            ContentMatcher::Pattern(re) => re.is_match(body),
        }
    }

    fn describe(&self) -> String {
        match self {
            ContentMatcher::Literal(needle) => format!("content '{needle}' not found"),
            ContentMatcher::Pattern(re) => format!("content regex '{}' not matched", re.as_str()),
        }
    }
}

/// One configured HTTP check, with the client and matcher built up front.
#[derive(Debug)]
pub struct HttpProbe {
    url: String,
    method: Method,
    headers: HeaderMap,
    body: Option<String>,
    timeout: Duration,
    expected_status: ExpectedStatus,
    matcher: Option<ContentMatcher>,
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn from_config(config: &HttpCheckConfig) -> Result<Self, ConfigError> {
        let method = Method::from_bytes(config.method.as_bytes())
            .map_err(|_| ConfigError::Invalid(format!("invalid HTTP method '{}'", config.method)))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ConfigError::Invalid(format!("invalid header name '{name}'")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| ConfigError::Invalid(format!("invalid header value for '{name}'")))?;
            headers.insert(name, value);
        }

        let matcher = match (&config.content_match, config.content_regex) {
            (Some(pattern), true) => Some(ContentMatcher::Pattern(Regex::new(pattern).map_err(
                |e| ConfigError::Invalid(format!("invalid content_match pattern: {e}")),
            )?)),
            (Some(needle), false) => Some(ContentMatcher::Literal(needle.clone())),
            (None, _) => None,
        };

        let redirect = if config.follow_redirects {
            Policy::limited(MAX_REDIRECTS)
        } else {
            Policy::none()
        };

        let timeout = Duration::from_secs(config.timeout);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(redirect)
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()
            .map_err(|e| ConfigError::Invalid(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            url: config.url.clone(),
            method,
            headers,
            body: config.body.clone(),
            timeout,
            expected_status: config.expected_status.clone(),
            matcher,
            client,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn run(&self, endpoint: &str) -> ProbeResult {
        let start = Instant::now();

        let mut request = self
            .client
            .request(self.method.clone(), &self.url)
            .headers(self.headers.clone());
        if let Some(body) = &self.body {
            request = request.body(body.clone());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                return ProbeResult::down(endpoint, "http", None, classify_error(&e, self.timeout));
            }
        };

        let code = response.status().as_u16();
        if !self.expected_status.matches(code) {
            return ProbeResult::down(
                endpoint,
                "http",
                Some(start.elapsed()),
                format!("status {code}, expected {}", self.expected_status),
            );
        }

        if let Some(matcher) = &self.matcher {
            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    return ProbeResult::down(
                        endpoint,
                        "http",
                        Some(start.elapsed()),
                        format!("failed to read body: {e}"),
                    );
                }
            };
            if !matcher.is_match(&body) {
                return ProbeResult::down(endpoint, "http", Some(start.elapsed()), matcher.describe());
            }
        }

        ProbeResult::up(endpoint, "http", start.elapsed(), code.to_string())
    }
}

/// Turn a transport error into a short diagnostic that distinguishes the
/// failure classes operators care about.
fn classify_error(error: &reqwest::Error, timeout: Duration) -> String {
    if error.is_timeout() {
        return format!("timeout after {}s", timeout.as_secs());
    }
    if error.is_redirect() {
        return format!("stopped after {MAX_REDIRECTS} redirects");
    }

    let root = root_cause(error);
    let lowered = root.to_lowercase();
    if lowered.contains("dns") {
        format!("dns failure: {root}")
    } else if lowered.contains("certificate") || lowered.contains("handshake") || lowered.contains("tls") {
        format!("tls handshake failure: {root}")
    } else if error.is_connect() {
        format!("connection failed: {root}")
    } else {
        root
    }
}

fn root_cause(error: &reqwest::Error) -> String {
    let mut source: &dyn std::error::Error = error;
    while let Some(next) = source.source() {
        source = next;
    }
    source.to_string()
}
