//! HTTP collaborator used by the client.
//!
//! The client only needs to tell three situations apart: a 404, a 2xx (possibly
//! empty), and "the API could not be reached at all". Retries and backoff live
//! here, inside [`HttpTransport`], never in the fallback loop.

use crate::config::ClientConfig;
use crate::error::{Error, Result, TransportErrorKind};
use log::debug;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC};
use reqwest::blocking::Client as HttpClient;
use reqwest::redirect::Policy;
use std::time::Duration;

// Allow -, _, . and + unescaped in path segments (key separators and common code characters)
const SAFE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'+');

/// Percent-encode one URL path segment (agency, dataflow id, version or series key).
pub fn encode_segment(s: &str) -> String {
    percent_encoding::utf8_percent_encode(s.trim(), SAFE).to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub params: Vec<(String, String)>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            params: Vec::new(),
            timeout,
        }
    }

    pub fn param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.params.push((key.to_string(), value.into()));
        self
    }

    /// URL with its query string, for logs and attempt reports.
    pub fn full_url(&self) -> String {
        if self.params.is_empty() {
            return self.url.clone();
        }
        let qs = self
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{}", self.url, qs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }
}

/// Performs one logical GET. Any HTTP status comes back as `Ok`; `Err` means
/// no response was obtained.
pub trait Transport: Send + Sync {
    fn get(&self, request: &HttpRequest) -> Result<HttpResponse>;
}

/// Blocking `reqwest` transport with a small retry loop for transient failures.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: HttpClient,
    backoff_ms: Vec<u64>,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.timeout()) // total request timeout
            .connect_timeout(config.connect_timeout())
            .redirect(Policy::limited(config.max_redirects))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::Other(anyhow::anyhow!("build http client: {e}")))?;
        Ok(Self {
            http,
            backoff_ms: config.retry_backoff_ms.clone(),
        })
    }

    fn send_once(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let resp = self
            .http
            .get(&request.url)
            .query(&request.params)
            .timeout(request.timeout)
            .header(reqwest::header::ACCEPT, "text/csv, application/xml;q=0.9, */*;q=0.5")
            .send()
            .map_err(|e| transport_error(&request.full_url(), e))?;
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .map_err(|e| transport_error(&request.full_url(), e))?;
        Ok(HttpResponse { status, body })
    }
}

impl Transport for HttpTransport {
    fn get(&self, request: &HttpRequest) -> Result<HttpResponse> {
        // Retry on 5xx and network errors; 2xx and 4xx are final.
        let mut last = self.send_once(request);
        for &backoff_ms in &self.backoff_ms {
            match &last {
                Ok(r) if r.status < 500 => break,
                Ok(r) => debug!("HTTP {} from {}, retrying", r.status, request.url),
                Err(e) => debug!("{e}, retrying"),
            }
            std::thread::sleep(Duration::from_millis(backoff_ms));
            last = self.send_once(request);
        }
        last
    }
}

fn transport_error(url: &str, e: reqwest::Error) -> Error {
    let kind = if e.is_connect() {
        TransportErrorKind::Connect
    } else if e.is_timeout() {
        TransportErrorKind::Timeout
    } else {
        TransportErrorKind::Other
    };
    Error::Transport {
        url: url.to_string(),
        kind,
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_url_appends_params_in_order() {
        let req = HttpRequest::new("https://x.org/data/UNICEF,CME,1.0/.A.", Duration::from_secs(1))
            .param("format", "csv")
            .param("startPeriod", "2019");
        assert_eq!(
            req.full_url(),
            "https://x.org/data/UNICEF,CME,1.0/.A.?format=csv&startPeriod=2019"
        );
    }

    #[test]
    fn segments_keep_key_characters() {
        assert_eq!(encode_segment(" ALB+USA.CME_MRY0T4._T "), "ALB+USA.CME_MRY0T4._T");
        assert_eq!(encode_segment("WS_PPL_W-SAFE"), "WS_PPL_W-SAFE");
        assert_eq!(encode_segment("A/B C"), "A%2FB%20C");
    }

    #[test]
    fn unreachable_host_is_a_connect_failure() {
        let cfg = ClientConfig {
            retry_backoff_ms: vec![],
            connect_timeout_secs: 2,
            ..ClientConfig::default()
        };
        let t = HttpTransport::new(&cfg).unwrap();
        // port 9 (discard) on localhost is closed in test environments
        let err = t
            .get(&HttpRequest::new("http://127.0.0.1:9/rest", Duration::from_secs(2)))
            .unwrap_err();
        assert!(err.is_unreachable(), "unexpected error: {err}");
    }
}
