//! Request forwarding to the matched upstream service
//!
//! One attempt per inbound request: no retries, no redirect following.

use crate::db::ServiceRecord;
use crate::error::ForwardError;
use hyper::body::Bytes;
use hyper::header::{HeaderName, CONNECTION, CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use hyper::{HeaderMap, Method, StatusCode};
use std::time::Duration;
use tracing::debug;

/// Default upstream timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Framing headers recomputed for the re-framed body on either side
const FRAMING_HEADERS: [HeaderName; 3] = [CONTENT_LENGTH, TRANSFER_ENCODING, CONNECTION];

/// An inbound request with its body fully read
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    /// Path without the query string
    pub path: String,
    /// Raw query string, forwarded unchanged
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Upstream response relayed back to the caller
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Build the upstream URL for `path` on the matched service.
///
/// The prefix is stripped after trimming leading slashes from both sides, then
/// the remainder is joined to `target_url` with exactly one slash.
pub fn target_url(service: &ServiceRecord, path: &str) -> String {
    let trimmed_path = path.trim_start_matches('/');
    let trimmed_prefix = service.path_prefix.trim_start_matches('/');
    let remaining = trimmed_path
        .strip_prefix(trimmed_prefix)
        .unwrap_or(trimmed_path);

    format!(
        "{}/{}",
        service.target_url.trim_end_matches('/'),
        remaining.trim_start_matches('/')
    )
}

/// Headers sent upstream: everything except Host and framing headers
pub fn outbound_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut headers = inbound.clone();
    headers.remove(HOST);
    for name in &FRAMING_HEADERS {
        headers.remove(name);
    }
    headers
}

pub struct RequestForwarder {
    client: reqwest::Client,
    timeout: Duration,
}

impl RequestForwarder {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .no_proxy()
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build upstream HTTP client: {}", e))?;

        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Forward `inbound` to `service`, returning the upstream response verbatim
    pub async fn forward(
        &self,
        inbound: &InboundRequest,
        service: &ServiceRecord,
    ) -> Result<UpstreamResponse, ForwardError> {
        let mut url = target_url(service, &inbound.path);
        if let Some(query) = inbound.query.as_deref().filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(query);
        }

        debug!(method = %inbound.method, url = %url, service_id = service.id, "Forwarding request");

        let mut request = self
            .client
            .request(inbound.method.clone(), &url)
            .headers(outbound_headers(&inbound.headers));
        if !inbound.body.is_empty() {
            request = request.body(inbound.body.clone());
        }

        let response = request.send().await?;

        let status = response.status();
        let mut headers = response.headers().clone();
        headers.remove(TRANSFER_ENCODING);
        headers.remove(CONNECTION);

        let body = response.bytes().await?;

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}
