//! HTTP health probes.
//!
//! [`HttpHealthProbe`] maps resource ids to `host:port/path` endpoints and
//! treats a 2xx answer as healthy. Resources without an endpoint go to an
//! optional fallback probe.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use cloudguard_core::collaborator::HealthProbe;

use crate::tracker::ProbeResult;

const USER_AGENT: &str = concat!("cloudguard-health/", env!("CARGO_PKG_VERSION"));

/// Probe one endpoint: 2xx is `Healthy`, any other status `Unhealthy`, and
/// no answer within `timeout` (or no connection at all) `Failed`.
pub async fn http_probe(address: &str, path: &str, timeout: Duration) -> ProbeResult {
    match tokio::time::timeout(timeout, fetch_status(address, path)).await {
        Ok(Ok(status)) if status.is_success() => ProbeResult::Healthy,
        Ok(Ok(status)) => {
            debug!(%address, path, %status, "endpoint reported unhealthy");
            ProbeResult::Unhealthy
        }
        Ok(Err(e)) => {
            debug!(%address, path, error = %e, "endpoint unreachable");
            ProbeResult::Failed
        }
        Err(_) => {
            debug!(%address, path, ?timeout, "endpoint did not answer in time");
            ProbeResult::Failed
        }
    }
}

/// One `GET` over a fresh HTTP/1.1 connection; only the status is kept.
async fn fetch_status(address: &str, path: &str) -> anyhow::Result<http::StatusCode> {
    let stream = tokio::net::TcpStream::connect(address).await?;
    let (mut sender, connection) =
        hyper::client::conn::http1::handshake(hyper_util::rt::TokioIo::new(stream)).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            debug!(error = %e, "health connection closed with error");
        }
    });

    let request = http::Request::get(format!("http://{address}{path}"))
        .header(http::header::HOST, address)
        .header(http::header::USER_AGENT, USER_AGENT)
        .body(http_body_util::Empty::<bytes::Bytes>::new())?;
    Ok(sender.send_request(request).await?.status())
}

/// Split `"10.0.0.5:8080/healthz"` into address and path (default `/`).
pub fn split_endpoint(endpoint: &str) -> (&str, &str) {
    let endpoint = endpoint.strip_prefix("http://").unwrap_or(endpoint);
    match endpoint.find('/') {
        Some(i) => (&endpoint[..i], &endpoint[i..]),
        None => (endpoint, "/"),
    }
}

pub struct HttpHealthProbe {
    endpoints: HashMap<String, String>,
    timeout: Duration,
    fallback: Option<Arc<dyn HealthProbe>>,
}

impl HttpHealthProbe {
    pub fn new(endpoints: HashMap<String, String>, timeout: Duration) -> Self {
        Self {
            endpoints,
            timeout,
            fallback: None,
        }
    }

    /// Probe used for resources with no configured endpoint.
    pub fn with_fallback(mut self, fallback: Arc<dyn HealthProbe>) -> Self {
        self.fallback = Some(fallback);
        self
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn check(&self, resource_id: &str) -> anyhow::Result<bool> {
        match self.endpoints.get(resource_id) {
            Some(endpoint) => {
                let (address, path) = split_endpoint(endpoint);
                Ok(http_probe(address, path, self.timeout).await.is_healthy())
            }
            None => match &self.fallback {
                Some(fallback) => fallback.check(resource_id).await,
                None => anyhow::bail!("no health endpoint configured for {resource_id}"),
            },
        }
    }
}
