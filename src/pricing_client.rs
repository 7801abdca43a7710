//! Client for the external pricing service. One POST, one timeout, and every
//! transport or decode failure mapped to `PRICING_UPSTREAM_FAILED` before it
//! crosses the component boundary.

use crate::errors::QuoteError;
use crate::metrics::QuoterMetrics;
use crate::types::{DepthRequest, PricingSnapshot};
use async_trait::async_trait;
use reqwest::Client;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// A standardized interface for depth acquisition so tests can fake the
/// pricing service entirely.
#[async_trait]
pub trait PricingClient: Send + Sync + fmt::Debug {
    async fn request_depth(&self, request: &DepthRequest) -> Result<PricingSnapshot, QuoteError>;
}

/// HTTP implementation talking to `{pricing_url}/depth`.
#[derive(Debug, Clone)]
pub struct HttpPricingClient {
    client: Client,
    depth_url: String,
}

impl HttpPricingClient {
    pub fn new(pricing_url: &str, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("aqua-quoter/0.3")
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            depth_url: format!("{}/depth", pricing_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl PricingClient for HttpPricingClient {
    #[instrument(skip(self, request), fields(chain_id = request.chain_id))]
    async fn request_depth(&self, request: &DepthRequest) -> Result<PricingSnapshot, QuoteError> {
        let started = Instant::now();
        let response = self
            .client
            .post(&self.depth_url)
            .json(request)
            .send()
            .await
            .map_err(|e| QuoteError::PricingUpstream(format!("depth request failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| QuoteError::PricingUpstream(format!("failed to read depth response: {e}")))?;

        QuoterMetrics::global()
            .upstream_latency_ms
            .with_label_values(&["pricing"])
            .observe(started.elapsed().as_millis() as f64);

        if !status.is_success() {
            warn!(target: "pricing_client", %status, body = %text, "pricing service error");
            return Err(QuoteError::PricingUpstream(format!(
                "pricing service returned {status}: {text}"
            )));
        }

        let snapshot: PricingSnapshot = serde_json::from_str(&text).map_err(|e| {
            QuoteError::PricingUpstream(format!("malformed depth response: {e} - body: {text}"))
        })?;

        debug!(
            target: "pricing_client",
            latency_ms = started.elapsed().as_millis() as u64,
            depth_points = snapshot.depth_points.len(),
            stale = snapshot.stale,
            "depth acquired"
        );
        Ok(snapshot)
    }
}
