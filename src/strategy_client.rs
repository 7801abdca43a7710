//! Client for the external strategy service. The intent call carries the full
//! pricing snapshot so the strategy prices against exactly what we observed;
//! every failure maps to `STRATEGY_UPSTREAM_FAILED`.

use crate::errors::QuoteError;
use crate::metrics::QuoterMetrics;
use crate::types::{IntentRequest, StrategyIntent};
use async_trait::async_trait;
use reqwest::Client;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

#[async_trait]
pub trait StrategyClient: Send + Sync + fmt::Debug {
    async fn request_intent(&self, request: &IntentRequest) -> Result<StrategyIntent, QuoteError>;
}

/// HTTP implementation talking to `{strategy_url}/intent`.
#[derive(Debug, Clone)]
pub struct HttpStrategyClient {
    client: Client,
    intent_url: String,
}

impl HttpStrategyClient {
    pub fn new(strategy_url: &str, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("aqua-quoter/0.3")
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            intent_url: format!("{}/intent", strategy_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl StrategyClient for HttpStrategyClient {
    #[instrument(skip(self, request), fields(chain_id = request.chain_id))]
    async fn request_intent(&self, request: &IntentRequest) -> Result<StrategyIntent, QuoteError> {
        let started = Instant::now();
        let response = self
            .client
            .post(&self.intent_url)
            .json(request)
            .send()
            .await
            .map_err(|e| QuoteError::StrategyUpstream(format!("intent request failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| QuoteError::StrategyUpstream(format!("failed to read intent response: {e}")))?;

        QuoterMetrics::global()
            .upstream_latency_ms
            .with_label_values(&["strategy"])
            .observe(started.elapsed().as_millis() as f64);

        if !status.is_success() {
            warn!(target: "strategy_client", %status, body = %text, "strategy service error");
            return Err(QuoteError::StrategyUpstream(format!(
                "strategy service returned {status}: {text}"
            )));
        }

        let intent: StrategyIntent = serde_json::from_str(&text).map_err(|e| {
            QuoteError::StrategyUpstream(format!("malformed intent response: {e} - body: {text}"))
        })?;

        debug!(
            target: "strategy_client",
            latency_ms = started.elapsed().as_millis() as u64,
            strategy = %intent.strategy.id,
            fee_bps = intent.fee_bps,
            "intent acquired"
        );
        Ok(intent)
    }
}
