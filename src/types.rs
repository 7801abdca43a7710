//! Shared domain types: upstream wire DTOs (pricing snapshot, strategy
//! intent) and the persisted records the stores traffic in. Wire structs are
//! camelCase to match the pricing and strategy services byte-for-byte.

use chrono::{DateTime, Utc};
use ethers::types::Address;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

//================================================================================================//
//                                      PRICING SNAPSHOT                                          //
//================================================================================================//

/// Where a depth point came from. Upstream may emit this as an object, a bare
/// venue string, a scalar, or nothing at all; deserialization normalizes every
/// shape into a list of these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    pub venue: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_tier: Option<u32>,
}

/// One sampled point on the depth curve.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DepthPoint {
    #[serde(deserialize_with = "de_string_or_number")]
    pub amount_in_raw: String,
    #[serde(deserialize_with = "de_string_or_number")]
    pub amount_out_raw: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub impact_bps: f64,
    #[serde(default, deserialize_with = "de_provenance")]
    pub provenance: Vec<Provenance>,
}

/// The pricing service's depth response. Carried through the intent request
/// unchanged and summarized onto the persisted quote.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PricingSnapshot {
    pub as_of_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    #[serde(default)]
    pub mid_price: String,
    #[serde(default)]
    pub depth_points: Vec<DepthPoint>,
    #[serde(default)]
    pub sources_used: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(default)]
    pub confidence_score: f64,
    #[serde(default)]
    pub stale: bool,
    #[serde(default)]
    pub reason_codes: Vec<String>,
}

/// Request body for `POST {pricingUrl}/depth`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepthRequest {
    pub chain_id: u64,
    pub sell_token: String,
    pub buy_token: String,
    pub sell_amount: String,
}

//================================================================================================//
//                                      STRATEGY INTENT                                           //
//================================================================================================//

/// Strategy identity and parameters shipped to the strategy service.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyInfo {
    pub id: String,
    pub version: i32,
    pub hash: String,
    pub params: Value,
}

/// Request body for `POST {strategyUrl}/intent`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentRequest {
    pub chain_id: u64,
    pub maker: String,
    pub executor: String,
    pub taker: String,
    pub sell_token: String,
    pub buy_token: String,
    pub sell_amount: String,
    pub recipient: String,
    pub pricing_snapshot: PricingSnapshot,
    pub strategy: StrategyInfo,
}

/// Strategy identity echoed back by the strategy service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentStrategyRef {
    pub id: String,
    pub version: i32,
    pub hash: String,
}

/// Pricing provenance echoed by the strategy service.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct IntentPricing {
    #[serde(default)]
    pub as_of_ms: i64,
    #[serde(default)]
    pub confidence_score: f64,
    #[serde(default)]
    pub stale: bool,
    #[serde(default)]
    pub sources_used: Vec<String>,
}

/// The strategy service's intent. `buy_amount`, `fee_amount` and `expiry`
/// stay as raw JSON values here; the orchestrator owns their normalization
/// rules (truncation, clamping, ms/s heuristic).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyIntent {
    pub strategy: IntentStrategyRef,
    #[serde(default)]
    pub buy_amount: Value,
    #[serde(default)]
    pub fee_bps: i32,
    #[serde(default)]
    pub fee_amount: Value,
    #[serde(default)]
    pub expiry: Value,
    #[serde(default)]
    pub pricing: IntentPricing,
}

//================================================================================================//
//                                      PERSISTED RECORDS                                         //
//================================================================================================//

/// Cached ERC-20 metadata, keyed `(chain_id, address)`. Never mutated once
/// cached within a run.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenRecord {
    pub chain_id: u64,
    pub address: Address,
    pub decimals: u8,
    pub symbol: Option<String>,
}

/// An admitted trading pair in canonical `(token0 < token1)` order.
#[derive(Debug, Clone)]
pub struct PairRecord {
    pub chain_id: u64,
    pub token0: Address,
    pub token1: Address,
    pub enabled: bool,
    pub meta: Option<Value>,
}

/// A maker strategy definition. Immutable once created except `enabled`.
#[derive(Debug, Clone)]
pub struct StrategyRecord {
    pub id: Uuid,
    pub chain_id: u64,
    pub name: String,
    pub version: i32,
    pub params: Value,
    pub hash: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

/// Per-chain toggle state; exactly one row per chain, created lazily.
#[derive(Debug, Clone)]
pub struct ChainState {
    pub chain_id: u64,
    pub active_strategy_id: Option<Uuid>,
    pub paused: bool,
}

/// Lifecycle status of an issued quote. The core flow only ever writes
/// `Issued`; the enum leaves room for settlement tracking outside this
/// service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuoteStatus {
    Issued,
}

impl QuoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteStatus::Issued => "ISSUED",
        }
    }
}

/// The immutable record persisted for every issued quote. `buy_amount` is
/// the net amount the taker receives; the signed gross lives inside
/// `typed_data`/`tx_data`. Addresses are stored checksummed, amounts as
/// decimal strings.
#[derive(Debug, Clone)]
pub struct QuoteRecord {
    pub quote_id: Uuid,
    pub chain_id: u64,
    pub maker: String,
    pub taker: String,
    pub recipient: String,
    pub executor: String,
    pub strategy_id: Uuid,
    pub strategy_version: i32,
    pub strategy_hash: String,
    pub sell_token: String,
    pub buy_token: String,
    pub sell_amount: String,
    pub buy_amount: String,
    pub fee_bps: i32,
    pub fee_amount: String,
    pub nonce: String,
    pub expiry: i64,
    pub typed_data: Value,
    pub signature: String,
    pub tx_to: String,
    pub tx_data: String,
    pub tx_value: String,
    pub status: QuoteStatus,
    pub reject_code: Option<String>,
    pub pricing_as_of_ms: Option<i64>,
    pub pricing_confidence: Option<f64>,
    pub pricing_stale: Option<bool>,
    pub pricing_sources: Vec<String>,
    pub created_at: DateTime<Utc>,
}

//================================================================================================//
//                                   DESERIALIZATION HELPERS                                      //
//================================================================================================//

/// Accept a JSON string or bare number and keep it as a string. The pricing
/// service emits raw amounts as integers while the contract layer wants
/// decimal strings.
fn de_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    match v {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

/// Normalize `provenance` to always be an array: upstream may return an
/// array of objects, a single object, a bare string, null, or omit the field.
fn de_provenance<'de, D>(deserializer: D) -> Result<Vec<Provenance>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    fn one<E: serde::de::Error>(v: Value) -> Result<Provenance, E> {
        match v {
            Value::String(s) => Ok(Provenance { venue: s, fee_tier: None }),
            Value::Object(_) => serde_json::from_value(v).map_err(E::custom),
            other => Ok(Provenance { venue: other.to_string(), fee_tier: None }),
        }
    }
    match v {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items.into_iter().map(one).collect(),
        other => Ok(vec![one(other)?]),
    }
}
