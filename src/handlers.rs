//! HTTP route handlers and wire DTOs. Request bodies are strict: unknown
//! fields are rejected, addresses must be EIP-55 checksummed, amounts must be
//! unsigned decimal strings. Failures become [`ApiError`]s which the server
//! middleware renders into the uniform envelope.

use crate::errors::{ErrorCode, QuoteError};
use crate::metrics;
use crate::orchestrator::{PriceArgs, QuoteArgs};
use crate::server::AppState;
use crate::strategies::{validate_strategy_hash, NewStrategy};
use crate::types::{PairRecord, PricingSnapshot, QuoteRecord, StrategyRecord, TokenRecord};
use crate::utils::{parse_checksummed, parse_raw_amount};
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{FromRequest, FromRequestParts, Path, Query, Request, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use ethers::types::Address;
use ethers::utils::to_checksum;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

//================================================================================================//
//                                        API ERROR                                               //
//================================================================================================//

/// A failed request. `IntoResponse` emits only the status plus this value as
/// a response extension; the context middleware fills in the request id and
/// path and renders the final envelope.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, message)
    }
}

impl From<QuoteError> for ApiError {
    fn from(e: QuoteError) -> Self {
        let code = e.code();
        // internal detail stays in the logs, not on the wire
        let message = match code {
            ErrorCode::InternalServerError => {
                tracing::error!(target: "api", error = %e, "internal error");
                "internal server error".to_string()
            }
            _ => e.to_string(),
        };
        ApiError { code, message }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = Response::new(Body::empty());
        *response.status_mut() = status;
        response.extensions_mut().insert(self);
        response
    }
}

/// Render the full error envelope. Called by the server middleware once the
/// request id and path are known.
pub fn render_envelope(err: &ApiError, request_id: &str, path: &str) -> Response {
    let status = StatusCode::from_u16(err.code.status_code())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = json!({
        "code": err.code.as_str(),
        "message": err.message,
        "statusCode": err.code.status_code(),
        "requestId": request_id,
        "path": path,
        "timestamp": Utc::now().to_rfc3339(),
    });
    (status, Json(body)).into_response()
}

//================================================================================================//
//                                     STRICT EXTRACTORS                                          //
//================================================================================================//

/// `Json` with rejections mapped into the envelope.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(ApiError::validation(rejection.body_text())),
        }
    }
}

/// `Query` with rejections mapped into the envelope.
pub struct ApiQuery<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(ApiQuery(value)),
            Err(rejection) => Err(ApiError::validation(rejection.to_string())),
        }
    }
}

//================================================================================================//
//                                       REQUEST DTOS                                             //
//================================================================================================//

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PriceRequest {
    pub chain_id: u64,
    pub sell_token: String,
    pub buy_token: String,
    pub sell_amount: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct QuoteRequest {
    pub chain_id: u64,
    pub sell_token: String,
    pub buy_token: String,
    pub sell_amount: String,
    pub taker: String,
    #[serde(default)]
    pub recipient: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ChainIdQuery {
    pub chain_id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpsertPairRequest {
    pub chain_id: u64,
    pub token_a: String,
    pub token_b: String,
    pub enabled: bool,
    #[serde(default)]
    pub meta: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateStrategyRequest {
    pub chain_id: u64,
    pub name: String,
    pub version: i32,
    #[serde(default)]
    pub params: Option<Value>,
    pub hash: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ActivateStrategyRequest {
    pub chain_id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ChainConfigRequest {
    pub chain_id: u64,
    pub paused: bool,
}

fn parse_address(field: &str, raw: &str) -> Result<Address, ApiError> {
    parse_checksummed(raw).map_err(|e| ApiError::validation(format!("{field}: {e}")))
}

fn price_args(req: &PriceRequest) -> Result<PriceArgs, ApiError> {
    let sell_token = parse_address("sellToken", &req.sell_token)?;
    let buy_token = parse_address("buyToken", &req.buy_token)?;
    if sell_token == buy_token {
        return Err(ApiError::validation("sellToken and buyToken must differ"));
    }
    let sell_amount = parse_raw_amount(&req.sell_amount)
        .map_err(|e| ApiError::new(ErrorCode::InvalidAmount, format!("sellAmount: {e}")))?;
    Ok(PriceArgs {
        chain_id: req.chain_id,
        sell_token,
        buy_token,
        sell_amount,
    })
}

//================================================================================================//
//                                      RESPONSE DTOS                                             //
//================================================================================================//

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceResponse {
    pub chain_id: u64,
    pub sell_token: String,
    pub buy_token: String,
    pub sell_amount: String,
    pub buy_amount: String,
    pub pricing_snapshot: PricingSnapshot,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyRef {
    pub id: String,
    pub version: i32,
    pub hash: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TxDto {
    pub to: String,
    pub data: String,
    pub value: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotePricingDto {
    pub as_of_ms: i64,
    pub confidence_score: f64,
    pub stale: bool,
    pub sources_used: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteResponse {
    pub quote_id: String,
    pub chain_id: u64,
    pub maker: String,
    pub taker: String,
    pub recipient: String,
    pub executor: String,
    pub strategy: StrategyRef,
    pub sell_token: String,
    pub buy_token: String,
    pub sell_amount: String,
    pub buy_amount: String,
    pub fee_bps: i32,
    pub fee_amount: String,
    pub expiry: i64,
    pub nonce: String,
    pub typed_data: Value,
    pub signature: String,
    pub tx: TxDto,
    pub pricing: QuotePricingDto,
}

impl From<&QuoteRecord> for QuoteResponse {
    fn from(r: &QuoteRecord) -> Self {
        QuoteResponse {
            quote_id: r.quote_id.to_string(),
            chain_id: r.chain_id,
            maker: r.maker.clone(),
            taker: r.taker.clone(),
            recipient: r.recipient.clone(),
            executor: r.executor.clone(),
            strategy: StrategyRef {
                id: r.strategy_id.to_string(),
                version: r.strategy_version,
                hash: r.strategy_hash.clone(),
            },
            sell_token: r.sell_token.clone(),
            buy_token: r.buy_token.clone(),
            sell_amount: r.sell_amount.clone(),
            buy_amount: r.buy_amount.clone(),
            fee_bps: r.fee_bps,
            fee_amount: r.fee_amount.clone(),
            expiry: r.expiry,
            nonce: r.nonce.clone(),
            typed_data: r.typed_data.clone(),
            signature: r.signature.clone(),
            tx: TxDto {
                to: r.tx_to.clone(),
                data: r.tx_data.clone(),
                value: r.tx_value.clone(),
            },
            pricing: QuotePricingDto {
                as_of_ms: r.pricing_as_of_ms.unwrap_or_default(),
                confidence_score: r.pricing_confidence.unwrap_or_default(),
                stale: r.pricing_stale.unwrap_or_default(),
                sources_used: r.pricing_sources.clone(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataResponse {
    pub chain_id: u64,
    pub chain_name: String,
    pub maker: String,
    pub executor: String,
    pub paused: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_strategy: Option<StrategyRef>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairDto {
    pub chain_id: u64,
    pub token0: String,
    pub token1: String,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl From<&PairRecord> for PairDto {
    fn from(p: &PairRecord) -> Self {
        PairDto {
            chain_id: p.chain_id,
            token0: to_checksum(&p.token0, None),
            token1: to_checksum(&p.token1, None),
            enabled: p.enabled,
            meta: p.meta.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyDto {
    pub id: String,
    pub chain_id: u64,
    pub name: String,
    pub version: i32,
    pub params: Value,
    pub hash: String,
    pub enabled: bool,
    pub created_at: String,
}

impl From<&StrategyRecord> for StrategyDto {
    fn from(s: &StrategyRecord) -> Self {
        StrategyDto {
            id: s.id.to_string(),
            chain_id: s.chain_id,
            name: s.name.clone(),
            version: s.version,
            params: s.params.clone(),
            hash: s.hash.clone(),
            enabled: s.enabled,
            created_at: s.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenDto {
    pub chain_id: u64,
    pub address: String,
    pub decimals: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
}

impl From<&TokenRecord> for TokenDto {
    fn from(t: &TokenRecord) -> Self {
        TokenDto {
            chain_id: t.chain_id,
            address: to_checksum(&t.address, None),
            decimals: t.decimals,
            symbol: t.symbol.clone(),
        }
    }
}

//================================================================================================//
//                                         HANDLERS                                               //
//================================================================================================//

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

pub async fn list_chains(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "chains": state.chains.list() }))
}

pub async fn chain_metadata(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ChainIdQuery>,
) -> Result<Json<MetadataResponse>, ApiError> {
    let chain = state.chains.get(query.chain_id)?;
    let chain_state = state
        .catalog
        .chain_state(chain.chain_id)
        .await
        .map_err(QuoteError::from)?;
    let active_strategy = match state.catalog.active_strategy(chain.chain_id).await {
        Ok(s) => Some(StrategyRef {
            id: s.id.to_string(),
            version: s.version,
            hash: s.hash,
        }),
        Err(_) => None,
    };
    Ok(Json(MetadataResponse {
        chain_id: chain.chain_id,
        chain_name: chain.name.clone(),
        maker: to_checksum(&chain.maker, None),
        executor: to_checksum(&chain.executor, None),
        paused: chain_state.paused,
        active_strategy,
    }))
}

pub async fn price(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<PriceRequest>,
) -> Result<Json<PriceResponse>, ApiError> {
    let args = price_args(&request)?;
    let outcome = state.orchestrator.get_price(&args).await?;
    Ok(Json(PriceResponse {
        chain_id: args.chain_id,
        sell_token: to_checksum(&args.sell_token, None),
        buy_token: to_checksum(&args.buy_token, None),
        sell_amount: args.sell_amount.to_string(),
        buy_amount: outcome.buy_amount,
        pricing_snapshot: outcome.snapshot,
    }))
}

pub async fn quote(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<QuoteRequest>,
) -> Result<Json<QuoteResponse>, ApiError> {
    let price = price_args(&PriceRequest {
        chain_id: request.chain_id,
        sell_token: request.sell_token.clone(),
        buy_token: request.buy_token.clone(),
        sell_amount: request.sell_amount.clone(),
    })?;
    let taker = parse_address("taker", &request.taker)?;
    let recipient = request
        .recipient
        .as_deref()
        .map(|r| parse_address("recipient", r))
        .transpose()?;

    let args = QuoteArgs { price, taker, recipient };
    let record = state.orchestrator.create_quote(&args).await?;
    Ok(Json(QuoteResponse::from(&record)))
}

pub async fn quote_by_id(
    State(state): State<AppState>,
    Path(quote_id): Path<String>,
) -> Result<Json<QuoteResponse>, ApiError> {
    let record = state.orchestrator.get_quote(&quote_id).await?;
    Ok(Json(QuoteResponse::from(&record)))
}

//================================================================================================//
//                                      ADMIN HANDLERS                                            //
//================================================================================================//

pub async fn admin_list_pairs(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ChainIdQuery>,
) -> Result<Json<Value>, ApiError> {
    let pairs = state
        .pairs
        .list(query.chain_id)
        .await
        .map_err(QuoteError::from)?;
    let dtos: Vec<PairDto> = pairs.iter().map(PairDto::from).collect();
    Ok(Json(json!({ "pairs": dtos })))
}

pub async fn admin_upsert_pair(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<UpsertPairRequest>,
) -> Result<Json<PairDto>, ApiError> {
    state.chains.get(request.chain_id)?;
    let a = parse_address("tokenA", &request.token_a)?;
    let b = parse_address("tokenB", &request.token_b)?;
    if a == b {
        return Err(ApiError::validation("tokenA and tokenB must differ"));
    }
    let record = state
        .pairs
        .upsert(request.chain_id, a, b, request.enabled, request.meta)
        .await
        .map_err(QuoteError::from)?;
    Ok(Json(PairDto::from(&record)))
}

pub async fn admin_list_strategies(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ChainIdQuery>,
) -> Result<Json<Value>, ApiError> {
    let strategies = state
        .catalog
        .list(query.chain_id)
        .await
        .map_err(QuoteError::from)?;
    let dtos: Vec<StrategyDto> = strategies.iter().map(StrategyDto::from).collect();
    Ok(Json(json!({ "strategies": dtos })))
}

pub async fn admin_create_strategy(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<CreateStrategyRequest>,
) -> Result<Json<StrategyDto>, ApiError> {
    state.chains.get(request.chain_id)?;
    validate_strategy_hash(&request.hash).map_err(ApiError::validation)?;
    if request.name.trim().is_empty() {
        return Err(ApiError::validation("name must not be empty"));
    }
    let record = state
        .catalog
        .create(NewStrategy {
            chain_id: request.chain_id,
            name: request.name,
            version: request.version,
            params: request.params.unwrap_or_else(|| json!({})),
            hash: request.hash,
        })
        .await
        .map_err(QuoteError::from)?;
    Ok(Json(StrategyDto::from(&record)))
}

pub async fn admin_activate_strategy(
    State(state): State<AppState>,
    Path(strategy_id): Path<String>,
    ApiJson(request): ApiJson<ActivateStrategyRequest>,
) -> Result<Json<Value>, ApiError> {
    state.chains.get(request.chain_id)?;
    let id = Uuid::parse_str(&strategy_id)
        .map_err(|_| ApiError::new(ErrorCode::StrategyNotFound, format!("strategy {strategy_id} not found")))?;
    state.catalog.set_active(request.chain_id, id).await?;
    Ok(Json(json!({
        "chainId": request.chain_id,
        "activeStrategyId": id.to_string(),
    })))
}

pub async fn admin_chain_config(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<ChainConfigRequest>,
) -> Result<Json<Value>, ApiError> {
    state.chains.get(request.chain_id)?;
    let chain_state = state
        .catalog
        .set_paused(request.chain_id, request.paused)
        .await
        .map_err(QuoteError::from)?;
    Ok(Json(json!({
        "chainId": chain_state.chain_id,
        "paused": chain_state.paused,
        "activeStrategyId": chain_state.active_strategy_id.map(|id| id.to_string()),
    })))
}

pub async fn admin_list_tokens(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ChainIdQuery>,
) -> Result<Json<Value>, ApiError> {
    let tokens = state.tokens.list(query.chain_id).await?;
    let dtos: Vec<TokenDto> = tokens.iter().map(TokenDto::from).collect();
    Ok(Json(json!({ "tokens": dtos })))
}

//================================================================================================//
//                                         METRICS                                                //
//================================================================================================//

pub async fn metrics_exposition() -> Response {
    match metrics::render() {
        Ok(text) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e).into_response(),
    }
}
