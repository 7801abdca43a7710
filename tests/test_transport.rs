//! Router-level tests: request-id tagging, the uniform error envelope,
//! strict body validation, the admin surface, and the global deadline.

mod common {
    include!("common/mod.rs");
}

use common::*;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::util::ServiceExt;

use aqua_quoter::server::build_router;
use aqua_quoter::strategies::StrategyCatalog;

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn put_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn price_body() -> Value {
    json!({
        "chainId": CHAIN_ID,
        "sellToken": WETH,
        "buyToken": USDC,
        "sellAmount": SELL_AMOUNT,
    })
}

fn quote_body(h: &TestHarness) -> Value {
    let mut body = price_body();
    body["taker"] = json!(h.taker_checksummed());
    body
}

#[tokio::test]
async fn health_reports_ok() {
    let h = TestHarness::new(0).await;
    let app = build_router(h.app_state());

    let response = app.oneshot(get("/v1/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn chains_listing_never_carries_key_material() {
    let h = TestHarness::new(25).await;
    let app = build_router(h.app_state());

    let response = app.oneshot(get("/v1/chains")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let chains = body["chains"].as_array().unwrap();
    assert_eq!(chains.len(), 1);
    assert_eq!(chains[0]["chainId"], CHAIN_ID);
    assert_eq!(chains[0]["executorFeeBps"], 25);
    let rendered = body.to_string();
    assert!(!rendered.contains(TEST_KEY));
    assert!(!rendered.to_lowercase().contains("signingkey"));
}

#[tokio::test]
async fn metadata_reflects_chain_state() {
    let h = TestHarness::new(0).await;
    let app = build_router(h.app_state());

    let response = app
        .oneshot(get(&format!("/v1/metadata?chainId={CHAIN_ID}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["chainId"], CHAIN_ID);
    assert_eq!(body["chainName"], "base");
    assert_eq!(body["paused"], false);
    assert_eq!(body["activeStrategy"]["id"], h.strategy.id.to_string());
    assert_eq!(body["activeStrategy"]["hash"], strategy_hash());
}

#[tokio::test]
async fn price_and_quote_round_trip_over_http() {
    let h = TestHarness::new(25).await;
    let app = build_router(h.app_state());

    let response = app
        .clone()
        .oneshot(post_json("/v1/price", price_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["buyAmount"], DEPTH_OUT);
    assert_eq!(body["pricingSnapshot"]["confidenceScore"], 0.95);

    let response = app
        .clone()
        .oneshot(post_json("/v1/quote", quote_body(&h)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["buyAmount"], DEPTH_OUT);
    assert_eq!(body["strategy"]["hash"], strategy_hash());
    assert_eq!(body["tx"]["value"], "0");
    assert!(body["tx"]["data"].as_str().unwrap().starts_with("0x"));
    assert!(body["signature"].as_str().unwrap().starts_with("0x"));
    assert_eq!(body["pricing"]["sourcesUsed"], json!(["uniswap_v3_base"]));
    let quote_id = body["quoteId"].as_str().unwrap().to_string();

    // replay fetch returns the same signature and calldata
    let response = app
        .oneshot(get(&format!("/v1/quotes/{quote_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let fetched = body_json(response).await;
    assert_eq!(fetched["signature"], body["signature"]);
    assert_eq!(fetched["tx"], body["tx"]);
    assert_eq!(fetched["pricing"], body["pricing"]);
}

#[tokio::test]
async fn the_error_envelope_is_uniform_and_request_ids_echo() {
    let h = TestHarness::new(0).await;
    h.catalog.set_paused(CHAIN_ID, true).await.unwrap();
    let app = build_router(h.app_state());

    let mut request = post_json("/v1/price", price_body());
    request
        .headers_mut()
        .insert("x-request-id", "rfq-test-123".parse().unwrap());

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.headers().get("x-request-id").unwrap(),
        "rfq-test-123"
    );
    let body = body_json(response).await;
    assert_eq!(body["code"], "CHAIN_PAUSED");
    assert_eq!(body["statusCode"], 400);
    assert_eq!(body["requestId"], "rfq-test-123");
    assert_eq!(body["path"], "/v1/price");
    assert!(body["message"].is_string());
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn request_ids_are_minted_when_absent() {
    let h = TestHarness::new(0).await;
    let app = build_router(h.app_state());

    let response = app.oneshot(get("/v1/quotes/missing")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let minted = response
        .headers()
        .get("x-request-id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(uuid::Uuid::parse_str(&minted).is_ok());
    let body = body_json(response).await;
    assert_eq!(body["code"], "QUOTE_NOT_FOUND");
    assert_eq!(body["requestId"], minted);
}

#[tokio::test]
async fn unknown_body_fields_are_rejected() {
    let h = TestHarness::new(0).await;
    let app = build_router(h.app_state());

    let mut body = price_body();
    body["surprise"] = json!(true);
    let response = app.oneshot(post_json("/v1/price", body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], "VALIDATION_FAILED");
}

#[tokio::test]
async fn addresses_must_be_checksummed_and_amounts_unsigned() {
    let h = TestHarness::new(0).await;
    let app = build_router(h.app_state());

    let mut body = price_body();
    body["sellToken"] = json!(WETH.to_lowercase());
    let response = app
        .clone()
        .oneshot(post_json("/v1/price", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_FAILED");

    let mut body = price_body();
    body["sellAmount"] = json!("1.5");
    let response = app
        .clone()
        .oneshot(post_json("/v1/price", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "INVALID_AMOUNT");

    let mut body = price_body();
    body["buyToken"] = json!(WETH);
    let response = app.oneshot(post_json("/v1/price", body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_FAILED");
}

#[tokio::test]
async fn upstream_failures_map_to_bad_gateway() {
    let h = TestHarness::new(0).await;
    h.pricing.fail.store(true, std::sync::atomic::Ordering::SeqCst);
    let app = build_router(h.app_state());

    let response = app.oneshot(post_json("/v1/price", price_body())).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = body_json(response).await;
    assert_eq!(body["code"], "PRICING_UPSTREAM_FAILED");
    assert_eq!(body["statusCode"], 502);
}

#[tokio::test]
async fn the_global_deadline_times_requests_out() {
    let mut h = TestHarness::new(0).await;
    h.global_timeout = std::time::Duration::from_millis(50);
    h.pricing
        .delay_ms
        .store(5_000, std::sync::atomic::Ordering::SeqCst);
    let app = build_router(h.app_state());

    let response = app.oneshot(post_json("/v1/price", price_body())).await.unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    let body = body_json(response).await;
    assert_eq!(body["code"], "REQUEST_TIMEOUT");
    assert_eq!(body["statusCode"], 504);
}

#[tokio::test]
async fn admin_surface_drives_the_hot_paths() {
    let h = TestHarness::new(0).await;
    let app = build_router(h.app_state());

    // pause via PUT /admin/config, observe the price path reject
    let response = app
        .clone()
        .oneshot(put_json(
            "/v1/admin/config",
            json!({"chainId": CHAIN_ID, "paused": true}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["paused"], true);

    let response = app
        .clone()
        .oneshot(post_json("/v1/price", price_body()))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["code"], "CHAIN_PAUSED");

    let response = app
        .clone()
        .oneshot(put_json(
            "/v1/admin/config",
            json!({"chainId": CHAIN_ID, "paused": false}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // disable the pair via the admin upsert, lowercase ordering is free
    let response = app
        .clone()
        .oneshot(post_json(
            "/v1/admin/pairs",
            json!({"chainId": CHAIN_ID, "tokenA": USDC, "tokenB": WETH, "enabled": false}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(post_json("/v1/price", price_body()))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["code"], "PAIR_NOT_ENABLED");

    let response = app
        .clone()
        .oneshot(get(&format!("/v1/admin/pairs?chainId={CHAIN_ID}")))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["pairs"].as_array().unwrap().len(), 1);
    assert_eq!(body["pairs"][0]["enabled"], false);
}

#[tokio::test]
async fn admin_strategy_lifecycle_over_http() {
    let h = TestHarness::new(0).await;
    let app = build_router(h.app_state());

    let response = app
        .clone()
        .oneshot(post_json(
            "/v1/admin/strategies",
            json!({
                "chainId": CHAIN_ID,
                "name": "wide-spread",
                "version": 2,
                "params": {"spreadBps": 30},
                "hash": format!("0x{}", "cd".repeat(32)),
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let created = body_json(response).await;
    assert_eq!(created["enabled"], true);
    let id = created["id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/v1/admin/strategies/{id}/activate"),
            json!({"chainId": CHAIN_ID}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // activating a strategy that does not exist on the chain is a 404
    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/v1/admin/strategies/{}/activate", uuid::Uuid::new_v4()),
            json!({"chainId": CHAIN_ID}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "STRATEGY_NOT_FOUND");

    // a bad hash never enters the catalog
    let response = app
        .clone()
        .oneshot(post_json(
            "/v1/admin/strategies",
            json!({
                "chainId": CHAIN_ID,
                "name": "bad-hash",
                "version": 1,
                "hash": "0x1234",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(get(&format!("/v1/admin/strategies?chainId={CHAIN_ID}")))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["strategies"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn admin_tokens_lists_what_the_pipeline_resolved() {
    let h = TestHarness::new(0).await;
    let app = build_router(h.app_state());

    // resolve both tokens through a price call first
    let response = app
        .clone()
        .oneshot(post_json("/v1/price", price_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(get(&format!("/v1/admin/tokens?chainId={CHAIN_ID}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let tokens = body["tokens"].as_array().unwrap();
    assert_eq!(tokens.len(), 2);
    let symbols: Vec<&str> = tokens
        .iter()
        .map(|t| t["symbol"].as_str().unwrap())
        .collect();
    assert!(symbols.contains(&"USDC"));
    assert!(symbols.contains(&"WETH"));
}
